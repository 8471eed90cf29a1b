//! Media Streams und Tracks
//!
//! Ein `MediaStream` bündelt lokale oder entfernte Tracks.
//! Jeder Track kann genau einmal gestoppt werden; danach ist er
//! nicht mehr "live". Das Stoppen gibt das zugrunde liegende Gerät frei
//! (Mikrofon, Kamera, RTP-Empfang).

use super::capture::{CaptureBuffer, FrameBuffer};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// TRACK KIND
// ============================================================================

/// Art eines Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

type StopHook = Box<dyn FnOnce() + Send>;

/// Datenquelle eines lokalen Tracks
#[derive(Debug, Clone)]
pub enum TrackSource {
    /// Mono-PCM mit 48kHz vom Mikrofon
    Pcm(CaptureBuffer),
    /// Letztes RGB-Bild der Kamera
    Frames(FrameBuffer),
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    /// Geteilt mit dem Capture-Callback, der bei `false` Stille bzw. Schwarz schreibt
    enabled: Arc<AtomicBool>,
    ended: AtomicBool,
    on_stop: Mutex<Option<StopHook>>,
    source: Mutex<Option<TrackSource>>,
}

// ============================================================================
// MEDIA TRACK
// ============================================================================

/// Ein einzelner Audio- oder Video-Track (geteilter Handle)
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Erstellt einen Track ohne Geräte-Ressource
    pub fn new(kind: TrackKind, id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                enabled: Arc::new(AtomicBool::new(true)),
                ended: AtomicBool::new(false),
                on_stop: Mutex::new(None),
                source: Mutex::new(None),
            }),
        }
    }

    /// Erstellt einen Track, dessen Ressource beim Stoppen freigegeben wird
    pub fn with_stop_hook<F>(kind: TrackKind, id: impl Into<String>, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let track = Self::new(kind, id);
        *track.inner.on_stop.lock() = Some(Box::new(hook));
        track
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Aktiviert/deaktiviert den Track (Mute bzw. Kamera aus)
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flag für den Capture-Thread, ohne den Track selbst festzuhalten
    pub(crate) fn enabled_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inner.enabled)
    }

    pub(crate) fn attach_source(&self, source: TrackSource) {
        *self.inner.source.lock() = Some(source);
    }

    /// Gepufferte Daten des Geräts (nur lokale Tracks)
    pub fn source(&self) -> Option<TrackSource> {
        self.inner.source.lock().clone()
    }

    /// `true` solange der Track weder gestoppt noch beendet wurde
    pub fn is_live(&self) -> bool {
        !self.inner.ended.load(Ordering::SeqCst)
    }

    /// Stoppt den Track und gibt die Ressource frei. Idempotent.
    pub fn stop(&self) {
        if self.inner.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(hook) = self.inner.on_stop.lock().take() {
            hook();
        }
        tracing::debug!("Track {} ({:?}) stopped", self.inner.id, self.inner.kind);
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

// ============================================================================
// MEDIA STREAM
// ============================================================================

/// Sammlung von Tracks. Klone teilen dieselbe Track-Liste, damit
/// entfernte Tracks nachträglich hinzugefügt werden können.
#[derive(Clone, Default)]
pub struct MediaStream {
    tracks: Arc<RwLock<Vec<MediaTrack>>>,
}

impl MediaStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tracks(tracks: Vec<MediaTrack>) -> Self {
        Self {
            tracks: Arc::new(RwLock::new(tracks)),
        }
    }

    pub fn add_track(&self, track: MediaTrack) {
        self.tracks.write().push(track);
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.read().clone()
    }

    pub fn audio_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Video)
    }

    fn tracks_of(&self, kind: TrackKind) -> Vec<MediaTrack> {
        self.tracks
            .read()
            .iter()
            .filter(|t| t.kind() == kind)
            .cloned()
            .collect()
    }

    /// Mindestens ein Track ist noch live
    pub fn has_live_track(&self) -> bool {
        self.tracks.read().iter().any(MediaTrack::is_live)
    }

    /// Stoppt jeden Track des Streams
    pub fn stop_all(&self) {
        for track in self.tracks.read().iter() {
            track.stop();
        }
    }

    /// Setzt `enabled` auf allen Tracks einer Art.
    /// Gibt `false` zurück wenn keine solchen Tracks existieren.
    pub fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        let tracks = self.tracks_of(kind);
        for track in &tracks {
            track.set_enabled(enabled);
        }
        !tracks.is_empty()
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tracks.read().iter()).finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_stop_runs_hook_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let track = MediaTrack::with_stop_hook(TrackKind::Audio, "mic", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(track.is_live());
        track.stop();
        track.stop();
        assert!(!track.is_live());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stream_shares_tracks_between_clones() {
        let stream = MediaStream::new();
        let clone = stream.clone();
        clone.add_track(MediaTrack::new(TrackKind::Video, "cam"));

        assert_eq!(stream.video_tracks().len(), 1);
        assert!(stream.has_live_track());

        stream.stop_all();
        assert!(!clone.has_live_track());
    }

    #[test]
    fn test_set_kind_enabled_without_tracks() {
        let stream = MediaStream::from_tracks(vec![MediaTrack::new(TrackKind::Audio, "mic")]);

        assert!(!stream.set_kind_enabled(TrackKind::Video, false));
        assert!(stream.set_kind_enabled(TrackKind::Audio, false));
        assert!(!stream.audio_tracks()[0].is_enabled());
    }
}
