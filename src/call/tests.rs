//! Tests für den Call Controller mit Fake-Transport, Fake-Geräten und
//! In-Memory Store. Die Uhr ist pausiert, Zeitgeber werden mit
//! `tokio::time::advance` ausgelöst.

use super::*;
use crate::config::CallTimings;
use crate::media::{AudioCues, Cue, MediaDevices, MediaError, MediaStream, MediaTrack, TrackKind};
use crate::services::{CallNotice, PresenceRegistry, Profile};
use crate::store::ClinicStore;
use crate::transport::{
    CallId, CallMetadata, ControlMessage, PeerAddress, PeerTransport, TransportError,
    TransportEvent, UserId,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

// ============================================================================
// FAKES
// ============================================================================

struct FakeTransport {
    event_tx: broadcast::Sender<TransportEvent>,
    address: Mutex<Option<PeerAddress>>,
    placed: Mutex<Vec<(PeerAddress, CallId, CallMetadata)>>,
    answered: Mutex<Vec<CallId>>,
    closed: Mutex<Vec<CallId>>,
    channels: Mutex<HashSet<PeerAddress>>,
    controls: Mutex<Vec<(PeerAddress, ControlMessage)>>,
    reconnects: AtomicUsize,
    fail_place: AtomicBool,
}

impl FakeTransport {
    fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            event_tx,
            address: Mutex::new(Some(PeerAddress::new("staff1-1000"))),
            placed: Mutex::new(Vec::new()),
            answered: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            channels: Mutex::new(HashSet::new()),
            controls: Mutex::new(Vec::new()),
            reconnects: AtomicUsize::new(0),
            fail_place: AtomicBool::new(false),
        }
    }

    fn emit(&self, event: TransportEvent) {
        self.event_tx.send(event).unwrap();
    }

    fn last_placed(&self) -> CallId {
        self.placed.lock().last().unwrap().1
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    fn local_address(&self) -> Option<PeerAddress> {
        self.address.lock().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.event_tx.subscribe()
    }

    async fn place_call(
        &self,
        to: &PeerAddress,
        _local: &MediaStream,
        metadata: CallMetadata,
    ) -> Result<CallId, TransportError> {
        if self.fail_place.load(Ordering::SeqCst) {
            return Err(TransportError::WebRTC("offer failed".to_string()));
        }
        let call_id = CallId::new();
        self.placed.lock().push((to.clone(), call_id, metadata));
        Ok(call_id)
    }

    async fn answer_call(&self, call_id: CallId, _local: &MediaStream) -> Result<(), TransportError> {
        self.answered.lock().push(call_id);
        Ok(())
    }

    async fn close_call(&self, call_id: CallId) {
        self.closed.lock().push(call_id);
    }

    async fn open_channel(&self, to: &PeerAddress) -> Result<(), TransportError> {
        self.channels.lock().insert(to.clone());
        Ok(())
    }

    fn is_channel_open(&self, to: &PeerAddress) -> bool {
        self.channels.lock().contains(to)
    }

    async fn send_control(
        &self,
        to: &PeerAddress,
        message: ControlMessage,
    ) -> Result<(), TransportError> {
        self.controls.lock().push((to.clone(), message));
        Ok(())
    }

    async fn close_channel(&self, to: &PeerAddress) {
        self.channels.lock().remove(to);
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeMedia {
    deny: AtomicBool,
    acquired: Mutex<Vec<MediaStream>>,
}

impl FakeMedia {
    fn last(&self) -> MediaStream {
        self.acquired.lock().last().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn acquire(&self, kind: CallKind) -> Result<MediaStream, MediaError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        let mut tracks = vec![MediaTrack::new(TrackKind::Audio, "mic")];
        if kind == CallKind::Video {
            tracks.push(MediaTrack::new(TrackKind::Video, "camera"));
        }
        let stream = MediaStream::from_tracks(tracks);
        self.acquired.lock().push(stream.clone());
        Ok(stream)
    }
}

#[derive(Default)]
struct FakeCues {
    playing: Mutex<HashSet<Cue>>,
}

impl FakeCues {
    fn is_playing(&self, cue: Cue) -> bool {
        self.playing.lock().contains(&cue)
    }
}

impl AudioCues for FakeCues {
    fn play(&self, cue: Cue) {
        self.playing.lock().insert(cue);
    }

    fn stop(&self, cue: Cue) {
        self.playing.lock().remove(&cue);
    }
}

// ============================================================================
// HARNESS
// ============================================================================

const REMOTE: &str = "client9";
const REMOTE_ADDRESS: &str = "client9-1700000000000";

struct Harness {
    handle: CallHandle,
    task: JoinHandle<()>,
    transport: Arc<FakeTransport>,
    media: Arc<FakeMedia>,
    cues: Arc<FakeCues>,
    store: Arc<ClinicStore>,
}

impl Harness {
    async fn new() -> Self {
        let transport = Arc::new(FakeTransport::new());
        let media = Arc::new(FakeMedia::default());
        let cues = Arc::new(FakeCues::default());
        let store = Arc::new(ClinicStore::open_in_memory().unwrap());

        store
            .publish(&UserId::new(REMOTE), &PeerAddress::new(REMOTE_ADDRESS))
            .await
            .unwrap();
        store
            .upsert_profile(&Profile {
                user_id: UserId::new(REMOTE),
                display_name: "Jordan".to_string(),
                avatar_url: None,
            })
            .unwrap();

        let deps = Collaborators {
            transport: transport.clone(),
            media: media.clone(),
            cues: cues.clone(),
            presence: store.clone(),
            conversations: store.clone(),
            profiles: store.clone(),
        };
        let (handle, task) =
            CallController::spawn(UserId::new("staff1"), deps, CallTimings::default());
        settle().await;

        Self {
            handle,
            task,
            transport,
            media,
            cues,
            store,
        }
    }

    fn state(&self) -> CallState {
        self.handle.snapshot().state
    }

    fn notices(&self) -> Vec<String> {
        self.store
            .messages_between(&UserId::new("staff1"), &UserId::new(REMOTE))
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect()
    }

    async fn send(&self, event: TransportEvent) {
        self.transport.emit(event);
        settle().await;
    }

    /// Ausgehender Anruf, der von der Gegenseite angenommen wurde
    async fn connected_call(&self, kind: CallKind) -> (CallId, MediaStream) {
        match kind {
            CallKind::Audio => self.handle.start_audio_call(UserId::new(REMOTE)).await,
            CallKind::Video => self.handle.start_video_call(UserId::new(REMOTE)).await,
        }
        .unwrap();

        let call_id = self.transport.last_placed();
        let remote = MediaStream::from_tracks(vec![MediaTrack::new(TrackKind::Audio, "remote")]);
        self.send(TransportEvent::RemoteStream {
            call_id,
            stream: remote.clone(),
        })
        .await;
        (call_id, remote)
    }

    async fn incoming(&self, from: &str, metadata: Option<CallMetadata>) -> CallId {
        let call_id = CallId::new();
        self.send(TransportEvent::IncomingCall {
            call_id,
            from: PeerAddress::new(from),
            metadata,
        })
        .await;
        call_id
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

// ============================================================================
// OUTGOING CALLS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dial_places_call_and_posts_notice() {
    let h = Harness::new().await;

    h.handle.start_video_call(UserId::new(REMOTE)).await.unwrap();

    let snapshot = h.handle.snapshot();
    assert_eq!(
        snapshot.state,
        CallState::Calling {
            kind: CallKind::Video
        }
    );
    assert!(snapshot.is_caller);
    assert!(snapshot.has_local_video);
    assert_eq!(snapshot.remote_address, Some(PeerAddress::new(REMOTE_ADDRESS)));
    assert_eq!(
        snapshot.remote_profile.map(|p| p.display_name).as_deref(),
        Some("Jordan")
    );

    let placed = h.transport.placed.lock().clone();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].0, PeerAddress::new(REMOTE_ADDRESS));
    assert_eq!(placed[0].2.caller_id, Some(UserId::new("staff1")));
    assert!(h
        .transport
        .is_channel_open(&PeerAddress::new(REMOTE_ADDRESS)));

    assert!(h.cues.is_playing(Cue::DialTone));
    assert_eq!(h.notices(), vec!["Video call started".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_remote_stream_connects_and_counts_duration() {
    let h = Harness::new().await;
    h.connected_call(CallKind::Audio).await;

    assert_eq!(
        h.state(),
        CallState::Connected {
            kind: CallKind::Audio
        }
    );
    assert!(!h.cues.is_playing(Cue::DialTone));
    assert!(h.handle.snapshot().has_remote_stream);

    for _ in 0..5 {
        advance(Duration::from_secs(1)).await;
    }
    assert_eq!(h.handle.snapshot().duration, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_no_answer_releases_media_and_resets() {
    let h = Harness::new().await;
    h.handle.start_audio_call(UserId::new(REMOTE)).await.unwrap();
    let call_id = h.transport.last_placed();
    let local = h.media.last();

    advance(Duration::from_secs(59)).await;
    assert!(h.state().is_active());

    advance(Duration::from_secs(1)).await;
    assert_eq!(h.state(), CallState::NoAnswer);
    assert!(!local.has_live_track());
    assert!(!h.cues.is_playing(Cue::DialTone));
    assert!(h.transport.closed.lock().contains(&call_id));
    assert_eq!(
        h.notices(),
        vec![
            "Audio call started".to_string(),
            "Missed audio call".to_string()
        ]
    );

    advance(Duration::from_secs(3)).await;
    assert_eq!(h.state(), CallState::Idle);
    assert_eq!(h.notices().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_presence_is_unavailable() {
    let h = Harness::new().await;

    h.handle
        .start_audio_call(UserId::new("nobody"))
        .await
        .unwrap();

    assert_eq!(h.state(), CallState::Unavailable);
    assert!(h.transport.placed.lock().is_empty());
    assert!(h.media.acquired.lock().is_empty());

    let notices = h
        .store
        .messages_between(&UserId::new("staff1"), &UserId::new("nobody"))
        .unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, "call_missed");
}

#[tokio::test(start_paused = true)]
async fn test_failed_offer_is_unavailable() {
    let h = Harness::new().await;
    h.transport.fail_place.store(true, Ordering::SeqCst);

    h.handle.start_audio_call(UserId::new(REMOTE)).await.unwrap();

    assert_eq!(h.state(), CallState::Unavailable);
    assert!(!h.media.last().has_live_track());
    assert_eq!(h.notices(), vec!["Missed audio call".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_media_denied_aborts_dial() {
    let h = Harness::new().await;
    h.media.deny.store(true, Ordering::SeqCst);

    h.handle.start_video_call(UserId::new(REMOTE)).await.unwrap();

    assert_eq!(h.state(), CallState::Idle);
    assert!(h.transport.placed.lock().is_empty());
    assert!(h.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_second_dial_is_ignored_while_active() {
    let h = Harness::new().await;
    h.handle.start_audio_call(UserId::new(REMOTE)).await.unwrap();
    h.handle.start_video_call(UserId::new(REMOTE)).await.unwrap();

    assert_eq!(h.transport.placed.lock().len(), 1);
    assert_eq!(h.media.acquired.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dial_without_open_transport_stays_idle() {
    let h = Harness::new().await;
    h.send(TransportEvent::Disconnected).await;
    let mut events = h.handle.subscribe();

    h.handle.start_audio_call(UserId::new(REMOTE)).await.unwrap();

    assert_eq!(h.state(), CallState::Idle);
    assert!(matches!(events.try_recv(), Ok(CallEvent::Error(_))));
}

#[tokio::test(start_paused = true)]
async fn test_remote_decline_ends_outgoing_call() {
    let h = Harness::new().await;
    h.handle.start_audio_call(UserId::new(REMOTE)).await.unwrap();

    h.send(TransportEvent::Control {
        from: PeerAddress::new(REMOTE_ADDRESS),
        message: ControlMessage::DeclineCall,
    })
    .await;

    assert_eq!(h.state(), CallState::Ended);
    assert_eq!(h.notices(), vec!["Audio call started".to_string()]);
}

// ============================================================================
// INCOMING CALLS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_incoming_call_rings_with_caller_from_metadata() {
    let h = Harness::new().await;
    h.incoming(
        "somebody-42",
        Some(CallMetadata {
            kind: CallKind::Video,
            caller_id: Some(UserId::new(REMOTE)),
        }),
    )
    .await;

    let snapshot = h.handle.snapshot();
    assert_eq!(
        snapshot.state,
        CallState::Ringing {
            kind: CallKind::Video
        }
    );
    assert!(!snapshot.is_caller);
    assert_eq!(snapshot.caller_id, Some(UserId::new(REMOTE)));
    assert_eq!(
        snapshot.remote_profile.map(|p| p.display_name).as_deref(),
        Some("Jordan")
    );
    assert!(h.cues.is_playing(Cue::Ringtone));
}

#[tokio::test(start_paused = true)]
async fn test_incoming_call_without_metadata_uses_address_hint() {
    let h = Harness::new().await;
    h.incoming("client9-123", None).await;

    let snapshot = h.handle.snapshot();
    assert_eq!(
        snapshot.state,
        CallState::Ringing {
            kind: CallKind::Audio
        }
    );
    assert_eq!(snapshot.caller_id, Some(UserId::new(REMOTE)));
}

#[tokio::test(start_paused = true)]
async fn test_accept_connects_incoming_call() {
    let h = Harness::new().await;
    let call_id = h.incoming(REMOTE_ADDRESS, None).await;

    h.handle.accept_call().await.unwrap();

    assert_eq!(
        h.state(),
        CallState::Connected {
            kind: CallKind::Audio
        }
    );
    assert_eq!(*h.transport.answered.lock(), vec![call_id]);
    assert!(!h.cues.is_playing(Cue::Ringtone));

    // Kein No-Answer nach dem Annehmen
    let remote = MediaStream::from_tracks(vec![MediaTrack::new(TrackKind::Audio, "remote")]);
    h.send(TransportEvent::RemoteStream {
        call_id,
        stream: remote,
    })
    .await;
    for _ in 0..61 {
        advance(Duration::from_secs(1)).await;
    }
    assert!(h.state().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_accept_without_media_drops_call() {
    let h = Harness::new().await;
    let call_id = h.incoming(REMOTE_ADDRESS, None).await;
    h.media.deny.store(true, Ordering::SeqCst);

    h.handle.accept_call().await.unwrap();

    assert_eq!(h.state(), CallState::Idle);
    assert!(h.transport.closed.lock().contains(&call_id));
    assert!(!h.cues.is_playing(Cue::Ringtone));
}

#[tokio::test(start_paused = true)]
async fn test_decline_notifies_caller_over_open_channel() {
    let h = Harness::new().await;
    let call_id = h.incoming(REMOTE_ADDRESS, None).await;
    h.transport
        .channels
        .lock()
        .insert(PeerAddress::new(REMOTE_ADDRESS));

    h.handle.decline_call().await.unwrap();

    assert_eq!(h.state(), CallState::Ended);
    assert_eq!(
        *h.transport.controls.lock(),
        vec![(PeerAddress::new(REMOTE_ADDRESS), ControlMessage::DeclineCall)]
    );
    assert!(h.transport.closed.lock().contains(&call_id));
    assert!(!h.cues.is_playing(Cue::Ringtone));
    assert!(h.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_incoming_call_times_out() {
    let h = Harness::new().await;
    h.incoming(REMOTE_ADDRESS, None).await;

    advance(Duration::from_secs(60)).await;

    assert_eq!(h.state(), CallState::NoAnswer);
    assert!(!h.cues.is_playing(Cue::Ringtone));
    assert!(h.notices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_incoming_call_while_busy_is_closed() {
    let h = Harness::new().await;
    h.connected_call(CallKind::Audio).await;

    let other = h.incoming("client7-1", None).await;

    assert!(h.state().is_connected());
    assert!(h.transport.closed.lock().contains(&other));
    assert_eq!(h.handle.snapshot().caller_id, Some(UserId::new(REMOTE)));
}

// ============================================================================
// ENDING CALLS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_end_call_releases_everything() {
    let h = Harness::new().await;
    let (call_id, _) = h.connected_call(CallKind::Video).await;
    let local = h.media.last();

    h.handle.end_call().await.unwrap();

    assert_eq!(h.state(), CallState::Idle);
    assert!(!local.has_live_track());
    assert!(h.transport.closed.lock().contains(&call_id));
    assert_eq!(
        *h.transport.controls.lock(),
        vec![(PeerAddress::new(REMOTE_ADDRESS), ControlMessage::EndCall)]
    );
    assert!(!h
        .transport
        .is_channel_open(&PeerAddress::new(REMOTE_ADDRESS)));

    // Keine Zeitgeber mehr aktiv
    advance(Duration::from_secs(120)).await;
    assert_eq!(h.state(), CallState::Idle);
    assert_eq!(h.handle.snapshot().duration, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_remote_end_call_shows_banner_then_idle() {
    let h = Harness::new().await;
    h.connected_call(CallKind::Audio).await;

    h.send(TransportEvent::Control {
        from: PeerAddress::new(REMOTE_ADDRESS),
        message: ControlMessage::EndCall,
    })
    .await;
    assert_eq!(h.state(), CallState::Ended);

    advance(Duration::from_secs(3)).await;
    assert_eq!(h.state(), CallState::Idle);
}

/// Der Abschluss-Zustand bleibt bis genau zur Reset-Verzögerung sichtbar
async fn assert_banner_until_reset(h: &Harness, terminal: CallState) {
    assert_eq!(h.state(), terminal);

    advance(Duration::from_millis(2999)).await;
    assert_eq!(h.state(), terminal);

    advance(Duration::from_millis(1)).await;
    assert_eq!(h.state(), CallState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_ended_banner_lasts_exactly_reset_delay() {
    let h = Harness::new().await;
    h.connected_call(CallKind::Video).await;

    h.send(TransportEvent::Control {
        from: PeerAddress::new(REMOTE_ADDRESS),
        message: ControlMessage::EndCall,
    })
    .await;

    assert_banner_until_reset(&h, CallState::Ended).await;
}

#[tokio::test(start_paused = true)]
async fn test_no_answer_banner_lasts_exactly_reset_delay() {
    let h = Harness::new().await;
    h.handle.start_audio_call(UserId::new(REMOTE)).await.unwrap();

    advance(Duration::from_secs(60)).await;

    assert_banner_until_reset(&h, CallState::NoAnswer).await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_banner_lasts_exactly_reset_delay() {
    let h = Harness::new().await;
    h.connected_call(CallKind::Audio).await;

    h.send(TransportEvent::Disconnected).await;

    assert_banner_until_reset(&h, CallState::Disconnected).await;
}

#[tokio::test(start_paused = true)]
async fn test_control_from_other_peer_is_ignored() {
    let h = Harness::new().await;
    h.connected_call(CallKind::Audio).await;

    h.send(TransportEvent::Control {
        from: PeerAddress::new("client7-1"),
        message: ControlMessage::EndCall,
    })
    .await;

    assert!(h.state().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_call_closed_by_transport_ends_call() {
    let h = Harness::new().await;
    let (call_id, _) = h.connected_call(CallKind::Audio).await;
    let local = h.media.last();

    h.send(TransportEvent::CallClosed { call_id }).await;

    assert_eq!(h.state(), CallState::Ended);
    assert!(!local.has_live_track());
}

#[tokio::test(start_paused = true)]
async fn test_call_error_is_unavailable() {
    let h = Harness::new().await;
    h.handle.start_audio_call(UserId::new(REMOTE)).await.unwrap();
    let call_id = h.transport.last_placed();

    h.send(TransportEvent::CallError {
        call_id,
        message: "ice failed".to_string(),
    })
    .await;

    assert_eq!(h.state(), CallState::Unavailable);
}

#[tokio::test(start_paused = true)]
async fn test_dismiss_skips_banner() {
    let h = Harness::new().await;
    h.connected_call(CallKind::Audio).await;
    h.send(TransportEvent::Control {
        from: PeerAddress::new(REMOTE_ADDRESS),
        message: ControlMessage::EndCall,
    })
    .await;

    h.handle.dismiss().await.unwrap();
    assert_eq!(h.state(), CallState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_new_dial_supersedes_banner() {
    let h = Harness::new().await;
    h.handle.start_audio_call(UserId::new("nobody")).await.unwrap();
    assert_eq!(h.state(), CallState::Unavailable);

    advance(Duration::from_secs(1)).await;
    h.handle.start_audio_call(UserId::new(REMOTE)).await.unwrap();

    // Der alte Reset-Zeitgeber darf den neuen Anruf nicht beenden
    advance(Duration::from_secs(5)).await;
    assert_eq!(
        h.state(),
        CallState::Calling {
            kind: CallKind::Audio
        }
    );
}

// ============================================================================
// LIVENESS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dead_remote_media_ends_call_after_recovery() {
    let h = Harness::new().await;
    let (_, remote) = h.connected_call(CallKind::Audio).await;

    for track in remote.tracks() {
        track.stop();
    }

    advance(Duration::from_secs(10)).await;
    assert_eq!(
        h.state(),
        CallState::Connecting {
            kind: CallKind::Audio
        }
    );

    advance(Duration::from_secs(10)).await;
    assert_eq!(h.state(), CallState::Ended);
    assert!(!h.media.last().has_live_track());
}

#[tokio::test(start_paused = true)]
async fn test_recovered_media_reconnects() {
    let h = Harness::new().await;
    let (_, remote) = h.connected_call(CallKind::Audio).await;

    for track in remote.tracks() {
        track.stop();
    }
    advance(Duration::from_secs(10)).await;
    assert!(matches!(h.state(), CallState::Connecting { .. }));

    remote.add_track(MediaTrack::new(TrackKind::Audio, "remote-2"));
    advance(Duration::from_secs(10)).await;
    assert!(h.state().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_healthy_call_survives_liveness_check() {
    let h = Harness::new().await;
    h.connected_call(CallKind::Video).await;

    advance(Duration::from_secs(30)).await;
    assert!(h.state().is_connected());
}

// ============================================================================
// TOGGLES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_toggle_mute_flips_audio_tracks() {
    let h = Harness::new().await;
    h.connected_call(CallKind::Audio).await;
    let local = h.media.last();

    h.handle.toggle_mute().await.unwrap();
    assert!(h.handle.snapshot().is_muted);
    assert!(local.audio_tracks().iter().all(|t| !t.is_enabled()));

    h.handle.toggle_mute().await.unwrap();
    assert!(!h.handle.snapshot().is_muted);
    assert!(local.audio_tracks().iter().all(|t| t.is_enabled()));
}

#[tokio::test(start_paused = true)]
async fn test_toggle_video_without_camera_track_is_noop() {
    let h = Harness::new().await;
    h.connected_call(CallKind::Audio).await;

    h.handle.toggle_video().await.unwrap();
    assert!(!h.handle.snapshot().is_video_off);
}

#[tokio::test(start_paused = true)]
async fn test_toggles_without_call_are_noop() {
    let h = Harness::new().await;

    h.handle.toggle_mute().await.unwrap();
    h.handle.toggle_video().await.unwrap();

    let snapshot = h.handle.snapshot();
    assert!(!snapshot.is_muted);
    assert!(!snapshot.is_video_off);
}

// ============================================================================
// TRANSPORT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_open_publishes_presence() {
    let h = Harness::new().await;
    let address = PeerAddress::new("staff1-2000");

    h.send(TransportEvent::Open {
        address: address.clone(),
    })
    .await;

    assert_eq!(
        h.store.lookup(&UserId::new("staff1")).await.unwrap(),
        Some(address.clone())
    );
    assert_eq!(h.handle.snapshot().local_address, Some(address));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_call_reconnects_once() {
    let h = Harness::new().await;
    h.connected_call(CallKind::Audio).await;
    let local = h.media.last();

    h.send(TransportEvent::Disconnected).await;
    assert_eq!(h.state(), CallState::Disconnected);
    assert!(!local.has_live_track());
    assert_eq!(h.transport.reconnects.load(Ordering::SeqCst), 1);

    h.send(TransportEvent::Disconnected).await;
    assert_eq!(h.transport.reconnects.load(Ordering::SeqCst), 1);

    h.send(TransportEvent::Open {
        address: PeerAddress::new("staff1-3000"),
    })
    .await;
    h.send(TransportEvent::Disconnected).await;
    assert_eq!(h.transport.reconnects.load(Ordering::SeqCst), 2);

    advance(Duration::from_secs(3)).await;
    assert_eq!(h.state(), CallState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_closed_controller_rejects_commands() {
    let h = Harness::new().await;
    h.task.abort();
    settle().await;

    assert_eq!(
        h.handle.accept_call().await,
        Err(CallError::ControllerClosed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_state_events_are_broadcast() {
    let h = Harness::new().await;
    let mut events = h.handle.subscribe();

    h.handle.start_audio_call(UserId::new(REMOTE)).await.unwrap();

    let mut states = Vec::new();
    let mut notices = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            CallEvent::StateChanged(state) => states.push(state),
            CallEvent::NoticePosted { notice, .. } => notices.push(notice),
            CallEvent::Error(_) => {}
        }
    }
    assert_eq!(
        states,
        vec![CallState::Calling {
            kind: CallKind::Audio
        }]
    );
    assert_eq!(notices, vec![CallNotice::Placed(CallKind::Audio)]);
}
