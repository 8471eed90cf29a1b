//! Capture-Puffer für lokale Tracks
//!
//! Die Geräte-Threads schreiben hier hinein, der Medien-Encoder liest
//! heraus. Ist der zugehörige Track deaktiviert (Mute, Kamera aus), wird
//! Stille bzw. ein schwarzes Bild geschrieben.

use super::devices::SAMPLE_RATE;
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Frame Size in Samples (20ms @ 48kHz = 960 samples)
pub const FRAME_SIZE: usize = 960;

/// Buffer Size für Audio-Ring-Buffer
const RING_BUFFER_SIZE: usize = FRAME_SIZE * 10;

// ============================================================================
// AUDIO
// ============================================================================

/// Ring-Buffer für aufgenommenes Audio (Mono, 48kHz)
#[derive(Clone)]
pub struct CaptureBuffer {
    buffer: Arc<Mutex<HeapRb<f32>>>,
    enabled: Arc<AtomicBool>,
    /// Audio Level (0.0 - 1.0) des letzten Callbacks
    level: Arc<Mutex<f32>>,
}

impl CaptureBuffer {
    pub fn new(enabled: Arc<AtomicBool>) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(HeapRb::new(RING_BUFFER_SIZE))),
            enabled,
            level: Arc::new(Mutex::new(0.0)),
        }
    }

    /// Schreibt interleaved Samples eines Geräts in den Puffer.
    ///
    /// Mehrkanalig wird zu Mono gemittelt, fremde Sample Rates werden
    /// linear auf 48kHz gebracht. Ist der Ring voll, gehen die neuesten
    /// Samples verloren.
    pub fn write(&self, data: &[f32], channels: usize, source_rate: u32) {
        let mono = downmix(data, channels);
        let samples = resample(&mono, source_rate, SAMPLE_RATE);

        if samples.is_empty() {
            return;
        }

        let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        *self.level.lock() = rms.min(1.0);

        let muted = !self.enabled.load(Ordering::SeqCst);
        let mut buffer = self.buffer.lock();
        for sample in samples {
            let _ = buffer.try_push(if muted { 0.0 } else { sample });
        }
    }

    /// Liest einen Frame (20ms), falls genug Samples vorliegen
    pub fn read_frame(&self) -> Option<Vec<f32>> {
        let mut buffer = self.buffer.lock();
        if buffer.occupied_len() < FRAME_SIZE {
            return None;
        }
        let mut frame = Vec::with_capacity(FRAME_SIZE);
        for _ in 0..FRAME_SIZE {
            if let Some(sample) = buffer.try_pop() {
                frame.push(sample);
            }
        }
        Some(frame)
    }

    /// Eingangspegel vor dem Muting (für Pegelanzeigen)
    pub fn level(&self) -> f32 {
        *self.level.lock()
    }
}

impl std::fmt::Debug for CaptureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureBuffer")
            .field("occupied", &self.buffer.lock().occupied_len())
            .finish()
    }
}

fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Einfaches Linear-Resampling
fn resample(data: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || source_rate == 0 {
        return data.to_vec();
    }
    let ratio = target_rate as f32 / source_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

// ============================================================================
// VIDEO
// ============================================================================

/// Ein RGB-Bild (3 Bytes pro Pixel)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Hält das zuletzt aufgenommene Kamerabild
#[derive(Clone)]
pub struct FrameBuffer {
    latest: Arc<Mutex<Option<VideoFrame>>>,
    enabled: Arc<AtomicBool>,
}

impl FrameBuffer {
    pub fn new(enabled: Arc<AtomicBool>) -> Self {
        Self {
            latest: Arc::new(Mutex::new(None)),
            enabled,
        }
    }

    /// Ersetzt das letzte Bild; bei ausgeschalteter Kamera schwarz
    pub fn write(&self, width: u32, height: u32, mut rgb: Vec<u8>) {
        if !self.enabled.load(Ordering::SeqCst) {
            rgb.fill(0);
        }
        *self.latest.lock() = Some(VideoFrame { width, height, rgb });
    }

    pub fn latest(&self) -> Option<VideoFrame> {
        self.latest.lock().clone()
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let latest = self.latest.lock();
        f.debug_struct("FrameBuffer")
            .field("resolution", &latest.as_ref().map(|l| (l.width, l.height)))
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
