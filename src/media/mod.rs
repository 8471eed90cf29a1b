//! Media Module - lokale Geräte, Tracks und Audio Cues
//!
//! Dieses Modul verwaltet:
//! - Mikrofon-Zugriff über cpal, Kamera-Zugriff über nokhwa
//! - Capture-Puffer, die Mute und Kamera-aus respektieren
//! - Media Streams mit explizit stoppbaren Tracks
//! - Freizeichen und Klingelton

mod capture;
mod cues;
mod devices;
mod stream;

pub use capture::{CaptureBuffer, FrameBuffer, VideoFrame, FRAME_SIZE};
pub use cues::{AudioCues, Cue, CpalCues};
pub use devices::{MediaDevices, MediaError, SystemDevices, SAMPLE_RATE};
pub use stream::{MediaStream, MediaTrack, TrackKind, TrackSource};
