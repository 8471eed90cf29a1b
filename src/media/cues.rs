//! Audio Cues - Freizeichen und Klingelton
//!
//! Die Töne werden synthetisch erzeugt und über das Standard-
//! Ausgabegerät abgespielt. Fehlt ein Ausgabegerät, bleibt der Anruf
//! davon unberührt.

use super::devices::select_best_config;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::f32::consts::PI;

/// Hörbare Signale während des Verbindungsaufbaus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    /// Freizeichen beim Anrufer
    DialTone,
    /// Klingelton beim Angerufenen
    Ringtone,
}

impl Cue {
    /// Zwei überlagerte Frequenzen in Hz
    pub fn frequencies(self) -> (f32, f32) {
        match self {
            Cue::DialTone => (440.0, 480.0),
            Cue::Ringtone => (660.0, 880.0),
        }
    }

    /// Kadenz (an, aus) in Millisekunden
    pub fn cadence_ms(self) -> (u32, u32) {
        match self {
            Cue::DialTone => (2000, 4000),
            Cue::Ringtone => (1000, 2000),
        }
    }

    /// Sample zum Zeitpunkt `t` (Sekunden) im Bereich -0.25..=0.25
    pub fn sample_at(self, t: f32) -> f32 {
        let (on_ms, off_ms) = self.cadence_ms();
        let period = (on_ms + off_ms) as f32 / 1000.0;
        if t.rem_euclid(period) >= on_ms as f32 / 1000.0 {
            return 0.0;
        }
        let (f1, f2) = self.frequencies();
        0.125 * ((2.0 * PI * f1 * t).sin() + (2.0 * PI * f2 * t).sin())
    }
}

/// Abspielen und Stoppen der Cues
pub trait AudioCues: Send + Sync {
    fn play(&self, cue: Cue);
    fn stop(&self, cue: Cue);

    fn stop_all(&self) {
        self.stop(Cue::DialTone);
        self.stop(Cue::Ringtone);
    }
}

// ============================================================================
// CPAL CUES
// ============================================================================

/// Spielt Cues über cpal ab. Jeder laufende Cue besitzt einen Thread.
#[derive(Default)]
pub struct CpalCues {
    playing: Mutex<HashMap<Cue, std::sync::mpsc::Sender<()>>>,
}

impl CpalCues {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioCues for CpalCues {
    fn play(&self, cue: Cue) {
        self.stop(cue);

        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let spawned = std::thread::Builder::new()
            .name(format!("cue-{:?}", cue).to_lowercase())
            .spawn(move || match build_cue_stream(cue) {
                Ok(stream) => {
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => tracing::warn!("Cannot play {:?}: {}", cue, e),
            });

        match spawned {
            Ok(_) => {
                self.playing.lock().insert(cue, stop_tx);
            }
            Err(e) => tracing::warn!("Failed to spawn cue thread: {}", e),
        }
    }

    fn stop(&self, cue: Cue) {
        if let Some(stop_tx) = self.playing.lock().remove(&cue) {
            let _ = stop_tx.send(());
        }
    }
}

impl std::fmt::Debug for CpalCues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalCues")
            .field("playing", &self.playing.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

fn build_cue_stream(cue: Cue) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no audio output device".to_string())?;

    let configs = device
        .supported_output_configs()
        .map_err(|e| e.to_string())?;
    let config = select_best_config(configs.collect()).map_err(|e| e.to_string())?;

    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0 as f32;
    let mut position: u64 = 0;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = cue.sample_at(position as f32 / sample_rate);
                    position += 1;
                    for s in frame.iter_mut() {
                        *s = sample;
                    }
                }
            },
            |err| {
                tracing::error!("Audio playback error: {}", err);
            },
            None,
        )
        .map_err(|e| e.to_string())?;

    stream.play().map_err(|e| e.to_string())?;
    Ok(stream)
}

// ============================================================================
// TESTS
// ============================================================================
