//! Lokale Medien-Geräte
//!
//! Mikrofon über cpal, Kamera über nokhwa. Weder ein cpal `Stream` noch
//! eine nokhwa `Camera` ist `Send`, daher lebt jedes Gerät in einem
//! eigenen Thread, der beim Stoppen (oder Verwerfen) des Tracks endet.

use super::capture::{CaptureBuffer, FrameBuffer};
use super::stream::{MediaStream, MediaTrack, TrackKind, TrackSource};
use crate::call::CallKind;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig, SupportedStreamConfigRange};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::mpsc::{self, TryRecvError};
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate (48kHz ist der Standard für beste Qualität)
pub const SAMPLE_RATE: u32 = 48000;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Media permission denied")]
    PermissionDenied,

    #[error("No audio input device found")]
    NoInputDevice,

    #[error("No camera available")]
    NoCamera,

    #[error("Camera error: {0}")]
    CameraError(String),

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

// ============================================================================
// MEDIA DEVICES
// ============================================================================

/// Zugriff auf lokale Medien-Geräte
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Fordert lokale Medien an: nur Audio oder Audio + Video
    async fn acquire(&self, kind: CallKind) -> Result<MediaStream, MediaError>;
}

/// Standard-Mikrofon und erste Kamera des Systems
#[derive(Debug, Default)]
pub struct SystemDevices {
    camera_index: u32,
}

impl SystemDevices {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaDevices for SystemDevices {
    async fn acquire(&self, kind: CallKind) -> Result<MediaStream, MediaError> {
        let microphone = open_microphone().await?;

        if kind == CallKind::Audio {
            return Ok(MediaStream::from_tracks(vec![microphone]));
        }

        match open_camera(self.camera_index).await {
            Ok(camera) => Ok(MediaStream::from_tracks(vec![microphone, camera])),
            Err(e) => {
                microphone.stop();
                Err(e)
            }
        }
    }
}

// ============================================================================
// MICROPHONE
// ============================================================================

/// Öffnet das Standard-Mikrofon in einem eigenen Thread
async fn open_microphone() -> Result<MediaTrack, MediaError> {
    let (ready_tx, ready_rx) = oneshot::channel::<Result<String, MediaError>>();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let track = MediaTrack::with_stop_hook(
        TrackKind::Audio,
        format!("mic-{}", uuid::Uuid::new_v4()),
        move || {
            let _ = stop_tx.send(());
        },
    );
    let capture = CaptureBuffer::new(track.enabled_handle());
    track.attach_source(TrackSource::Pcm(capture.clone()));

    std::thread::Builder::new()
        .name("mic-capture".to_string())
        .spawn(move || {
            let stream = match build_capture_stream(capture) {
                Ok((name, stream)) => {
                    let _ = ready_tx.send(Ok(name));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Blockiert bis der Track gestoppt oder verworfen wird
            let _ = stop_rx.recv();
            drop(stream);
            tracing::info!("Microphone released");
        })
        .map_err(|e| MediaError::StreamBuildError(e.to_string()))?;

    let device_name = ready_rx
        .await
        .map_err(|_| MediaError::StreamBuildError("capture thread exited".to_string()))??;

    tracing::info!("Microphone acquired: {}", device_name);
    Ok(track)
}

fn build_capture_stream(capture: CaptureBuffer) -> Result<(String, cpal::Stream), MediaError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(MediaError::NoInputDevice)?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let config = find_best_input_config(&device)?;

    tracing::info!(
        "Starting audio capture: {} Hz, {} channels",
        config.sample_rate.0,
        config.channels
    );

    let channels = config.channels as usize;
    let source_rate = config.sample_rate.0;

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                capture.write(data, channels, source_rate);
            },
            |err| {
                tracing::error!("Audio capture error: {}", err);
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => MediaError::PermissionDenied,
            other => MediaError::StreamBuildError(other.to_string()),
        })?;

    stream
        .play()
        .map_err(|e| MediaError::StreamPlayError(e.to_string()))?;

    Ok((name, stream))
}

fn find_best_input_config(device: &Device) -> Result<StreamConfig, MediaError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| MediaError::UnsupportedConfig(e.to_string()))?;

    select_best_config(configs.collect())
}

/// Wählt die beste Konfiguration aus einer Liste
///
/// Priorität: 48kHz > andere, F32 > andere
pub(crate) fn select_best_config(
    configs: Vec<SupportedStreamConfigRange>,
) -> Result<StreamConfig, MediaError> {
    let target_rate = cpal::SampleRate(SAMPLE_RATE);
    let supports_target =
        |c: &SupportedStreamConfigRange| c.min_sample_rate() <= target_rate && c.max_sample_rate() >= target_rate;

    if let Some(config) = configs
        .iter()
        .find(|c| supports_target(c) && c.sample_format() == SampleFormat::F32)
    {
        return Ok(config.clone().with_sample_rate(target_rate).into());
    }

    if let Some(config) = configs
        .iter()
        .find(|c| c.sample_format() == SampleFormat::F32)
    {
        let rate = if supports_target(config) {
            target_rate
        } else {
            config.max_sample_rate()
        };
        return Ok(config.clone().with_sample_rate(rate).into());
    }

    Err(MediaError::UnsupportedConfig(
        "No f32 audio configuration found".to_string(),
    ))
}

// ============================================================================
// CAMERA
// ============================================================================

/// Öffnet eine Kamera in einem eigenen Thread.
///
/// Der Thread liest Bilder bis der Track gestoppt wird und legt das
/// jeweils letzte im `FrameBuffer` des Tracks ab.
async fn open_camera(index: u32) -> Result<MediaTrack, MediaError> {
    let (ready_tx, ready_rx) = oneshot::channel::<Result<String, MediaError>>();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let track = MediaTrack::with_stop_hook(
        TrackKind::Video,
        format!("camera-{}", uuid::Uuid::new_v4()),
        move || {
            let _ = stop_tx.send(());
        },
    );
    let frames = FrameBuffer::new(track.enabled_handle());
    track.attach_source(TrackSource::Frames(frames.clone()));

    std::thread::Builder::new()
        .name("camera-capture".to_string())
        .spawn(move || {
            let mut camera = match start_camera(index) {
                Ok(camera) => {
                    let _ = ready_tx.send(Ok(camera.info().human_name()));
                    camera
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Stop-Signal oder verworfener Track beenden die Schleife
            while let Err(TryRecvError::Empty) = stop_rx.try_recv() {
                let buffer = match camera.frame() {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        tracing::error!("Camera capture error: {}", e);
                        break;
                    }
                };
                match buffer.decode_image::<RgbFormat>() {
                    Ok(image) => frames.write(image.width(), image.height(), image.into_raw()),
                    Err(e) => tracing::warn!("Dropping undecodable camera frame: {}", e),
                }
            }

            if let Err(e) = camera.stop_stream() {
                tracing::warn!("Failed to stop camera stream: {}", e);
            }
            tracing::info!("Camera released");
        })
        .map_err(|e| MediaError::CameraError(e.to_string()))?;

    let camera_name = ready_rx
        .await
        .map_err(|_| MediaError::CameraError("camera thread exited".to_string()))??;

    tracing::info!("Camera acquired: {}", camera_name);
    Ok(track)
}

fn start_camera(index: u32) -> Result<Camera, MediaError> {
    let cameras =
        nokhwa::query(ApiBackend::Auto).map_err(|e| MediaError::CameraError(e.to_string()))?;
    if cameras.is_empty() {
        return Err(MediaError::NoCamera);
    }

    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = Camera::new(CameraIndex::Index(index), requested)
        .map_err(|e| MediaError::CameraError(e.to_string()))?;

    camera
        .open_stream()
        .map_err(|e| MediaError::CameraError(e.to_string()))?;

    tracing::info!(
        "Starting camera capture: {} @ {} fps",
        camera.resolution(),
        camera.frame_rate()
    );
    Ok(camera)
}
