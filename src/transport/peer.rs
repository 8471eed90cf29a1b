//! WebRTC Peer Transport
//!
//! Eine Peer Connection pro Anruf. SDP und ICE Candidates laufen über
//! den SignalingClient, ebenso der Datenkanal für Steuer-Nachrichten.
//! Entfernte Tracks werden als `MediaTrack` abgebildet, die enden sobald
//! ihr RTP-Empfang abbricht.

use super::address::{PeerAddress, UserId};
use super::messages::{CallId, CallMetadata, ClientMessage, ControlMessage};
use super::signaling::{SignalingClient, SignalingEvent};
use super::{PeerTransport, TransportError, TransportEvent};
use crate::call::CallKind;
use crate::crypto::SessionKey;
use crate::media::{MediaStream, MediaTrack, TrackKind, SAMPLE_RATE};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// STUN/TURN Server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl From<&IceServer> for RTCIceServer {
    fn from(server: &IceServer) -> Self {
        RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone(),
            credential: server.credential.clone(),
            ..Default::default()
        }
    }
}

/// Standard STUN Server Konfiguration
pub fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
        ],
        username: String::new(),
        credential: String::new(),
    }]
}

// ============================================================================
// CALL LEG
// ============================================================================

/// Zustand eines einzelnen Anrufs
struct CallLeg {
    remote: PeerAddress,
    pc: Option<Arc<RTCPeerConnection>>,
    /// SDP Offer eines eingehenden Anrufs bis zur Annahme
    pending_offer: Option<String>,
    /// ICE Candidates die vor der Remote Description eintreffen
    pending_candidates: Vec<String>,
    remote_stream: MediaStream,
}

impl CallLeg {
    fn new(remote: PeerAddress) -> Self {
        Self {
            remote,
            pc: None,
            pending_offer: None,
            pending_candidates: Vec::new(),
            remote_stream: MediaStream::new(),
        }
    }
}

/// Von Transport und Event-Pump geteilter Zustand
struct Shared {
    signaling: Arc<SignalingClient>,
    ice_servers: Vec<IceServer>,
    calls: Mutex<HashMap<CallId, CallLeg>>,
    channels: Mutex<HashSet<PeerAddress>>,
    event_tx: broadcast::Sender<TransportEvent>,
}

// ============================================================================
// WEBRTC TRANSPORT
// ============================================================================

/// Peer Transport auf Basis von WebSocket-Signaling und WebRTC
pub struct WebRtcTransport {
    user_id: UserId,
    shared: Arc<Shared>,
    session_address: Mutex<Option<PeerAddress>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl WebRtcTransport {
    /// Erstellt den Transport. Die Verbindung wird erst mit `open()` aufgebaut.
    pub fn new(
        ws_url: Url,
        user_id: UserId,
        key: Arc<SessionKey>,
        ice_servers: Vec<IceServer>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let signaling = Arc::new(SignalingClient::new(ws_url, user_id.clone(), key));

        let shared = Arc::new(Shared {
            signaling,
            ice_servers,
            calls: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashSet::new()),
            event_tx,
        });

        let signaling_rx = shared.signaling.subscribe();
        let pump = tokio::spawn(Shared::pump(Arc::clone(&shared), signaling_rx));

        Self {
            user_id,
            shared,
            session_address: Mutex::new(None),
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Öffnet den Transport unter einer neuen Session-Adresse
    pub async fn open(&self) -> Result<PeerAddress, TransportError> {
        let address = PeerAddress::for_session(&self.user_id, Utc::now());
        *self.session_address.lock() = Some(address.clone());

        self.shared
            .signaling
            .connect_and_register(address.clone())
            .await?;
        Ok(address)
    }

    /// Schließt alle Anrufe und die Signaling-Verbindung (Logout)
    pub async fn shutdown(&self) {
        let call_ids: Vec<CallId> = self.shared.calls.lock().keys().copied().collect();
        for call_id in call_ids {
            self.close_call(call_id).await;
        }
        self.shared.channels.lock().clear();
        self.shared.signaling.disconnect();

        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        tracing::info!("Peer transport shut down");
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    fn local_address(&self) -> Option<PeerAddress> {
        self.shared.signaling.address()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.event_tx.subscribe()
    }

    async fn place_call(
        &self,
        to: &PeerAddress,
        local: &MediaStream,
        metadata: CallMetadata,
    ) -> Result<CallId, TransportError> {
        let from = self.local_address().ok_or(TransportError::NotOpen)?;
        let call_id = CallId::new();

        let mut leg = CallLeg::new(to.clone());
        let pc = Arc::clone(&self.shared)
            .create_peer_connection(call_id, to.clone(), leg.remote_stream.clone())
            .await?;

        add_local_tracks(&pc, local, metadata.kind).await?;

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::WebRTC(e.to_string()))?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(|e| TransportError::WebRTC(e.to_string()))?;

        // Vor dem Senden speichern, damit das Answer den Anruf findet
        leg.pc = Some(Arc::clone(&pc));
        self.shared.calls.lock().insert(call_id, leg);

        let sent = self.shared.signaling.send(ClientMessage::Offer {
            from_peer_id: from,
            to_peer_id: to.clone(),
            call_id,
            sdp: offer.sdp,
            metadata,
        });

        if let Err(e) = sent {
            self.shared.calls.lock().remove(&call_id);
            let _ = pc.close().await;
            return Err(e.into());
        }

        tracing::info!("Placed call {} to {}", call_id, to);
        Ok(call_id)
    }

    async fn answer_call(
        &self,
        call_id: CallId,
        local: &MediaStream,
    ) -> Result<(), TransportError> {
        let from = self.local_address().ok_or(TransportError::NotOpen)?;

        let (remote, offer_sdp, remote_stream) = {
            let mut calls = self.shared.calls.lock();
            let leg = calls
                .get_mut(&call_id)
                .ok_or(TransportError::UnknownCall(call_id))?;
            let offer = leg
                .pending_offer
                .take()
                .ok_or_else(|| TransportError::InvalidSdp("no pending offer".to_string()))?;
            (leg.remote.clone(), offer, leg.remote_stream.clone())
        };

        let pc = Arc::clone(&self.shared)
            .create_peer_connection(call_id, remote.clone(), remote_stream)
            .await?;

        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| TransportError::InvalidSdp(e.to_string()))?;
        pc.set_remote_description(offer)
            .await
            .map_err(|e| TransportError::WebRTC(e.to_string()))?;

        let kind = if local.video_tracks().is_empty() {
            CallKind::Audio
        } else {
            CallKind::Video
        };
        add_local_tracks(&pc, local, kind).await?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::WebRTC(e.to_string()))?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(|e| TransportError::WebRTC(e.to_string()))?;

        let queued = self.shared.calls.lock().get_mut(&call_id).map(|leg| {
            leg.pc = Some(Arc::clone(&pc));
            std::mem::take(&mut leg.pending_candidates)
        });

        // Während des Aufbaus von der Gegenseite geschlossen
        let Some(queued) = queued else {
            let _ = pc.close().await;
            return Err(TransportError::UnknownCall(call_id));
        };
        add_candidates(&pc, queued).await;

        self.shared.signaling.send(ClientMessage::Answer {
            from_peer_id: from,
            to_peer_id: remote,
            call_id,
            sdp: answer.sdp,
        })?;

        tracing::info!("Answered call {}", call_id);
        Ok(())
    }

    async fn close_call(&self, call_id: CallId) {
        let leg = self.shared.calls.lock().remove(&call_id);
        let Some(leg) = leg else {
            return;
        };

        if let Some(pc) = leg.pc {
            if let Err(e) = pc.close().await {
                tracing::warn!("Failed to close peer connection: {}", e);
            }
        }
        leg.remote_stream.stop_all();

        if let Some(from) = self.local_address() {
            let _ = self.shared.signaling.send(ClientMessage::Hangup {
                from_peer_id: from,
                to_peer_id: leg.remote,
                call_id,
            });
        }
        tracing::info!("Closed call {}", call_id);
    }

    async fn open_channel(&self, to: &PeerAddress) -> Result<(), TransportError> {
        let from = self.local_address().ok_or(TransportError::NotOpen)?;
        self.shared.signaling.send(ClientMessage::ChannelOpen {
            from_peer_id: from,
            to_peer_id: to.clone(),
        })?;
        self.shared.channels.lock().insert(to.clone());
        Ok(())
    }

    fn is_channel_open(&self, to: &PeerAddress) -> bool {
        self.shared.signaling.is_connected() && self.shared.channels.lock().contains(to)
    }

    async fn send_control(
        &self,
        to: &PeerAddress,
        message: ControlMessage,
    ) -> Result<(), TransportError> {
        if !self.is_channel_open(to) {
            return Err(TransportError::ChannelClosed(to.clone()));
        }
        let from = self.local_address().ok_or(TransportError::NotOpen)?;
        self.shared.signaling.send(ClientMessage::ChannelData {
            from_peer_id: from,
            to_peer_id: to.clone(),
            payload: message,
        })?;
        Ok(())
    }

    async fn close_channel(&self, to: &PeerAddress) {
        if !self.shared.channels.lock().remove(to) {
            return;
        }
        if let Some(from) = self.local_address() {
            let _ = self.shared.signaling.send(ClientMessage::ChannelClose {
                from_peer_id: from,
                to_peer_id: to.clone(),
            });
        }
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let address = self
            .session_address
            .lock()
            .clone()
            .ok_or(TransportError::NotOpen)?;

        tracing::info!("Reconnecting as {}", address);
        self.shared.signaling.connect_and_register(address).await?;
        Ok(())
    }
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("user_id", &self.user_id)
            .field("signaling", &self.shared.signaling)
            .field("calls", &self.shared.calls.lock().len())
            .finish()
    }
}

// ============================================================================
// SHARED / EVENT PUMP
// ============================================================================

impl Shared {
    fn emit(&self, event: TransportEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Übersetzt Signaling-Events in Transport-Events
    async fn pump(self: Arc<Self>, mut rx: broadcast::Receiver<SignalingEvent>) {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Signaling pump lagged, {} events skipped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            self.handle_signaling_event(event).await;
        }
    }

    async fn handle_signaling_event(&self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected => {
                tracing::debug!("Signaling socket connected");
            }

            SignalingEvent::Registered { address } => {
                self.emit(TransportEvent::Open { address });
            }

            SignalingEvent::Disconnected => {
                tracing::warn!("Signaling connection lost");
                self.channels.lock().clear();
                self.emit(TransportEvent::Disconnected);
            }

            SignalingEvent::IncomingOffer {
                from,
                call_id,
                sdp,
                metadata,
            } => {
                tracing::info!("Incoming call {} from {}", call_id, from);
                let mut leg = CallLeg::new(from.clone());
                leg.pending_offer = Some(sdp);
                self.calls.lock().insert(call_id, leg);
                self.emit(TransportEvent::IncomingCall {
                    call_id,
                    from,
                    metadata,
                });
            }

            SignalingEvent::AnswerReceived { from, call_id, sdp } => {
                tracing::info!("Answer received from {} for call {}", from, call_id);
                if let Err(e) = self.apply_answer(call_id, sdp).await {
                    tracing::error!("Failed to handle answer: {}", e);
                    self.emit(TransportEvent::CallError {
                        call_id,
                        message: e.to_string(),
                    });
                }
            }

            SignalingEvent::IceCandidateReceived {
                call_id, candidate, ..
            } => {
                let ready_pc = {
                    let mut calls = self.calls.lock();
                    match calls.get_mut(&call_id) {
                        Some(leg) => match &leg.pc {
                            Some(pc) => Some(Arc::clone(pc)),
                            None => {
                                leg.pending_candidates.push(candidate.clone());
                                None
                            }
                        },
                        None => None,
                    }
                };
                if let Some(pc) = ready_pc {
                    if pc.remote_description().await.is_some() {
                        add_candidates(&pc, vec![candidate]).await;
                    } else if let Some(leg) = self.calls.lock().get_mut(&call_id) {
                        leg.pending_candidates.push(candidate);
                    }
                }
            }

            SignalingEvent::CallEnded { by, call_id } => {
                tracing::info!("Call {} ended by {}", call_id, by);
                let leg = self.calls.lock().remove(&call_id);
                if let Some(leg) = leg {
                    if let Some(pc) = leg.pc {
                        let _ = pc.close().await;
                    }
                    leg.remote_stream.stop_all();
                    self.emit(TransportEvent::CallClosed { call_id });
                }
            }

            SignalingEvent::ChannelOpened { from } => {
                tracing::debug!("Data channel opened by {}", from);
                self.channels.lock().insert(from);
            }

            SignalingEvent::ChannelClosed { from } => {
                tracing::debug!("Data channel closed by {}", from);
                self.channels.lock().remove(&from);
            }

            SignalingEvent::ChannelData { from, payload } => {
                self.emit(TransportEvent::Control {
                    from,
                    message: payload,
                });
            }

            SignalingEvent::Error { code, message } => {
                self.emit(TransportEvent::Error {
                    message: format!("{}: {}", code, message),
                });
            }
        }
    }

    /// Setzt das SDP Answer als Remote Description
    async fn apply_answer(&self, call_id: CallId, sdp: String) -> Result<(), TransportError> {
        let pc = self
            .calls
            .lock()
            .get(&call_id)
            .and_then(|leg| leg.pc.clone())
            .ok_or(TransportError::UnknownCall(call_id))?;

        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| TransportError::InvalidSdp(e.to_string()))?;
        pc.set_remote_description(answer)
            .await
            .map_err(|e| TransportError::WebRTC(e.to_string()))?;

        let queued = self
            .calls
            .lock()
            .get_mut(&call_id)
            .map(|leg| std::mem::take(&mut leg.pending_candidates))
            .unwrap_or_default();
        add_candidates(&pc, queued).await;
        Ok(())
    }

    /// Erstellt eine neue Peer Connection für einen Anruf
    async fn create_peer_connection(
        self: Arc<Self>,
        call_id: CallId,
        remote: PeerAddress,
        remote_stream: MediaStream,
    ) -> Result<Arc<RTCPeerConnection>, TransportError> {
        // Media Engine mit Standard-Codecs (Opus, VP8, ...)
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::WebRTC(e.to_string()))?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::WebRTC(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.iter().map(RTCIceServer::from).collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| TransportError::WebRTC(e.to_string()))?,
        );

        self.setup_peer_connection_handlers(&pc, call_id, remote, remote_stream);
        Ok(pc)
    }

    /// Registriert Event Handler für die Peer Connection
    fn setup_peer_connection_handlers(
        self: Arc<Self>,
        pc: &Arc<RTCPeerConnection>,
        call_id: CallId,
        remote: PeerAddress,
        remote_stream: MediaStream,
    ) {
        // Connection State Handler
        let shared = Arc::clone(&self);
        let stream = remote_stream.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("Peer connection state for call {}: {:?}", call_id, s);

            match s {
                RTCPeerConnectionState::Failed => {
                    stream.stop_all();
                    shared.emit(TransportEvent::CallError {
                        call_id,
                        message: "peer connection failed".to_string(),
                    });
                }
                RTCPeerConnectionState::Closed => stream.stop_all(),
                _ => {}
            }

            Box::pin(async {})
        }));

        // ICE Candidate Handler
        let shared = Arc::clone(&self);
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                let json = c
                    .to_json()
                    .ok()
                    .and_then(|init| serde_json::to_string(&init).ok());
                if let (Some(candidate), Some(from)) = (json, shared.signaling.address()) {
                    tracing::debug!("Sending ICE candidate to {}", remote);
                    if let Err(e) = shared.signaling.send(ClientMessage::IceCandidate {
                        from_peer_id: from,
                        to_peer_id: remote.clone(),
                        call_id,
                        candidate,
                    }) {
                        tracing::error!("Failed to send ICE candidate: {}", e);
                    }
                }
            }
            Box::pin(async {})
        }));

        // Track Handler (eingehende Medien)
        let shared = Arc::clone(&self);
        let announced = Arc::new(AtomicBool::new(false));
        pc.on_track(Box::new(move |track, _, _| {
            let kind = if track.kind() == RTPCodecType::Video {
                TrackKind::Video
            } else {
                TrackKind::Audio
            };
            tracing::info!("Received {:?} track for call {}", kind, call_id);

            let media_track = MediaTrack::new(kind, track.id());
            remote_stream.add_track(media_track.clone());

            if !announced.swap(true, Ordering::SeqCst) {
                shared.emit(TransportEvent::RemoteStream {
                    call_id,
                    stream: remote_stream.clone(),
                });
            }

            Box::pin(async move {
                // Track endet sobald kein RTP mehr gelesen werden kann
                tokio::spawn(async move {
                    while media_track.is_live() && track.read_rtp().await.is_ok() {}
                    media_track.stop();
                });
            })
        }));
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Fügt RTP-Tracks passend zum lokalen Stream hinzu
async fn add_local_tracks(
    pc: &Arc<RTCPeerConnection>,
    local: &MediaStream,
    kind: CallKind,
) -> Result<(), TransportError> {
    let mut capabilities = vec![(
        RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: SAMPLE_RATE,
            channels: 1,
            ..Default::default()
        },
        "audio",
    )];

    if kind == CallKind::Video && !local.video_tracks().is_empty() {
        capabilities.push((
            RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video",
        ));
    }

    for (capability, id) in capabilities {
        let track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            id.to_string(),
            "clinic-call".to_string(),
        ));
        pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| TransportError::WebRTC(e.to_string()))?;
    }
    Ok(())
}

/// Fügt JSON-kodierte ICE Candidates hinzu
async fn add_candidates(pc: &Arc<RTCPeerConnection>, candidates: Vec<String>) {
    for candidate_json in candidates {
        let candidate: RTCIceCandidateInit = match serde_json::from_str(&candidate_json) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Ignoring malformed ICE candidate: {}", e);
                continue;
            }
        };
        if let Err(e) = pc.add_ice_candidate(candidate).await {
            tracing::error!("Failed to add ICE candidate: {}", e);
        }
    }
}
