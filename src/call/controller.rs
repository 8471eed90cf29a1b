//! Call Session Controller
//!
//! Ein einzelner Task besitzt die Session. Er verarbeitet der Reihe nach
//! Befehle vom `CallHandle`, Events des Peer-Transports und abgelaufene
//! Zeitgeber. Zeitgeber sind Deadlines in der Session; wird eine Deadline
//! gelöscht, kann sie nicht mehr gegen eine veraltete Session feuern.

use super::handle::{CallHandle, Command, Envelope};
use super::state::{CallEvent, CallKind, CallSnapshot, CallState};
use crate::config::CallTimings;
use crate::media::{AudioCues, Cue, MediaDevices, MediaStream, TrackKind};
use crate::services::{CallNotice, ConversationService, PresenceRegistry, Profile, ProfileLookup};
use crate::transport::{
    CallId, CallMetadata, ControlMessage, PeerAddress, PeerTransport, TransportEvent, UserId,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Externe Abhängigkeiten des Controllers
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn PeerTransport>,
    pub media: Arc<dyn MediaDevices>,
    pub cues: Arc<dyn AudioCues>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub conversations: Arc<dyn ConversationService>,
    pub profiles: Arc<dyn ProfileLookup>,
}

// ============================================================================
// SESSION
// ============================================================================

#[derive(Default)]
struct Session {
    state: Option<CallState>,
    is_caller: bool,
    call_id: Option<CallId>,
    remote_user: Option<UserId>,
    remote_address: Option<PeerAddress>,
    remote_profile: Option<Profile>,
    started_at: Option<DateTime<Utc>>,
    duration: Duration,
    is_muted: bool,
    is_video_off: bool,
    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
    missed_notified: bool,
}

impl Session {
    fn state(&self) -> CallState {
        self.state.unwrap_or(CallState::Idle)
    }

    /// Lokale und entfernte Medien haben jeweils einen Live-Track
    fn media_healthy(&self) -> bool {
        let local = self
            .local_stream
            .as_ref()
            .map(MediaStream::has_live_track)
            .unwrap_or(false);
        let remote = self
            .remote_stream
            .as_ref()
            .map(MediaStream::has_live_track)
            .unwrap_or(false);
        local && remote
    }
}

#[derive(Debug, Default)]
struct Timers {
    no_answer: Option<Instant>,
    liveness: Option<Instant>,
    recovery: Option<Instant>,
    tick: Option<Instant>,
    reset: Option<Instant>,
}

impl Timers {
    fn next_deadline(&self) -> Option<Instant> {
        [
            self.no_answer,
            self.liveness,
            self.recovery,
            self.tick,
            self.reset,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Löscht alle Zeitgeber eines laufenden Anrufs
    fn clear_call(&mut self) {
        self.no_answer = None;
        self.liveness = None;
        self.recovery = None;
        self.tick = None;
    }
}

/// Nimmt eine abgelaufene Deadline heraus
fn expired(slot: &mut Option<Instant>, now: Instant) -> bool {
    match *slot {
        Some(deadline) if deadline <= now => {
            *slot = None;
            true
        }
        _ => false,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// CALL CONTROLLER
// ============================================================================

/// Zustandsmaschine einer Anruf-Session
pub struct CallController {
    user: UserId,
    deps: Collaborators,
    timings: CallTimings,
    session: Session,
    timers: Timers,
    local_address: Option<PeerAddress>,
    /// Automatischer Reconnect wurde seit dem letzten `Open` bereits versucht
    reconnect_attempted: bool,
    snapshot_tx: watch::Sender<CallSnapshot>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl CallController {
    /// Startet den Controller-Task für den angemeldeten Benutzer
    pub fn spawn(
        user: UserId,
        deps: Collaborators,
        timings: CallTimings,
    ) -> (CallHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel::<Envelope>(32);
        let (event_tx, _) = broadcast::channel(100);
        let local_address = deps.transport.local_address();
        let (snapshot_tx, snapshot_rx) = watch::channel(CallSnapshot {
            local_address: local_address.clone(),
            ..CallSnapshot::default()
        });

        // Vor dem Spawn abonnieren, damit kein `Open` verloren geht
        let transport_rx = deps.transport.subscribe();

        let controller = Self {
            user,
            deps,
            timings,
            session: Session::default(),
            timers: Timers::default(),
            local_address,
            reconnect_attempted: false,
            snapshot_tx,
            event_tx: event_tx.clone(),
        };

        let task = tokio::spawn(controller.run(command_rx, transport_rx));
        (CallHandle::new(command_tx, snapshot_rx, event_tx), task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Envelope>,
        mut transport_rx: broadcast::Receiver<TransportEvent>,
    ) {
        tracing::info!("Call controller started for {}", self.user);
        let mut transport_alive = true;

        loop {
            let deadline = self.timers.next_deadline();

            tokio::select! {
                command = commands.recv() => match command {
                    Some((command, ack)) => {
                        self.handle_command(command).await;
                        let _ = ack.send(());
                    }
                    None => break,
                },

                event = transport_rx.recv(), if transport_alive => match event {
                    Ok(event) => self.handle_transport_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Transport events lagged, {} skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("Transport event channel closed");
                        transport_alive = false;
                    }
                },

                _ = sleep_until_opt(deadline) => self.handle_deadlines().await,
            }
        }

        // Alle Handles verworfen (Logout): Ressourcen freigeben
        self.release_resources().await;
        tracing::info!("Call controller stopped for {}", self.user);
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    async fn handle_command(&mut self, command: Command) {
        tracing::debug!("Command {:?} in state {}", command, self.session.state());

        match command {
            Command::StartCall { kind, remote } => self.start_call(kind, remote).await,
            Command::Accept => self.accept_call().await,
            Command::Decline => self.decline_call().await,
            Command::End => self.end_call().await,
            Command::ToggleMute => self.toggle_track(TrackKind::Audio),
            Command::ToggleVideo => self.toggle_track(TrackKind::Video),
            Command::Dismiss => {
                if self.session.state().is_terminal() {
                    self.reset_to_idle();
                }
            }
        }
    }

    async fn start_call(&mut self, kind: CallKind, remote: UserId) {
        if self.session.state().is_active() {
            tracing::warn!("Already in a call, ignoring dial to {}", remote);
            return;
        }
        if self.local_address.is_none() {
            tracing::warn!("Peer transport not open, cannot call {}", remote);
            self.emit(CallEvent::Error("peer transport not open".to_string()));
            return;
        }

        // Ersetzt eine eventuell noch sichtbare Abschluss-Anzeige
        self.timers.reset = None;
        self.session = Session {
            is_caller: true,
            remote_user: Some(remote.clone()),
            started_at: Some(Utc::now()),
            ..Session::default()
        };
        self.set_state(CallState::Calling { kind });
        self.load_profile(&remote).await;

        let address = match self.deps.presence.lookup(&remote).await {
            Ok(Some(address)) => address,
            Ok(None) => {
                tracing::warn!("No registered peer address for {}", remote);
                self.finish(CallState::Unavailable).await;
                return;
            }
            Err(e) => {
                tracing::error!("Presence lookup for {} failed: {}", remote, e);
                self.finish(CallState::Unavailable).await;
                return;
            }
        };
        self.session.remote_address = Some(address.clone());

        let stream = match self.deps.media.acquire(kind).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Local media unavailable ({}), call aborted", e);
                self.release_resources().await;
                self.reset_to_idle();
                return;
            }
        };
        self.session.local_stream = Some(stream.clone());

        if let Err(e) = self.deps.transport.open_channel(&address).await {
            tracing::warn!("Failed to open data channel to {}: {}", address, e);
        }

        let metadata = CallMetadata {
            kind,
            caller_id: Some(self.user.clone()),
        };
        match self
            .deps
            .transport
            .place_call(&address, &stream, metadata)
            .await
        {
            Ok(call_id) => self.session.call_id = Some(call_id),
            Err(e) => {
                tracing::error!("Failed to place call to {}: {}", address, e);
                self.finish(CallState::Unavailable).await;
                return;
            }
        }

        self.post_notice(&remote, CallNotice::Placed(kind)).await;

        self.deps.cues.play(Cue::DialTone);
        self.timers.no_answer = Some(Instant::now() + self.timings.no_answer);
        self.publish();
    }

    async fn accept_call(&mut self) {
        let CallState::Ringing { kind } = self.session.state() else {
            tracing::debug!("No ringing call to accept");
            return;
        };
        let Some(call_id) = self.session.call_id else {
            return;
        };

        self.deps.cues.stop(Cue::Ringtone);

        let stream = match self.deps.media.acquire(kind).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Local media unavailable ({}), dropping inbound call", e);
                self.release_resources().await;
                self.reset_to_idle();
                return;
            }
        };
        self.session.local_stream = Some(stream.clone());

        if let Err(e) = self.deps.transport.answer_call(call_id, &stream).await {
            tracing::error!("Failed to answer call {}: {}", call_id, e);
            self.finish(CallState::Unavailable).await;
            return;
        }

        self.timers.no_answer = None;
        self.enter_connected(kind);
    }

    async fn decline_call(&mut self) {
        if !matches!(self.session.state(), CallState::Ringing { .. }) {
            return;
        }
        self.send_control(ControlMessage::DeclineCall).await;
        self.finish(CallState::Ended).await;
    }

    /// Auflegen durch den lokalen Benutzer
    async fn end_call(&mut self) {
        if self.session.state().is_active() {
            self.send_control(ControlMessage::EndCall).await;
        }
        self.release_resources().await;
        if self.session.state() != CallState::Idle {
            self.reset_to_idle();
        }
    }

    fn toggle_track(&mut self, kind: TrackKind) {
        let Some(stream) = self.session.local_stream.as_ref() else {
            return;
        };

        let off = match kind {
            TrackKind::Audio => !self.session.is_muted,
            TrackKind::Video => !self.session.is_video_off,
        };
        if !stream.set_kind_enabled(kind, !off) {
            return;
        }

        match kind {
            TrackKind::Audio => self.session.is_muted = off,
            TrackKind::Video => self.session.is_video_off = off,
        }
        tracing::debug!("{:?} track enabled: {}", kind, !off);
        self.publish();
    }

    // ========================================================================
    // TRANSPORT EVENTS
    // ========================================================================

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open { address } => {
                tracing::info!("Peer transport open as {}", address);
                self.reconnect_attempted = false;
                if let Err(e) = self.deps.presence.publish(&self.user, &address).await {
                    tracing::error!("Failed to publish presence: {}", e);
                }
                self.local_address = Some(address);
                self.publish();
            }

            TransportEvent::IncomingCall {
                call_id,
                from,
                metadata,
            } => self.incoming_call(call_id, from, metadata).await,

            TransportEvent::RemoteStream { call_id, stream } => {
                if !self.is_current(call_id) {
                    return;
                }
                self.session.remote_stream = Some(stream);
                if let CallState::Calling { kind } = self.session.state() {
                    self.deps.cues.stop(Cue::DialTone);
                    self.timers.no_answer = None;
                    self.enter_connected(kind);
                } else {
                    self.publish();
                }
            }

            TransportEvent::CallClosed { call_id } => {
                if self.is_current(call_id) && self.session.state().is_active() {
                    tracing::info!("Call {} closed by remote", call_id);
                    self.session.call_id = None;
                    self.finish(CallState::Ended).await;
                }
            }

            TransportEvent::CallError { call_id, message } => {
                if self.is_current(call_id) && self.session.state().is_active() {
                    tracing::error!("Call {} failed: {}", call_id, message);
                    self.emit(CallEvent::Error(message));
                    self.finish(CallState::Unavailable).await;
                }
            }

            TransportEvent::Control { from, message } => {
                let from_remote = self.session.remote_address.as_ref() == Some(&from);
                if !from_remote || !self.session.state().is_active() {
                    return;
                }
                match (message, self.session.state()) {
                    (ControlMessage::EndCall, _) => {
                        tracing::info!("Remote ended the call");
                        self.finish(CallState::Ended).await;
                    }
                    (ControlMessage::DeclineCall, CallState::Calling { .. }) => {
                        tracing::info!("Remote declined the call");
                        self.finish(CallState::Ended).await;
                    }
                    _ => {}
                }
            }

            TransportEvent::Disconnected => {
                if self.session.state().is_active() {
                    self.release_resources().await;
                    self.enter_terminal(CallState::Disconnected);
                }
                self.local_address = None;
                self.publish();
                self.reconnect_once();
            }

            TransportEvent::Error { message } => {
                tracing::error!("Peer transport error: {}", message);
                self.emit(CallEvent::Error(message));
                if self.session.state().is_active() {
                    self.finish(CallState::Unavailable).await;
                }
            }
        }
    }

    async fn incoming_call(
        &mut self,
        call_id: CallId,
        from: PeerAddress,
        metadata: Option<CallMetadata>,
    ) {
        if self.session.state().is_active() {
            tracing::info!("Busy, rejecting call {} from {}", call_id, from);
            self.deps.transport.close_call(call_id).await;
            return;
        }

        let kind = metadata.as_ref().map(|m| m.kind).unwrap_or(CallKind::Audio);
        let caller = metadata
            .and_then(|m| m.caller_id)
            .or_else(|| from.user_hint())
            .unwrap_or_else(|| UserId::new(from.as_str()));

        tracing::info!("Incoming {} call from {} ({})", kind.as_str(), caller, from);

        self.timers.reset = None;
        self.session = Session {
            call_id: Some(call_id),
            remote_user: Some(caller.clone()),
            remote_address: Some(from),
            started_at: Some(Utc::now()),
            ..Session::default()
        };
        self.set_state(CallState::Ringing { kind });

        self.deps.cues.play(Cue::Ringtone);
        self.timers.no_answer = Some(Instant::now() + self.timings.no_answer);
        self.load_profile(&caller).await;
    }

    fn reconnect_once(&mut self) {
        if self.reconnect_attempted {
            tracing::warn!("Reconnect already attempted, giving up");
            return;
        }
        self.reconnect_attempted = true;

        let transport = Arc::clone(&self.deps.transport);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.reconnect().await {
                tracing::error!("Reconnect failed: {}", e);
                let _ = event_tx.send(CallEvent::Error(format!("reconnect failed: {}", e)));
            }
        });
    }

    // ========================================================================
    // TIMERS
    // ========================================================================

    async fn handle_deadlines(&mut self) {
        let now = Instant::now();

        if expired(&mut self.timers.no_answer, now)
            && matches!(
                self.session.state(),
                CallState::Calling { .. } | CallState::Ringing { .. }
            )
        {
            tracing::info!("No answer after {:?}", self.timings.no_answer);
            self.finish(CallState::NoAnswer).await;
        }

        if expired(&mut self.timers.tick, now) {
            if self.session.state().is_connected() {
                self.session.duration += self.timings.duration_tick;
                self.timers.tick = Some(now + self.timings.duration_tick);
                self.publish();
            }
        }

        if expired(&mut self.timers.liveness, now) {
            if let CallState::Connected { kind } = self.session.state() {
                if self.session.media_healthy() {
                    tracing::debug!("Liveness check passed");
                } else {
                    tracing::warn!("Media not live, trying to recover");
                    self.timers.tick = None;
                    self.timers.recovery = Some(now + self.timings.recovery);
                    self.set_state(CallState::Connecting { kind });
                }
            }
        }

        if expired(&mut self.timers.recovery, now) {
            if let CallState::Connecting { kind } = self.session.state() {
                if self.session.media_healthy() {
                    tracing::info!("Media recovered");
                    self.timers.tick = Some(now + self.timings.duration_tick);
                    self.set_state(CallState::Connected { kind });
                } else {
                    tracing::warn!("Media did not recover, ending call");
                    self.finish(CallState::Ended).await;
                }
            }
        }

        if expired(&mut self.timers.reset, now) && self.session.state().is_terminal() {
            self.reset_to_idle();
        }
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    fn enter_connected(&mut self, kind: CallKind) {
        let now = Instant::now();
        self.session.duration = Duration::ZERO;
        self.timers.tick = Some(now + self.timings.duration_tick);
        self.timers.liveness = Some(now + self.timings.liveness_check);
        self.set_state(CallState::Connected { kind });
    }

    /// Beendet die Session mit einem Abschluss-Zustand
    async fn finish(&mut self, terminal: CallState) {
        let notify_missed = self.session.is_caller
            && matches!(terminal, CallState::NoAnswer | CallState::Unavailable);
        let kind = self.session.state().kind().unwrap_or(CallKind::Audio);

        self.release_resources().await;

        if notify_missed && !self.session.missed_notified {
            self.session.missed_notified = true;
            if let Some(remote) = self.session.remote_user.clone() {
                self.post_notice(&remote, CallNotice::Missed(kind)).await;
            }
        }

        self.enter_terminal(terminal);
    }

    fn enter_terminal(&mut self, terminal: CallState) {
        self.timers.reset = Some(Instant::now() + self.timings.reset_delay);
        self.set_state(terminal);
    }

    fn reset_to_idle(&mut self) {
        self.timers = Timers::default();
        self.session = Session::default();
        self.set_state(CallState::Idle);
    }

    /// Gibt jede Ressource der Session frei
    async fn release_resources(&mut self) {
        self.timers.clear_call();
        self.deps.cues.stop_all();

        if let Some(stream) = self.session.local_stream.take() {
            stream.stop_all();
        }
        self.session.remote_stream = None;

        if let Some(call_id) = self.session.call_id.take() {
            self.deps.transport.close_call(call_id).await;
        }
        if let Some(address) = self.session.remote_address.as_ref() {
            self.deps.transport.close_channel(address).await;
        }

        self.session.is_muted = false;
        self.session.is_video_off = false;
        self.session.is_caller = false;
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn is_current(&self, call_id: CallId) -> bool {
        self.session.call_id == Some(call_id)
    }

    async fn send_control(&self, message: ControlMessage) {
        let Some(address) = self.session.remote_address.as_ref() else {
            return;
        };
        if !self.deps.transport.is_channel_open(address) {
            tracing::debug!("No open data channel to {}, skipping {:?}", address, message);
            return;
        }
        if let Err(e) = self.deps.transport.send_control(address, message).await {
            tracing::warn!("Failed to send {:?} to {}: {}", message, address, e);
        }
    }

    async fn post_notice(&self, to: &UserId, notice: CallNotice) {
        match self
            .deps
            .conversations
            .post_call_notice(&self.user, to, notice)
            .await
        {
            Ok(()) => self.emit(CallEvent::NoticePosted {
                to: to.clone(),
                notice,
            }),
            Err(e) => tracing::error!("Failed to post {:?} to {}: {}", notice, to, e),
        }
    }

    async fn load_profile(&mut self, user: &UserId) {
        match self.deps.profiles.profile(user).await {
            Ok(profile) => {
                self.session.remote_profile = profile;
                self.publish();
            }
            Err(e) => tracing::warn!("Profile lookup for {} failed: {}", user, e),
        }
    }

    fn set_state(&mut self, state: CallState) {
        let previous = self.session.state();
        self.session.state = Some(state);
        if previous != state {
            tracing::info!("Call state: {} -> {}", previous, state);
            self.emit(CallEvent::StateChanged(state));
        }
        self.publish();
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.event_tx.send(event);
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn snapshot(&self) -> CallSnapshot {
        let session = &self.session;
        CallSnapshot {
            state: session.state(),
            is_caller: session.is_caller,
            local_address: self.local_address.clone(),
            remote_address: session.remote_address.clone(),
            caller_id: session.remote_user.clone(),
            remote_profile: session.remote_profile.clone(),
            started_at: session.started_at,
            duration: session.duration,
            is_muted: session.is_muted,
            is_video_off: session.is_video_off,
            has_local_video: session
                .local_stream
                .as_ref()
                .map(|s| !s.video_tracks().is_empty())
                .unwrap_or(false),
            has_remote_stream: session.remote_stream.is_some(),
        }
    }
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController")
            .field("user", &self.user)
            .field("state", &self.session.state())
            .field("timers", &self.timers)
            .finish()
    }
}
