//! Connection session
//!
//! A [`Session`] owns one transport link at a time, the protocol state
//! machine around it, the heartbeat, the reconnection policy, and the audio
//! pipelines. Every observable change is reported through the event bus.
//!
//! Listeners are never invoked while session state is locked, so a listener
//! may call back into the session (for example, `start_listening` from a
//! `connected` listener).

mod config;
mod heartbeat;
mod reconnect;
mod status;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

pub use config::{
    DEFAULT_ENDPOINT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_INTERVAL, SessionConfig,
};
pub use heartbeat::Heartbeat;
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use status::ConnectionStatus;

use crate::audio::{
    AudioConfig, AudioConfigPatch, AudioInput, AudioOutput, CapturePipeline, ChunkSink,
    MicrophoneInput, PlaybackPipeline,
};
use crate::events::{ErrorKind, ErrorReport, EventBus, EventKind, ListenerId, SessionEvent};
use crate::protocol::{
    AudioChunk, AudioData, Inbound, ListenOptions, MessageKind, ModelType, ProtocolMessage,
    SetLanguage, SetModel, parse_frame,
};
use crate::transport::{
    Connector, NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON, OutboundFrame, TransportEvent,
    TransportLink, WsConnector,
};
use crate::{Result, codec};

/// Captured chunks smaller than this are dropped rather than sent
pub const NOISE_GATE_BYTES: usize = 100;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for [`Session`]
///
/// Defaults to the WebSocket connector, the default microphone, and the
/// default speaker.
pub struct SessionBuilder {
    config: SessionConfig,
    audio: AudioConfig,
    connector: Arc<dyn Connector>,
    input: Box<dyn AudioInput>,
    playback: PlaybackPipeline,
}

impl SessionBuilder {
    /// Start building a session for `config`
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            audio: AudioConfig::default(),
            connector: Arc::new(WsConnector),
            input: Box::new(MicrophoneInput::new()),
            playback: PlaybackPipeline::speaker(),
        }
    }

    /// Initial audio configuration
    #[must_use]
    pub const fn audio_config(mut self, audio: AudioConfig) -> Self {
        self.audio = audio;
        self
    }

    /// Use a custom transport
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Use a custom capture source
    #[must_use]
    pub fn audio_input(mut self, input: impl AudioInput + 'static) -> Self {
        self.input = Box::new(input);
        self
    }

    /// Use a custom playback sink, created on the first playable chunk
    #[must_use]
    pub fn audio_output<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn AudioOutput>> + Send + Sync + 'static,
    {
        self.playback = PlaybackPipeline::new(Box::new(factory));
        self
    }

    /// Build the session; nothing is opened until [`Session::connect`]
    #[must_use]
    pub fn build(self) -> Session {
        let reconnect =
            ReconnectPolicy::new(self.config.reconnect_interval, self.config.max_reconnect_attempts);

        Session {
            inner: Arc::new(Inner {
                config: self.config,
                connector: self.connector,
                events: EventBus::new(),
                state: Mutex::new(State {
                    status: ConnectionStatus::Idle,
                    link: Link::Closed,
                    generation: 0,
                    manual_close: false,
                    reconnect,
                    heartbeat: Heartbeat::new(),
                    audio: self.audio,
                }),
                capture: Mutex::new(CapturePipeline::new(self.input)),
                playback: Mutex::new(self.playback),
            }),
        }
    }
}

/// Client session with the speech service
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    events: EventBus,
    state: Mutex<State>,
    capture: Mutex<CapturePipeline>,
    playback: Mutex<PlaybackPipeline>,
}

struct State {
    status: ConnectionStatus,
    link: Link,
    /// Bumped on every open attempt and on disconnect; transport
    /// notifications tagged with an older value are stale
    generation: u64,
    manual_close: bool,
    reconnect: ReconnectPolicy,
    heartbeat: Heartbeat,
    audio: AudioConfig,
}

enum Link {
    Closed,
    Opening,
    Open(mpsc::UnboundedSender<OutboundFrame>),
}

impl State {
    fn set_status(&mut self, status: ConnectionStatus, events: &mut Vec<SessionEvent>) {
        if self.status != status {
            tracing::debug!(from = %self.status, to = %status, "status changed");
            self.status = status;
            events.push(SessionEvent::StatusChanged(status));
        }
    }

    const fn is_open(&self) -> bool {
        matches!(self.link, Link::Open(_))
    }
}

impl Session {
    /// Create a session with the default transport and audio devices
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        SessionBuilder::new(config).build()
    }

    /// Start building a session
    #[must_use]
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// Session configuration
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Open the transport
    ///
    /// A no-op if a link is already open or opening. Failures are reported
    /// as events and, when auto-reconnect is on, retried by the reconnection
    /// policy. Caller-initiated connects start a fresh attempt budget.
    pub async fn connect(&self) {
        self.inner.open(true).await;
    }

    /// Close the transport and stop capture
    ///
    /// Suppresses reconnection until the next [`Session::connect`].
    pub fn disconnect(&self) {
        let events = {
            let mut state = self.inner.state();
            state.manual_close = true;
            state.reconnect.cancel();

            let was_open = match std::mem::replace(&mut state.link, Link::Closed) {
                Link::Open(outbound) => {
                    let _ = outbound.send(OutboundFrame::Close {
                        code: NORMAL_CLOSE_CODE,
                        reason: NORMAL_CLOSE_REASON.to_string(),
                    });
                    true
                }
                Link::Opening | Link::Closed => false,
            };
            // Any in-flight open or pending close notification is now stale
            state.generation += 1;

            let mut events = Vec::new();
            self.inner
                .transition(&mut state, ConnectionStatus::Disconnected, &mut events);
            if was_open {
                tracing::info!(code = NORMAL_CLOSE_CODE, "disconnected");
                events.push(SessionEvent::Disconnected {
                    code: Some(NORMAL_CLOSE_CODE),
                    reason: Some(NORMAL_CLOSE_REASON.to_string()),
                });
            }
            events
        };

        self.inner.stop_capture();
        self.inner.emit_all(events);
    }

    /// Send one message
    ///
    /// Never fails: a closed transport or a write failure becomes an `error` event.
    pub fn send(&self, kind: MessageKind, data: Value) {
        self.inner.send_message(&ProtocolMessage::new(kind, data));
    }

    /// Begin a listening turn and start capture
    ///
    /// Any audio override in `options` is merged into the session's audio
    /// configuration first. If capture fails to start, the already-sent
    /// `start_listening` is not retracted.
    ///
    /// Without an open transport only the `not_connected` error is reported:
    /// the status is left alone and the microphone is not touched.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone or encoder cannot be started
    pub fn start_listening(&self, options: ListenOptions) -> Result<()> {
        let (audio, open) = {
            let mut state = self.inner.state();
            if let Some(patch) = &options.audio {
                state.audio.merge(patch);
            }
            (state.audio, state.is_open())
        };

        self.inner.send_payload(MessageKind::StartListening, &options);
        if !open {
            return Ok(());
        }
        self.inner.update_status(ConnectionStatus::Listening);

        let started = lock(&self.inner.capture).start(&audio, self.inner.chunk_sink());
        if let Err(e) = started {
            tracing::warn!(error = %e, "failed to start audio capture");
            self.inner.events.emit(&SessionEvent::Error(
                ErrorReport::new(ErrorKind::Capture, "failed to start audio capture").with_cause(&e),
            ));
            self.inner.update_status(ConnectionStatus::Error);
            return Err(e);
        }

        tracing::info!(
            sample_rate = audio.sample_rate,
            format = %audio.format,
            "listening"
        );
        Ok(())
    }

    /// End the listening turn and release the microphone
    pub fn stop_listening(&self) {
        self.inner.stop_capture();
        self.inner.send_message(&ProtocolMessage::empty(MessageKind::StopListening));

        // Never report a connected status over a closed link
        let events = {
            let mut state = self.inner.state();
            let mut events = Vec::new();
            if state.is_open() {
                self.inner
                    .transition(&mut state, ConnectionStatus::Connected, &mut events);
            }
            events
        };
        self.inner.emit_all(events);
    }

    /// Change the recognition language
    pub fn set_language(&self, language: &str) {
        self.inner.send_payload(
            MessageKind::SetLanguage,
            &SetLanguage {
                language: language.to_string(),
            },
        );
    }

    /// Change one of the service's models
    pub fn set_model(&self, model_type: ModelType, model_name: &str) {
        self.inner.send_payload(
            MessageKind::SetModel,
            &SetModel {
                model_type,
                model_name: model_name.to_string(),
            },
        );
    }

    /// Send one captured chunk, unless it falls under the noise gate
    pub fn send_audio_chunk(&self, chunk: &[u8]) {
        self.inner.send_audio_chunk(chunk);
    }

    /// Merge a partial audio configuration
    ///
    /// Applies to the next capture start.
    pub fn set_audio_config(&self, patch: &AudioConfigPatch) {
        self.inner.state().audio.merge(patch);
    }

    /// Current audio configuration
    #[must_use]
    pub fn audio_config(&self) -> AudioConfig {
        self.inner.state().audio
    }

    /// Register an event listener
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    /// Remove an event listener
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.events.off(kind, id)
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.state().status
    }

    /// Check if the transport is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.state().is_open()
    }

    /// Consecutive reconnect attempts since the last successful open
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state().reconnect.attempts()
    }

    /// Check if a reconnect attempt is scheduled
    #[must_use]
    pub fn is_reconnect_pending(&self) -> bool {
        self.inner.state().reconnect.is_pending()
    }

    /// Check if the heartbeat is running
    #[must_use]
    pub fn is_heartbeat_running(&self) -> bool {
        self.inner.state().heartbeat.is_running()
    }

    /// Check if audio capture is running
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        lock(&self.inner.capture).is_running()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.inner.config.endpoint)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn emit_all(&self, events: Vec<SessionEvent>) {
        for event in &events {
            self.events.emit(event);
        }
    }

    fn update_status(self: &Arc<Self>, status: ConnectionStatus) {
        let mut events = Vec::new();
        self.transition(&mut self.state(), status, &mut events);
        self.emit_all(events);
    }

    /// Change status and keep the heartbeat in step with it
    ///
    /// The heartbeat runs only while the link is open and the status is one
    /// of `connected`, `listening` or `processing`.
    fn transition(
        self: &Arc<Self>,
        state: &mut State,
        status: ConnectionStatus,
        events: &mut Vec<SessionEvent>,
    ) {
        state.set_status(status, events);

        if !(state.is_open() && state.status.is_connected()) {
            state.heartbeat.stop();
        } else if !state.heartbeat.is_running() {
            let weak = Arc::downgrade(self);
            state
                .heartbeat
                .start(self.config.heartbeat_interval, move || {
                    weak.upgrade().is_some_and(|inner| {
                        inner.send_ping();
                        true
                    })
                });
        }
    }

    fn report(&self, report: ErrorReport) {
        self.events.emit(&SessionEvent::Error(report));
    }

    async fn open(self: &Arc<Self>, fresh: bool) {
        let (generation, events) = {
            let mut state = self.state();
            if !matches!(state.link, Link::Closed) {
                tracing::debug!("connect ignored: transport already open or opening");
                return;
            }

            state.manual_close = false;
            state.reconnect.cancel();
            if fresh {
                state.reconnect.reset();
            }
            state.generation += 1;
            state.link = Link::Opening;

            let mut events = Vec::new();
            self.transition(&mut state, ConnectionStatus::Connecting, &mut events);
            (state.generation, events)
        };
        self.emit_all(events);

        tracing::info!(endpoint = %self.config.endpoint, "connecting");
        match self.connector.open(&self.config.endpoint).await {
            Ok(link) => self.on_open(generation, link),
            Err(e) => self.on_open_failed(generation, &e),
        }
    }

    fn on_open(self: &Arc<Self>, generation: u64, link: TransportLink) {
        let TransportLink { outbound, inbound } = link;

        let events = {
            let mut state = self.state();
            if state.generation != generation || !matches!(state.link, Link::Opening) {
                tracing::debug!("discarding link opened after disconnect");
                let _ = outbound.send(OutboundFrame::Close {
                    code: NORMAL_CLOSE_CODE,
                    reason: NORMAL_CLOSE_REASON.to_string(),
                });
                return;
            }

            let attempts = state.reconnect.attempts();
            state.reconnect.reset();
            state.link = Link::Open(outbound);

            let mut events = Vec::new();
            self.transition(&mut state, ConnectionStatus::Connected, &mut events);
            events.push(SessionEvent::Connected);
            if attempts > 0 {
                events.push(SessionEvent::Reconnected { attempts });
            }

            tracing::info!(endpoint = %self.config.endpoint, attempts, "connected");
            events
        };
        self.emit_all(events);

        Self::spawn_reader(Arc::downgrade(self), generation, inbound);
    }

    fn spawn_reader(
        weak: Weak<Self>,
        generation: u64,
        mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let closed = matches!(event, TransportEvent::Closed { .. });
                inner.handle_transport_event(generation, event);
                if closed {
                    return;
                }
            }

            // Transport dropped its sender without a close notification
            if let Some(inner) = weak.upgrade() {
                inner.handle_transport_event(
                    generation,
                    TransportEvent::Closed {
                        code: None,
                        reason: None,
                    },
                );
            }
        });
    }

    fn on_open_failed(self: &Arc<Self>, generation: u64, error: &crate::Error) {
        let events = {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            state.link = Link::Closed;

            tracing::warn!(endpoint = %self.config.endpoint, error = %error, "failed to open transport");
            let mut events = Vec::new();
            self.transition(&mut state, ConnectionStatus::Error, &mut events);
            events.push(SessionEvent::Error(
                ErrorReport::new(ErrorKind::TransportOpen, "failed to open transport")
                    .with_cause(error),
            ));
            self.schedule_reconnect(&mut state, &mut events);
            events
        };
        self.emit_all(events);
    }

    fn handle_transport_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Frame(text) => {
                if self.state().generation == generation {
                    self.dispatch_frame(&text);
                }
            }
            TransportEvent::Error(message) => {
                let events = {
                    let mut state = self.state();
                    if state.generation != generation || !state.is_open() {
                        return;
                    }
                    tracing::warn!(error = %message, "transport error");
                    let mut events = Vec::new();
                    self.transition(&mut state, ConnectionStatus::Error, &mut events);
                    events.push(SessionEvent::Error(
                        ErrorReport::new(ErrorKind::Transport, "transport error")
                            .with_cause(&message),
                    ));
                    events
                };
                self.emit_all(events);
            }
            TransportEvent::Closed { code, reason } => self.on_closed(generation, code, reason),
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64, code: Option<u16>, reason: Option<String>) {
        let events = {
            let mut state = self.state();
            if state.generation != generation || !state.is_open() {
                return;
            }
            state.link = Link::Closed;

            tracing::info!(?code, ?reason, "transport closed");
            let mut events = Vec::new();
            self.transition(&mut state, ConnectionStatus::Disconnected, &mut events);
            events.push(SessionEvent::Disconnected { code, reason });
            self.schedule_reconnect(&mut state, &mut events);
            events
        };

        // The microphone belongs to the link that just went away
        self.stop_capture();
        self.emit_all(events);
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut State, events: &mut Vec<SessionEvent>) {
        if state.manual_close || !self.config.auto_reconnect {
            return;
        }

        match state.reconnect.next_attempt() {
            ReconnectDecision::Retry { attempt, delay } => {
                let max_attempts = state.reconnect.max_attempts();
                tracing::info!(attempt, max_attempts, ?delay, "scheduling reconnect");
                self.transition(state, ConnectionStatus::Reconnecting, events);
                events.push(SessionEvent::Reconnecting {
                    attempt,
                    max_attempts,
                });

                let weak = Arc::downgrade(self);
                state.reconnect.set_pending(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    inner.state().reconnect.settle();
                    inner.open(false).await;
                }));
            }
            ReconnectDecision::GiveUp { attempts } => {
                tracing::error!(attempts, endpoint = %self.config.endpoint, "reconnect attempts exhausted");
                events.push(SessionEvent::ReconnectFailed { attempts });
            }
        }
    }

    fn dispatch_frame(&self, text: &str) {
        let message = match parse_frame(text) {
            Ok(Inbound::Known(message)) => message,
            Ok(Inbound::Unknown { kind, .. }) => {
                tracing::warn!(kind, "ignoring message of unknown kind");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable frame");
                self.report(ErrorReport::new(ErrorKind::FrameParse, "failed to parse frame").with_cause(&e));
                return;
            }
        };

        self.events.emit(&SessionEvent::Message(message.clone()));
        if message.kind == MessageKind::AudioChunk {
            self.play_chunk(&message);
        }

        let ProtocolMessage { kind, data } = message;
        match kind {
            MessageKind::Transcription => self.events.emit(&SessionEvent::Transcription(data)),
            MessageKind::Response => self.events.emit(&SessionEvent::Response(data)),
            MessageKind::AudioChunk => self.events.emit(&SessionEvent::AudioChunk(data)),
            MessageKind::Status => self.events.emit(&SessionEvent::StatusUpdate(data)),
            MessageKind::Error => {
                let message = data
                    .get("message")
                    .or_else(|| data.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("service reported an error")
                    .to_string();
                tracing::warn!(%message, "service error");
                self.report(ErrorReport {
                    kind: ErrorKind::Remote,
                    message,
                    details: Some(data),
                });
            }
            MessageKind::Pong => tracing::trace!(payload = %data, "pong"),
            MessageKind::Ping
            | MessageKind::StartListening
            | MessageKind::StopListening
            | MessageKind::SetLanguage
            | MessageKind::SetModel
            | MessageKind::AudioData => {
                tracing::debug!(%kind, "ignoring outbound-only message kind");
            }
        }
    }

    fn play_chunk(&self, message: &ProtocolMessage) {
        let result = message
            .payload::<AudioChunk>()
            .and_then(|chunk| lock(&self.playback).handle_chunk(&chunk));

        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to play audio chunk");
            self.report(ErrorReport::new(ErrorKind::Playback, "failed to play audio chunk").with_cause(&e));
        }
    }

    fn send_message(&self, message: &ProtocolMessage) {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.report(ErrorReport::new(ErrorKind::Send, "failed to serialize message").with_cause(&e));
                return;
            }
        };

        let written = {
            let state = self.state();
            match &state.link {
                Link::Open(outbound) => Some(outbound.send(OutboundFrame::Text(frame)).is_ok()),
                Link::Opening | Link::Closed => None,
            }
        };

        match written {
            Some(true) => tracing::trace!(kind = %message.kind, "sent"),
            Some(false) => {
                tracing::warn!(kind = %message.kind, "transport writer has shut down");
                self.report(
                    ErrorReport::new(ErrorKind::Send, "failed to write message")
                        .with_cause(&"transport writer has shut down"),
                );
            }
            None => {
                tracing::warn!(kind = %message.kind, "cannot send: transport not open");
                self.report(ErrorReport {
                    kind: ErrorKind::NotConnected,
                    message: format!("not connected, {} not sent", message.kind),
                    details: None,
                });
            }
        }
    }

    fn send_payload<T: Serialize>(&self, kind: MessageKind, payload: &T) {
        match ProtocolMessage::with_payload(kind, payload) {
            Ok(message) => self.send_message(&message),
            Err(e) => {
                self.report(ErrorReport::new(ErrorKind::Send, "failed to serialize message").with_cause(&e));
            }
        }
    }

    fn send_ping(&self) {
        let open = self.state().is_open();
        if open {
            self.send_message(&ProtocolMessage::empty(MessageKind::Ping));
        }
    }

    fn send_audio_chunk(&self, chunk: &[u8]) {
        if chunk.len() < NOISE_GATE_BYTES {
            tracing::debug!(bytes = chunk.len(), "dropping chunk below noise gate");
            return;
        }

        let format = self.state().audio.format;
        self.send_payload(
            MessageKind::AudioData,
            &AudioData {
                audio: codec::encode(chunk),
                format,
            },
        );
    }

    fn chunk_sink(self: &Arc<Self>) -> ChunkSink {
        let weak = Arc::downgrade(self);
        Arc::new(move |chunk: Vec<u8>| {
            if let Some(inner) = weak.upgrade() {
                inner.send_audio_chunk(&chunk);
            }
        })
    }

    fn stop_capture(&self) {
        lock(&self.capture).stop();
    }
}
