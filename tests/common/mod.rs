//! Shared test utilities
//!
//! An in-memory connector standing in for the service, a scripted
//! microphone, and a playback sink that records what it was given.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use s2s_link::audio::{AudioConfig, AudioInput, AudioOutput, PLAYBACK_SAMPLE_RATE};
use s2s_link::transport::{Connector, OutboundFrame, TransportEvent, TransportLink};
use s2s_link::{Error, EventKind, Result, Session, SessionConfig, SessionEvent};

/// Let spawned tasks run; under paused time this also advances the clock by 1ms
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Config with short, round numbers for timing tests
#[must_use]
pub fn test_config() -> SessionConfig {
    SessionConfig {
        endpoint: "ws://mock.invalid:8766".to_string(),
        reconnect_interval: Duration::from_millis(1000),
        max_reconnect_attempts: 2,
        heartbeat_interval: Duration::from_secs(30),
        auto_reconnect: true,
    }
}

// -- Connector ---------------------------------------------------------------

/// Service side of one opened link
struct RemoteEnd {
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    sent: Vec<OutboundFrame>,
}

impl RemoteEnd {
    fn drain(&mut self) -> &[OutboundFrame] {
        while let Ok(frame) = self.outbound.try_recv() {
            self.sent.push(frame);
        }
        &self.sent
    }
}

#[derive(Default)]
struct MockState {
    attempts: usize,
    fail_next: usize,
    fail_always: bool,
    open_delay: Option<Duration>,
    links: Vec<RemoteEnd>,
}

/// In-memory connector; clones share state
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` opens
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().fail_next = n;
    }

    /// Refuse every open until turned off
    pub fn fail_always(&self, on: bool) {
        self.state.lock().unwrap().fail_always = on;
    }

    /// Delay each open by `delay`
    pub fn open_delay(&self, delay: Duration) {
        self.state.lock().unwrap().open_delay = Some(delay);
    }

    /// Number of open attempts, successful or not
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// Number of links opened successfully
    #[must_use]
    pub fn links(&self) -> usize {
        self.state.lock().unwrap().links.len()
    }

    fn with_latest<R>(&self, f: impl FnOnce(&mut RemoteEnd) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        let link = state.links.last_mut().expect("no link opened");
        f(link)
    }

    /// Deliver a text frame on the latest link
    pub fn push_frame(&self, text: &str) {
        self.with_latest(|link| {
            let _ = link.inbound.send(TransportEvent::Frame(text.to_string()));
        });
    }

    /// Deliver a `{"type", "data"}` envelope on the latest link
    pub fn push_message(&self, kind: &str, data: Value) {
        let frame = serde_json::json!({ "type": kind, "data": data }).to_string();
        self.push_frame(&frame);
    }

    /// Report a transport error on the latest link
    pub fn push_error(&self, message: &str) {
        self.with_latest(|link| {
            let _ = link.inbound.send(TransportEvent::Error(message.to_string()));
        });
    }

    /// Close the latest link from the service side
    pub fn close(&self, code: Option<u16>) {
        let count = self.links();
        self.close_link(count - 1, code);
    }

    /// Close a specific link from the service side
    pub fn close_link(&self, index: usize, code: Option<u16>) {
        let state = self.state.lock().unwrap();
        let _ = state.links[index].inbound.send(TransportEvent::Closed {
            code,
            reason: code.map(|_| "going away".to_string()),
        });
    }

    /// Every frame the session wrote on the latest link
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundFrame> {
        self.with_latest(|link| link.drain().to_vec())
    }

    /// Text frames on the latest link, parsed as JSON
    #[must_use]
    pub fn sent_messages(&self) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter_map(|frame| match frame {
                OutboundFrame::Text(text) => serde_json::from_str(&text).ok(),
                OutboundFrame::Close { .. } => None,
            })
            .collect()
    }

    /// Messages of one kind on the latest link
    #[must_use]
    pub fn sent_of(&self, kind: &str) -> Vec<Value> {
        self.sent_messages()
            .into_iter()
            .filter(|m| m["type"] == kind)
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _endpoint: &str) -> Result<TransportLink> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            state.open_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_always || state.fail_next > 0 {
            state.fail_next = state.fail_next.saturating_sub(1);
            return Err(Error::Transport("connection refused".to_string()));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        state.links.push(RemoteEnd {
            outbound: outbound_rx,
            inbound: inbound_tx,
            sent: Vec::new(),
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

// -- Microphone --------------------------------------------------------------

#[derive(Default)]
struct FakeInputState {
    open: bool,
    opens: usize,
    closes: usize,
    fail: bool,
    pending: Vec<f32>,
    last_config: Option<AudioConfig>,
}

/// Scripted microphone; clones share state
#[derive(Clone, Default)]
pub struct FakeInput {
    state: Arc<Mutex<FakeInputState>>,
}

impl FakeInput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A microphone that cannot be acquired
    #[must_use]
    pub fn unavailable() -> Self {
        let input = Self::default();
        input.state.lock().unwrap().fail = true;
        input
    }

    /// Make samples available to the next drain
    pub fn speak(&self, samples: &[f32]) {
        self.state.lock().unwrap().pending.extend_from_slice(samples);
    }

    /// Whether the device is currently held
    #[must_use]
    pub fn held(&self) -> bool {
        self.state.lock().unwrap().open
    }

    #[must_use]
    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    #[must_use]
    pub fn last_config(&self) -> Option<AudioConfig> {
        self.state.lock().unwrap().last_config
    }
}

impl AudioInput for FakeInput {
    fn open(&mut self, config: &AudioConfig) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(Error::Audio("no input device available".to_string()));
        }
        state.open = true;
        state.opens += 1;
        state.last_config = Some(*config);
        Ok(())
    }

    fn take_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.state.lock().unwrap().pending)
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.closes += 1;
        }
        state.open = false;
        state.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.held()
    }
}

// -- Speaker -----------------------------------------------------------------

/// Playback sink that keeps every sample it receives
pub struct RecordingOutput {
    played: Arc<Mutex<Vec<f32>>>,
}

impl AudioOutput for RecordingOutput {
    fn sample_rate(&self) -> u32 {
        PLAYBACK_SAMPLE_RATE
    }

    fn enqueue(&mut self, samples: Vec<f32>) -> Result<()> {
        self.played.lock().unwrap().extend(samples);
        Ok(())
    }
}

/// Factory for [`RecordingOutput`] writing into `played`
pub fn recording_output(
    played: Arc<Mutex<Vec<f32>>>,
) -> impl Fn() -> Result<Box<dyn AudioOutput>> + Send + Sync + 'static {
    move || {
        let output: Box<dyn AudioOutput> = Box::new(RecordingOutput {
            played: Arc::clone(&played),
        });
        Ok(output)
    }
}

// -- Events ------------------------------------------------------------------

/// Records every event a session emits, in order
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl Recorder {
    /// Subscribe to every event kind on `session`
    #[must_use]
    pub fn attach(session: &Session) -> Self {
        let recorder = Self::default();
        for kind in EventKind::ALL {
            let events = Arc::clone(&recorder.events);
            session.on(kind, move |event| events.lock().unwrap().push(event.clone()));
        }
        recorder
    }

    #[must_use]
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events other than status transitions
    #[must_use]
    pub fn signals(&self) -> Vec<SessionEvent> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, SessionEvent::StatusChanged(_)))
            .collect()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(SessionEvent::kind).collect()
    }

    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

// -- Harness -----------------------------------------------------------------

/// A session wired to fakes
pub struct Harness {
    pub session: Session,
    pub server: MockConnector,
    pub mic: FakeInput,
    pub played: Arc<Mutex<Vec<f32>>>,
    pub events: Recorder,
}

impl Harness {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_mic(config, FakeInput::new())
    }

    #[must_use]
    pub fn with_mic(config: SessionConfig, mic: FakeInput) -> Self {
        let server = MockConnector::new();
        let played = Arc::new(Mutex::new(Vec::new()));
        let session = Session::builder(config)
            .connector(server.clone())
            .audio_input(mic.clone())
            .audio_output(recording_output(Arc::clone(&played)))
            .build();
        let events = Recorder::attach(&session);

        Self {
            session,
            server,
            mic,
            played,
            events,
        }
    }

    /// Connect and let the reader start
    pub async fn connected(config: SessionConfig) -> Self {
        let harness = Self::new(config);
        harness.session.connect().await;
        settle().await;
        harness
    }
}
