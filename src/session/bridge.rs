//! Lifecycle of one streaming session with the remote voice model.
//!
//! `open` spawns a task on the current tokio runtime that connects, sends the
//! setup message and waits for `setupComplete` before the session counts as
//! open. Events flow back over a crossbeam channel so a plain thread can
//! consume them. `close` may be called from anywhere, any number of times, and
//! always produces exactly one `Closed` event.

use crate::defaults;
use crate::error::{LiveBuddyError, Result};
use crate::session::protocol::{ClientMessage, InboundAudio, InboundMessage};
use crate::session::state::{SessionState, StateCell};
use crate::session::transport::{Connector, TransportLink};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// What the remote needs to start a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub model: String,
    pub system_instruction: String,
    pub voice: String,
    /// Rate of the PCM frames passed to `send_frame`.
    pub input_sample_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: defaults::DEFAULT_MODEL.to_string(),
            system_instruction: defaults::DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            voice: defaults::DEFAULT_VOICE.to_string(),
            input_sample_rate: defaults::CAPTURE_SAMPLE_RATE,
        }
    }
}

/// Lifecycle and data events of one session, in order.
#[derive(Debug)]
pub enum SessionEvent {
    /// The remote acknowledged setup; frames are now sent.
    Opened,
    /// One chunk of response audio.
    Frame(InboundAudio),
    /// The model finished its turn.
    TurnComplete,
    /// The user spoke over the model; queued audio should be dropped.
    Interrupted,
    /// An error. Fatal errors are followed by `Closed`.
    Failed(LiveBuddyError),
    /// Terminal; emitted exactly once.
    Closed,
}

struct SessionInner {
    state: StateCell,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    shutdown: watch::Sender<bool>,
    events: Sender<SessionEvent>,
    input_sample_rate: u32,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            log::debug!("session event dropped: receiver gone");
        }
    }

    /// Move to `Closed` if nobody else has; report `error` first when given.
    fn finish(&self, error: Option<LiveBuddyError>) {
        if self.state.close() == SessionState::Closed {
            if let Some(e) = error {
                log::debug!("discarding error after close: {}", e);
            }
            return;
        }

        let mut outbound = match self.outbound.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        outbound.take();
        self.shutdown.send_replace(true);

        if let Some(e) = error {
            log::warn!("session failed: {}", e);
            self.emit(SessionEvent::Failed(e));
        }
        self.emit(SessionEvent::Closed);
        log::debug!("session closed");
    }
}

/// Caller's side of an open session. Clones share the session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.inner.state.get()
    }

    /// Queue one encoded PCM frame for the remote without blocking.
    ///
    /// Returns false (and counts the frame as dropped) unless the session is
    /// open; frames are never buffered for later.
    pub fn send_frame(&self, encoded: &[u8]) -> bool {
        if self.inner.state.get() != SessionState::Open {
            self.inner.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let sent = match self.inner.outbound.lock() {
            Ok(outbound) => outbound.as_ref().is_some_and(|tx| {
                tx.send(ClientMessage::audio(encoded, self.inner.input_sample_rate))
                    .is_ok()
            }),
            Err(_) => false,
        };

        if sent {
            self.inner.frames_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    /// Close the session and release the transport. Idempotent.
    pub fn close(&self) {
        self.inner.finish(None);
    }

    pub fn frames_sent(&self) -> u64 {
        self.inner.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.inner.frames_dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .field("frames_sent", &self.frames_sent())
            .field("frames_dropped", &self.frames_dropped())
            .finish()
    }
}

/// Opens sessions through a [`Connector`].
#[derive(Clone)]
pub struct SessionBridge {
    connector: Arc<dyn Connector>,
}

impl SessionBridge {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Start a session. Returns immediately in `Connecting`; `Opened` follows
    /// on the event channel once the remote acknowledges setup.
    ///
    /// # Errors
    /// Fails if called outside a tokio runtime.
    pub fn open(&self, config: SessionConfig) -> Result<(SessionHandle, Receiver<SessionEvent>)> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            LiveBuddyError::Other(format!("session requires a tokio runtime: {}", e))
        })?;

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(SessionInner {
            state: StateCell::new(SessionState::Idle),
            outbound: Mutex::new(None),
            shutdown: shutdown_tx,
            events: events_tx,
            input_sample_rate: config.input_sample_rate,
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        });
        inner
            .state
            .transition(SessionState::Idle, SessionState::Connecting);

        log::debug!("opening session with {} ({})", config.model, config.voice);
        runtime.spawn(run_session(
            Arc::clone(&inner),
            Arc::clone(&self.connector),
            config,
            shutdown_rx,
        ));

        Ok((SessionHandle { inner }, events_rx))
    }
}

async fn closed(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means the session is gone
    if shutdown.wait_for(|closed| *closed).await.is_err() {
        log::debug!("session shutdown channel dropped");
    }
}

async fn run_session(
    inner: Arc<SessionInner>,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let connected = tokio::select! {
        _ = closed(&mut shutdown) => return,
        result = connector.connect() => result,
    };

    let mut link = match connected {
        Ok(link) => link,
        Err(e) => {
            inner.finish(Some(e));
            return;
        }
    };

    if link.outbound.send(ClientMessage::setup(&config)).is_err() {
        inner.finish(Some(LiveBuddyError::Transport {
            message: "connection closed before setup was sent".to_string(),
        }));
        return;
    }

    if let Err(e) = await_setup(&mut link, &mut shutdown).await {
        inner.finish(e);
        return;
    }

    {
        let mut outbound = match inner.outbound.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !inner
            .state
            .transition(SessionState::Connecting, SessionState::Open)
        {
            log::debug!("session closed during setup, discarding transport");
            return;
        }
        *outbound = Some(link.outbound.clone());
        inner.emit(SessionEvent::Opened);
    }
    log::info!("session open");

    loop {
        let next = tokio::select! {
            _ = closed(&mut shutdown) => return,
            next = link.inbound.recv() => next,
        };

        match next {
            Some(Ok(message)) => {
                if !dispatch(&inner, message) {
                    return;
                }
            }
            Some(Err(e)) if e.is_recoverable() => {
                log::warn!("skipping bad server message: {}", e);
                inner.emit(SessionEvent::Failed(e));
            }
            Some(Err(e)) => {
                inner.finish(Some(e));
                return;
            }
            None => {
                inner.finish(None);
                return;
            }
        }
    }
}

/// Wait for `setupComplete`. `Err(None)` means the caller closed the session.
async fn await_setup(
    link: &mut TransportLink,
    shutdown: &mut watch::Receiver<bool>,
) -> std::result::Result<(), Option<LiveBuddyError>> {
    loop {
        let next = tokio::select! {
            _ = closed(shutdown) => return Err(None),
            next = link.inbound.recv() => next,
        };

        match next {
            Some(Ok(InboundMessage::SetupComplete)) => return Ok(()),
            Some(Ok(InboundMessage::Closed { reason })) => {
                return Err(Some(LiveBuddyError::Transport {
                    message: format!(
                        "remote closed during setup{}",
                        reason.map(|r| format!(": {}", r)).unwrap_or_default()
                    ),
                }));
            }
            Some(Ok(other)) => log::debug!("ignoring {:?} before setup completed", other),
            Some(Err(e)) if e.is_recoverable() => {
                log::warn!("skipping bad server message during setup: {}", e);
            }
            Some(Err(e)) => return Err(Some(e)),
            None => {
                return Err(Some(LiveBuddyError::Transport {
                    message: "connection lost during setup".to_string(),
                }));
            }
        }
    }
}

/// Forward one inbound message; false once the session has ended.
fn dispatch(inner: &SessionInner, message: InboundMessage) -> bool {
    if inner.state.get() != SessionState::Open {
        return false;
    }

    match message {
        InboundMessage::Audio(audio) => inner.emit(SessionEvent::Frame(audio)),
        InboundMessage::TurnComplete => inner.emit(SessionEvent::TurnComplete),
        InboundMessage::Interrupted => inner.emit(SessionEvent::Interrupted),
        InboundMessage::GoAway { time_left } => {
            log::warn!(
                "server will disconnect soon (time left: {})",
                time_left.as_deref().unwrap_or("unknown")
            );
        }
        InboundMessage::SetupComplete => log::debug!("duplicate setupComplete"),
        InboundMessage::Closed { reason } => {
            log::info!(
                "remote closed the session{}",
                reason.map(|r| format!(" ({})", r)).unwrap_or_default()
            );
            inner.finish(None);
            return false;
        }
    }
    true
}
