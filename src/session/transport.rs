//! Transport seam between the session bridge and the network.

use crate::error::{LiveBuddyError, Result};
use crate::session::protocol::{ClientMessage, InboundMessage};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Opens a connection to the remote model.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Establish the transport. The setup handshake is the bridge's job.
    async fn connect(&self) -> Result<TransportLink>;
}

/// An established connection, as a pair of channels.
///
/// Dropping the link closes the outbound side and stops the reader.
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<Result<InboundMessage>>,
    reader: Option<JoinHandle<()>>,
}

impl TransportLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<ClientMessage>,
        inbound: mpsc::UnboundedReceiver<Result<InboundMessage>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            reader: None,
        }
    }

    /// Attach the task feeding `inbound`; it is aborted when the link drops.
    pub fn with_reader(mut self, reader: JoinHandle<()>) -> Self {
        self.reader = Some(reader);
        self
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// The far side of a [`ChannelConnector`].
pub struct RemoteEnd {
    pub outbound: mpsc::UnboundedReceiver<ClientMessage>,
    pub inbound: mpsc::UnboundedSender<Result<InboundMessage>>,
}

impl RemoteEnd {
    /// Next message the session sent, or `None` once it hung up.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        self.outbound.recv().await
    }

    /// Deliver a message to the session; false if the session is gone.
    pub fn send(&self, message: InboundMessage) -> bool {
        self.inbound.send(Ok(message)).is_ok()
    }

    /// Deliver a transport or protocol error to the session.
    pub fn fail(&self, error: LiveBuddyError) -> bool {
        self.inbound.send(Err(error)).is_ok()
    }
}

enum Mode {
    Ready(Option<TransportLink>),
    Fail(String),
    Pending,
}

/// In-memory connector for tests and offline runs.
pub struct ChannelConnector {
    mode: Mutex<Mode>,
}

impl ChannelConnector {
    /// A connector whose single connection is driven through the returned
    /// [`RemoteEnd`].
    pub fn pair() -> (Self, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let link = TransportLink::new(out_tx, in_rx);
        let connector = Self {
            mode: Mutex::new(Mode::Ready(Some(link))),
        };
        let remote = RemoteEnd {
            outbound: out_rx,
            inbound: in_tx,
        };
        (connector, remote)
    }

    /// A connector that rejects every connection.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            mode: Mutex::new(Mode::Fail(message.into())),
        }
    }

    /// A connector whose connection attempt never finishes.
    pub fn pending() -> Self {
        Self {
            mode: Mutex::new(Mode::Pending),
        }
    }
}

#[async_trait::async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self) -> Result<TransportLink> {
        let ready = {
            let mut mode = self.mode.lock().map_err(|e| LiveBuddyError::Transport {
                message: format!("connector lock poisoned: {}", e),
            })?;
            match &mut *mode {
                Mode::Ready(link) => Some(link.take().ok_or_else(|| LiveBuddyError::Transport {
                    message: "channel transport already used".to_string(),
                })),
                Mode::Fail(message) => Some(Err(LiveBuddyError::Transport {
                    message: message.clone(),
                })),
                Mode::Pending => None,
            }
        };

        match ready {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}
