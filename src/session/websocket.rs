//! WebSocket transport for the Gemini Live API.

use crate::error::{LiveBuddyError, Result};
use crate::session::protocol::{self, ClientMessage, InboundMessage};
use crate::session::transport::{Connector, TransportLink};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::http::Uri;

/// Connects to a `BidiGenerateContent` endpoint with an API key.
pub struct WebSocketConnector {
    endpoint: String,
    api_key: String,
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The endpoint with the API key appended as a `key` query parameter.
    ///
    /// An endpoint without a path gets `/`; the key is percent-encoded.
    fn request_uri(&self) -> Result<Uri> {
        let invalid = |message: String| LiveBuddyError::ConfigInvalidValue {
            key: "session.endpoint".to_string(),
            message,
        };
        let uri: Uri = self
            .endpoint
            .parse()
            .map_err(|e| invalid(format!("{}: {}", self.endpoint, e)))?;
        let (Some(scheme), Some(authority)) = (uri.scheme(), uri.authority()) else {
            return Err(invalid(format!("{} is not an absolute URL", self.endpoint)));
        };

        let path = match uri.path() {
            "" => "/",
            path => path,
        };
        let key = urlencoding::encode(&self.api_key);
        let path_and_query = match uri.query() {
            Some(query) if !query.is_empty() => format!("{}?{}&key={}", path, query, key),
            _ => format!("{}?key={}", path, key),
        };

        Uri::builder()
            .scheme(scheme.as_str())
            .authority(authority.as_str())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| invalid(e.to_string()))
    }
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

fn deliver(
    inbound: &mpsc::UnboundedSender<Result<InboundMessage>>,
    parsed: Result<Vec<InboundMessage>>,
) -> bool {
    match parsed {
        Ok(messages) => messages
            .into_iter()
            .all(|message| inbound.send(Ok(message)).is_ok()),
        Err(e) => inbound.send(Err(e)).is_ok(),
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<TransportLink> {
        log::debug!("connecting to {}", self.endpoint);
        let (socket, response) =
            connect_async(self.request_uri()?)
                .await
                .map_err(|e| LiveBuddyError::Transport {
                    message: format!("Failed to connect to {}: {}", self.endpoint, e),
                })?;
        log::debug!("websocket handshake complete ({})", response.status());

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<InboundMessage>>();

        // Writer: runs until the link drops its sender, then closes the socket
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let json = match message.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        log::error!("failed to serialize outbound message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(json)).await {
                    log::debug!("websocket send failed: {}", e);
                    break;
                }
            }
            if let Err(e) = sink.close().await {
                log::debug!("websocket close failed: {}", e);
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let keep_going = match frame {
                    Ok(Message::Text(text)) => deliver(&in_tx, protocol::parse(text.as_str())),
                    Ok(Message::Binary(bytes)) => deliver(&in_tx, protocol::parse_slice(&bytes)),
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                            .map(|r| r.trim().to_string());
                        if in_tx.send(Ok(InboundMessage::Closed { reason })).is_err() {
                            log::debug!("session gone before remote close");
                        }
                        return;
                    }
                    Ok(_) => true,
                    Err(e) => {
                        if in_tx
                            .send(Err(LiveBuddyError::Transport {
                                message: e.to_string(),
                            }))
                            .is_err()
                        {
                            log::debug!("session gone before transport error: {}", e);
                        }
                        return;
                    }
                };
                if !keep_going {
                    return;
                }
            }
            if in_tx.send(Ok(InboundMessage::Closed { reason: None })).is_err() {
                log::debug!("session gone before end of stream");
            }
        });

        Ok(TransportLink::new(out_tx, in_rx).with_reader(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    fn request(endpoint: &str, key: &str) -> String {
        WebSocketConnector::new(endpoint, key)
            .request_uri()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_request_uri_appends_key() {
        assert_eq!(
            request("wss://example.com/ws", "secret"),
            "wss://example.com/ws?key=secret"
        );
        assert_eq!(
            request("wss://example.com/ws?alt=1", "secret"),
            "wss://example.com/ws?alt=1&key=secret"
        );
    }

    #[test]
    fn test_request_uri_defaults_path() {
        assert_eq!(
            request("ws://127.0.0.1:9000", "k"),
            "ws://127.0.0.1:9000/?key=k"
        );
    }

    #[test]
    fn test_request_uri_encodes_key() {
        let uri = request("wss://h/ws", "a&b#c d");
        assert_eq!(uri, "wss://h/ws?key=a%26b%23c%20d");
    }

    #[test]
    fn test_request_uri_rejects_relative_endpoint() {
        let result = WebSocketConnector::new("/just/a/path", "k").request_uri();
        assert!(matches!(
            result,
            Err(LiveBuddyError::ConfigInvalidValue { ref key, .. }) if key == "session.endpoint"
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let connector = WebSocketConnector::new("wss://example.com/ws", "secret");
        let debug = format!("{:?}", connector);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("example.com"));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WebSocketConnector::new(format!("ws://{}", addr), "k");
        assert!(matches!(
            connector.connect().await,
            Err(LiveBuddyError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn test_roundtrip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let check = |request: &Request,
                         response: Response|
             -> std::result::Result<Response, ErrorResponse> {
                assert_eq!(request.uri().path(), "/");
                assert_eq!(request.uri().query(), Some("key=k%26k"));
                Ok(response)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, check)
                .await
                .unwrap();

            let first = ws.next().await.unwrap().unwrap();
            let text = first.into_text().unwrap().as_str().to_string();
            let message = ClientMessage::from_json(&text).unwrap();
            assert!(matches!(message, ClientMessage::Setup(_)));

            ws.send(Message::text(r#"{"setupComplete":{}}"#.to_string()))
                .await
                .unwrap();
            ws.send(Message::binary(
                br#"{"serverContent":{"turnComplete":true}}"#.to_vec(),
            ))
            .await
            .unwrap();
            ws.close(None).await.ok();
        });

        let connector = WebSocketConnector::new(format!("ws://{}", addr), "k&k");
        let mut link = connector.connect().await.unwrap();

        let config = crate::session::SessionConfig::default();
        link.outbound.send(ClientMessage::setup(&config)).unwrap();

        let mut received = Vec::new();
        while let Some(message) = link.inbound.recv().await {
            let message = message.unwrap();
            let closed = matches!(message, InboundMessage::Closed { .. });
            received.push(message);
            if closed {
                break;
            }
        }

        assert_eq!(received[0], InboundMessage::SetupComplete);
        assert_eq!(received[1], InboundMessage::TurnComplete);
        assert!(matches!(received[2], InboundMessage::Closed { .. }));
        server.await.unwrap();
    }
}
