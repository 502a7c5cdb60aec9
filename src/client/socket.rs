use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientRequest, ServerEnvelope, Topic, TopicArgs};

use super::multiplexer::{SubscriptionMultiplexer, SubscriptionTransport};

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("socket is closed")]
    Closed,
}

/// Issues subscribe/unsubscribe frames for the multiplexer over the
/// socket's outbound queue.
struct FrameTransport {
    sender: mpsc::Sender<ClientRequest>,
}

#[async_trait]
impl SubscriptionTransport for FrameTransport {
    async fn subscribe(&self, topic: &Topic) -> Result<(), SocketError> {
        self.sender
            .send(ClientRequest::Subscribe(TopicArgs {
                topic: topic.clone(),
            }))
            .await
            .map_err(|_| SocketError::Closed)
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), SocketError> {
        self.sender
            .send(ClientRequest::Unsubscribe(TopicArgs {
                topic: topic.clone(),
            }))
            .await
            .map_err(|_| SocketError::Closed)
    }
}

/// Topic pushes reuse their topic as the envelope kind
/// (`Room/42/Updated`); request responses reuse the request's
/// kebab-case kind. The slash tells them apart.
fn is_topic_kind(kind: &str) -> bool {
    kind.contains('/')
}

/// One authenticated connection to the gateway, driven by two
/// background tasks. Incoming topic pushes fan into the multiplexer;
/// everything else lands on the response channel handed back by
/// `connect`.
pub struct GatewaySocket {
    sender: mpsc::Sender<ClientRequest>,
    multiplexer: Arc<SubscriptionMultiplexer>,
    tasks: Vec<JoinHandle<()>>,
}

impl GatewaySocket {
    /// Open the socket with a previously issued ticket. The ticket is
    /// single-use: a second connect with the same one is refused.
    pub async fn connect(
        endpoint: &str,
        ticket: &str,
    ) -> Result<(Self, mpsc::Receiver<ServerEnvelope>), SocketError> {
        let url = format!("{}?ticket={}", endpoint, ticket);
        let (stream, _response) = connect_async(&url).await?;
        let (mut sink, mut stream) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientRequest>(32);
        let (response_tx, response_rx) = mpsc::channel::<ServerEnvelope>(32);
        let multiplexer = Arc::new(SubscriptionMultiplexer::new(Arc::new(FrameTransport {
            sender: outbound_tx.clone(),
        })));

        let send_task = tokio::spawn(async move {
            while let Some(request) = outbound_rx.recv().await {
                let payload = match serde_json::to_string(&request) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(kind = %request.kind(), error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        });

        let read_task = {
            let multiplexer = multiplexer.clone();
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            let envelope: ServerEnvelope = match serde_json::from_str(text.as_str()) {
                                Ok(envelope) => envelope,
                                Err(e) => {
                                    tracing::warn!(error = %e, "Discarding unreadable frame");
                                    continue;
                                }
                            };
                            if is_topic_kind(&envelope.kind) {
                                let data = envelope.data.unwrap_or(Value::Null);
                                multiplexer.dispatch(&envelope.kind, &data).await;
                            } else if response_tx.send(envelope).await.is_err() {
                                // Consumer dropped the response channel
                                break;
                            }
                        }
                        // tungstenite answers pings on its own
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                        Ok(Message::Close(_)) => {
                            tracing::debug!("Server closed the socket");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "Socket read failed");
                            break;
                        }
                    }
                }
            })
        };

        Ok((
            Self {
                sender: outbound_tx,
                multiplexer,
                tasks: vec![send_task, read_task],
            },
            response_rx,
        ))
    }

    /// The subscription surface for this socket.
    pub fn multiplexer(&self) -> Arc<SubscriptionMultiplexer> {
        self.multiplexer.clone()
    }

    pub async fn send(&self, request: ClientRequest) -> Result<(), SocketError> {
        self.sender
            .send(request)
            .await
            .map_err(|_| SocketError::Closed)
    }

    /// Tear the connection down. Registry cleanup on the server side
    /// happens through its own transport-close handling.
    pub fn close(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NS_ROOM;

    #[test]
    fn test_topic_kinds_are_slash_separated() {
        assert!(is_topic_kind("Room/1/Updated"));
        assert!(is_topic_kind("Chatroom/7/MessageSent"));
        assert!(!is_topic_kind("get-room"));
        assert!(!is_topic_kind("subscribe"));
        assert!(!is_topic_kind("error"));
    }

    #[tokio::test]
    async fn test_frame_transport_sends_subscribe_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let transport = FrameTransport { sender: tx };
        let topic = Topic::new(NS_ROOM, 1, "Updated").unwrap();

        transport.subscribe(&topic).await.unwrap();
        transport.unsubscribe(&topic).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ClientRequest::Subscribe(TopicArgs { topic: topic.clone() })
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ClientRequest::Unsubscribe(TopicArgs { topic })
        );
    }

    #[tokio::test]
    async fn test_frame_transport_reports_closed_socket() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let transport = FrameTransport { sender: tx };
        let topic = Topic::new(NS_ROOM, 1, "Updated").unwrap();
        assert!(matches!(
            transport.subscribe(&topic).await,
            Err(SocketError::Closed)
        ));
    }
}
