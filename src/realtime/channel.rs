use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
};
use tokio_util::sync::CancellationToken;

use crate::remote::TokenProvider;

use super::message::{ClientMessage, ProtocolError, ServerMessage};

const OUTGOING_CAPACITY: usize = 64;
const INCOMING_CAPACITY: usize = 64;

fn session_url(base: &str, session_id: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}session_id={session_id}")
}

/// Live bidirectional session with the assistant backend.
pub struct RealtimeChannel {
    outgoing: mpsc::Sender<ClientMessage>,
    incoming: mpsc::Receiver<ServerMessage>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RealtimeChannel {
    pub async fn connect(url: &str, session_id: &str, tokens: &dyn TokenProvider) -> Result<Self> {
        let mut request = session_url(url, session_id)
            .into_client_request()
            .context("invalid realtime URL")?;

        if let Some(token) = tokens.bearer_token().await? {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("bearer token is not a valid header value")?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _) = connect_async(request)
            .await
            .context("failed to open realtime channel")?;
        info!("Realtime session {} connected", session_id);

        let (mut write, mut read) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(OUTGOING_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<ServerMessage>(INCOMING_CAPACITY);
        let cancel = CancellationToken::new();

        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = write.close().await;
                        break;
                    }
                    next = out_rx.recv() => {
                        let Some(message) = next else {
                            let _ = write.close().await;
                            break;
                        };
                        match message.encode() {
                            Ok(text) => {
                                if let Err(err) = write.send(Message::Text(text)).await {
                                    warn!("realtime send failed: {err}");
                                    break;
                                }
                            }
                            Err(err) => warn!("dropping invalid {} message: {err}", message.type_name()),
                        }
                    }
                }
            }
        });

        let reader_cancel = cancel.clone();
        let reader = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => match ServerMessage::decode(&text) {
                            Ok(message) => {
                                if in_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => warn!("ignoring server frame: {err}"),
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("realtime channel closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!("realtime receive failed: {err}");
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            outgoing: out_tx,
            incoming: in_rx,
            cancel,
            tasks: vec![writer, reader],
        })
    }

    /// Queues a message for sending. Invalid messages never leave the client.
    pub async fn send(&self, message: ClientMessage) -> Result<(), ProtocolError> {
        message.validate()?;
        self.outgoing
            .send(message)
            .await
            .map_err(|_| ProtocolError::Closed)
    }

    /// Sender for producers running outside async code, such as the audio
    /// recorder callback.
    pub fn sender(&self) -> mpsc::Sender<ClientMessage> {
        self.outgoing.clone()
    }

    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.incoming.recv().await
    }

    pub async fn close(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::StaticToken;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[test]
    fn session_id_is_appended_to_query() {
        assert_eq!(
            session_url("wss://rt.example.test/live", "abc"),
            "wss://rt.example.test/live?session_id=abc"
        );
        assert_eq!(
            session_url("wss://rt.example.test/live?v=2", "abc"),
            "wss://rt.example.test/live?v=2&session_id=abc"
        );
    }

    #[tokio::test]
    async fn exchanges_messages_with_auth() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = oneshot::channel::<(String, Option<String>)>();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let auth = req
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                let _ = seen_tx.send((req.uri().to_string(), auth));
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();

            let first = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text(
                r#"{"type":"transcript","text":"WF_CONFIRM|pending|create_ticket|Waiting for approval"}"#
                    .to_string(),
            ))
            .await
            .unwrap();
            first.into_text().unwrap()
        });

        let token = StaticToken::new(Some("secret".into()));
        let mut channel = RealtimeChannel::connect(&format!("ws://{addr}/live"), "sess-1", &token)
            .await
            .unwrap();

        let empty_audio = ClientMessage::Audio {
            audio: String::new(),
            mime_type: "audio/pcm".into(),
            sample_rate: 16_000,
            timestamp: 1,
        };
        assert_eq!(channel.send(empty_audio).await, Err(ProtocolError::EmptyAudio));

        channel
            .send(ClientMessage::InspectionContext {
                inspection_id: "insp-1".into(),
            })
            .await
            .unwrap();

        let reply = channel.recv().await.unwrap();
        assert!(matches!(reply, ServerMessage::WorkflowConfirmation(_)));

        let (uri, auth) = seen_rx.await.unwrap();
        assert!(uri.ends_with("/live?session_id=sess-1"));
        assert_eq!(auth.as_deref(), Some("Bearer secret"));

        let received = server.await.unwrap();
        assert!(received.contains("inspection_context"));
        channel.close().await;
    }
}
