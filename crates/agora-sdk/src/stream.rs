//! Push stream of job events.

use agora_core::{Address, AgoraError, JobEvent, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Stream of `onNewTask` / `onEvaluate` events for a wallet.
pub struct JobEventStream {
    wallet: Address,
    receiver: tokio::sync::mpsc::Receiver<JobEvent>,
    _handle: tokio::task::JoinHandle<()>,
}

impl JobEventStream {
    /// Connect to the push endpoint and start reading events.
    pub async fn connect(ws_url: &str, wallet: impl Into<Address>) -> Result<Self> {
        let wallet = wallet.into();
        let url = push_url(ws_url, &wallet);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| AgoraError::ConnectionError(e.to_string()))?;

        tracing::info!(%wallet, "push stream connected");

        let (tx, rx) = tokio::sync::mpsc::channel(100);

        let handle = tokio::spawn(async move {
            let (mut write, mut read) = ws_stream.split();

            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match parse_event(&text) {
                        Some(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        None => tracing::debug!("ignoring push frame"),
                    },
                    Ok(Message::Ping(payload)) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "push stream failed");
                        break;
                    }
                    _ => {}
                }
            }
            tracing::info!("push stream closed");
        });

        Ok(Self {
            wallet,
            receiver: rx,
            _handle: handle,
        })
    }

    pub fn wallet(&self) -> &Address {
        &self.wallet
    }

    /// Next event, or `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<JobEvent> {
        self.receiver.recv().await
    }
}

/// Websocket URL for `wallet`, accepting http(s) base URLs.
pub fn push_url(base: &str, wallet: &Address) -> String {
    let base = base
        .trim_end_matches('/')
        .replacen("http://", "ws://", 1)
        .replacen("https://", "wss://", 1);
    format!("{base}?walletAddress={wallet}")
}

/// Decode a text frame. Frames that are not job events yield `None`.
pub fn parse_event(text: &str) -> Option<JobEvent> {
    serde_json::from_str(text).ok()
}
