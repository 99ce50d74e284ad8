//! Production session speaking the pipeline server's REST + SSE protocol.
//!
//! One server-side thread holds the conversation; each submit starts a
//! streaming run against it. The run's SSE stream is consumed on a
//! background task that forwards stage updates and message changes over
//! the session's update channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;

use super::{Message, SessionError, SessionUpdate, StreamSession};

/// Streaming session against a LangGraph pipeline server.
pub struct LangGraphSession {
    client: Client,
    base_url: String,
    assistant_id: String,
    /// Lazily created on the first submit; `reset` discards it so the next
    /// conversation gets a fresh thread.
    thread_id: Mutex<Option<String>>,
    /// Tears down the active stream task. Replaced on every submit.
    cancel: Mutex<Option<CancellationToken>>,
    shared: Arc<Shared>,
}

/// State the stream task mutates behind the session's synchronous views.
/// Locks are never held across an await.
struct Shared {
    messages: Mutex<Vec<Message>>,
    loading: AtomicBool,
    /// Run id from the stream's `metadata` event; needed for cancellation.
    run_id: Mutex<Option<String>>,
    updates: mpsc::Sender<SessionUpdate>,
}

/// A poisoned lock here means a panic mid-update on another task; the
/// views are all replace-wholesale, so the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LangGraphSession {
    pub fn new(config: &ClientConfig, updates: mpsc::Sender<SessionUpdate>) -> Self {
        // No overall request timeout: the run stream stays open for the
        // whole pipeline execution.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.api_url.clone(),
            assistant_id: config.assistant_id.clone(),
            thread_id: Mutex::new(None),
            cancel: Mutex::new(None),
            shared: Arc::new(Shared {
                messages: Mutex::new(Vec::new()),
                loading: AtomicBool::new(false),
                run_id: Mutex::new(None),
                updates,
            }),
        }
    }

    async fn ensure_thread(&self) -> Result<String, SessionError> {
        if let Some(thread_id) = lock(&self.thread_id).clone() {
            return Ok(thread_id);
        }

        let response = self
            .client
            .post(format!("{}/threads", self.base_url))
            .json(&json!({}))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SessionError::status(status, body));
        }

        let created: ThreadCreated = serde_json::from_str(&body)
            .map_err(|e| SessionError::Protocol(format!("thread creation response: {e}")))?;
        info!(thread_id = %created.thread_id, "created pipeline thread");
        *lock(&self.thread_id) = Some(created.thread_id.clone());
        Ok(created.thread_id)
    }
}

#[async_trait]
impl StreamSession for LangGraphSession {
    async fn submit(&self, messages: Vec<Message>) -> Result<(), SessionError> {
        let thread_id = self.ensure_thread().await?;

        // Echo the submitted list immediately; the first `values` event
        // replaces it with the server's copy.
        *lock(&self.shared.messages) = messages.clone();
        let _ = self.shared.updates.send(SessionUpdate::MessagesChanged).await;

        let body = json!({
            "assistant_id": self.assistant_id,
            "input": { "messages": messages },
            "stream_mode": ["updates", "values"],
        });
        let response = self
            .client
            .post(format!("{}/threads/{thread_id}/runs/stream", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::status(status, body));
        }

        self.shared.loading.store(true, Ordering::SeqCst);
        let _ = self
            .shared
            .updates
            .send(SessionUpdate::LoadingChanged(true))
            .await;

        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.cancel).replace(token.clone()) {
            previous.cancel();
        }
        *lock(&self.shared.run_id) = None;

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let ended = tokio::select! {
                () = token.cancelled() => {
                    debug!("run stream torn down by cancellation");
                    None
                }
                ended = consume_stream(response, &shared) => Some(ended),
            };

            // The flag flips before the notifications go out, so views
            // built while they are processed already show idle.
            shared.loading.store(false, Ordering::SeqCst);
            match ended {
                Some(Ok(final_payload)) => {
                    let _ = shared
                        .updates
                        .send(SessionUpdate::Finished(final_payload))
                        .await;
                }
                Some(Err(error)) => {
                    let _ = shared.updates.send(SessionUpdate::Failed(error)).await;
                }
                None => {}
            }
            let _ = shared.updates.send(SessionUpdate::LoadingChanged(false)).await;
        });

        Ok(())
    }

    async fn stop(&self) {
        info!("stopping active run");
        if let Some(token) = lock(&self.cancel).take() {
            token.cancel();
        }

        // Best-effort server-side cancel. If the run id never arrived the
        // token alone tears the run down.
        let run_id = lock(&self.shared.run_id).take();
        let thread_id = lock(&self.thread_id).clone();
        if let (Some(thread_id), Some(run_id)) = (thread_id, run_id) {
            let url = format!(
                "{}/threads/{thread_id}/runs/{run_id}/cancel",
                self.base_url
            );
            let client = self.client.clone();
            tokio::spawn(async move {
                if let Err(error) = client.post(url).send().await {
                    debug!(%error, "run cancel request failed");
                }
            });
        }
    }

    async fn reset(&self) {
        info!("resetting session");
        if let Some(token) = lock(&self.cancel).take() {
            token.cancel();
        }
        *lock(&self.thread_id) = None;
        *lock(&self.shared.run_id) = None;
        lock(&self.shared.messages).clear();
        self.shared.loading.store(false, Ordering::SeqCst);
    }

    fn is_loading(&self) -> bool {
        self.shared.loading.load(Ordering::SeqCst)
    }

    fn messages(&self) -> Vec<Message> {
        lock(&self.shared.messages).clone()
    }
}

/// Drain one run's SSE stream, forwarding updates as they arrive. Returns
/// the final payload from the `end` event when the server sent one.
async fn consume_stream(
    response: reqwest::Response,
    shared: &Shared,
) -> Result<Option<Value>, SessionError> {
    let mut stream = response.bytes_stream().eventsource();
    let mut final_payload = None;

    while let Some(event) = stream.next().await {
        let event = event.map_err(|e| SessionError::Stream(e.to_string()))?;
        match event.event.as_str() {
            "metadata" => match serde_json::from_str::<RunMetadata>(&event.data) {
                Ok(metadata) => {
                    debug!(run_id = %metadata.run_id, "run started");
                    *lock(&shared.run_id) = Some(metadata.run_id);
                }
                Err(error) => debug!(%error, "skipping malformed metadata event"),
            },
            "updates" => match serde_json::from_str::<Value>(&event.data) {
                Ok(update) => {
                    let _ = shared.updates.send(SessionUpdate::Update(update)).await;
                }
                Err(error) => debug!(%error, "skipping malformed updates event"),
            },
            "values" => match serde_json::from_str::<GraphValues>(&event.data) {
                Ok(values) => {
                    *lock(&shared.messages) = values.messages;
                    let _ = shared.updates.send(SessionUpdate::MessagesChanged).await;
                }
                Err(error) => debug!(%error, "skipping malformed values event"),
            },
            "error" => return Err(SessionError::Stream(event.data)),
            "end" => final_payload = serde_json::from_str(&event.data).ok(),
            other => debug!(event = other, "ignoring unrecognized stream event"),
        }
    }

    Ok(final_payload)
}

#[derive(Debug, Deserialize)]
struct ThreadCreated {
    thread_id: String,
}

#[derive(Debug, Deserialize)]
struct RunMetadata {
    run_id: String,
}

/// Full graph state from a `values` event; everything except the
/// conversation is ignored.
#[derive(Debug, Deserialize)]
struct GraphValues {
    #[serde(default)]
    messages: Vec<Message>,
}
