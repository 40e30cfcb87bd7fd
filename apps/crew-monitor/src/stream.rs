// [[AgentOps]]/apps/crew-monitor/src/stream.rs
// Purpose: Event Stream Client. One server-push connection per subscription, no reconnects.
// Architecture: Infrastructure Layer
// Dependencies: reqwest-eventsource, futures, tokio-util

use futures::stream::StreamExt;
use reqwest_eventsource::{retry, Event, EventSource};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::{EventKind, StreamEvent};
use crate::observability::StreamCounters;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream request could not be built: {0}")]
    Request(String),
    #[error("Stream transport failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamExit {
    /// The subscriber asked to stop.
    Cancelled,
    /// The server closed the stream.
    Ended,
}

/// Decode one named push. Unknown event names are ignored; known ones are
/// never dropped, malformed bodies degrade to raw text.
pub fn decode_push(name: &str, body: &str, counters: &StreamCounters) -> Option<StreamEvent> {
    let kind = match name.parse::<EventKind>() {
        Ok(kind) => kind,
        Err(e) => {
            tracing::debug!("Ignoring push: {}", e);
            return None;
        }
    };

    match StreamEvent::parse(kind, body) {
        Ok(event) => Some(event),
        Err(e) => {
            if kind != EventKind::Ping {
                tracing::warn!("Malformed {} payload, keeping raw text: {}", kind, e);
                counters.record_decode_fallback();
            }
            Some(StreamEvent::raw(kind, body))
        }
    }
}

#[derive(Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    url: String,
    counters: Arc<StreamCounters>,
}

impl StreamClient {
    pub fn new(url: String, counters: Arc<StreamCounters>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            counters,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Consume the stream until cancelled, ended, or broken. Every decoded
    /// push is handed to `on_event` in arrival order.
    pub async fn run<F>(&self, cancel: CancellationToken, mut on_event: F) -> Result<StreamExit, StreamError>
    where
        F: FnMut(StreamEvent),
    {
        let mut source = EventSource::new(self.http.get(&self.url))
            .map_err(|e| StreamError::Request(e.to_string()))?;
        source.set_retry_policy(Box::new(retry::Never));

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    source.close();
                    tracing::info!("Crew stream cancelled: {}", self.url);
                    return Ok(StreamExit::Cancelled);
                }

                next = source.next() => match next {
                    None | Some(Err(reqwest_eventsource::Error::StreamEnded)) => {
                        source.close();
                        tracing::info!("Crew stream ended by server: {}", self.url);
                        return Ok(StreamExit::Ended);
                    }
                    Some(Err(e)) => {
                        source.close();
                        self.counters.record_transport_error();
                        tracing::error!("Crew stream transport error, closing: {}", e);
                        return Err(StreamError::Transport(e.to_string()));
                    }
                    Some(Ok(Event::Open)) => {
                        self.counters.record_connection();
                        tracing::info!("Crew stream opened: {}", self.url);
                    }
                    Some(Ok(Event::Message(message))) => {
                        if cancel.is_cancelled() {
                            continue;
                        }
                        if let Some(event) = decode_push(&message.event, &message.data, &self.counters) {
                            on_event(event);
                        }
                    }
                },
            }
        }
    }

    /// Spawn `run` on its own task. Dropping or cancelling the returned
    /// subscription closes the connection. `on_close` runs once, after the
    /// last event has been handed to `on_event`.
    pub fn subscribe<F, C>(&self, generation: u64, on_event: F, on_close: C) -> Subscription
    where
        F: FnMut(StreamEvent) + Send + 'static,
        C: FnOnce(Result<StreamExit, StreamError>) + Send + 'static,
    {
        let token = CancellationToken::new();
        let client = self.clone();
        let task_token = token.clone();

        tokio::spawn(async move {
            let outcome = client.run(task_token, on_event).await;
            match &outcome {
                Ok(exit) => tracing::debug!("Subscription {} finished: {:?}", generation, exit),
                Err(e) => tracing::warn!("Subscription {} closed: {}", generation, e),
            }
            on_close(outcome);
        });

        Subscription { generation, token }
    }
}

pub struct Subscription {
    pub generation: u64,
    token: CancellationToken,
}

impl Subscription {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
