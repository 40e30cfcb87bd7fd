// [[AgentOps]]/apps/crew-monitor/src/runtime.rs
// Purpose: Crew runtime. Single writer owning RunState, fed by the stream and user actions.
// Architecture: Domain Logic Layer
// Dependencies: tokio (mpsc, watch, broadcast, oneshot), uuid

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use uuid::Uuid;

use crate::backend::{BackendClient, BackendError};
use crate::config::MonitorConfig;
use crate::events::{EventKind, StreamEvent};
use crate::observability::{StreamCounters, StreamStats};
use crate::store::{RunCommand, RunState};
use crate::stream::{StreamClient, Subscription};
use crate::summary::{BackendSummarizer, Summarizer, SummaryCache};
use crate::view::PipelineView;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Crew is already running")]
    AlreadyRunning,
    #[error("Backend request failed: {0}")]
    Backend(#[from] BackendError),
    #[error("Run state writer has stopped")]
    WriterClosed,
}

enum Envelope {
    Command {
        command: RunCommand,
        ack: Option<oneshot::Sender<()>>,
    },
    /// Reset state for a new run unless one is in flight.
    BeginRun {
        reply: oneshot::Sender<Result<String, RuntimeError>>,
    },
    /// Open a fresh stream subscription for the given run.
    OpenStream {
        run_id: String,
        ack: oneshot::Sender<()>,
    },
    Stream {
        generation: u64,
        event: StreamEvent,
    },
    /// The subscription's task has exited (ended, failed or cancelled).
    StreamClosed { generation: u64 },
}

pub struct CrewRuntime {
    backend: BackendClient,
    counters: Arc<StreamCounters>,
    inbox: mpsc::UnboundedSender<Envelope>,
    state_rx: watch::Receiver<Arc<RunState>>,
    view_rx: watch::Receiver<Arc<PipelineView>>,
    event_feed: broadcast::Sender<StreamEvent>,
}

impl CrewRuntime {
    pub fn new(config: MonitorConfig) -> Self {
        let backend = BackendClient::new(&config);
        let summarizer = Arc::new(BackendSummarizer::new(backend.clone()));
        Self::with_summarizer(config, backend, summarizer)
    }

    pub fn with_summarizer(
        config: MonitorConfig,
        backend: BackendClient,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let counters = Arc::new(StreamCounters::default());
        let state = RunState::with_history_limit(config.history_limit);

        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(Arc::new(state.clone()));
        let (view_tx, view_rx) = watch::channel(Arc::new(PipelineView::derive(&state)));
        let (event_feed, _) = broadcast::channel(256);

        let writer = Writer {
            state,
            stream: StreamClient::new(config.stream_url(), counters.clone()),
            subscription: None,
            generation: 0,
            stream_lost: false,
            inbox: inbox.downgrade(),
            summaries: Arc::new(SummaryCache::new(summarizer)),
            counters: counters.clone(),
            state_tx,
            view_tx,
            event_feed: event_feed.clone(),
        };
        tokio::spawn(writer.run(inbox_rx));

        tracing::info!(
            "Crew runtime ready (stream: {}, history limit: {})",
            config.stream_url(),
            config.history_limit
        );

        CrewRuntime {
            backend,
            counters,
            inbox,
            state_rx,
            view_rx,
            event_feed,
        }
    }

    pub fn view(&self) -> Arc<PipelineView> {
        self.view_rx.borrow().clone()
    }

    pub fn state(&self) -> Arc<RunState> {
        self.state_rx.borrow().clone()
    }

    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }

    pub fn watch_views(&self) -> watch::Receiver<Arc<PipelineView>> {
        self.view_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.event_feed.subscribe()
    }

    fn send(&self, envelope: Envelope) -> Result<(), RuntimeError> {
        self.inbox.send(envelope).map_err(|_| RuntimeError::WriterClosed)
    }

    /// Apply a command and wait until it is visible to readers.
    pub async fn dispatch(&self, command: RunCommand) -> Result<(), RuntimeError> {
        let (ack, done) = oneshot::channel();
        self.send(Envelope::Command {
            command,
            ack: Some(ack),
        })?;
        done.await.map_err(|_| RuntimeError::WriterClosed)
    }

    async fn begin_run(&self) -> Result<String, RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.send(Envelope::BeginRun { reply })?;
        response.await.map_err(|_| RuntimeError::WriterClosed)?
    }

    async fn open_stream(&self, run_id: &str) -> Result<(), RuntimeError> {
        let (ack, done) = oneshot::channel();
        self.send(Envelope::OpenStream {
            run_id: run_id.to_string(),
            ack,
        })?;
        done.await.map_err(|_| RuntimeError::WriterClosed)
    }

    /// Reset local state, trigger the backend crew, then follow its stream.
    /// The stream opens after the trigger so the backend's replayed history
    /// belongs to this run.
    pub async fn start_run(&self) -> Result<String, RuntimeError> {
        let run_id = self.begin_run().await?;
        tracing::info!("Starting crew run {}", run_id);

        match self.backend.start_crew().await {
            Ok(()) => {}
            Err(BackendError::AlreadyRunning) => {
                tracing::warn!("Backend crew already running; following its stream as run {}", run_id);
            }
            Err(e) => {
                tracing::error!("Failed to start crew run {}: {}", run_id, e);
                self.dispatch(RunCommand::Fail(e.to_string())).await?;
                return Err(e.into());
            }
        }

        self.open_stream(&run_id).await?;
        Ok(run_id)
    }

    pub async fn clear(&self) -> Result<(), RuntimeError> {
        self.dispatch(RunCommand::Clear).await
    }

    /// Pick up where the backend is: follow a crew that is already running,
    /// or record the outcome of the last one.
    pub async fn sync_from_backend(&self) -> Result<(), RuntimeError> {
        let status = self.backend.crew_status().await?;

        if status.running {
            let run_id = self.begin_run().await?;
            tracing::info!("Backend crew in flight; attaching as run {}", run_id);
            self.open_stream(&run_id).await?;
        } else if status.result.is_some() || status.error.is_some() {
            tracing::info!("Restoring last crew outcome from backend");
            self.dispatch(RunCommand::Restore {
                run_id: Uuid::new_v4().to_string(),
                result: status.result,
                error: status.error,
            })
            .await?;
        }
        Ok(())
    }
}

struct Writer {
    state: RunState,
    stream: StreamClient,
    subscription: Option<Subscription>,
    generation: u64,
    /// The run is still marked running but its stream is gone for good.
    stream_lost: bool,
    inbox: mpsc::WeakUnboundedSender<Envelope>,
    summaries: Arc<SummaryCache>,
    counters: Arc<StreamCounters>,
    state_tx: watch::Sender<Arc<RunState>>,
    view_tx: watch::Sender<Arc<PipelineView>>,
    event_feed: broadcast::Sender<StreamEvent>,
}

impl Writer {
    /// Strict arrival order; each envelope is fully applied and re-derived
    /// before the next one is taken.
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = inbox.recv().await {
            match envelope {
                Envelope::Command { command, ack } => {
                    self.handle(command);
                    self.publish();
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                }
                Envelope::BeginRun { reply } => {
                    if self.state.running && !self.stream_lost {
                        let _ = reply.send(Err(RuntimeError::AlreadyRunning));
                        continue;
                    }
                    if self.stream_lost {
                        tracing::info!("Replacing run whose stream was lost");
                    }
                    let run_id = Uuid::new_v4().to_string();
                    self.handle(RunCommand::Start {
                        run_id: run_id.clone(),
                    });
                    self.publish();
                    let _ = reply.send(Ok(run_id));
                }
                Envelope::OpenStream { run_id, ack } => {
                    if self.state.running && self.state.run_id.as_deref() == Some(run_id.as_str()) {
                        self.open_stream();
                    } else {
                        tracing::debug!("Run {} no longer current; stream not opened", run_id);
                    }
                    let _ = ack.send(());
                }
                Envelope::Stream { generation, event } => {
                    if !self.accepts(generation) {
                        continue;
                    }
                    if event.event_kind == EventKind::Ping {
                        self.counters.record_ping();
                        continue;
                    }
                    self.counters.record_event();
                    let _ = self.event_feed.send(event.clone());
                    self.handle(RunCommand::Event(event));
                    self.publish();
                }
                Envelope::StreamClosed { generation } => {
                    if !self.accepts(generation) {
                        continue;
                    }
                    self.subscription = None;
                    if self.state.running {
                        tracing::warn!(
                            "Crew stream {} closed before the run finished; a new start is allowed",
                            generation
                        );
                        self.stream_lost = true;
                    }
                }
            }
        }

        self.close_stream("runtime shut down");
    }

    fn accepts(&self, generation: u64) -> bool {
        self.subscription
            .as_ref()
            .map(|s| s.generation == generation && !s.is_cancelled())
            .unwrap_or(false)
    }

    fn handle(&mut self, command: RunCommand) {
        let was_start = matches!(command, RunCommand::Start { .. });
        if was_start {
            self.close_stream("new run");
        }

        let previous_result = self.state.result_text();
        let was_running = self.state.running;
        self.state.apply(command);

        if was_running && !self.state.running {
            match (&self.state.result, &self.state.error) {
                (_, Some(error)) => tracing::warn!("Crew run failed: {}", error),
                _ => tracing::info!("Crew run completed"),
            }
        }

        // Streaming is enabled only while the run is in flight.
        if !self.state.running {
            self.close_stream("run not running");
        }
        if !self.state.running || was_start {
            self.stream_lost = false;
        }

        if let Some(result) = self.state.result_text() {
            if !result.is_empty() && self.state.summary.is_none() && previous_result.as_ref() != Some(&result) {
                self.request_summary(result);
            }
        }
    }

    fn open_stream(&mut self) {
        self.close_stream("replaced");
        self.generation += 1;
        let generation = self.generation;
        let inbox = self.inbox.clone();
        let close_inbox = self.inbox.clone();

        tracing::info!("Opening crew stream {} ({})", generation, self.stream.url());
        let subscription = self.stream.subscribe(
            generation,
            move |event| {
                if let Some(inbox) = inbox.upgrade() {
                    let _ = inbox.send(Envelope::Stream { generation, event });
                }
            },
            move |_| {
                if let Some(inbox) = close_inbox.upgrade() {
                    let _ = inbox.send(Envelope::StreamClosed { generation });
                }
            },
        );
        self.subscription = Some(subscription);
    }

    fn close_stream(&mut self, reason: &str) {
        if let Some(subscription) = self.subscription.take() {
            tracing::info!("Closing crew stream {}: {}", subscription.generation, reason);
            subscription.cancel();
        }
    }

    fn request_summary(&self, result: String) {
        if let Some(summary) = self.summaries.cached(&result) {
            if let Some(inbox) = self.inbox.upgrade() {
                let _ = inbox.send(Envelope::Command {
                    command: RunCommand::Summary { result, summary },
                    ack: None,
                });
            }
            return;
        }

        let summaries = self.summaries.clone();
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            match summaries.get_or_fetch(&result).await {
                Ok(summary) => {
                    if let Some(inbox) = inbox.upgrade() {
                        let _ = inbox.send(Envelope::Command {
                            command: RunCommand::Summary { result, summary },
                            ack: None,
                        });
                    }
                }
                Err(e) => tracing::warn!("Could not summarize crew result: {}", e),
            }
        });
    }

    fn publish(&self) {
        self.state_tx.send_replace(Arc::new(self.state.clone()));
        self.view_tx
            .send_replace(Arc::new(PipelineView::derive(&self.state)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::StagePhase;
    use crate::stages::Stage;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum::response::sse::{Event, Sse};
    use axum::routing::{get, post};
    use axum::Router;
    use futures::stream::{self, StreamExt};
    use std::convert::Infallible;
    use std::time::Duration;

    struct EchoSummarizer;

    #[async_trait]
    impl Summarizer for EchoSummarizer {
        async fn summarize(&self, result: &str) -> Result<String, BackendError> {
            Ok(format!("Summary: {}", result))
        }
    }

    fn offline_runtime() -> CrewRuntime {
        let config = MonitorConfig {
            api_url: "http://127.0.0.1:9".into(),
            ..MonitorConfig::default()
        };
        let backend = BackendClient::new(&config);
        CrewRuntime::with_summarizer(config, backend, Arc::new(EchoSummarizer))
    }

    /// Serve `app` on an ephemeral port and point a runtime at it.
    async fn runtime_against(app: Router) -> CrewRuntime {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = MonitorConfig {
            api_url: format!("http://{}", addr),
            sync_on_boot: false,
            ..MonitorConfig::default()
        };
        let backend = BackendClient::new(&config);
        CrewRuntime::with_summarizer(config, backend, Arc::new(EchoSummarizer))
    }

    fn push(kind: &str, body: &str) -> Result<Event, Infallible> {
        Ok(Event::default().event(kind).data(body))
    }

    fn ev(kind: EventKind, agent: Option<&str>, data: &str) -> StreamEvent {
        let event = StreamEvent::new(kind).with_data(data);
        match agent {
            Some(agent) => event.with_agent(agent),
            None => event,
        }
    }

    #[tokio::test]
    async fn test_dispatch_is_visible_to_readers() {
        let runtime = offline_runtime();
        runtime
            .dispatch(RunCommand::Start { run_id: "run-1".into() })
            .await
            .unwrap();
        runtime
            .dispatch(RunCommand::Event(ev(EventKind::AgentStart, Some("ML Model Monitor"), "go")))
            .await
            .unwrap();

        let view = runtime.view();
        assert!(view.running);
        assert_eq!(view.stage(Stage::Monitor).phase, StagePhase::Active);
        assert_eq!(runtime.state().events.len(), 1);
    }

    #[tokio::test]
    async fn test_begin_run_refuses_while_running() {
        let runtime = offline_runtime();
        runtime
            .dispatch(RunCommand::Start { run_id: "run-1".into() })
            .await
            .unwrap();

        let err = runtime.start_run().await.unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_failed_backend_start_fails_run() {
        let runtime = offline_runtime();
        let err = runtime.start_run().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Backend(_)));

        let state = runtime.state();
        assert!(!state.running);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_completion_attaches_summary() {
        let runtime = offline_runtime();
        let mut views = runtime.watch_views();

        runtime
            .dispatch(RunCommand::Start { run_id: "run-1".into() })
            .await
            .unwrap();
        runtime
            .dispatch(RunCommand::Event(ev(EventKind::Complete, None, "Retraining triggered")))
            .await
            .unwrap();

        let summary = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                if let Some(summary) = views.borrow_and_update().summary.clone() {
                    return summary;
                }
                views.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        assert_eq!(summary, "Summary: Retraining triggered");
        assert!(!runtime.view().running);
    }

    #[tokio::test]
    async fn test_stale_stream_events_are_ignored() {
        let runtime = offline_runtime();
        runtime
            .dispatch(RunCommand::Start { run_id: "run-1".into() })
            .await
            .unwrap();

        // No subscription is open, so nothing tagged with a generation lands.
        runtime
            .send(Envelope::Stream {
                generation: 7,
                event: ev(EventKind::Stdout, None, "late"),
            })
            .unwrap();
        runtime.dispatch(RunCommand::Clear).await.unwrap();
        runtime
            .dispatch(RunCommand::Event(ev(EventKind::Stdout, None, "fresh")))
            .await
            .unwrap();

        let state = runtime.state();
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.events[0].payload(), "fresh");
    }

    #[tokio::test]
    async fn test_stream_events_flow_into_view() {
        let app = Router::new()
            .route("/api/crew/start", post(|| async { StatusCode::OK }))
            .route(
                "/api/crew/stream",
                get(|| async {
                    let pushes = stream::iter(vec![
                        push("agent_start", r#"{"type":"agent_start","data":"Working Agent: ML Model Monitor","agent":"ML Model Monitor"}"#),
                        push("tool_call", r#"{"type":"tool_call","data":"Using tool: Query Model Metrics","agent":"ML Model Monitor"}"#),
                        push("ping", r#"{"type":"ping"}"#),
                        push("stdout", "plain narration"),
                        push("complete", r#"{"type":"complete","data":"Retraining triggered"}"#),
                    ]);
                    // Anything after the terminal push belongs to no run.
                    let late = stream::once(async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        push("stdout", r#"{"type":"stdout","data":"late"}"#)
                    });
                    Sse::new(pushes.chain(late))
                }),
            );
        let runtime = runtime_against(app).await;
        let mut views = runtime.watch_views();

        runtime.start_run().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let finished = {
                    let view = views.borrow_and_update();
                    !view.running && view.result.is_some()
                };
                if finished {
                    return;
                }
                views.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let state = runtime.state();
        let kinds: Vec<EventKind> = state.events.iter().map(|e| e.event_kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::AgentStart, EventKind::ToolCall, EventKind::Stdout, EventKind::Complete]
        );
        assert_eq!(state.events[2].payload(), "plain narration");
        assert!(state.events.iter().all(|e| e.payload() != "late"));

        let stats = runtime.stats();
        assert_eq!(stats.pings_dropped, 1);
        assert_eq!(stats.decode_fallbacks, 1);
        assert_eq!(stats.events_received, 4);
        assert_eq!(stats.connections_opened, 1);

        let view = runtime.view();
        assert_eq!(view.result, Some(serde_json::Value::String("Retraining triggered".into())));
        let monitor = view.stage(Stage::Monitor);
        assert_eq!(monitor.phase, StagePhase::Complete);
        assert!(monitor.checklist.iter().any(|i| i.label == "Query model metrics"));
        assert!(view.stages.iter().all(|s| s.phase != StagePhase::Active));
    }

    #[tokio::test]
    async fn test_lost_stream_allows_restart() {
        let app = Router::new()
            .route("/api/crew/start", post(|| async { StatusCode::OK }))
            .route(
                "/api/crew/stream",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            );
        let runtime = runtime_against(app).await;

        let first = runtime.start_run().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while runtime.stats().transport_errors == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // A broken stream is not a run failure.
        let state = runtime.state();
        assert!(state.running);
        assert_eq!(state.error, None);

        let second = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match runtime.start_run().await {
                    Ok(run_id) => return run_id,
                    Err(RuntimeError::AlreadyRunning) => {
                        tokio::time::sleep(Duration::from_millis(10)).await
                    }
                    Err(e) => panic!("unexpected start failure: {}", e),
                }
            }
        })
        .await
        .unwrap();

        assert_ne!(first, second);
        assert_eq!(runtime.state().run_id.as_deref(), Some(second.as_str()));
    }
}
