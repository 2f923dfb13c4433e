//! WebSocket gateway.
//!
//! Each client gets a duplex session: inbound frames become bus messages
//! addressed to the orchestrator, and bus events fan back out to every
//! session subscribed to the task they concern. Outbound delivery is
//! best-effort behind a bounded per-session queue.

pub mod frames;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::Bus;
use crate::error::Result;
use crate::intelligence::{EffortContext, EffortEstimator};
use crate::protocol::channels::{agent_channel, FRONTEND_BROADCAST, SYSTEM_STATUS};
use crate::protocol::{encode, new_task_id, Message, MessageIntent, Task, TaskEvent};

use frames::{ClientFrame, ServerFrame};
use session::Session;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    /// Agent receiving client chat and tasks.
    pub orchestrator: String,
    pub queue_capacity: usize,
    pub ping_interval: Duration,
    pub max_missed_pings: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            orchestrator: "moderator".to_string(),
            queue_capacity: 256,
            ping_interval: Duration::from_secs(30),
            max_missed_pings: 2,
        }
    }
}

pub struct Gateway {
    bus: Arc<dyn Bus>,
    config: GatewayConfig,
    estimator: Arc<EffortEstimator>,
    sessions: DashMap<String, Arc<Session>>,
    channel_pumps: DashMap<String, ()>,
}

/// Task id carried by a bus event, if any. Stream events nest it under
/// `data`.
fn task_scope(value: &Value) -> Option<String> {
    value
        .get("task_id")
        .or_else(|| value.get("data").and_then(|d| d.get("task_id")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Terminal results and stream boundaries must survive backpressure;
/// everything else may be shed.
fn is_critical(value: &Value) -> bool {
    if value.get("outcome").is_some() {
        return true;
    }
    matches!(
        value.get("event").and_then(Value::as_str),
        Some("stream_start") | Some("stream_end")
    )
}

impl Gateway {
    pub fn new(bus: Arc<dyn Bus>, config: GatewayConfig, estimator: Arc<EffortEstimator>) -> Self {
        Self {
            bus,
            config,
            estimator,
            sessions: DashMap::new(),
            channel_pumps: DashMap::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Subscribe the broadcast channel and fan events into sessions.
    pub async fn start_pump(self: Arc<Self>) -> Result<()> {
        let mut subscription = self.bus.subscribe(FRONTEND_BROADCAST).await?;
        let gateway = self;
        tokio::spawn(async move {
            while let Some(raw) = subscription.recv().await {
                gateway.deliver(&raw, None);
            }
        });
        Ok(())
    }

    /// Fan one bus event out. Unscoped events reach every session;
    /// task-scoped events only reach sessions subscribed to that task.
    pub fn deliver(&self, raw: &str, scope_override: Option<&str>) {
        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            debug!("Unparseable broadcast payload skipped");
            return;
        };

        let scope = scope_override
            .map(str::to_string)
            .or_else(|| task_scope(&value));
        let critical = is_critical(&value);

        for session in self.sessions.iter() {
            match &scope {
                None => session.enqueue(raw.to_string(), critical),
                Some(key) if session.is_subscribed(key) => {
                    session.enqueue(raw.to_string(), critical)
                }
                Some(_) => {}
            }
        }
    }

    /// Forward a client channel subscription into the fan-out.
    fn ensure_channel_pump(gateway: &Arc<Self>, channel: &str) {
        if gateway
            .channel_pumps
            .insert(channel.to_string(), ())
            .is_some()
        {
            return;
        }
        let gateway = Arc::clone(gateway);
        let channel = channel.to_string();
        tokio::spawn(async move {
            match gateway.bus.subscribe(&channel).await {
                Ok(mut subscription) => {
                    while let Some(raw) = subscription.recv().await {
                        gateway.deliver(&raw, Some(&channel));
                    }
                }
                Err(e) => warn!(channel = %channel, error = %e, "Channel pump failed"),
            }
        });
    }

    async fn publish_to_orchestrator(&self, session: &Session, payload: &str) {
        let channel = agent_channel(&self.config.orchestrator);
        if let Err(e) = self.bus.publish(&channel, payload).await {
            warn!(client = %session.client_id, error = %e, "Publish to orchestrator failed");
            self.send_frame(
                session,
                &ServerFrame::Error {
                    message: "backend temporarily unavailable".to_string(),
                },
            );
        }
    }

    fn send_frame(&self, session: &Session, frame: &ServerFrame) {
        if let Ok(raw) = serde_json::to_string(frame) {
            session.enqueue(raw, true);
        }
    }

    /// Process one inbound client frame.
    pub async fn handle_frame(self: Arc<Self>, session: &Arc<Session>, raw: &str) {
        session.touch();

        let frame: ClientFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.send_frame(
                    session,
                    &ServerFrame::Error {
                        message: format!("unrecognized frame: {e}"),
                    },
                );
                return;
            }
        };

        match frame {
            ClientFrame::ChatMessage { content, task_id } => {
                if content.trim().is_empty() {
                    self.send_frame(
                        session,
                        &ServerFrame::Error {
                            message: "content cannot be empty".to_string(),
                        },
                    );
                    return;
                }
                let task_id = task_id.unwrap_or_else(new_task_id);
                session.subscribe(&task_id);

                let message = Message::new(
                    &task_id,
                    &session.client_id,
                    content,
                    MessageIntent::Chat,
                )
                .with_target(self.config.orchestrator.clone());
                if let Ok(payload) = encode(&message) {
                    self.publish_to_orchestrator(session, &payload).await;
                }
            }
            ClientFrame::StartTask {
                content,
                task_id,
                confidence,
            } => {
                if content.trim().is_empty() {
                    self.send_frame(
                        session,
                        &ServerFrame::Error {
                            message: "content cannot be empty".to_string(),
                        },
                    );
                    return;
                }
                let task_id = task_id.unwrap_or_else(new_task_id);
                session.subscribe(&task_id);

                let intent = MessageIntent::StartTask;
                let event = TaskEvent::Plan;
                let (effort, diagnostics) = self.estimator.estimate(
                    &content,
                    EffortContext {
                        event: Some(&event),
                        intent: Some(&intent),
                        confidence,
                        deadline_pressure: None,
                    },
                );

                let task = Task::new(
                    &task_id,
                    &session.client_id,
                    content,
                    &self.config.orchestrator,
                    intent,
                    event,
                )
                .with_confidence(confidence.unwrap_or(0.9))
                .with_effort(effort)
                .with_diagnostics(diagnostics);

                if let Ok(payload) = encode(&task) {
                    self.publish_to_orchestrator(session, &payload).await;
                }
                info!(
                    client = %session.client_id,
                    task_id = %task_id,
                    effort = %effort,
                    "Task submitted"
                );
            }
            ClientFrame::Ping => self.send_frame(session, &ServerFrame::Pong),
            ClientFrame::Pong => {} // touch() above already reset liveness
            ClientFrame::Subscribe { task_id, channel } => {
                if let Some(task_id) = task_id {
                    session.subscribe(&task_id);
                }
                if let Some(channel) = channel {
                    session.subscribe(&channel);
                    Self::ensure_channel_pump(&self, &channel);
                }
            }
            ClientFrame::Unsubscribe { task_id, channel } => {
                if let Some(task_id) = task_id {
                    session.unsubscribe(&task_id);
                }
                if let Some(channel) = channel {
                    session.unsubscribe(&channel);
                }
            }
            ClientFrame::Command { command } => match command.as_str() {
                "get_agent_status" => {
                    let frame = match self.bus.get(SYSTEM_STATUS).await {
                        Ok(Some(snapshot)) => serde_json::from_str(&snapshot)
                            .map(ServerFrame::AgentStatus)
                            .unwrap_or(ServerFrame::Error {
                                message: "status snapshot unreadable".to_string(),
                            }),
                        _ => ServerFrame::Error {
                            message: "no status snapshot available".to_string(),
                        },
                    };
                    self.send_frame(session, &frame);
                }
                other => self.send_frame(
                    session,
                    &ServerFrame::Error {
                        message: format!("unknown command: {other}"),
                    },
                ),
            },
            ClientFrame::CancelTask { task_id } => {
                let cancel = Task::new(
                    &task_id,
                    &session.client_id,
                    "cancelled by client",
                    &self.config.orchestrator,
                    MessageIntent::ModifyTask,
                    TaskEvent::Escalate,
                );
                if let Ok(payload) = encode(&cancel) {
                    self.publish_to_orchestrator(session, &payload).await;
                }
            }
        }
    }

    /// Run one socket for its lifetime.
    async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let client_id = format!("client-{}", Uuid::new_v4().simple());
        let session = Arc::new(Session::new(&client_id, self.config.queue_capacity));
        self.sessions.insert(client_id.clone(), Arc::clone(&session));
        info!(client = %client_id, "WebSocket connected");

        let (mut sender, mut receiver) = socket.split();

        let hello = ServerFrame::ConnectionEstablished {
            client_id: client_id.clone(),
        };
        if let Ok(raw) = serde_json::to_string(&hello) {
            if sender.send(WsMessage::Text(raw.into())).await.is_err() {
                self.sessions.remove(&client_id);
                return;
            }
        }

        let recv_gateway = Arc::clone(&self);
        let recv_session = Arc::clone(&session);
        let mut recv_task = tokio::spawn(async move {
            while let Some(message) = receiver.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        Arc::clone(&recv_gateway)
                            .handle_frame(&recv_session, &text)
                            .await;
                    }
                    Ok(WsMessage::Pong(_)) => recv_session.touch(),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(client = %recv_session.client_id, error = %e, "Receive error");
                        break;
                    }
                }
            }
        });

        let mut ping_ticker = tokio::time::interval(self.config.ping_interval);
        ping_ticker.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                raw = session.pop() => {
                    if sender.send(WsMessage::Text(raw.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_ticker.tick() => {
                    if session.ping_sent() > self.config.max_missed_pings {
                        info!(client = %client_id, "Client unresponsive, closing");
                        break;
                    }
                    if let Ok(raw) = serde_json::to_string(&ServerFrame::Ping) {
                        if sender.send(WsMessage::Text(raw.into())).await.is_err() {
                            break;
                        }
                    }
                }
                _ = &mut recv_task => break,
            }
        }

        // The client is gone; backend work continues untouched. Only this
        // session's subscriptions are torn down.
        recv_task.abort();
        self.sessions.remove(&client_id);
        info!(
            client = %client_id,
            dropped = session.dropped_events(),
            "WebSocket disconnected"
        );
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(self)
    }

    /// Bind and serve until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        Arc::clone(&self).start_pump().await?;

        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "Gateway listening");

        let router = Arc::clone(&self).router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await?;
        Ok(())
    }
}

async fn ws_handler(State(gateway): State<Arc<Gateway>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| gateway.handle_socket(socket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::intelligence::EstimatorConfig;
    use crate::protocol::TaskResult;

    fn gateway(bus: &Arc<dyn Bus>) -> Arc<Gateway> {
        Arc::new(Gateway::new(
            Arc::clone(bus),
            GatewayConfig::default(),
            Arc::new(EffortEstimator::new(EstimatorConfig::default())),
        ))
    }

    fn session(gateway: &Arc<Gateway>) -> Arc<Session> {
        let session = Arc::new(Session::new("client-test", 16));
        gateway
            .sessions
            .insert(session.client_id.clone(), Arc::clone(&session));
        session
    }

    #[tokio::test]
    async fn test_start_task_published_with_effort() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let mut moderator = bus.subscribe("moderator_channel").await.unwrap();
        let gateway = gateway(&bus);
        let session = session(&gateway);

        Arc::clone(&gateway)
            .handle_frame(
                &session,
                r#"{"type":"start_task","payload":{"content":"Summarize the text 'hello world' in one sentence."}}"#,
            )
            .await;

        let raw = moderator.recv().await.unwrap();
        let task: Task = serde_json::from_str(&raw).unwrap();
        assert_eq!(task.intent, MessageIntent::StartTask);
        assert_eq!(task.event, TaskEvent::Plan);
        assert_eq!(task.agent, "client-test");
        assert!(task.reasoning_effort.is_some());
        assert!(session.is_subscribed(&task.task_id));
    }

    #[tokio::test]
    async fn test_empty_content_rejected_with_error_frame() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let mut moderator = bus.subscribe("moderator_channel").await.unwrap();
        let gateway = gateway(&bus);
        let session = session(&gateway);

        Arc::clone(&gateway)
            .handle_frame(
                &session,
                r#"{"type":"start_task","payload":{"content":"   "}}"#,
            )
            .await;

        let frame: ServerFrame = serde_json::from_str(&session.try_pop().unwrap()).unwrap();
        assert!(matches!(frame, ServerFrame::Error { .. }));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(moderator.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_delivery_filtered_by_task_subscription() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let gateway = gateway(&bus);
        let subscribed = session(&gateway);
        subscribed.subscribe("task_9");

        let other = Arc::new(Session::new("client-other", 16));
        gateway
            .sessions
            .insert(other.client_id.clone(), Arc::clone(&other));

        let result = TaskResult::new(
            "task_9",
            "moderator",
            "done",
            "client-test",
            TaskEvent::Complete,
            crate::protocol::TaskOutcome::Completed,
        );
        gateway.deliver(&encode(&result).unwrap(), None);

        assert!(subscribed.try_pop().is_some());
        assert!(other.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_unscoped_event_reaches_everyone() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let gateway = gateway(&bus);
        let a = session(&gateway);
        let b = Arc::new(Session::new("client-b", 16));
        gateway.sessions.insert(b.client_id.clone(), Arc::clone(&b));

        gateway.deliver(r#"{"type":"system_status_update","payload":{}}"#, None);

        assert!(a.try_pop().is_some());
        assert!(b.try_pop().is_some());
    }

    #[tokio::test]
    async fn test_cancel_task_publishes_escalate() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let mut moderator = bus.subscribe("moderator_channel").await.unwrap();
        let gateway = gateway(&bus);
        let session = session(&gateway);

        Arc::clone(&gateway)
            .handle_frame(
                &session,
                r#"{"type":"cancel_task","payload":{"task_id":"task_7"}}"#,
            )
            .await;

        let raw = moderator.recv().await.unwrap();
        let cancel: Task = serde_json::from_str(&raw).unwrap();
        assert_eq!(cancel.task_id, "task_7");
        assert_eq!(cancel.event, TaskEvent::Escalate);
        assert_eq!(cancel.agent, "client-test");
    }

    #[tokio::test]
    async fn test_agent_status_command_reads_snapshot() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        bus.set_with_ttl(
            SYSTEM_STATUS,
            r#"{"system_ready":true,"agent_status":{}}"#,
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        let gateway = gateway(&bus);
        let session = session(&gateway);

        Arc::clone(&gateway)
            .handle_frame(
                &session,
                r#"{"type":"command","payload":{"command":"get_agent_status"}}"#,
            )
            .await;

        let frame: ServerFrame = serde_json::from_str(&session.try_pop().unwrap()).unwrap();
        assert!(matches!(frame, ServerFrame::AgentStatus(_)));
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        let gateway = gateway(&bus);
        let session = session(&gateway);

        Arc::clone(&gateway)
            .handle_frame(&session, r#"{"type":"ping"}"#)
            .await;

        let frame: ServerFrame = serde_json::from_str(&session.try_pop().unwrap()).unwrap();
        assert_eq!(frame, ServerFrame::Pong);
    }
}
