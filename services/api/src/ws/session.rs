//! Manages the WebSocket connection lifecycle for a call's voice pipeline.

use super::{
    cycle::{ToolClient, handle_turn, start_tool_client},
    protocol::{ClientMessage, ServerMessage},
};
use crate::{
    hub::PipelineEvent,
    models::{AgentInfo, Message as TranscriptLine},
    state::AppState,
};
use anyhow::{Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, Stream, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{Instrument, error, info, instrument, warn};
use triage_core::{CallStatus, RegistryError, RouteOutcome};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// The first message must be `attach`. Once the call is bound, the
/// pipeline session loop runs in its own instrumented task.
#[instrument(name = "pipeline_session", skip_all, fields(call_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New pipeline connection. Awaiting attach...");

    let (socket_tx, mut socket_rx) = socket.split();
    let socket_tx_arc = Arc::new(Mutex::new(socket_tx));

    let first = match first_frame(&mut socket_rx).await {
        Some(Ok(text)) => attach(&state, &text),
        Some(Err(e)) => Err(e),
        None => {
            info!("Pipeline disconnected before attaching.");
            return;
        }
    };

    let (call_id, events, attached) = match first {
        Ok(attached) => attached,
        Err(e) => {
            warn!("Pipeline attach failed: {:?}", e);
            let _ = send_msg(
                &mut *socket_tx_arc.lock().await,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };
    tracing::Span::current().record("call_id", tracing::field::display(call_id));

    if send_msg(&mut *socket_tx_arc.lock().await, attached)
        .await
        .is_err()
    {
        error!("Failed to send Attached message to pipeline.");
        let _ = state
            .registry
            .report_adapter_failure(call_id, "pipeline connection lost during attach");
        state.hub.detach(call_id);
        return;
    }

    let session_span = tracing::info_span!("pipeline_runtime", %call_id);
    tokio::spawn(
        async move {
            if let Err(e) =
                run_pipeline_session(state, socket_tx_arc, socket_rx, call_id, events).await
            {
                error!(error = ?e, "Pipeline session terminated with error.");
            }
            info!("Pipeline session finished.");
        }
        .instrument(session_span),
    );
}

/// Waits for the first data frame, skipping pings and pongs. `None` means
/// the pipeline went away first.
pub(crate) async fn first_frame<S, E>(socket_rx: &mut S) -> Option<Result<String>>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        match socket_rx.next().await? {
            Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Binary(_)) => {
                return Some(Err(anyhow!(
                    "First message was not a text `attach` message."
                )));
            }
            Ok(Message::Close(_)) | Err(_) => return None,
        }
    }
}

/// Parses the `attach` message, activates the call and registers the
/// connection with the hub.
pub(crate) fn attach(
    state: &Arc<AppState>,
    text: &str,
) -> Result<(Uuid, mpsc::Receiver<PipelineEvent>, ServerMessage)> {
    let call_id = match serde_json::from_str::<ClientMessage>(text)? {
        ClientMessage::Attach { call_id } => call_id,
        _ => return Err(anyhow!("First message must be `attach`")),
    };

    state.registry.mark_active(call_id)?;
    let events = state.hub.attach(call_id)?;

    let call = match state.registry.get(call_id) {
        Ok(call) => call,
        Err(e) => {
            state.hub.detach(call_id);
            return Err(e.into());
        }
    };
    let agent = state.registry.catalog().get(call.agent).clone();
    info!(call_id = %call_id, agent = %agent.kind, "Pipeline attached to call");

    let attached = ServerMessage::Attached {
        agent: AgentInfo::from(agent.as_ref()),
        instructions: agent.instructions.clone(),
        greeting: agent.greeting(&call.context),
        call,
    };
    Ok((call_id, events, attached))
}

/// Per-connection state: the call, its transcript and the tool client
/// used by the conversation loop.
pub(crate) struct PipelineSession {
    state: Arc<AppState>,
    call_id: Uuid,
    history: Vec<TranscriptLine>,
    tools: Option<(ToolClient, JoinHandle<()>)>,
    hung_up: bool,
}

impl PipelineSession {
    pub(crate) fn new(state: Arc<AppState>, call_id: Uuid) -> Self {
        Self {
            state,
            call_id,
            history: Vec::new(),
            tools: None,
            hung_up: false,
        }
    }

    /// Handles one message from the pipeline and returns the direct reply,
    /// if any. Handoffs and the end of the call are announced separately
    /// through the hub's event channel.
    pub(crate) async fn handle(&mut self, msg: ClientMessage) -> Option<ServerMessage> {
        let call_id = self.call_id;
        let result: Result<Option<ServerMessage>> = match msg {
            ClientMessage::Attach { .. } => Err(anyhow!("This connection is already attached")),
            ClientMessage::Signal {
                tool_transfer,
                end_requested,
                intents,
            } => {
                let signal = ClientMessage::routing_signal(tool_transfer, end_requested, &intents);
                match self.state.router.submit(call_id, &signal) {
                    Ok(RouteOutcome::Stayed { call }) => Ok(Some(ServerMessage::CallUpdated { call })),
                    Ok(_) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            ClientMessage::PatientInfo {
                patient_name,
                symptoms,
                urgency,
            } => {
                let update =
                    ClientMessage::context_update(patient_name, symptoms, urgency.as_deref());
                self.state
                    .registry
                    .update_context(call_id, update)
                    .map(|call| Some(ServerMessage::CallUpdated { call }))
                    .map_err(Into::into)
            }
            ClientMessage::UserMessage { text } => self.converse(&text).await,
            ClientMessage::Hangup => {
                self.hung_up = true;
                self.state
                    .registry
                    .end(call_id)
                    .map(|_| None)
                    .map_err(Into::into)
            }
        };

        match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "Pipeline message failed");
                Some(ServerMessage::Error {
                    message: e.to_string(),
                })
            }
        }
    }

    async fn converse(&mut self, text: &str) -> Result<Option<ServerMessage>> {
        if self.state.llm_client.is_none() {
            return Err(anyhow!(
                "The conversation loop is disabled; send routing signals instead"
            ));
        }
        if self.tools.is_none() {
            self.tools = Some(start_tool_client(&self.state, self.call_id).await?);
        }
        let Some((tool_client, _)) = &self.tools else {
            return Ok(None);
        };
        let reply = handle_turn(&self.state, self.call_id, &mut self.history, tool_client, text)
            .await?;
        Ok(reply.map(|text| ServerMessage::Response { text }))
    }

    fn call_ended(&self) -> bool {
        self.state
            .registry
            .get(self.call_id)
            .map_or(true, |call| call.status == CallStatus::Ended)
    }

    /// Called once the connection is gone. A pipeline that vanishes without
    /// hanging up abandons the call, which then ends as a failed call.
    pub(crate) fn close(&mut self, ended: bool) {
        if let Some((_, handle)) = self.tools.take() {
            handle.abort();
        }
        self.state.hub.detach(self.call_id);
        if ended || self.hung_up {
            return;
        }
        match self
            .state
            .registry
            .report_adapter_failure(self.call_id, "pipeline disconnected without hanging up")
        {
            RegistryError::AlreadyEnded(_) => {}
            err => warn!(call_id = %self.call_id, error = %err, "Call abandoned by pipeline"),
        }
    }
}

/// The main event loop for an attached pipeline.
///
/// Listens for messages from the pipeline and for events pushed by the
/// registry through the hub, until either side ends the call.
async fn run_pipeline_session(
    state: Arc<AppState>,
    socket_tx: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    mut socket_rx: SplitStream<WebSocket>,
    call_id: Uuid,
    mut events: mpsc::Receiver<PipelineEvent>,
) -> Result<()> {
    let mut session = PipelineSession::new(state, call_id);
    let mut ended = false;

    let result = async {
        loop {
            tokio::select! {
                msg_result = socket_rx.next() => {
                    match msg_result {
                        Some(Ok(Message::Text(text))) => {
                            let reply = match serde_json::from_str::<ClientMessage>(&text) {
                                Ok(msg) => session.handle(msg).await,
                                Err(e) => Some(ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                }),
                            };
                            if let Some(reply) = reply {
                                send_msg(&mut *socket_tx.lock().await, reply).await?;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Pipeline closed the connection.");
                            break;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            warn!("Ignoring binary frame; this endpoint carries JSON only.");
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                        Some(Err(e)) => {
                            error!("Error receiving from pipeline WebSocket: {:?}", e);
                            break;
                        }
                    }
                },
                event = events.recv() => {
                    let event = match event {
                        Some(event) => event,
                        None if session.call_ended() => PipelineEvent::Teardown,
                        None => {
                            warn!("Hub dropped the connection while the call is live.");
                            send_msg(
                                &mut *socket_tx.lock().await,
                                ServerMessage::Error {
                                    message: "Pipeline fell behind on agent updates".to_string(),
                                },
                            )
                            .await?;
                            break;
                        }
                    };
                    let is_teardown = event == PipelineEvent::Teardown;
                    send_msg(
                        &mut *socket_tx.lock().await,
                        ServerMessage::from_event(call_id, event),
                    )
                    .await?;
                    if is_teardown {
                        ended = true;
                        info!("Call ended; closing pipeline connection.");
                        break;
                    }
                },
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    session.close(ended);
    if ended {
        let _ = socket_tx.lock().await.send(Message::Close(None)).await;
    }
    result
}

/// A helper function to serialize and send a `ServerMessage` to the pipeline.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
