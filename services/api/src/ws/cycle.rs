//! Contains the logic for one conversational turn of the current agent.

use crate::{
    models::{Message, MessageRole},
    state::AppState,
};
use anyhow::{Context, Result, anyhow};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionToolArgs, FunctionObjectArgs,
};
use futures_util::StreamExt;
use rmcp::{
    ServiceExt,
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use triage_core::{
    CallStatus,
    llm_client::{LLMAction, LLMStreamEvent},
    tools::TriageToolService,
};
use uuid::Uuid;

pub type ToolClient = RunningService<RoleClient, ()>;

/// Serves the call's tool service over an in-process duplex pipe and
/// connects an MCP client to it.
pub async fn start_tool_client(
    state: &Arc<AppState>,
    call_id: Uuid,
) -> Result<(ToolClient, JoinHandle<()>)> {
    let tool_service = TriageToolService::new(call_id, state.registry.clone());
    let (server_transport, client_transport) = tokio::io::duplex(4096);

    let handle = tokio::spawn(async move {
        if let Ok(service) = tool_service.serve(server_transport).await {
            let _ = service.waiting().await;
        }
    });
    let client = ().serve(client_transport).await?;
    Ok((client, handle))
}

fn history_messages(history: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>> {
    history
        .iter()
        .map(|msg| {
            let message: ChatCompletionRequestMessage = match msg.role {
                MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
                MessageRole::Ai => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
            };
            Ok(message)
        })
        .collect()
}

/// Runs one turn of the current agent in response to `user_text`.
///
/// The agent either answers directly or calls tools first. Transfers and
/// end-call tools change the call through the registry; when that happens
/// the turn produces no reply of its own, since the incoming agent's
/// greeting or the end of the call follows on the event channel.
pub async fn handle_turn(
    state: &Arc<AppState>,
    call_id: Uuid,
    history: &mut Vec<Message>,
    tool_client: &ToolClient,
    user_text: &str,
) -> Result<Option<String>> {
    let llm_client = state
        .llm_client
        .as_ref()
        .ok_or_else(|| anyhow!("The conversation loop is disabled"))?;

    let call = state.registry.get(call_id)?;
    let agent = state.registry.catalog().get(call.agent).clone();
    let system_prompt = agent.system_prompt(&call.context);

    history.push(Message::user(user_text));
    let messages = history_messages(history)?;

    // Only offer the tools the current agent owns.
    let tools = tool_client
        .list_all_tools()
        .await?
        .into_iter()
        .filter(|t| agent.has_tool(&t.name))
        .map(|t| {
            Ok(ChatCompletionToolArgs::default()
                .function(
                    FunctionObjectArgs::default()
                        .name(t.name)
                        .description(t.description.unwrap_or_default())
                        .parameters(serde_json::to_value(&*t.input_schema)?)
                        .build()?,
                )
                .build()?)
        })
        .collect::<Result<Vec<_>>>()?;

    let action = llm_client
        .decide_action(system_prompt.clone(), messages.clone(), tools)
        .await?;

    let reply = match action {
        LLMAction::TextResponse(text) => Some(text),
        LLMAction::ToolCall(tool_calls) => {
            let mut tool_results = Vec::with_capacity(tool_calls.len());
            for call in &tool_calls {
                debug!(call_id = %call_id, tool = %call.function.name, "Agent called tool");
                let arguments = if call.function.arguments.trim().is_empty() {
                    None
                } else {
                    Some(serde_json::from_str(&call.function.arguments)?)
                };
                let result = tool_client
                    .peer()
                    .call_tool(CallToolRequestParam {
                        name: call.function.name.clone().into(),
                        arguments,
                    })
                    .await?;

                let annotated_content = result
                    .content
                    .context("Tool call returned no content")?
                    .pop()
                    .context("Content list was empty")?;
                let result_text = match annotated_content.raw {
                    RawContent::Text(text_content) => text_content.text,
                    _ => "{\"error\": \"Unexpected content type from tool\"}".to_string(),
                };
                tool_results.push(result_text);
            }

            let after = state.registry.get(call_id)?;
            if after.status == CallStatus::Ended || after.agent != agent.kind {
                info!(
                    call_id = %call_id,
                    from = %agent.kind,
                    to = %after.agent,
                    status = %after.status,
                    "Tool call moved the call; the turn ends here"
                );
                None
            } else {
                let mut history_with_tools = messages;
                history_with_tools.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .tool_calls(tool_calls.clone())
                        .build()?
                        .into(),
                );
                for (call, result) in tool_calls.iter().zip(tool_results) {
                    history_with_tools.push(
                        ChatCompletionRequestToolMessageArgs::default()
                            .tool_call_id(call.id.clone())
                            .content(result)
                            .build()?
                            .into(),
                    );
                }

                let system_prompt = agent.system_prompt(&after.context);
                let mut final_stream = llm_client
                    .stream_after_tools(system_prompt, history_with_tools)
                    .await?;
                let mut full_response = String::new();
                while let Some(event_result) = final_stream.next().await {
                    if let Ok(LLMStreamEvent::TextChunk(chunk)) = event_result {
                        full_response.push_str(&chunk);
                    }
                }
                Some(full_response)
            }
        }
    };

    let reply = reply.filter(|text| !text.is_empty());
    if let Some(text) = &reply {
        history.push(Message::ai(text.clone()));
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, hub::PipelineHub, test_support::test_config};
    use async_openai::types::{ChatCompletionMessageToolCall, ChatCompletionToolType, FunctionCall};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use triage_core::{
        AgentCatalog, AgentKind, CallRegistry, RegistryConfig,
        llm_client::{LLMClient, LLMStream},
    };

    /// Replays scripted actions and records the prompts it was given.
    struct ScriptedClient {
        actions: Mutex<Vec<LLMAction>>,
        prompts: Mutex<Vec<String>>,
        offered_tools: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(actions: Vec<LLMAction>) -> Self {
            Self {
                actions: Mutex::new(actions),
                prompts: Mutex::new(Vec::new()),
                offered_tools: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn decide_action(
            &self,
            system_prompt: String,
            _history: Vec<ChatCompletionRequestMessage>,
            tools: Vec<async_openai::types::ChatCompletionTool>,
        ) -> Result<LLMAction> {
            self.prompts.lock().unwrap().push(system_prompt);
            *self.offered_tools.lock().unwrap() =
                tools.into_iter().map(|t| t.function.name).collect();
            Ok(self.actions.lock().unwrap().remove(0))
        }

        async fn stream_after_tools(
            &self,
            _system_prompt: String,
            _history: Vec<ChatCompletionRequestMessage>,
        ) -> Result<LLMStream> {
            let chunks = vec![
                Ok(LLMStreamEvent::TextChunk("Thanks, ".into())),
                Ok(LLMStreamEvent::TextChunk("noted.".into())),
            ];
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }
    }

    fn state_with(client: Arc<ScriptedClient>) -> Arc<AppState> {
        let hub = Arc::new(PipelineHub::new());
        let registry = Arc::new(CallRegistry::new(
            Arc::new(AgentCatalog::builtin()),
            hub.clone(),
            RegistryConfig::default(),
        ));
        let config: Config = test_config();
        Arc::new(AppState::new(
            registry,
            hub,
            Some(client as Arc<dyn LLMClient>),
            config,
        ))
    }

    fn tool_call(name: &str, arguments: &str) -> ChatCompletionMessageToolCall {
        ChatCompletionMessageToolCall {
            id: format!("call_{name}"),
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_text_response_is_recorded() {
        let client = Arc::new(ScriptedClient::new(vec![LLMAction::TextResponse(
            "What brings you in today?".into(),
        )]));
        let state = state_with(client.clone());
        let call = state.registry.create(Some("John Doe".into())).unwrap();
        let (tool_client, handle) = start_tool_client(&state, call.call_id).await.unwrap();

        let mut history = Vec::new();
        let reply = handle_turn(&state, call.call_id, &mut history, &tool_client, "Hi")
            .await
            .unwrap();

        assert_eq!(reply.as_deref(), Some("What brings you in today?"));
        assert_eq!(history, vec![Message::user("Hi"), Message::ai("What brings you in today?")]);
        let prompt = client.prompts.lock().unwrap().remove(0);
        assert!(prompt.contains("John Doe"));
        let offered = client.offered_tools.lock().unwrap().clone();
        assert!(offered.contains(&"collect_patient_info".to_string()));
        assert!(!offered.contains(&"transfer_to_triage".to_string()));
        handle.abort();
    }

    #[tokio::test]
    async fn test_transfer_tool_ends_turn_without_reply() {
        let client = Arc::new(ScriptedClient::new(vec![LLMAction::ToolCall(vec![
            tool_call("transfer_to_billing", r#"{"note": "co-pay question"}"#),
        ])]));
        let state = state_with(client);
        let call = state.registry.create(None).unwrap();
        let (tool_client, handle) = start_tool_client(&state, call.call_id).await.unwrap();

        let mut history = Vec::new();
        let reply = handle_turn(
            &state,
            call.call_id,
            &mut history,
            &tool_client,
            "I have a question about my bill",
        )
        .await
        .unwrap();

        assert_eq!(reply, None);
        assert_eq!(state.registry.get(call.call_id).unwrap().agent, AgentKind::Billing);
        handle.abort();
    }

    #[tokio::test]
    async fn test_context_tool_is_followed_by_streamed_reply() {
        let client = Arc::new(ScriptedClient::new(vec![LLMAction::ToolCall(vec![
            tool_call(
                "collect_patient_info",
                r#"{"patient_name": "Ada", "symptoms": "headache", "urgency_level": "low"}"#,
            ),
        ])]));
        let state = state_with(client);
        let call = state.registry.create(None).unwrap();
        let (tool_client, handle) = start_tool_client(&state, call.call_id).await.unwrap();

        let mut history = Vec::new();
        let reply = handle_turn(&state, call.call_id, &mut history, &tool_client, "I'm Ada")
            .await
            .unwrap();

        assert_eq!(reply.as_deref(), Some("Thanks, noted."));
        let context = state.registry.get(call.call_id).unwrap().context;
        assert_eq!(context.patient_name.as_deref(), Some("Ada"));
        assert_eq!(context.symptoms, vec!["headache"]);
        handle.abort();
    }
}
