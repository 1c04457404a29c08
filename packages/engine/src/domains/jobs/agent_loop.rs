//! The agent loop (§4.6): drives a conversation against the chat provider
//! with function-calling until a final answer, a parked question, or a
//! failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chat_client::{ChatClient, CompletionRequest};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domains::jobs::tools::{self, AgentContext, ToolName, ToolOutcome};
use crate::kernel::discovery::DiscoveryService;
use crate::kernel::models::{ConversationMessage, ExecutionState, HitlMode, Job, LogLevel};
use crate::kernel::object_store::ObjectStore;
use crate::kernel::queue::QueueStore;
use crate::kernel::sandbox::SandboxProvider;

const MAX_ITERATIONS: u32 = 20;
const MAX_TOKENS: u32 = 4096;
const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;
const MAX_HISTORY_MESSAGES: usize = 200;

/// Outcome of one complete pass through the agent loop.
pub enum LoopOutcome {
    Final(String),
    AskUser { question: String, state: serde_json::Value },
    Failure(String),
}

pub struct AgentLoopDeps {
    pub chat_client: Arc<ChatClient>,
    pub queue: Arc<dyn QueueStore>,
    pub discovery: Arc<dyn DiscoveryService>,
    pub object_store: Arc<dyn ObjectStore>,
    pub sandbox_provider: Arc<dyn SandboxProvider>,
}

/// Run the agent loop for one Job to completion, a park point, or failure.
///
/// Cancellation is checked at the top of every iteration and raced against
/// each suspension point inside it — the chat-completion call and every
/// tool's in-flight HTTP/sandbox call (§5) — so a cancelled job releases
/// promptly instead of waiting out whatever call happened to be in flight.
/// Callers that need to bound wall-clock time wrap this call in a timeout
/// keyed to the Job's `timeout_seconds`.
pub async fn run(job: &Job, deps: &AgentLoopDeps, cancel: &CancellationToken) -> LoopOutcome {
    let attachments = load_attachments(job.id, &deps.queue).await;

    let ctx = AgentContext {
        job_id: job.id,
        http: reqwest::Client::new(),
        queue: deps.queue.clone(),
        discovery: deps.discovery.clone(),
        object_store: deps.object_store.clone(),
        sandbox_provider: deps.sandbox_provider.clone(),
        attachments,
        staged_files: tokio::sync::Mutex::new(HashMap::new()),
        sandbox: tokio::sync::Mutex::new(None),
    };

    let mut history = build_conversation(job, &ctx).await;
    let tool_defs = tools::tool_definitions();

    let outcome = loop_body(job, &deps.chat_client, &tool_defs, &mut history, &ctx, cancel).await;

    match &outcome {
        LoopOutcome::Final(_) | LoopOutcome::AskUser { .. } => {
            ctx.upload_staged_artifacts().await;
            ctx.teardown_sandbox().await;
        }
        LoopOutcome::Failure(_) => {
            ctx.teardown_sandbox().await;
        }
    }

    outcome
}

async fn loop_body(
    job: &Job,
    chat_client: &ChatClient,
    tool_defs: &[chat_client::ToolDefinition],
    history: &mut Vec<ConversationMessage>,
    ctx: &AgentContext,
    cancel: &CancellationToken,
) -> LoopOutcome {
    for _ in 0..MAX_ITERATIONS {
        if cancel.is_cancelled() {
            return LoopOutcome::Failure("cancelled".to_string());
        }

        let wire_messages: Vec<serde_json::Value> = history.iter().map(ConversationMessage::to_wire).collect();
        let request = CompletionRequest::new(job.model.clone(), wire_messages)
            .with_tools(tool_defs.to_vec())
            .with_max_tokens(MAX_TOKENS);

        let assistant_raw = match race_cancel(cancel, chat_client.complete(request)).await {
            Err(_) => return LoopOutcome::Failure("cancelled".to_string()),
            Ok(Ok(message)) => message.raw,
            Ok(Err(e)) => return LoopOutcome::Failure(e.to_string()),
        };

        let assistant = ConversationMessage::from_assistant_raw(&assistant_raw);
        let tool_calls = match &assistant {
            ConversationMessage::Assistant { tool_calls, .. } => tool_calls.clone(),
            _ => Vec::new(),
        };
        let content = match &assistant {
            ConversationMessage::Assistant { content, .. } => content.clone(),
            _ => None,
        };
        history.push(assistant);

        if tool_calls.is_empty() {
            return match content {
                Some(text) if !text.is_empty() => {
                    ctx.queue
                        .append_log(
                            job.id,
                            LogLevel::Warn,
                            "assistant returned no tool calls; treating content as final answer",
                            None,
                        )
                        .await;
                    LoopOutcome::Final(text)
                }
                _ => LoopOutcome::Failure("assistant returned an empty message".to_string()),
            };
        }

        for call in &tool_calls {
            let id = call
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let name = call
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let arguments = call
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .unwrap_or("{}");

            let Some(tool_name) = ToolName::parse(name) else {
                history.push(ConversationMessage::Tool {
                    tool_call_id: id,
                    content: format!("unknown tool: {name}"),
                });
                continue;
            };

            let started = std::time::Instant::now();
            let outcome = tools::dispatch(tool_name, arguments, ctx, cancel).await;
            ctx.queue
                .append_log(
                    job.id,
                    LogLevel::Info,
                    &format!("tool call: {name}"),
                    Some(serde_json::json!({
                        "tool": name,
                        "arguments_preview": truncate_preview(arguments, 200),
                        "duration_ms": started.elapsed().as_millis() as u64,
                    })),
                )
                .await;

            match outcome {
                Ok(ToolOutcome::FinalAnswer(answer)) => return LoopOutcome::Final(answer),
                Ok(ToolOutcome::AskUser(question)) => {
                    history.push(ConversationMessage::Tool {
                        tool_call_id: id,
                        content: format!("asked user: {question}"),
                    });
                    let mut state = ExecutionState::new(history.clone());
                    state.truncate_history(MAX_HISTORY_MESSAGES);
                    let state_json = serde_json::to_value(&state).unwrap_or(serde_json::Value::Null);
                    return LoopOutcome::AskUser { question, state: state_json };
                }
                Ok(ToolOutcome::Continue(result)) => {
                    history.push(ConversationMessage::Tool {
                        tool_call_id: id,
                        content: result,
                    });
                }
                Err(error_text) => {
                    history.push(ConversationMessage::Tool {
                        tool_call_id: id,
                        content: format!("error: {error_text}"),
                    });
                }
            }
        }
    }

    LoopOutcome::Failure("max iterations reached".to_string())
}

/// Race a future against job cancellation (§5), mirroring `tools::dispatch`'s
/// internal races so the chat-completion call is interruptible too.
async fn race_cancel<T>(cancel: &CancellationToken, fut: impl std::future::Future<Output = T>) -> Result<T, ()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(()),
        result = fut => Ok(result),
    }
}

fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

async fn load_attachments(job_id: Uuid, queue: &Arc<dyn QueueStore>) -> HashMap<String, String> {
    let mut loaded = HashMap::new();
    let attachments = match queue.list_attachments(job_id).await {
        Ok(a) => a,
        Err(e) => {
            queue
                .append_log(job_id, LogLevel::Warn, &format!("failed to list attachments: {e}"), None)
                .await;
            return loaded;
        }
    };

    let http = reqwest::Client::new();
    for attachment in attachments {
        if attachment.size_bytes as u64 > MAX_ATTACHMENT_BYTES {
            queue
                .append_log(
                    job_id,
                    LogLevel::Warn,
                    &format!("skipping attachment {} ({} bytes exceeds 10 MiB)", attachment.filename, attachment.size_bytes),
                    None,
                )
                .await;
            continue;
        }

        match http.get(&attachment.public_url).send().await {
            Ok(response) => match response.text().await {
                Ok(text) => {
                    loaded.insert(attachment.filename, text);
                }
                Err(e) => {
                    queue
                        .append_log(
                            job_id,
                            LogLevel::Warn,
                            &format!("failed to read attachment {}: {e}", attachment.filename),
                            None,
                        )
                        .await;
                }
            },
            Err(e) => {
                queue
                    .append_log(
                        job_id,
                        LogLevel::Warn,
                        &format!("failed to fetch attachment {}: {e}", attachment.filename),
                        None,
                    )
                    .await;
            }
        }
    }

    loaded
}

async fn build_conversation(job: &Job, ctx: &AgentContext) -> Vec<ConversationMessage> {
    if let Some(state_value) = &job.execution_state {
        if let Ok(state) = serde_json::from_value::<ExecutionState>(state_value.clone()) {
            if !state.conversation_history.is_empty() {
                if let Some(answer) = &job.user_answer {
                    ctx.queue
                        .append_log(
                            job.id,
                            LogLevel::Info,
                            &format!("resuming with {} previous messages", state.conversation_history.len()),
                            None,
                        )
                        .await;
                    let mut history = state.conversation_history;
                    history.push(ConversationMessage::User { content: answer.clone() });
                    return history;
                }
            }
        }
    }

    let mut history = vec![ConversationMessage::System { content: system_prompt(job, ctx) }];
    let task = match &job.user_answer {
        Some(answer) => format!("{}\n\nPrior answer: {answer}", job.task),
        None => job.task.clone(),
    };
    history.push(ConversationMessage::User { content: task });
    history
}

fn system_prompt(job: &Job, ctx: &AgentContext) -> String {
    let mode_clause = match job.hitl_mode {
        HitlMode::PlanApproval => {
            "Before taking any side-effectful action, call discover_tools, form a plan, and call \
             ask_user to get the plan approved."
        }
        HitlMode::AutoExecute => "You may execute the plan immediately without approval.",
        HitlMode::AlwaysAsk => "Call ask_user for confirmation before every side-effectful tool call.",
    };

    let attachment_names: Vec<&str> = ctx.attachments.keys().map(String::as_str).collect();
    let attachment_clause = if attachment_names.is_empty() {
        "No attachments were provided.".to_string()
    } else {
        format!("Available attachments: {}", attachment_names.join(", "))
    };

    format!(
        "You are an autonomous agent. Workflow: discover capabilities, plan, \
         {mode_clause} execute, then call final_answer with the result.\n{attachment_clause}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_reflects_hitl_mode() {
        let job = sample_job(HitlMode::AutoExecute);
        let ctx = sample_ctx(&job);
        assert!(system_prompt(&job, &ctx).contains("immediately without approval"));
    }

    #[test]
    fn system_prompt_lists_attachments() {
        let job = sample_job(HitlMode::PlanApproval);
        let mut ctx = sample_ctx(&job);
        ctx.attachments.insert("notes.txt".to_string(), "hi".to_string());
        assert!(system_prompt(&job, &ctx).contains("notes.txt"));
    }

    fn sample_job(hitl_mode: HitlMode) -> Job {
        Job {
            id: Uuid::new_v4(),
            credential_id: Uuid::new_v4(),
            task: "do something".into(),
            priority: 0,
            timeout_seconds: 60,
            model: "gpt-4o".into(),
            hitl_mode,
            status: crate::kernel::models::JobStatus::Running,
            worker_id: None,
            tools_discovered: serde_json::json!([]),
            execution_state: None,
            result: None,
            error: None,
            agent_question: None,
            user_answer: None,
            retry_count: 0,
            max_retries: 3,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            paused_at: None,
        }
    }

    fn sample_ctx(job: &Job) -> AgentContext {
        use crate::kernel::discovery::HttpDiscoveryService;
        use crate::kernel::object_store::HttpObjectStore;
        use crate::kernel::sandbox::HttpSandboxProvider;

        struct NoopQueue;
        #[async_trait::async_trait]
        impl QueueStore for NoopQueue {
            async fn enqueue(
                &self,
                _: &str,
                _: Uuid,
                _: i32,
                _: i32,
                _: &str,
                _: HitlMode,
                _: i32,
                _: Option<&str>,
            ) -> crate::kernel::queue::QueueResult<Job> {
                unimplemented!()
            }
            async fn claim_next(&self, _: &str) -> crate::kernel::queue::QueueResult<Option<Job>> {
                unimplemented!()
            }
            async fn complete(&self, _: Uuid, _: &str) -> crate::kernel::queue::QueueResult<()> {
                unimplemented!()
            }
            async fn fail(&self, _: Uuid, _: &str) -> crate::kernel::queue::QueueResult<()> {
                unimplemented!()
            }
            async fn release(&self, _: Uuid) -> crate::kernel::queue::QueueResult<()> {
                unimplemented!()
            }
            async fn park(&self, _: Uuid, _: &str, _: serde_json::Value) -> crate::kernel::queue::QueueResult<()> {
                unimplemented!()
            }
            async fn respond(&self, _: Uuid, _: &str) -> crate::kernel::queue::QueueResult<Job> {
                unimplemented!()
            }
            async fn cancel(&self, _: Uuid) -> crate::kernel::queue::QueueResult<()> {
                unimplemented!()
            }
            async fn get(&self, _: Uuid) -> crate::kernel::queue::QueueResult<Option<Job>> {
                unimplemented!()
            }
            async fn list(&self, _: crate::kernel::queue::JobFilter) -> crate::kernel::queue::QueueResult<Vec<Job>> {
                unimplemented!()
            }
            async fn append_log(&self, _: Uuid, _: LogLevel, _: &str, _: Option<serde_json::Value>) {}
            async fn list_logs(
                &self,
                _: Uuid,
                _: i64,
                _: i64,
            ) -> crate::kernel::queue::QueueResult<Vec<crate::kernel::models::JobLog>> {
                unimplemented!()
            }
            async fn list_artifacts(
                &self,
                _: Uuid,
            ) -> crate::kernel::queue::QueueResult<Vec<crate::kernel::models::JobArtifact>> {
                unimplemented!()
            }
            async fn add_artifact(
                &self,
                _: Uuid,
                _: &str,
                _: &str,
                _: &str,
                _: &str,
                _: i64,
            ) -> crate::kernel::queue::QueueResult<crate::kernel::models::JobArtifact> {
                unimplemented!()
            }
            async fn add_attachment(
                &self,
                _: Option<Uuid>,
                _: &str,
                _: &str,
                _: &str,
                _: &str,
                _: i64,
            ) -> crate::kernel::queue::QueueResult<crate::kernel::models::JobAttachment> {
                unimplemented!()
            }
            async fn list_attachments(
                &self,
                _: Uuid,
            ) -> crate::kernel::queue::QueueResult<Vec<crate::kernel::models::JobAttachment>> {
                unimplemented!()
            }
            async fn link_attachments(&self, _: Uuid, _: &[Uuid]) -> crate::kernel::queue::QueueResult<()> {
                unimplemented!()
            }
            async fn set_discovered_tools(&self, _: Uuid, _: &[String]) -> crate::kernel::queue::QueueResult<()> {
                unimplemented!()
            }
            async fn recover_stale(&self, _: i64) -> crate::kernel::queue::QueueResult<u64> {
                unimplemented!()
            }
            async fn upsert_worker_heartbeat(
                &self,
                _: &str,
                _: &str,
                _: &str,
                _: i32,
                _: bool,
            ) -> crate::kernel::queue::QueueResult<()> {
                unimplemented!()
            }
            async fn mark_worker_dead(&self, _: &str) -> crate::kernel::queue::QueueResult<()> {
                unimplemented!()
            }
            async fn list_workers(
                &self,
                _: Option<&str>,
            ) -> crate::kernel::queue::QueueResult<Vec<crate::kernel::models::Worker>> {
                unimplemented!()
            }
            async fn get_worker(&self, _: &str) -> crate::kernel::queue::QueueResult<Option<crate::kernel::models::Worker>> {
                unimplemented!()
            }
        }

        AgentContext {
            job_id: job.id,
            http: reqwest::Client::new(),
            queue: Arc::new(NoopQueue),
            discovery: Arc::new(HttpDiscoveryService::new("http://discovery.local")),
            object_store: Arc::new(HttpObjectStore::new("http://objects.local", "tok")),
            sandbox_provider: Arc::new(HttpSandboxProvider::new("http://sandbox.local", "tok")),
            attachments: HashMap::new(),
            staged_files: tokio::sync::Mutex::new(HashMap::new()),
            sandbox: tokio::sync::Mutex::new(None),
        }
    }
}
