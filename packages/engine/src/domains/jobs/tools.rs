//! The agent loop's tool inventory (§4.6).
//!
//! Tool dispatch is a closed enumeration of known names with a fixed handler
//! per name (§9 design notes) rather than a pluggable registry: unknown
//! names are reported to the model as tool errors, never executed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chat_client::ToolDefinition;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::kernel::discovery::DiscoveryService;
use crate::kernel::models::LogLevel;
use crate::kernel::object_store::ObjectStore;
use crate::kernel::queue::QueueStore;
use crate::kernel::sandbox::{Sandbox, SandboxProvider};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const PYTHON_TIMEOUT: Duration = Duration::from_secs(120);
const FETCH_BODY_TRUNCATE_BYTES: usize = 50 * 1024;
const MAX_EXTRA_PACKAGES: usize = 10;
const BASELINE_PACKAGES: &[&str] = &["numpy", "pandas", "requests"];

/// The stable tool names the model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    DiscoverTools,
    FetchUrl,
    RunPython,
    ReadFile,
    WriteFile,
    AskUser,
    FinalAnswer,
}

impl ToolName {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "discover_tools" => ToolName::DiscoverTools,
            "fetch_url" => ToolName::FetchUrl,
            "run_python" => ToolName::RunPython,
            "read_file" => ToolName::ReadFile,
            "write_file" => ToolName::WriteFile,
            "ask_user" => ToolName::AskUser,
            "final_answer" => ToolName::FinalAnswer,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::DiscoverTools => "discover_tools",
            ToolName::FetchUrl => "fetch_url",
            ToolName::RunPython => "run_python",
            ToolName::ReadFile => "read_file",
            ToolName::WriteFile => "write_file",
            ToolName::AskUser => "ask_user",
            ToolName::FinalAnswer => "final_answer",
        }
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct DiscoverToolsArgs {
    pub query: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct FetchUrlArgs {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct RunPythonArgs {
    pub code: String,
    #[serde(default)]
    pub packages: Option<Vec<String>>,
}

#[derive(Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    pub filename: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    pub filename: String,
    pub content: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct AskUserArgs {
    pub question: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct FinalAnswerArgs {
    pub answer: String,
}

/// Render the full tool inventory as function-calling definitions.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    use chat_client::StructuredOutput;

    vec![
        ToolDefinition {
            name: ToolName::DiscoverTools.as_str().to_string(),
            description: "Search for candidate external capabilities relevant to the task".into(),
            parameters: DiscoverToolsArgs::openai_schema(),
        },
        ToolDefinition {
            name: ToolName::FetchUrl.as_str().to_string(),
            description: "Perform an HTTP request".into(),
            parameters: FetchUrlArgs::openai_schema(),
        },
        ToolDefinition {
            name: ToolName::RunPython.as_str().to_string(),
            description: "Run Python code in a sandboxed interpreter for this job".into(),
            parameters: RunPythonArgs::openai_schema(),
        },
        ToolDefinition {
            name: ToolName::ReadFile.as_str().to_string(),
            description: "Read a previously loaded attachment's contents".into(),
            parameters: ReadFileArgs::openai_schema(),
        },
        ToolDefinition {
            name: ToolName::WriteFile.as_str().to_string(),
            description: "Stage a file to be persisted as a job artifact".into(),
            parameters: WriteFileArgs::openai_schema(),
        },
        ToolDefinition {
            name: ToolName::AskUser.as_str().to_string(),
            description: "Ask the human submitter a question and pause the job".into(),
            parameters: AskUserArgs::openai_schema(),
        },
        ToolDefinition {
            name: ToolName::FinalAnswer.as_str().to_string(),
            description: "Finish the job with the supplied answer".into(),
            parameters: FinalAnswerArgs::openai_schema(),
        },
    ]
}

/// The result of dispatching one tool call.
pub enum ToolOutcome {
    /// Feed this text back to the model as a tool-role message and continue.
    Continue(String),
    FinalAnswer(String),
    AskUser(String),
}

/// Per-job mutable state shared across tool calls within one agent loop run.
pub struct AgentContext {
    pub job_id: Uuid,
    pub http: reqwest::Client,
    pub queue: Arc<dyn QueueStore>,
    pub discovery: Arc<dyn DiscoveryService>,
    pub object_store: Arc<dyn ObjectStore>,
    pub sandbox_provider: Arc<dyn SandboxProvider>,
    pub attachments: HashMap<String, String>,
    pub staged_files: Mutex<HashMap<String, String>>,
    pub sandbox: Mutex<Option<Box<dyn Sandbox>>>,
}

impl AgentContext {
    /// Tear down the sandbox, if one was ever created (§4.6 sandbox lifecycle).
    pub async fn teardown_sandbox(&self) {
        if let Some(sandbox) = self.sandbox.lock().await.take() {
            if let Err(e) = sandbox.kill().await {
                tracing::warn!(job_id = %self.job_id, error = %e, "failed to tear down sandbox");
            }
        }
    }

    /// Persist staged artifacts and return the ones that uploaded successfully.
    pub async fn upload_staged_artifacts(&self) {
        let staged = std::mem::take(&mut *self.staged_files.lock().await);
        for (filename, content) in staged {
            let path = format!("artifacts/{}/{}", self.job_id, filename);
            match self
                .object_store
                .upload(&path, content.into_bytes(), "application/octet-stream")
                .await
            {
                Ok(public_url) => {
                    if let Err(e) = self
                        .queue
                        .add_artifact(self.job_id, &filename, "application/octet-stream", &path, &public_url, 0)
                        .await
                    {
                        tracing::warn!(job_id = %self.job_id, error = %e, "failed to record artifact");
                    } else {
                        self.queue
                            .append_log(self.job_id, LogLevel::Info, &format!("uploaded artifact {filename}"), None)
                            .await;
                    }
                }
                Err(e) => {
                    self.queue
                        .append_log(
                            self.job_id,
                            LogLevel::Warn,
                            &format!("failed to upload artifact {filename}: {e}"),
                            None,
                        )
                        .await;
                }
            }
        }
    }
}

/// Race a future against job cancellation. `Err` means the token fired
/// before the future resolved (§5: suspension points must be cancellable).
async fn race_cancel<T>(cancel: &CancellationToken, fut: impl std::future::Future<Output = T>) -> Result<T, String> {
    tokio::select! {
        _ = cancel.cancelled() => Err("cancelled".to_string()),
        result = fut => Ok(result),
    }
}

/// Dispatch one tool call. `Err` carries the text to feed back to the model
/// as a tool-error result — tool errors never fail the loop (§4.6, §7).
/// `cancel` is raced against every in-flight HTTP and sandbox call so a
/// shutdown or job cancellation interrupts a suspended tool promptly (§5).
pub async fn dispatch(
    name: ToolName,
    arguments: &str,
    ctx: &AgentContext,
    cancel: &CancellationToken,
) -> Result<ToolOutcome, String> {
    match name {
        ToolName::DiscoverTools => {
            let args: DiscoverToolsArgs = parse_args(arguments)?;
            let agents = race_cancel(cancel, ctx.discovery.discover(&args.query, 0.7, 10))
                .await?
                .map_err(|e| e.to_string())?;

            if agents.is_empty() {
                return Ok(ToolOutcome::Continue("no matching capabilities found".into()));
            }

            let names: Vec<String> = agents.iter().map(|a| a.package_name.clone()).collect();
            if let Err(e) = ctx.queue.set_discovered_tools(ctx.job_id, &names).await {
                tracing::warn!(job_id = %ctx.job_id, error = %e, "failed to record discovered tools");
            }

            let summary = agents
                .iter()
                .map(|a| format!("- {} ({}): similarity {:.2}", a.name, a.package_name, a.similarity))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(ToolOutcome::Continue(summary))
        }

        ToolName::FetchUrl => {
            let args: FetchUrlArgs = parse_args(arguments)?;
            let method = reqwest::Method::from_bytes(args.method.to_uppercase().as_bytes())
                .map_err(|_| format!("unsupported method: {}", args.method))?;

            let mut request = ctx.http.request(method, &args.url);
            if let Some(headers) = &args.headers {
                for (k, v) in headers {
                    request = request.header(k, v);
                }
            }
            if let Some(body) = &args.body {
                request = request.body(body.clone());
            }

            let response = race_cancel(cancel, tokio::time::timeout(FETCH_TIMEOUT, request.send()))
                .await?
                .map_err(|_| "request timed out after 30s".to_string())?
                .map_err(|e| e.to_string())?;

            let status = response.status();
            let text = race_cancel(cancel, response.text()).await?.map_err(|e| e.to_string())?;

            let rendered = if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
                serde_json::to_string_pretty(&json).unwrap_or(text)
            } else {
                text
            };

            let truncated = if rendered.len() > FETCH_BODY_TRUNCATE_BYTES {
                format!(
                    "{}\n...[truncated, {} bytes total]",
                    chat_client::truncate_to_char_boundary(&rendered, FETCH_BODY_TRUNCATE_BYTES),
                    rendered.len()
                )
            } else {
                rendered
            };

            Ok(ToolOutcome::Continue(format!("HTTP {status}\n{truncated}")))
        }

        ToolName::RunPython => {
            let args: RunPythonArgs = parse_args(arguments)?;
            let extra_packages = filter_allowed_packages(args.packages.unwrap_or_default());

            let mut guard = ctx.sandbox.lock().await;
            if guard.is_none() {
                let sandbox = race_cancel(cancel, ctx.sandbox_provider.create(PYTHON_TIMEOUT))
                    .await?
                    .map_err(|e| e.to_string())?;
                for pkg in BASELINE_PACKAGES {
                    let _ = race_cancel(cancel, sandbox.run(&format!("pip install -q {pkg}"), PYTHON_TIMEOUT)).await?;
                }
                *guard = Some(sandbox);
            }
            let sandbox = guard.as_ref().expect("sandbox initialized above");

            for pkg in &extra_packages {
                race_cancel(cancel, sandbox.run(&format!("pip install -q {pkg}"), PYTHON_TIMEOUT))
                    .await?
                    .map_err(|e| format!("failed to install {pkg}: {e}"))?;
            }

            race_cancel(cancel, sandbox.write_file("/tmp/job_script.py", &args.code))
                .await?
                .map_err(|e| e.to_string())?;

            let output = race_cancel(cancel, sandbox.run("python3 /tmp/job_script.py", PYTHON_TIMEOUT))
                .await?
                .map_err(|e| e.to_string())?;

            Ok(ToolOutcome::Continue(format!(
                "exit_code: {}\nstdout:\n{}\nstderr:\n{}",
                output.exit_code, output.stdout, output.stderr
            )))
        }

        ToolName::ReadFile => {
            let args: ReadFileArgs = parse_args(arguments)?;
            match ctx.attachments.get(&args.filename) {
                Some(content) => Ok(ToolOutcome::Continue(content.clone())),
                None => Err(format!("unknown attachment: {}", args.filename)),
            }
        }

        ToolName::WriteFile => {
            let args: WriteFileArgs = parse_args(arguments)?;
            ctx.staged_files
                .lock()
                .await
                .insert(args.filename.clone(), args.content);
            Ok(ToolOutcome::Continue(format!("staged {}", args.filename)))
        }

        ToolName::AskUser => {
            let args: AskUserArgs = parse_args(arguments)?;
            Ok(ToolOutcome::AskUser(args.question))
        }

        ToolName::FinalAnswer => {
            let args: FinalAnswerArgs = parse_args(arguments)?;
            Ok(ToolOutcome::FinalAnswer(args.answer))
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T, String> {
    serde_json::from_str(arguments).map_err(|e| format!("invalid arguments: {e}"))
}

/// `packages?`: filtered against an allow-pattern, at most 10 names (§4.6).
fn filter_allowed_packages(requested: Vec<String>) -> Vec<String> {
    requested
        .into_iter()
        .filter(|name| is_allowed_package_name(name))
        .take(MAX_EXTRA_PACKAGES)
        .collect()
}

fn is_allowed_package_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 200
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_name_round_trips() {
        for name in [
            ToolName::DiscoverTools,
            ToolName::FetchUrl,
            ToolName::RunPython,
            ToolName::ReadFile,
            ToolName::WriteFile,
            ToolName::AskUser,
            ToolName::FinalAnswer,
        ] {
            assert_eq!(ToolName::parse(name.as_str()), Some(name));
        }
    }

    #[test]
    fn unknown_tool_name_is_not_recognized() {
        assert!(ToolName::parse("delete_everything").is_none());
    }

    #[test]
    fn tool_definitions_cover_the_full_inventory() {
        let defs = tool_definitions();
        assert_eq!(defs.len(), 7);
    }

    #[test]
    fn package_filter_rejects_bad_names_and_caps_length() {
        let requested: Vec<String> = (0..20).map(|i| format!("pkg{i}")).collect();
        let filtered = filter_allowed_packages(requested);
        assert_eq!(filtered.len(), MAX_EXTRA_PACKAGES);

        let malicious = vec!["good-pkg".to_string(), "; rm -rf /".to_string()];
        let filtered = filter_allowed_packages(malicious);
        assert_eq!(filtered, vec!["good-pkg".to_string()]);
    }
}
