//! CLI command implementations.
//!
//! Exit codes are part of the contract: 0 success, 2 configuration error,
//! 3 model/transport error, 4 iteration limit, 130 cancelled. Model text goes
//! to stdout; everything else (tool activity, reasoning, errors) to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use crate::bus::events::{Event, EventKind};
use crate::chat::orchestrator::ChatModel;
use crate::chat::prompt;
use crate::chat::tools::{RepoTool, ShellTool};
use crate::config::loader::{apply_env_overrides, get_config_path, load_config};
use crate::config::schema::ChatConfig;
use crate::errors::ChatError;
use crate::providers::base::ModelClient;
use crate::providers::openai_compat::OpenAICompatClient;
use crate::utils::helpers::{expand_tilde, truncate_string};

/// Exit code for configuration problems (missing key, invalid values).
const EXIT_CONFIG: i32 = 2;

/// Flag values for `chatling ask`, layered over file and env config.
#[derive(Debug, Default)]
pub struct AskOptions {
    pub prompt: String,
    pub config_path: Option<PathBuf>,
    pub model: Option<String>,
    pub temp: Option<f64>,
    pub max_tokens: Option<u32>,
    pub max_iterations: Option<u32>,
    pub system: Option<String>,
    pub attach: Vec<String>,
    pub no_tools: bool,
    pub history: Option<String>,
}

/// Resolve the effective config: file, then environment, then flags.
fn resolve_config(opts: &AskOptions) -> ChatConfig {
    let mut config = load_config(opts.config_path.as_deref());
    apply_env_overrides(&mut config);
    apply_overrides(&mut config, opts);
    config
}

fn apply_overrides(config: &mut ChatConfig, opts: &AskOptions) {
    if let Some(ref model) = opts.model {
        config.model = model.clone();
    }
    if let Some(temp) = opts.temp {
        config.temperature = temp;
    }
    if let Some(max_tokens) = opts.max_tokens {
        config.max_tokens = max_tokens;
    }
    if let Some(max_iterations) = opts.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(ref system) = opts.system {
        config.system_prompt = system.clone();
    }
    if !opts.attach.is_empty() {
        config.attachments.extend(opts.attach.iter().cloned());
    }
    if opts.no_tools {
        config.tools.clear();
    }
    if let Some(ref history) = opts.history {
        config.history_path = Some(history.clone());
    }
}

/// Run a one-shot conversation. Returns the process exit code.
pub async fn cmd_ask(opts: AskOptions) -> i32 {
    let config = resolve_config(&opts);

    if let Err(e) = config.validate() {
        eprintln!("chatling: invalid configuration: {}", e);
        return EXIT_CONFIG;
    }
    if config.api_key.is_empty() {
        eprintln!(
            "chatling: no API key configured; set CHATLING_API_KEY or apiKey in {}",
            get_config_path().display()
        );
        return EXIT_CONFIG;
    }

    // Tag expansion and attachment loading happen before the run starts;
    // a bad reference is a configuration problem, not a model failure.
    let text = match prompt::preprocess(&opts.prompt, &config.attachments) {
        Ok((mut text, attachments)) => {
            for attachment in &attachments {
                text.push_str(&attachment.block());
            }
            text
        }
        Err(e) => {
            eprintln!("chatling: {:#}", e);
            return EXIT_CONFIG;
        }
    };

    let client: Arc<dyn ModelClient> = Arc::new(OpenAICompatClient::new(
        &config.api_key,
        config.api_base.as_deref(),
        Some(&config.model),
    ));

    let mut model = ChatModel::new(config.clone()).with_client(client);
    if let Some(ref history) = config.history_path {
        match model.with_transcript(expand_tilde(history)) {
            Ok(loaded) => model = loaded,
            Err(e) => {
                eprintln!("chatling: {:#}", e);
                return EXIT_CONFIG;
            }
        }
    }

    for name in &config.tools {
        match name.as_str() {
            "shell" => {
                model
                    .register_tool(Arc::new(ShellTool::new(
                        &config.shell,
                        config.shell_timeout_secs,
                        None,
                    )))
                    .await;
            }
            "repo" => {
                model.register_tool(Arc::new(RepoTool::new("."))).await;
            }
            other => debug!("ignoring unknown tool name in config: {}", other),
        }
    }

    let printed = Arc::new(AtomicBool::new(false));
    let done = Arc::new(Notify::new());
    attach_printers(&model, printed.clone(), done.clone()).await;

    // Ctrl-c cancels the run; the loop emits Error/Done and returns.
    let cancel = model.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = model.message(&text).await;

    // Let the event dispatch tasks drain before the process exits.
    let _ = tokio::time::timeout(Duration::from_secs(2), done.notified()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    if printed.load(Ordering::SeqCst) {
        println!();
    }

    match result {
        Ok(_) => 0,
        Err(e @ ChatError::IterationLimitExceeded { .. }) => {
            eprintln!("chatling: {}; the model may not have finished", e);
            e.exit_code()
        }
        Err(e) => {
            eprintln!("chatling: {}", e);
            e.exit_code()
        }
    }
}

/// Wire stdout/stderr printing subscribers onto the model.
async fn attach_printers(model: &ChatModel, printed: Arc<AtomicBool>, done: Arc<Notify>) {
    {
        let printed = printed.clone();
        model
            .subscribe(
                EventKind::Reply,
                Arc::new(move |ev| {
                    let printed = printed.clone();
                    Box::pin(async move {
                        if let Event::Reply { text } = ev {
                            printed.store(true, Ordering::SeqCst);
                            print!("{}", text);
                            let _ = std::io::stdout().flush();
                        }
                    })
                }),
            )
            .await;
    }

    model
        .subscribe(
            EventKind::Reasoning,
            Arc::new(|ev| {
                Box::pin(async move {
                    if let Event::Reasoning { text } = ev {
                        // Dimmed so reasoning is visually distinct from output.
                        eprint!("\x1b[2m{}\x1b[0m", text);
                        let _ = std::io::stderr().flush();
                    }
                })
            }),
        )
        .await;

    model
        .subscribe(
            EventKind::ToolCall,
            Arc::new(|ev| {
                Box::pin(async move {
                    if let Event::ToolCall { name, arguments, .. } = ev {
                        eprintln!("[tool] {}({})", name, truncate_string(&arguments, 80));
                    }
                })
            }),
        )
        .await;

    model
        .subscribe(
            EventKind::ToolResult,
            Arc::new(|ev| {
                Box::pin(async move {
                    if let Event::ToolResult { name, result, .. } = ev {
                        eprintln!("[tool] {} -> {} bytes", name, result.len());
                    }
                })
            }),
        )
        .await;

    model
        .subscribe(
            EventKind::Error,
            Arc::new(|ev| {
                Box::pin(async move {
                    if let Event::Error { message } = ev {
                        eprintln!("[error] {}", message);
                    }
                })
            }),
        )
        .await;

    model
        .subscribe(
            EventKind::Done,
            Arc::new(move |_| {
                let done = done.clone();
                Box::pin(async move {
                    done.notify_one();
                })
            }),
        )
        .await;
}

/// Print the effective configuration with the API key masked.
pub fn cmd_config_show(config_path: Option<&Path>) -> i32 {
    let mut config = load_config(config_path);
    apply_env_overrides(&mut config);
    config.api_key = mask_key(&config.api_key);

    match serde_json::to_string_pretty(&config) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("chatling: {}", e);
            EXIT_CONFIG
        }
    }
}

/// Print the configuration file location.
pub fn cmd_config_path() -> i32 {
    println!("{}", get_config_path().display());
    0
}

fn mask_key(key: &str) -> String {
    let chars = key.chars().count();
    if key.is_empty() {
        "(not set)".to_string()
    } else if chars > 8 {
        let tail: String = key.chars().skip(chars - 4).collect();
        format!("****{}", tail)
    } else {
        "****".to_string()
    }
}
