//! chatling - converse with a hosted language model from the terminal,
//! with optional local tool calling (shell, repository inspection).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use chatling::cli::{self, AskOptions};

const VERSION: &str = "0.1.0";

#[derive(Parser)]
#[command(name = "chatling", about = "chatling - terminal LLM chat with tool calling", version = VERSION)]
struct Cli {
    /// Configuration file (default: ~/.chatling/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt and stream the reply. Exit codes: 0 success,
    /// 2 configuration error, 3 transport error, 4 iteration limit.
    Ask {
        /// The prompt; multiple words are joined with spaces.
        #[arg(required = true)]
        prompt: Vec<String>,
        /// Model to use.
        #[arg(short, long)]
        model: Option<String>,
        /// Response randomness.
        #[arg(long)]
        temp: Option<f64>,
        /// Response length cap in tokens.
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Tool-loop safety cap.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// System prompt override.
        #[arg(short, long)]
        system: Option<String>,
        /// Attach files matching a glob pattern (repeatable).
        #[arg(short, long)]
        attach: Vec<String>,
        /// Disable all tools for this run.
        #[arg(long)]
        no_tools: bool,
        /// Load and persist conversation history at this path.
        #[arg(long)]
        history: Option<String>,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration with the API key masked.
    Show,
    /// Print the configuration file location.
    Path,
}

fn init_tracing() {
    // Keep HTTP internals quiet unless RUST_LOG asks for them.
    let noisy_crate_filters = ",hyper=warn,reqwest=warn,rustls=warn";
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(_) => {
            let combined = format!(
                "{}{}",
                std::env::var("RUST_LOG").unwrap_or_default(),
                noisy_crate_filters
            );
            tracing_subscriber::EnvFilter::new(combined)
        }
        Err(_) => tracing_subscriber::EnvFilter::new(format!("info{}", noisy_crate_filters)),
    };

    // Diagnostics go to a daily-rotated file so warnings never interleave
    // with streamed model output.
    let log_dir = chatling::utils::helpers::get_data_path().join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "chatling.log");
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false);

    // With RUST_LOG set, mirror logs to stderr for interactive debugging.
    let stderr_layer = std::env::var("RUST_LOG")
        .is_ok()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Ask {
            prompt,
            model,
            temp,
            max_tokens,
            max_iterations,
            system,
            attach,
            no_tools,
            history,
        } => {
            cli::cmd_ask(AskOptions {
                prompt: prompt.join(" "),
                config_path: cli.config,
                model,
                temp,
                max_tokens,
                max_iterations,
                system,
                attach,
                no_tools,
                history,
            })
            .await
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => cli::cmd_config_show(cli.config.as_deref()),
            ConfigAction::Path => cli::cmd_config_path(),
        },
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask_joins_prompt_words() {
        let cli = Cli::try_parse_from(["chatling", "ask", "list", "the", "files"]).unwrap();
        match cli.command {
            Commands::Ask { prompt, .. } => assert_eq!(prompt.join(" "), "list the files"),
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_parse_ask_flags() {
        let cli = Cli::try_parse_from([
            "chatling",
            "ask",
            "--model",
            "m1",
            "--temp",
            "0.2",
            "--max-iterations",
            "3",
            "--attach",
            "*.rs",
            "--attach",
            "*.toml",
            "--no-tools",
            "hi",
        ])
        .unwrap();
        match cli.command {
            Commands::Ask {
                model,
                temp,
                max_iterations,
                attach,
                no_tools,
                ..
            } => {
                assert_eq!(model.as_deref(), Some("m1"));
                assert_eq!(temp, Some(0.2));
                assert_eq!(max_iterations, Some(3));
                assert_eq!(attach, ["*.rs", "*.toml"]);
                assert!(no_tools);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_parse_ask_requires_prompt() {
        assert!(Cli::try_parse_from(["chatling", "ask"]).is_err());
    }

    #[test]
    fn test_parse_config_subcommands() {
        let cli = Cli::try_parse_from(["chatling", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));

        let cli = Cli::try_parse_from(["chatling", "config", "path"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Path
            }
        ));
    }

    #[test]
    fn test_parse_global_config_flag() {
        let cli =
            Cli::try_parse_from(["chatling", "--config", "/tmp/c.json", "config", "path"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/c.json")));
    }
}
