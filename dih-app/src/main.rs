//! `dih` binary: example apps and project scaffolding on top of `dih-llm`.

mod chat;
mod config;
mod routes;
mod scaffold;
mod server;
#[cfg(test)]
mod testing;
mod tools;

use clap::{Parser, Subcommand};
use config::DihConfig;
use dih_llm::{ChatCompletion, LlmClient, estimate_cost, estimate_token_count};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

const SERVER_LOG_FILTER: &str = "info,dih=debug,dih_app=debug,dih_llm=debug,tower_http=info";
const INTERACTIVE_LOG_FILTER: &str = "warn";

#[derive(Debug, Parser)]
#[command(name = "dih", version, about = "LLM chat completion toolkit")]
struct Cli {
    /// Config file (default: ./dih.toml, then ~/.dih/config.toml).
    #[arg(long, global = true, env = "DIH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive streaming chat.
    Chat {
        /// System prompt kept at the top of the conversation.
        #[arg(long)]
        system: Option<String>,
        /// Send one prompt, print the reply and exit.
        #[arg(long)]
        once: Option<String>,
    },
    /// Ask a question with the demo tools available and run the calls locally.
    Tools { query: String },
    /// Serve the HTTP chat API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create a starter project.
    New {
        #[arg(default_value = "my-dih-app")]
        dir: PathBuf,
        #[arg(long, value_enum, default_value_t = scaffold::Template::Basic)]
        template: scaffold::Template,
        /// Empty a non-empty directory first.
        #[arg(long)]
        force: bool,
    },
    /// Estimate tokens and cost for some text.
    Tokens {
        text: String,
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Command::New {
        dir,
        template,
        force,
    } = &cli.command
    {
        init_tracing(INTERACTIVE_LOG_FILTER)?;
        install_panic_hook();
        return run_new(dir, *template, *force).await;
    }

    let (cfg, config_path) = DihConfig::load(cli.config.clone()).await?;
    let default_filter = match (&cli.command, cfg.debug) {
        (Command::Serve { .. }, _) | (_, true) => SERVER_LOG_FILTER,
        _ => INTERACTIVE_LOG_FILTER,
    };
    init_tracing(default_filter)?;
    install_panic_hook();
    tracing::debug!(
        config_path = ?config_path,
        model = %cfg.llm.model,
        provider = %cfg.llm.resolved_provider(),
        "config loaded"
    );

    match cli.command {
        Command::Chat { system, once } => chat::run(build_chat(&cfg)?, system, once).await,
        Command::Tools { query } => run_tools(build_chat(&cfg)?, &query).await,
        Command::Serve { port } => server::serve(&cfg, build_chat(&cfg)?, port).await,
        Command::Tokens { text, model } => {
            let model = model.unwrap_or_else(|| cfg.llm.model.clone());
            println!("{}", tokens_report(&text, &model));
            Ok(())
        }
        Command::New { .. } => Ok(()),
    }
}

fn build_chat(cfg: &DihConfig) -> anyhow::Result<ChatCompletion> {
    let client = LlmClient::new(&cfg.client_config())?;
    Ok(ChatCompletion::new(Arc::new(client)))
}

async fn run_new(dir: &std::path::Path, template: scaffold::Template, force: bool) -> anyhow::Result<()> {
    let report = scaffold::scaffold(dir, template, force).await?;
    println!(
        "dih new: created {} ({:?} template) at {}",
        report.package_name,
        template,
        report.root.display()
    );
    for path in &report.created {
        println!("created {}", path.display());
    }
    if !report.skipped.is_empty() {
        println!("kept {} existing file(s) unchanged", report.skipped.len());
    }
    println!("next: cd {} && edit .env, then cargo run", report.root.display());
    Ok(())
}

async fn run_tools(chat: ChatCompletion, query: &str) -> anyhow::Result<()> {
    match tools::run_query(&chat, query).await? {
        tools::QueryOutcome::Content(text) => println!("{text}"),
        tools::QueryOutcome::ToolRuns(runs) => {
            for run in runs {
                println!("{}({})", run.call.function.name, run.call.function.arguments);
                match run.output {
                    Ok(value) => println!("  -> {value}"),
                    Err(e) => println!("  -> error: {e}"),
                }
            }
        }
    }
    Ok(())
}

fn tokens_report(text: &str, model: &str) -> String {
    let tokens = estimate_token_count(text);
    let cost = estimate_cost(tokens as u32, 0, model);
    format!("~{tokens} tokens, ~${cost:.6} as a {model} prompt")
}

fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(default_filter),
    };
    let log_format = std::env::var("DIH_LOG_FORMAT")
        .unwrap_or_else(|_| "compact".to_string())
        .to_ascii_lowercase();

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_writer(std::io::stderr)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::io::stderr)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported DIH_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["dih", "new", "demo", "--template", "tools", "--force"])
            .expect("parse new");
        match cli.command {
            Command::New {
                dir,
                template,
                force,
            } => {
                assert_eq!(dir, PathBuf::from("demo"));
                assert_eq!(template, scaffold::Template::Tools);
                assert!(force);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["dih", "--config", "x.toml", "chat", "--once", "hi"])
            .expect("parse chat");
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Command::Chat { once: Some(_), .. }));

        assert!(Cli::try_parse_from(["dih", "new", "--template", "nextjs"]).is_err());
    }

    #[test]
    fn tokens_report_includes_estimate() {
        let report = tokens_report("hello world", "gpt-4");
        assert!(report.starts_with("~3 tokens"), "{report}");
        assert!(report.contains("gpt-4"));
    }

    #[test]
    fn panic_payloads_are_stringified() {
        let s: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_payload_to_string(s.as_ref()), "boom");
        let s: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_payload_to_string(s.as_ref()), "bang");
        let s: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_payload_to_string(s.as_ref()), "non-string panic payload");
    }
}
