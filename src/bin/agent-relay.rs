//! agent-relay CLI
//!
//! Usage:
//!   agent-relay --manifest agents.toml "Compute ((2*8)^2)/3"
//!   echo "Who commands the Enterprise?" | agent-relay --manifest agents.toml --entry Data
//!
//! Prints the final output and the name of the agent that produced it. Exits
//! non-zero when the run aborts. Set `RUST_LOG=debug` (or
//! `RUST_LOG=runner::messages=debug`) for per-turn detail.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use agent_relay::trace::LogExporter;
use agent_relay::{Manifest, OpenAIHostedProvider, RunEnv, Runner, RuntimeConfig};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "agent-relay")]
#[command(version)]
#[command(about = "Run a multi-agent workflow on one input", long_about = None)]
struct Cli {
    /// Agent manifest (TOML)
    #[arg(short, long, env = "AGENT_RELAY_MANIFEST")]
    manifest: PathBuf,

    /// Entry agent; defaults to the manifest's entry
    #[arg(short, long)]
    entry: Option<String>,

    /// Runtime configuration file (TOML); overrides the manifest's [runtime]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the maximum number of turns
    #[arg(long)]
    max_turns: Option<usize>,

    /// Override the default model
    #[arg(long)]
    model: Option<String>,

    /// Log every span of the run trace
    #[arg(long)]
    trace: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// User input; read from stdin when omitted
    input: Vec<String>,
}

fn read_input(args: &[String]) -> std::io::Result<String> {
    if !args.is_empty() {
        return Ok(args.join(" "));
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf.trim().to_string())
}

fn load_config(cli: &Cli, manifest: &Manifest) -> Result<RuntimeConfig, String> {
    let base = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path).map_err(|e| e.to_string())?,
        None => manifest.runtime.clone().unwrap_or_default(),
    };
    let mut config = base.with_env_overrides().map_err(|e| e.to_string())?;
    if let Some(max_turns) = cli.max_turns {
        config.max_turns = max_turns;
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let manifest = match Manifest::from_file(&cli.manifest) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };
    let registry = match manifest.build_registry() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };
    let config = match load_config(&cli, &manifest) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };
    let Some(entry) = cli.entry.as_deref().or(manifest.entry_agent()) else {
        eprintln!("error: no entry agent");
        return ExitCode::from(2);
    };
    let input = match read_input(&cli.input) {
        Ok(i) if !i.is_empty() => i,
        Ok(_) => {
            eprintln!("error: empty input");
            return ExitCode::from(2);
        }
        Err(e) => {
            eprintln!("error: reading stdin: {}", e);
            return ExitCode::from(2);
        }
    };

    let providers = OpenAIHostedProvider::from_config(&config).into_providers();
    let mut env = RunEnv::new(config).with_providers(providers);
    if cli.trace {
        env = env.with_exporter(Arc::new(LogExporter));
    }
    let runner = Runner::with_openai(registry, env);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match runner.run_with_cancel(entry, &input, &cancel).await {
        Ok(result) => {
            if cli.json {
                let out = serde_json::json!({
                    "agent": result.last_agent,
                    "output": result.final_output.to_string(),
                    "turns": result.turns.len(),
                    "trace_id": result.trace_id,
                    "usage": result.usage,
                });
                println!("{}", out);
            } else {
                println!("[{}] {}", result.last_agent, result.final_output);
            }
            ExitCode::SUCCESS
        }
        Err(failure) => {
            if cli.json {
                let out = serde_json::json!({
                    "error": failure.kind(),
                    "message": failure.error.to_string(),
                    "agent": failure.last_agent,
                    "turns": failure.turns.len(),
                    "trace_id": failure.trace_id,
                });
                println!("{}", out);
            } else {
                eprintln!("aborted ({}): {}", failure.kind(), failure.error);
            }
            ExitCode::FAILURE
        }
    }
}
