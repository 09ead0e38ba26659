//! `vesper`: CLI host for the embedded Luau async runtime.
//!
//! Grounded on `knhk-workflow-engine`'s binary (`src/bin/knhk-workflow.rs`):
//! a plain `clap::Parser`/`Subcommand` derive, `#[tokio::main]` on the
//! multi-threaded runtime (required — `require` blocks the calling native
//! thread via `tokio::task::block_in_place`, which panics on a
//! current-thread runtime), and a flat `match cli.command` dispatch.

mod config_loader;
mod tracing_init;

use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use vesper_runtime::context::agent::{DEFAULT_IN_CAPACITY, DEFAULT_OUT_CAPACITY};
use vesper_runtime::{
    json_to_value, value_to_json, AgentHandle, ContextConfig, ContextHandle, MessageChunk, Runtime, Value,
};

#[derive(Parser)]
#[command(name = "vesper", version, about = "Embedded Luau async runtime host")]
struct Cli {
    /// Path to a layered config file (defaults → this file → env).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Luau script to completion.
    Run {
        /// Path to the `.luau` source file.
        script: PathBuf,

        /// Context the script runs under.
        #[arg(long, value_enum, default_value_t = ContextKind::Tool)]
        context: ContextKind,

        /// Tool-context input, as a JSON value. Ignored under `--context agent`.
        #[arg(long)]
        input: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ContextKind {
    Tool,
    Agent,
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ContextKind::Tool => "tool",
            ContextKind::Agent => "agent",
        })
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_init::init(cli.json_logs);

    let mut config = config_loader::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { script, context, input } => {
            config.context = match context {
                ContextKind::Tool => ContextConfig::Tool,
                ContextKind::Agent => {
                    ContextConfig::Agent { in_capacity: DEFAULT_IN_CAPACITY, out_capacity: DEFAULT_OUT_CAPACITY }
                }
            };
            run_script(config, script, input).await
        }
    }
}

async fn run_script(config: vesper_runtime::RuntimeConfig, script: PathBuf, input: Option<String>) -> Result<()> {
    let source = std::fs::read_to_string(&script)
        .with_context(|| format!("reading script {}", script.display()))?;
    let name = script
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("script")
        .to_string();

    let (runtime, handle) = Runtime::new(config).map_err(|e| anyhow::anyhow!(e.message()))?;

    match handle {
        ContextHandle::Tool(tool) => {
            if let Some(input_json) = input {
                let parsed: serde_json::Value =
                    serde_json::from_str(&input_json).context("parsing --input as JSON")?;
                tool.set_input(json_to_value(&parsed));
            }

            let result = runtime.run(&source, &name).await;
            match result {
                Ok(values) => {
                    if let Some(output) = tool.take_output() {
                        println!("{}", value_to_json(&output.value));
                        if let Some(err) = output.err {
                            eprintln!("script output error: {}", err);
                        }
                    }
                    print_result_values(&values);
                    Ok(())
                }
                Err(e) => bail!(e.message()),
            }
        }
        ContextHandle::Agent(agent) => {
            let agent = std::sync::Arc::new(agent);
            let bridge = spawn_stdio_agent_bridge(agent.clone());

            let result = runtime.run(&source, &name).await;
            bridge.abort();

            match result {
                Ok(values) => {
                    print_result_values(&values);
                    Ok(())
                }
                Err(e) => bail!(e.message()),
            }
        }
    }
}

fn print_result_values(values: &[Value]) {
    for value in values {
        println!("{}", value_to_json(value));
    }
}

/// Agent context bridge: stdin lines become `text` chunks sent in; emitted
/// chunks print to stdout as JSON lines. Not part of the core runtime —
/// purely a convenience so `vesper run --context agent` is usable from a
/// shell without a real host embedding this crate.
fn spawn_stdio_agent_bridge(agent: std::sync::Arc<AgentHandle>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let reader_agent = agent.clone();
        let reader = tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, BufReader};
            let stdin = tokio::io::stdin();
            let mut lines = BufReader::new(stdin).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if reader_agent.send(MessageChunk::text(line)).await.is_err() {
                    break;
                }
            }
            reader_agent.close_input();
        });

        while let Some(chunk) = agent.recv_output().await {
            println!("{}", value_to_json(&chunk.to_value()));
        }
        reader.abort();
    })
}
