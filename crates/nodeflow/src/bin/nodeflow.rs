//! Command line front end: run programs in-process and answer their inputs
//! from stdin.
//!
//! Run-loop tuning is read from the `NODEFLOW_*` environment variables
//! described in `nodeflow::config`. Logs go to stderr (default filter:
//! nodeflow=warn); program output goes to stdout.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use nodeflow::{ClientError, MemoryBackend, ProgramClient, RuntimeConfig, runloop_supervisor};
use nodeflow_observability_setup::ObservabilityOptions;
use nodeflow_program::{ProgramNode, ProgramTree};
use nodeflow_runner_state::{MessagePayload, ProgramState};

#[derive(Parser)]
#[command(name = "nodeflow")]
#[command(about = "Run tree-shaped visual programs with durable, resumable execution")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program file, printing its output and prompting for its inputs
    Run {
        /// Program document (JSON interchange format)
        program: PathBuf,

        /// Persist program state here so an interrupted run can be resumed
        #[arg(long, env = "NODEFLOW_STATE_FILE")]
        state_file: Option<PathBuf>,

        /// Print the final program state as JSON once the program finishes
        #[arg(long)]
        result: bool,
    },

    /// Continue a program persisted by an earlier run
    Resume {
        root_unit_id: Uuid,

        #[arg(long, env = "NODEFLOW_STATE_FILE")]
        state_file: PathBuf,

        #[arg(long)]
        result: bool,
    },

    /// Dump the message ledger of a persisted program as JSON
    Messages {
        root_unit_id: Uuid,

        #[arg(long, env = "NODEFLOW_STATE_FILE")]
        state_file: PathBuf,
    },

    /// Validate a program file and list its variables
    Check { program: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    nodeflow_observability_setup::init(ObservabilityOptions {
        json: cli.json_logs,
        default_directive: "nodeflow=warn".to_string(),
        ..ObservabilityOptions::default()
    });

    match cli.command {
        Commands::Run {
            program,
            state_file,
            result,
        } => {
            let config = RuntimeConfig::from_env()?;
            let program = load_program(&program)?;
            let backend = open_backend(state_file.as_deref())?;
            let client = ProgramClient::new(backend.clone());
            let root_unit_id = client.start_program(&program).await?;
            if let Some(path) = &state_file {
                eprintln!(
                    "program {root_unit_id} started (resume with: nodeflow resume {root_unit_id} --state-file {})",
                    path.display()
                );
            }
            let state = drive(&client, backend, root_unit_id, &config).await?;
            report(state, result)
        }
        Commands::Resume {
            root_unit_id,
            state_file,
            result,
        } => {
            let config = RuntimeConfig::from_env()?;
            let backend = open_backend(Some(&state_file))?;
            let client = ProgramClient::new(backend.clone());
            client.root(root_unit_id).await?;
            let state = drive(&client, backend, root_unit_id, &config).await?;
            report(state, result)
        }
        Commands::Messages {
            root_unit_id,
            state_file,
        } => {
            let backend = open_backend(Some(&state_file))?;
            let client = ProgramClient::new(backend);
            let messages = client.query_messages(root_unit_id).await?;
            println!("{}", serde_json::to_string_pretty(&messages)?);
            Ok(())
        }
        Commands::Check { program } => {
            let program = load_program(&program)?;
            let tree = ProgramTree::from_node(&program).context("invalid program")?;
            println!("ok: {} nodes", tree.len());
            for label in tree.var_labels() {
                println!("{}\t{}", label.id, label.name);
            }
            Ok(())
        }
    }
}

fn load_program(path: &Path) -> Result<ProgramNode> {
    let document = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read program {}", path.display()))?;
    serde_json::from_str(&document)
        .with_context(|| format!("failed to parse program {}", path.display()))
}

fn open_backend(state_file: Option<&Path>) -> Result<MemoryBackend> {
    match state_file {
        Some(path) => MemoryBackend::with_snapshot(path)
            .with_context(|| format!("failed to open state file {}", path.display())),
        None => Ok(MemoryBackend::new()),
    }
}

fn report(state: Option<ProgramState>, print_result: bool) -> Result<()> {
    if let (Some(state), true) = (state, print_result) {
        println!("{}", serde_json::to_string_pretty(&state)?);
    }
    Ok(())
}

/// Run the event loop next to the conversation with the user and stop it
/// once the program finished or the user interrupted.
async fn drive(
    client: &ProgramClient,
    backend: MemoryBackend,
    root_unit_id: Uuid,
    config: &RuntimeConfig,
) -> Result<Option<ProgramState>> {
    let shutdown = CancellationToken::new();
    let runloop = tokio::spawn(runloop_supervisor(
        backend,
        config.runloop(),
        shutdown.clone(),
    ));

    let outcome = converse(client, root_unit_id, config.poll_interval).await;

    shutdown.cancel();
    runloop.await.context("run loop task failed")?;
    outcome
}

/// Echo printed messages in ledger order and answer every shown input from
/// stdin. Returns the final state, or None when the program was cancelled
/// or the user interrupted.
async fn converse(
    client: &ProgramClient,
    root_unit_id: Uuid,
    poll_interval: Duration,
) -> Result<Option<ProgramState>> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = HashSet::new();
    let mut answered = HashSet::new();

    loop {
        let finished = match client.result(root_unit_id).await {
            Ok(state) => state.map(Some),
            Err(ClientError::Cancelled(_)) => {
                warn!(%root_unit_id, "program was cancelled");
                Some(None)
            }
            Err(err) => return Err(err.into()),
        };

        for entry in client.query_messages(root_unit_id).await? {
            match &entry.payload {
                MessagePayload::Print { text } => {
                    if printed.insert(entry.message_id) {
                        println!("{text}");
                    }
                }
                MessagePayload::Input {
                    show: true, prompt, ..
                } if finished.is_none() && !answered.contains(&entry.message_id) => {
                    print!("{prompt}> ");
                    std::io::stdout().flush()?;
                    let line = select! {
                        line = stdin.next_line() => line?,
                        _ = signal::ctrl_c() => {
                            info!(%root_unit_id, "interrupted while awaiting input");
                            return Ok(None);
                        }
                    };
                    let Some(line) = line else {
                        bail!("stdin closed while program {root_unit_id} awaits input");
                    };
                    client
                        .send_input(entry.sending_unit_id, line.trim_end())
                        .await?;
                    answered.insert(entry.message_id);
                }
                MessagePayload::Input { .. } => {}
            }
        }

        if let Some(state) = finished {
            return Ok(state);
        }

        select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = signal::ctrl_c() => {
                info!(%root_unit_id, "interrupted");
                return Ok(None);
            }
        }
    }
}
