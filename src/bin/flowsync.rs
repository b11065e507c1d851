use clap::{Parser, Subcommand};
use flowsync::compiler::core::Compiler;
use flowsync::compiler::loader::load_plan_from_yaml;
use flowsync::{FlowHooks, RunCallbacks};
use serde_json::Value;
use std::path::PathBuf;
use anyhow::{Result, anyhow, bail};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow plan until it completes or fails
    Run {
        /// Path to the plan YAML file
        #[arg(long, short)]
        file: PathBuf,

        /// Treat tasks without an explicit `sync` as synchronous
        #[arg(long)]
        default_sync: bool,
    },

    /// Load and compile a plan without running it
    Check {
        /// Path to the plan YAML file
        #[arg(long, short)]
        file: PathBuf,
    },
}

enum Outcome {
    Complete,
    Failed(Value),
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run { file, default_sync } => {
            let mut plan = load_plan_from_yaml(&file)?;
            plan.default_sync |= default_sync;
            info!("Loaded plan: {} ({} tasks)", plan.id, plan.tasks.len());

            let hooks = FlowHooks::new().on_progress(|task, result| {
                info!(task = %task, %result, "Task done");
            });
            let flow = Compiler::with_builtins().compile_with_hooks(&plan, hooks)?;

            let (tx, mut rx) = mpsc::unbounded_channel();
            let fail_tx = tx.clone();
            flow.execute(
                RunCallbacks::new()
                    .on_complete(move || {
                        let _ = tx.send(Outcome::Complete);
                    })
                    .on_fail(move |error| {
                        let _ = fail_tx.send(Outcome::Failed(error.clone()));
                    }),
            );

            match rx.recv().await {
                Some(Outcome::Complete) => info!("Flow '{}' finished.", plan.id),
                Some(Outcome::Failed(error)) => bail!("Flow '{}' failed: {}", plan.id, error),
                None => return Err(anyhow!("Flow '{}' stopped without an outcome", plan.id)),
            }
        }

        Commands::Check { file } => {
            let plan = load_plan_from_yaml(&file)?;
            let flow = Compiler::with_builtins().compile(&plan)?;
            info!("Plan '{}' is valid ({} tasks)", plan.id, flow.len());
        }
    }

    Ok(())
}
