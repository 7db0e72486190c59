//! CLI binary for running, validating and inspecting flow files.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use flowrun_engine::{BlockKind, BlockStore, FlowExecutor, Severity};
use flowrun_types::ExecutionLimits;

#[derive(Parser)]
#[command(name = "flow", version, about = "Run process graphs described in flow files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one directive of a flow file
    Run {
        /// Path to the flow file
        flow: PathBuf,

        /// Name of the block to evaluate
        directive: String,

        /// Maximum block nesting depth before the run is aborted
        #[arg(long, default_value_t = ExecutionLimits::DEFAULT_MAX_DEPTH)]
        max_depth: usize,

        /// Maximum number of forks per process before the run is aborted
        #[arg(long, default_value_t = ExecutionLimits::DEFAULT_MAX_FORKS)]
        max_forks: usize,
    },

    /// Validate a flow file
    Validate {
        /// Path to the flow file
        flow: PathBuf,
    },

    /// Show information about a flow file
    Info {
        /// Path to the flow file
        flow: PathBuf,

        /// Print the parsed flow as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the flow.
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            flow,
            directive,
            max_depth,
            max_forks,
        } => {
            let limits = ExecutionLimits {
                max_depth,
                max_forks,
                ..ExecutionLimits::default()
            };
            cmd_run(&flow, &directive, limits)?;
        }
        Commands::Validate { flow } => {
            cmd_validate(&flow)?;
        }
        Commands::Info { flow, json } => {
            cmd_info(&flow, json)?;
        }
    }

    Ok(())
}

fn cmd_run(path: &Path, directive: &str, limits: ExecutionLimits) -> anyhow::Result<()> {
    let store = flowrun_engine::load_store(path)?;
    let result = FlowExecutor::new(limits).run(&store, directive)?;
    tracing::debug!(
        directive = %result.directive,
        forks = result.forks,
        diagnostics = result.diagnostics.len(),
        "flow complete"
    );
    Ok(())
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let flow = flowrun_engine::load_flow(path)?;
    let store = BlockStore::from_flow(&flow);
    let diagnostics = flowrun_engine::validate(&store, &ExecutionLimits::default());

    if diagnostics.is_empty() {
        println!("Flow is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
        if let Some(fix) = &diag.fix {
            println!("    fix: {}", fix);
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path, json: bool) -> anyhow::Result<()> {
    let flow = flowrun_engine::load_flow(path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&flow)?);
        return Ok(());
    }

    let store = BlockStore::from_flow(&flow);
    println!("Flow: {}", path.display());
    println!("Blocks: {}", store.len());
    for kind in [
        BlockKind::Command,
        BlockKind::Pipe,
        BlockKind::Concatenation,
        BlockKind::StderrMerge,
        BlockKind::FileEndpoint,
    ] {
        let count = store.records().iter().filter(|b| b.kind() == kind).count();
        println!("  {}: {}", kind.as_str(), count);
    }

    println!("\nBlocks:");
    for block in store.records() {
        let refs = block.references();
        if refs.is_empty() {
            println!("  {} [{}]", block.name(), block.kind().as_str());
        } else {
            println!("  {} [{}] -> {}", block.name(), block.kind().as_str(), refs.join(", "));
        }
    }

    Ok(())
}
