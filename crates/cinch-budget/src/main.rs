//! Run a conversation transcript through the budget manager and print the
//! history that would be sent to the model.
//!
//! # Examples
//!
//! ```sh
//! # Trim a transcript to an 8k window
//! cinch-budget --transcript history.json --max-tokens 8192
//!
//! # Reserve room for the system prompt and tool schemas
//! cinch-budget --transcript history.json --max-tokens 8192 \
//!   --system-prompt-file prompt.md --tool-schema-file tools.json
//!
//! # Simulate two provider overflows, persisting counters between runs
//! cinch-budget --transcript history.json --max-tokens 8192 \
//!   --state session.json --overflows 2 --verbose
//! ```

use cinch_budget::config::BudgetConfig;
use cinch_budget::manager::{BudgetManager, ModelCallHook};
use cinch_budget::Message;
use clap::Parser;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{Level, info};

/// Trim a conversation transcript to a model's context budget.
///
/// Reads a JSON array of messages, runs one before-model-call pass (plus any
/// simulated overflows), and prints the resulting history as JSON.
#[derive(Parser)]
#[command(name = "cinch-budget")]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// Path to a JSON array of conversation messages
    #[arg(long)]
    transcript: PathBuf,

    /// System prompt text file, counted against the budget
    #[arg(long)]
    system_prompt_file: Option<PathBuf>,

    /// Serialized tool schemas, counted against the budget
    #[arg(long)]
    tool_schema_file: Option<PathBuf>,

    // ── Budget ─────────────────────────────────────────────────
    /// Model context window in tokens
    #[arg(long)]
    max_tokens: usize,

    /// Policy config (JSON); missing fields take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the preserved-message floor
    #[arg(long)]
    min_preserved: Option<usize>,

    // ── Session ────────────────────────────────────────────────
    /// State file: restored first if it exists, written after the run
    #[arg(long)]
    state: Option<PathBuf>,

    /// Simulate this many provider overflows after the first pass
    #[arg(long, default_value_t = 0)]
    overflows: u32,

    // ── Output ─────────────────────────────────────────────────
    /// Log budget decisions at debug level
    #[arg(long, short)]
    verbose: bool,
}

// ── Helpers ────────────────────────────────────────────────────────

fn read_text(path: &Path, what: &str) -> Result<String, String> {
    std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {what} '{}': {e}", path.display()))
}

fn load_transcript(path: &Path) -> Result<Vec<Message>, String> {
    let content = read_text(path, "transcript")?;
    serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse transcript '{}': {e}", path.display()))
}

fn load_state(path: &Path) -> Result<Option<Map<String, Value>>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let content = read_text(path, "state file")?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| format!("failed to parse state file '{}': {e}", path.display()))
}

fn save_state(path: &Path, state: &Map<String, Value>) -> Result<(), String> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| format!("failed to serialize state: {e}"))?;
    std::fs::write(path, json)
        .map_err(|e| format!("failed to write state file '{}': {e}", path.display()))
}

fn build_manager(cli: &Cli) -> Result<BudgetManager, String> {
    let config = match &cli.config {
        Some(path) => BudgetConfig::load(path).map_err(|e| e.to_string())?,
        None => BudgetConfig::default(),
    };

    let mut builder = BudgetManager::builder(cli.max_tokens).with_config(config);
    if let Some(path) = &cli.system_prompt_file {
        builder = builder.with_system_prompt(read_text(path, "system prompt")?);
    }
    if let Some(path) = &cli.tool_schema_file {
        builder = builder.with_tool_schema(read_text(path, "tool schema")?);
    }
    if let Some(n) = cli.min_preserved {
        builder = builder.with_min_preserved_messages(n);
    }
    builder.build().map_err(|e| e.to_string())
}

/// Build the manager and restore the state file, if any.
///
/// `--min-preserved` overrides the restored floor.
fn prepare_manager(cli: &Cli) -> Result<BudgetManager, String> {
    let mut manager = build_manager(cli)?;

    if let Some(path) = &cli.state
        && let Some(state) = load_state(path)?
    {
        manager.restore_state(&state).map_err(|e| e.to_string())?;
        if let Some(n) = cli.min_preserved {
            manager.set_min_preserved_messages(n);
        }
    }
    Ok(manager)
}

// ── Main ───────────────────────────────────────────────────────────

fn run(cli: &Cli) -> Result<String, String> {
    let mut manager = prepare_manager(cli)?;

    let history = load_transcript(&cli.transcript)?;
    let input_len = history.len();
    let mut history = manager
        .before_model_call(history)
        .map_err(|e| e.to_string())?;

    // Each simulated overflow is handled as if the provider rejected the
    // previous attempt; the final attempt is treated as accepted.
    let mut outcome = Ok(());
    for _ in 0..cli.overflows {
        match manager.on_context_overflow(history.clone()) {
            Ok(next) => history = next,
            Err(e) => {
                outcome = Err(e.to_string());
                break;
            }
        }
    }
    if outcome.is_ok() {
        manager.on_model_success();
    }

    // Persist counters even when the session ended in exhaustion.
    if let Some(path) = &cli.state {
        save_state(path, &manager.export_state())?;
    }
    outcome?;

    let usage = manager.usage(&history);
    info!(
        "{input_len} -> {} messages, {}",
        history.len(),
        usage.to_log_string()
    );

    serde_json::to_string_pretty(&history).map_err(|e| format!("failed to serialize history: {e}"))
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
