//! CLI definition and dispatch.

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::adapters::binance_adapter::BinanceFeed;
use crate::adapters::csv_adapter::CsvPriceFeed;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::config_validation::{
    load_indicator_config, load_instruments, validate_agent_config, validate_model_config,
};
use crate::domain::cycle::{preview_prompt, AgentSettings, CycleReport};
use crate::domain::error::AgentError;
use crate::domain::indicator_set::IndicatorConfig;
use crate::domain::invalidation::InvalidationCondition;
use crate::domain::position::Position;
use crate::domain::record::ConversationRecord;
use crate::domain::run_stats::RunStats;
use crate::ports::config_port::ConfigPort;
use crate::ports::price_feed_port::PriceFeedPort;

#[derive(Parser, Debug)]
#[command(name = "tradeloop", about = "LLM-driven trading decision loop")]
pub struct Cli {
    /// Log filter, e.g. `info` or `tradeloop=debug`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the decision loop for every configured instrument
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Stop after this many ticks
        #[arg(long)]
        max_cycles: Option<u64>,
    },
    /// Run a single decision cycle
    Cycle {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        instrument: Option<String>,
        /// Print the prompt without calling the model or storing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Show recent stored cycles
    History {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        instrument: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Include prompts and reasoning
        #[arg(long)]
        full: bool,
    },
    /// Parse an invalidation condition and print its normalised form
    CheckCondition {
        condition: String,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    init_logging(cli.log_level.as_deref());

    match cli.command {
        Command::Run { config, max_cycles } => run_loop(&config, max_cycles),
        Command::Cycle {
            config,
            instrument,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&config, instrument.as_deref())
            } else {
                run_single_cycle(&config, instrument.as_deref())
            }
        }
        Command::History {
            config,
            instrument,
            limit,
            full,
        } => run_history(&config, instrument.as_deref(), limit, full),
        Command::CheckCondition { condition } => run_check_condition(&condition),
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn fail(err: AgentError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

/// Configured instruments, narrowed to `only` when given.
pub fn resolve_instruments(
    config: &dyn ConfigPort,
    only: Option<&str>,
) -> Result<Vec<String>, AgentError> {
    let instruments = load_instruments(config)?;
    match only {
        None => Ok(instruments),
        Some(name) if instruments.iter().any(|i| i == name) => Ok(vec![name.to_string()]),
        Some(name) => Err(AgentError::ConfigInvalid {
            section: "agent".into(),
            key: "instruments".into(),
            reason: format!("instrument '{}' is not configured", name),
        }),
    }
}

/// Price feed selected by `[feed] source`.
pub fn open_feed(
    config: &dyn ConfigPort,
    indicators: &IndicatorConfig,
) -> Result<Box<dyn PriceFeedPort>, AgentError> {
    let source = config
        .get_string("feed", "source")
        .unwrap_or_else(|| "csv".to_string());

    match source.trim() {
        "csv" => Ok(Box::new(CsvPriceFeed::from_config(config)?)),
        "binance" => Ok(Box::new(BinanceFeed::from_config(
            config,
            indicators.base.timeframe,
        )?)),
        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(Box::new(open_store(config)?)),
        other => Err(AgentError::ConfigInvalid {
            section: "feed".into(),
            key: "source".into(),
            reason: format!("feed source '{}' is not available in this build", other),
        }),
    }
}

#[cfg(feature = "sqlite")]
fn open_store(
    config: &dyn ConfigPort,
) -> Result<crate::adapters::sqlite_adapter::SqliteStore, AgentError> {
    let store = crate::adapters::sqlite_adapter::SqliteStore::from_config(config)?;
    store.initialize_schema()?;
    Ok(store)
}

fn run_loop(config_path: &PathBuf, max_cycles: Option<u64>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    if let Err(e) = validate_agent_config(&adapter).and_then(|_| validate_model_config(&adapter)) {
        return fail(e);
    }

    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::openai_adapter::OpenAiModel;
        use crate::domain::cycle::{run_agents, Agent};

        let instruments = match load_instruments(&adapter) {
            Ok(i) => i,
            Err(e) => return fail(e),
        };
        let settings: Vec<AgentSettings> = match instruments
            .iter()
            .map(|i| AgentSettings::from_config(&adapter, i))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(s) => s,
            Err(e) => return fail(e),
        };
        let Some(interval) = settings.first().map(|s| s.interval) else {
            return fail(AgentError::ConfigMissing {
                section: "agent".into(),
                key: "instruments".into(),
            });
        };

        let feed = match load_indicator_config(&adapter).and_then(|ic| open_feed(&adapter, &ic)) {
            Ok(f) => f,
            Err(e) => return fail(e),
        };
        let model = match OpenAiModel::from_config(&adapter) {
            Ok(m) => m,
            Err(e) => return fail(e),
        };
        let store = match open_store(&adapter) {
            Ok(s) => s,
            Err(e) => return fail(e),
        };

        let started_at = Utc::now();
        let mut agents = Vec::with_capacity(settings.len());
        for s in settings {
            let mut agent = Agent::new(s, feed.as_ref(), &model, &store, started_at);
            if let Err(e) = agent.restore() {
                return fail(e);
            }
            agents.push(agent);
        }

        eprintln!(
            "Running {} instrument(s) every {}s against {}",
            agents.len(),
            interval.as_secs(),
            model.endpoint()
        );
        let summary = run_agents(&mut agents, interval, max_cycles);
        eprintln!(
            "Stopped: {} cycle(s) completed, {} failed",
            summary.completed, summary.failed
        );

        if summary.completed == 0 && summary.failed > 0 {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = max_cycles;
        eprintln!("error: sqlite feature is required to store conversations");
        ExitCode::from(1)
    }
}

fn run_single_cycle(config_path: &PathBuf, only: Option<&str>) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    if let Err(e) = validate_agent_config(&adapter).and_then(|_| validate_model_config(&adapter)) {
        return fail(e);
    }

    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::openai_adapter::OpenAiModel;
        use crate::domain::cycle::Agent;

        let instruments = match resolve_instruments(&adapter, only) {
            Ok(i) => i,
            Err(e) => return fail(e),
        };
        let feed = match load_indicator_config(&adapter).and_then(|ic| open_feed(&adapter, &ic)) {
            Ok(f) => f,
            Err(e) => return fail(e),
        };
        let model = match OpenAiModel::from_config(&adapter) {
            Ok(m) => m,
            Err(e) => return fail(e),
        };
        let store = match open_store(&adapter) {
            Ok(s) => s,
            Err(e) => return fail(e),
        };

        let now = Utc::now();
        for instrument in &instruments {
            let settings = match AgentSettings::from_config(&adapter, instrument) {
                Ok(s) => s,
                Err(e) => return fail(e),
            };
            let mut agent = Agent::new(settings, feed.as_ref(), &model, &store, now);
            let report = agent.restore().and_then(|_| agent.run_cycle(now));
            match report {
                Ok(report) => print!("{}", render_cycle_report(&report)),
                Err(e) => return fail(e),
            }
        }
        ExitCode::SUCCESS
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = only;
        eprintln!("error: sqlite feature is required to store conversations");
        ExitCode::from(1)
    }
}

pub fn run_dry_run(config_path: &PathBuf, only: Option<&str>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    if let Err(e) = validate_agent_config(&adapter) {
        return fail(e);
    }
    eprintln!("Config validated successfully");

    let instruments = match resolve_instruments(&adapter, only) {
        Ok(i) => i,
        Err(e) => return fail(e),
    };
    let feed = match load_indicator_config(&adapter).and_then(|ic| open_feed(&adapter, &ic)) {
        Ok(f) => f,
        Err(e) => return fail(e),
    };

    let now = Utc::now();
    let stats = RunStats::new(now);
    for instrument in &instruments {
        let settings = match AgentSettings::from_config(&adapter, instrument) {
            Ok(s) => s,
            Err(e) => return fail(e),
        };
        let position = match stored_position(&adapter, &settings) {
            Ok(p) => p,
            Err(e) => return fail(e),
        };
        match preview_prompt(&settings, feed.as_ref(), &position, &stats, now) {
            Ok(prompt) => println!("{}", prompt),
            Err(e) => return fail(e),
        }
    }

    eprintln!("\nDry run complete: no model call made, nothing stored");
    ExitCode::SUCCESS
}

/// Position from the store when one is configured, otherwise flat.
fn stored_position(
    config: &dyn ConfigPort,
    settings: &AgentSettings,
) -> Result<Position, AgentError> {
    #[cfg(feature = "sqlite")]
    {
        if config.get_string("sqlite", "path").is_some() {
            let store = open_store(config)?;
            return crate::domain::cycle::load_position(&store, settings);
        }
    }
    let _ = (config, settings);
    Ok(Position::Flat)
}

fn run_history(config_path: &PathBuf, only: Option<&str>, limit: usize, full: bool) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    #[cfg(feature = "sqlite")]
    {
        use crate::ports::conversation_port::ConversationPort;

        let instruments = match resolve_instruments(&adapter, only) {
            Ok(i) => i,
            Err(e) => return fail(e),
        };
        let store = match open_store(&adapter) {
            Ok(s) => s,
            Err(e) => return fail(e),
        };

        for instrument in &instruments {
            match store.list(instrument, limit) {
                Ok(records) => print!("{}", render_history(instrument, &records, full)),
                Err(e) => return fail(e),
            }
        }
        ExitCode::SUCCESS
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (adapter, only, limit, full);
        eprintln!("error: sqlite feature is required to read history");
        ExitCode::from(1)
    }
}

fn run_check_condition(condition: &str) -> ExitCode {
    let macd = IndicatorConfig::default().base_macd();
    match InvalidationCondition::parse(condition, macd) {
        Ok(parsed) => {
            println!("{}", parsed);
            let mut indicators: Vec<String> = parsed
                .rule
                .required_indicators()
                .iter()
                .map(|i| i.to_string())
                .collect();
            indicators.sort();
            indicators.dedup();
            if !indicators.is_empty() {
                println!("indicators: {}", indicators.join(", "));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e.display_with_context(condition.trim()));
            (&AgentError::from(e)).into()
        }
    }
}

pub fn render_cycle_report(report: &CycleReport) -> String {
    let record = &report.record;
    let mut output = String::new();
    output.push_str(&format!(
        "{} #{} {} -> {}: {}",
        record.instrument,
        record.sequence,
        record.decision.action,
        record.position.side,
        record.summary
    ));
    if report.overridden {
        output.push_str(" (forced exit)");
    }
    output.push('\n');
    output
}

pub fn render_history(instrument: &str, records: &[ConversationRecord], full: bool) -> String {
    let mut output = String::new();
    output.push_str(&format!("== {} ({} records) ==\n", instrument, records.len()));

    for record in records {
        output.push_str(&format!(
            "#{:<5} {}  {:<10} {:<5}  {}\n",
            record.sequence,
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.decision.action.to_string(),
            record.position.side.to_string(),
            record.summary
        ));
        if full {
            if let Some(reasoning) = &record.reasoning {
                output.push_str("  reasoning:\n");
                for line in reasoning.lines() {
                    output.push_str(&format!("    {}\n", line));
                }
            }
            output.push_str("  prompt:\n");
            for line in record.user_prompt.lines() {
                output.push_str(&format!("    {}\n", line));
            }
        }
    }
    output
}
