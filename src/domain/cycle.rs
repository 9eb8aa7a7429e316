//! Decision cycle driver.
//!
//! One cycle: fetch candles, compute indicators, render the prompt, ask the
//! model, apply the state machine, append the record, then commit. Any
//! error before the record is stored aborts the cycle with position and
//! run statistics untouched; the next tick starts fresh.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::domain::config_validation::load_indicator_config;
use crate::domain::decision::Action;
use crate::domain::decision_client::decide;
use crate::domain::error::AgentError;
use crate::domain::indicator_set::{
    base_candles, compute_indicator_set, IndicatorConfig, IndicatorSet,
};
use crate::domain::position::{Position, PositionSide};
use crate::domain::prompt::{build_prompt, PromptInput, PromptTemplate};
use crate::domain::record::{ConversationRecord, NewConversationRecord};
use crate::domain::run_stats::RunStats;
use crate::domain::state_machine::{apply, MarketContext, PositionEvent, PositionRules};
use crate::ports::config_port::ConfigPort;
use crate::ports::conversation_port::ConversationPort;
use crate::ports::model_port::ModelPort;
use crate::ports::price_feed_port::PriceFeedPort;

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub instrument: String,
    pub history_limit: usize,
    pub interval: Duration,
    pub rules: PositionRules,
    pub indicators: IndicatorConfig,
    pub template: PromptTemplate,
}

impl AgentSettings {
    /// Settings for one instrument. Expects `validate_agent_config` to have
    /// passed; remaining errors are config or template I/O errors.
    pub fn from_config(config: &dyn ConfigPort, instrument: &str) -> Result<Self, AgentError> {
        let indicators = load_indicator_config(config)?;

        let template = match config.get_string("prompt", "template_path") {
            Some(path) if !path.trim().is_empty() => {
                PromptTemplate::from_file(&PathBuf::from(path.trim()))?
            }
            _ => PromptTemplate::default(),
        };

        let min_history = indicators.min_history();
        let history_limit =
            config.get_int("agent", "history_limit", min_history as i64).max(1) as usize;
        if history_limit < min_history {
            warn!(
                instrument,
                history_limit,
                min_history,
                "history_limit too short to fill every indicator series"
            );
        }

        Ok(Self {
            instrument: instrument.to_string(),
            history_limit,
            interval: Duration::from_secs(
                config.get_int("agent", "interval_seconds", 180).max(1) as u64,
            ),
            rules: PositionRules {
                min_hold_minutes: config.get_int("agent", "min_hold_minutes", 0).max(0),
                macd: indicators.base_macd(),
            },
            indicators,
            template,
        })
    }
}

/// Outcome of one completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub record: ConversationRecord,
    pub events: Vec<PositionEvent>,
    pub overridden: bool,
}

impl CycleReport {
    pub fn action(&self) -> Action {
        self.record.decision.action
    }

    pub fn position(&self) -> PositionSide {
        self.record.position.side
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub completed: u64,
    pub failed: u64,
}

pub struct Agent<'a> {
    settings: AgentSettings,
    feed: &'a dyn PriceFeedPort,
    model: &'a dyn ModelPort,
    store: &'a dyn ConversationPort,
    position: Position,
    stats: RunStats,
}

impl<'a> Agent<'a> {
    pub fn new(
        settings: AgentSettings,
        feed: &'a dyn PriceFeedPort,
        model: &'a dyn ModelPort,
        store: &'a dyn ConversationPort,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            settings,
            feed,
            model,
            store,
            position: Position::Flat,
            stats: RunStats::new(started_at),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.settings.instrument
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Resume the position recorded by the newest stored cycle.
    pub fn restore(&mut self) -> Result<(), AgentError> {
        self.position = load_position(self.store, &self.settings)?;
        if self.position.side() != PositionSide::Flat {
            info!(
                instrument = %self.settings.instrument,
                position = %self.position.side(),
                "restored open position"
            );
        }
        Ok(())
    }

    /// Render the prompt the next cycle would send, without calling the
    /// model or touching state.
    pub fn preview(&self, now: DateTime<Utc>) -> Result<String, AgentError> {
        preview_prompt(&self.settings, self.feed, &self.position, &self.stats, now)
    }

    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, AgentError> {
        let instrument = self.settings.instrument.clone();

        let candles = self
            .feed
            .fetch_candles(&instrument, self.settings.history_limit)?;
        let set = compute_indicator_set(&instrument, &candles, &self.settings.indicators)?;
        let prompt = render_prompt(&self.settings, &set, &self.position, &self.stats, now);

        let outcome = decide(self.model, &prompt, &instrument)?;

        let base_bars = base_candles(&candles, self.settings.indicators.base.timeframe);
        let market = MarketContext {
            price: set.current_price,
            time: now,
            base_bars: &base_bars,
        };
        let step = apply(&self.position, &outcome.decision, &market, &self.settings.rules);

        let record = self.store.append(NewConversationRecord {
            timestamp: now,
            instrument: instrument.clone(),
            user_prompt: prompt,
            reasoning: outcome.reasoning,
            summary: outcome.summary,
            decision: outcome.decision,
            position: step.position.snapshot(),
        })?;

        log_events(&instrument, &step.events, record.decision.action);
        self.position = step.position;
        self.stats.record_completed();

        info!(
            instrument = %instrument,
            sequence = record.sequence,
            action = %record.decision.action,
            position = %record.position.side,
            summary = %record.summary,
            "cycle complete"
        );

        Ok(CycleReport {
            record,
            events: step.events,
            overridden: step.overridden,
        })
    }

    /// Run cycles on this agent alone. See [`run_agents`].
    pub fn run_loop(&mut self, max_cycles: Option<u64>) -> LoopSummary {
        let interval = self.settings.interval;
        run_agents(std::slice::from_mut(self), interval, max_cycles)
    }
}

/// Fetch and render one prompt for `settings.instrument` as seen from
/// `position` and `stats`. Nothing is sent or stored.
pub fn preview_prompt(
    settings: &AgentSettings,
    feed: &dyn PriceFeedPort,
    position: &Position,
    stats: &RunStats,
    now: DateTime<Utc>,
) -> Result<String, AgentError> {
    let candles = feed.fetch_candles(&settings.instrument, settings.history_limit)?;
    let set = compute_indicator_set(&settings.instrument, &candles, &settings.indicators)?;
    Ok(render_prompt(settings, &set, position, stats, now))
}

/// The position recorded by the newest stored cycle, or flat.
pub fn load_position(
    store: &dyn ConversationPort,
    settings: &AgentSettings,
) -> Result<Position, AgentError> {
    match store.latest(&settings.instrument)? {
        Some(latest) => Position::from_snapshot(&latest.position, settings.rules.macd),
        None => Ok(Position::Flat),
    }
}

fn render_prompt(
    settings: &AgentSettings,
    set: &IndicatorSet,
    position: &Position,
    stats: &RunStats,
    now: DateTime<Utc>,
) -> String {
    let input = PromptInput {
        instrument: &settings.instrument,
        indicators: set,
        stats,
        now,
        position,
    };
    build_prompt(&input, &settings.template)
}

/// Drive every agent once per tick, sleeping `interval` between ticks.
/// A failed cycle is logged and retried on the next tick. Stops after
/// `max_cycles` ticks when given.
pub fn run_agents(
    agents: &mut [Agent<'_>],
    interval: Duration,
    max_cycles: Option<u64>,
) -> LoopSummary {
    let mut summary = LoopSummary::default();
    let mut tick = 0u64;

    loop {
        for agent in agents.iter_mut() {
            match agent.run_cycle(Utc::now()) {
                Ok(_) => summary.completed += 1,
                Err(e) => {
                    summary.failed += 1;
                    log_failure(agent.instrument(), &e);
                }
            }
        }

        tick += 1;
        if max_cycles.is_some_and(|max| tick >= max) {
            return summary;
        }
        thread::sleep(interval);
    }
}

fn log_failure(instrument: &str, e: &AgentError) {
    if e.is_backend_error() {
        warn!(instrument, error = %e, "model backend failed, cycle aborted");
    } else if e.is_input_error() {
        error!(instrument, error = %e, "price data rejected, cycle aborted");
    } else {
        error!(instrument, error = %e, "cycle aborted");
    }
}

fn log_events(instrument: &str, events: &[PositionEvent], action: Action) {
    for event in events {
        match event {
            PositionEvent::ForcedExit {
                side,
                price,
                reason,
            } => warn!(
                instrument,
                ?side,
                price,
                %reason,
                model_action = %action,
                "forced exit, model decision not applied"
            ),
            PositionEvent::OpenRejected { reason } => {
                warn!(instrument, %reason, "open rejected, holding")
            }
            PositionEvent::HoldEnforced { held_minutes } => {
                info!(instrument, held_minutes, "minimum hold not reached, holding")
            }
            PositionEvent::Opened { side, price } => info!(instrument, ?side, price, "opened"),
            PositionEvent::Closed { side, price } => info!(instrument, ?side, price, "closed"),
            PositionEvent::Unchanged | PositionEvent::AlreadyPositioned => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    #[test]
    fn history_limit_defaults_to_what_the_indicators_need() {
        let config = FileConfigAdapter::from_string("[agent]\ninstrument = BTCUSDT\n").unwrap();
        let settings = AgentSettings::from_config(&config, "BTCUSDT").unwrap();
        assert_eq!(settings.history_limit, settings.indicators.min_history());
        assert_eq!(settings.history_limit, 4800);
    }

    #[test]
    fn explicit_history_limit_is_kept() {
        let config =
            FileConfigAdapter::from_string("[agent]\ninstrument = BTCUSDT\nhistory_limit = 500\n")
                .unwrap();
        let settings = AgentSettings::from_config(&config, "BTCUSDT").unwrap();
        assert_eq!(settings.history_limit, 500);
    }
}
