#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::time::Duration as StdDuration;
use tradeloop::domain::candle::Candle;
use tradeloop::domain::cycle::AgentSettings;
use tradeloop::domain::error::AgentError;
use tradeloop::domain::indicator_set::IndicatorConfig;
use tradeloop::domain::prompt::PromptTemplate;
use tradeloop::domain::record::{ConversationRecord, NewConversationRecord};
use tradeloop::domain::state_machine::PositionRules;
use tradeloop::ports::conversation_port::ConversationPort;
use tradeloop::ports::model_port::{ModelPort, ModelResponse};
use tradeloop::ports::price_feed_port::PriceFeedPort;

pub struct MockPriceFeed {
    pub data: RefCell<HashMap<String, Vec<Candle>>>,
    pub errors: RefCell<HashMap<String, String>>,
}

impl MockPriceFeed {
    pub fn new() -> Self {
        Self {
            data: RefCell::new(HashMap::new()),
            errors: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_candles(self, instrument: &str, candles: Vec<Candle>) -> Self {
        self.set_candles(instrument, candles);
        self
    }

    pub fn set_candles(&self, instrument: &str, candles: Vec<Candle>) {
        self.data.borrow_mut().insert(instrument.to_string(), candles);
    }

    pub fn set_error(&self, instrument: &str, reason: &str) {
        self.errors
            .borrow_mut()
            .insert(instrument.to_string(), reason.to_string());
    }

    pub fn clear_error(&self, instrument: &str) {
        self.errors.borrow_mut().remove(instrument);
    }
}

impl PriceFeedPort for MockPriceFeed {
    fn fetch_candles(&self, instrument: &str, limit: usize) -> Result<Vec<Candle>, AgentError> {
        if let Some(reason) = self.errors.borrow().get(instrument) {
            return Err(AgentError::Feed {
                reason: reason.clone(),
            });
        }
        let data = self.data.borrow();
        let candles = data.get(instrument).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles[skip..].to_vec())
    }
}

/// Replays queued replies in order and records every prompt it was sent.
/// An empty queue answers HOLD.
pub struct ScriptedModel {
    pub replies: RefCell<VecDeque<Result<ModelResponse, AgentError>>>,
    pub prompts: RefCell<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            replies: RefCell::new(VecDeque::new()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn reply(self, content: &str) -> Self {
        self.push_reply(content);
        self
    }

    pub fn push_reply(&self, content: &str) {
        self.replies
            .borrow_mut()
            .push_back(Ok(ModelResponse::new(content, None)));
    }

    pub fn push_reply_with_reasoning(&self, content: &str, reasoning: &str) {
        self.replies
            .borrow_mut()
            .push_back(Ok(ModelResponse::new(content, Some(reasoning.to_string()))));
    }

    pub fn push_timeout(&self) {
        self.replies
            .borrow_mut()
            .push_back(Err(AgentError::BackendTimeout { seconds: 60 }));
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.borrow().len()
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.borrow().last().cloned().unwrap_or_default()
    }
}

impl ModelPort for ScriptedModel {
    fn complete(&self, prompt: &str) -> Result<ModelResponse, AgentError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(ModelResponse::new(r#"{"action": "HOLD"}"#, None)))
    }
}

/// A store whose writes always fail.
pub struct FailingStore;

impl ConversationPort for FailingStore {
    fn append(&self, _record: NewConversationRecord) -> Result<ConversationRecord, AgentError> {
        Err(AgentError::DatabaseQuery {
            reason: "disk full".into(),
        })
    }

    fn list(&self, _instrument: &str, _limit: usize) -> Result<Vec<ConversationRecord>, AgentError> {
        Ok(Vec::new())
    }

    fn latest(&self, _instrument: &str) -> Result<Option<ConversationRecord>, AgentError> {
        Ok(None)
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// 3-minute candles with the given closes; open is the previous close.
pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    let start = start_time();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle {
                timestamp: start + Duration::minutes(3 * i as i64),
                open,
                high: open.max(close) * 1.001,
                low: open.min(close) * 0.999,
                close,
                volume: 100.0 + i as f64,
            }
        })
        .collect()
}

/// `n` candles rising by `step` per bar from `first`.
pub fn trending_candles(n: usize, first: f64, step: f64) -> Vec<Candle> {
    let closes: Vec<f64> = (0..n).map(|i| first + step * i as f64).collect();
    candles_from_closes(&closes)
}

/// `n` candles oscillating around `level`, ending exactly at `last`.
pub fn candles_ending_at(n: usize, level: f64, last: f64) -> Vec<Candle> {
    let mut closes: Vec<f64> = (0..n)
        .map(|i| level + if i % 2 == 0 { 0.5 } else { -0.5 })
        .collect();
    if let Some(c) = closes.last_mut() {
        *c = last;
    }
    candles_from_closes(&closes)
}

/// The time just after the last candle closes.
pub fn after(candles: &[Candle]) -> DateTime<Utc> {
    candles
        .last()
        .map(|c| c.timestamp + Duration::minutes(3))
        .unwrap_or_else(start_time)
}

pub fn settings(instrument: &str) -> AgentSettings {
    let indicators = IndicatorConfig::default();
    AgentSettings {
        instrument: instrument.to_string(),
        history_limit: 500,
        interval: StdDuration::from_millis(1),
        rules: PositionRules {
            min_hold_minutes: 0,
            macd: indicators.base_macd(),
        },
        indicators,
        template: PromptTemplate::default(),
    }
}
