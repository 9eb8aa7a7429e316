//! Structured trading decisions and their extraction from model output.
//!
//! The model is asked for JSON but free text around it is common: fenced
//! code blocks are unwrapped, otherwise the outermost `{ ... }` span is
//! taken. A reply that still cannot be read is not fatal; the caller turns
//! the error into a forced HOLD.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Hold,
    OpenLong,
    OpenShort,
    Close,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Hold => "HOLD",
            Action::OpenLong => "OPEN_LONG",
            Action::OpenShort => "OPEN_SHORT",
            Action::Close => "CLOSE",
        };
        f.write_str(s)
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hold" | "wait" => Ok(Action::Hold),
            "open_long" | "buy_to_enter" | "long" | "buy" => Ok(Action::OpenLong),
            "open_short" | "sell_to_enter" | "short" | "sell" => Ok(Action::OpenShort),
            "close" | "close_position" | "exit" => Ok(Action::Close),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub invalidation_condition: Option<String>,
    pub stop_loss: Option<f64>,
    pub profit_target: Option<f64>,
    pub confidence: Option<f64>,
    pub justification: Option<String>,
    pub summary: Option<String>,
}

impl Decision {
    pub fn hold() -> Self {
        Self {
            action: Action::Hold,
            invalidation_condition: None,
            stop_loss: None,
            profit_target: None,
            confidence: None,
            justification: None,
            summary: None,
        }
    }

    /// The model's own summary if it gave one, otherwise a one-liner built
    /// from the action and its invalidation condition.
    pub fn summary_line(&self) -> String {
        if let Some(summary) = self.summary.as_deref().map(str::trim) {
            if !summary.is_empty() {
                return summary.to_string();
            }
        }
        match (self.action, self.invalidation_condition.as_deref()) {
            (Action::Hold, _) => "HOLD: no change".to_string(),
            (Action::Close, _) => "CLOSE: exit position".to_string(),
            (open, Some(cond)) if !cond.trim().is_empty() => {
                format!("{}: invalidate if {}", open, cond.trim())
            }
            (open, _) => format!("{}: no invalidation condition", open),
        }
    }
}

/// Summary stored when the reply could not be parsed. The raw reply is kept
/// in full.
pub fn parse_error_summary(reason: &str, raw: &str) -> String {
    format!("[PARSE_ERROR] {} | raw: {}", reason, raw)
}

/// Extract a `Decision` for `instrument` from the model's content.
pub fn parse_decision(content: &str, instrument: &str) -> Result<Decision, String> {
    let json = extract_json(content).ok_or_else(|| "no JSON object in response".to_string())?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| format!("malformed JSON: {}", e))?;
    let object = value
        .as_object()
        .ok_or_else(|| "response JSON is not an object".to_string())?;
    let object = decision_object(object, instrument)?;

    let action_text = object
        .get("action")
        .or_else(|| object.get("signal"))
        .and_then(Value::as_str)
        .ok_or_else(|| "'action' is not a string".to_string())?;
    let action: Action = action_text.parse()?;

    Ok(Decision {
        action,
        invalidation_condition: string_field(object, "invalidation_condition")
            .or_else(|| string_field(object, "invalidation")),
        stop_loss: price_field(object, "stop_loss"),
        profit_target: price_field(object, "profit_target")
            .or_else(|| price_field(object, "take_profit")),
        confidence: number_field(object, "confidence").map(|c| c.clamp(0.0, 1.0)),
        justification: string_field(object, "justification")
            .or_else(|| string_field(object, "reasoning")),
        summary: string_field(object, "summary"),
    })
}

/// The fenced block if there is one, otherwise the outermost braces.
fn extract_json(content: &str) -> Option<&str> {
    if let Some(start) = content.find("```") {
        let after = &content[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }

    let open = content.find('{')?;
    let close = content.rfind('}')?;
    (close > open).then(|| &content[open..=close])
}

/// The object holding the action: the top level, or the nested object keyed
/// by `instrument` (or its base asset, `BTC` for `BTCUSDT`). A single nested
/// entry is taken whatever its key.
fn decision_object<'a>(
    object: &'a Map<String, Value>,
    instrument: &str,
) -> Result<&'a Map<String, Value>, String> {
    let has_action = |o: &Map<String, Value>| o.contains_key("action") || o.contains_key("signal");
    if has_action(object) {
        return Ok(object);
    }

    let entries: Vec<(&String, &Map<String, Value>)> = object
        .iter()
        .filter_map(|(key, value)| value.as_object().map(|inner| (key, inner)))
        .filter(|(_, inner)| has_action(inner))
        .collect();

    let wanted = symbol_key(instrument);
    let base = symbol_key(base_asset(instrument));
    if let Some((_, inner)) = entries.iter().find(|(key, _)| symbol_key(key) == wanted) {
        return Ok(*inner);
    }
    if let Some((_, inner)) = entries.iter().find(|(key, _)| symbol_key(key) == base) {
        return Ok(*inner);
    }

    match entries.as_slice() {
        [] => Err("response has no 'action' field".to_string()),
        [(_, inner)] => Ok(*inner),
        _ => Err(format!(
            "response has no entry for {} among {} instruments",
            instrument,
            entries.len()
        )),
    }
}

const QUOTE_ASSETS: &[&str] = &["USDT", "USDC", "BUSD", "FDUSD", "USD", "EUR", "BTC", "ETH"];

/// `BTCUSDT` -> `BTC`, `ETH-USD` -> `ETH`. Unchanged when no quote suffix
/// matches.
fn base_asset(instrument: &str) -> &str {
    let trimmed = instrument.trim();
    let upper = trimmed.to_ascii_uppercase();
    for quote in QUOTE_ASSETS {
        if upper.len() > quote.len() && upper.ends_with(quote) {
            let base = &trimmed[..trimmed.len() - quote.len()];
            return base.trim_end_matches(['-', '_', '/']);
        }
    }
    trimmed
}

fn symbol_key(symbol: &str) -> String {
    symbol
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number_field(object: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match object.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').replace(',', "").parse().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

/// Price levels must be positive; zero means "not set".
fn price_field(object: &Map<String, Value>, key: &str) -> Option<f64> {
    number_field(object, key).filter(|v| *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BTC: &str = "BTCUSDT";

    #[test]
    fn parses_plain_json() {
        let decision = parse_decision(
            r#"{"action": "OPEN_LONG", "invalidation_condition": "price < 100",
                "stop_loss": 98.5, "profit_target": 110, "confidence": 0.7,
                "justification": "trend up"}"#,
            BTC,
        )
        .unwrap();

        assert_eq!(decision.action, Action::OpenLong);
        assert_eq!(decision.invalidation_condition.as_deref(), Some("price < 100"));
        assert_eq!(decision.stop_loss, Some(98.5));
        assert_eq!(decision.profit_target, Some(110.0));
        assert_eq!(decision.confidence, Some(0.7));
        assert_eq!(decision.justification.as_deref(), Some("trend up"));
    }

    #[test]
    fn unwraps_fenced_block_with_surrounding_text() {
        let content = "Looking at the chart...\n```json\n{\"action\": \"hold\"}\n```\nDone.";
        assert_eq!(parse_decision(content, BTC).unwrap().action, Action::Hold);
    }

    #[test]
    fn falls_back_to_outer_braces() {
        let content = "My call: {\"action\": \"CLOSE\"} based on the above.";
        assert_eq!(parse_decision(content, BTC).unwrap().action, Action::Close);
    }

    #[test]
    fn accepts_per_instrument_signal_shape() {
        let content = r#"{"BTC": {"signal": "sell_to_enter", "invalidation_condition": "price > 70000",
                          "stop_loss": "71,000", "profit_target": 0, "confidence": 1.4}}"#;
        let decision = parse_decision(content, BTC).unwrap();
        assert_eq!(decision.action, Action::OpenShort);
        assert_eq!(decision.stop_loss, Some(71000.0));
        assert_eq!(decision.profit_target, None);
        assert_eq!(decision.confidence, Some(1.0));
    }

    #[test]
    fn action_spellings() {
        for (text, action) in [
            ("HOLD", Action::Hold),
            ("buy_to_enter", Action::OpenLong),
            ("Open_Short", Action::OpenShort),
            ("close_position", Action::Close),
        ] {
            assert_eq!(text.parse::<Action>().unwrap(), action);
        }
        assert!("yolo".parse::<Action>().is_err());
    }

    #[test]
    fn failure_reasons() {
        assert!(parse_decision("I think we should wait.", BTC).unwrap_err().contains("no JSON"));
        assert!(parse_decision("{action: HOLD}", BTC).unwrap_err().contains("malformed"));
        assert!(parse_decision(r#"{"confidence": 0.5}"#, BTC).unwrap_err().contains("'action'"));
        assert!(parse_decision(r#"{"action": "moon"}"#, BTC).unwrap_err().contains("unknown action"));
    }

    #[test]
    fn summary_line_prefers_model_summary() {
        let mut decision = Decision::hold();
        assert_eq!(decision.summary_line(), "HOLD: no change");

        decision.summary = Some("  waiting for breakout ".into());
        assert_eq!(decision.summary_line(), "waiting for breakout");
    }

    #[test]
    fn summary_line_for_open() {
        let decision = Decision {
            action: Action::OpenLong,
            invalidation_condition: Some("price < 100".into()),
            ..Decision::hold()
        };
        assert_eq!(decision.summary_line(), "OPEN_LONG: invalidate if price < 100");
    }

    #[test]
    fn parse_error_summary_keeps_raw_text() {
        let s = parse_error_summary("malformed JSON", "{oops");
        assert_eq!(s, "[PARSE_ERROR] malformed JSON | raw: {oops");
    }

    #[test]
    fn serialises_action_in_upper_snake_case() {
        let json = serde_json::to_value(Decision::hold()).unwrap();
        assert_eq!(json["action"], "HOLD");
        let json = serde_json::to_value(Action::OpenShort).unwrap();
        assert_eq!(json, "OPEN_SHORT");
    }
    #[test]
    fn picks_the_entry_for_the_asking_instrument() {
        let content = r#"{"ETHUSDT": {"signal": "hold"},
                          "BTCUSDT": {"signal": "buy_to_enter", "invalidation_condition": "price < 100"}}"#;
        assert_eq!(parse_decision(content, "ETHUSDT").unwrap().action, Action::Hold);

        let btc = parse_decision(content, "BTCUSDT").unwrap();
        assert_eq!(btc.action, Action::OpenLong);
        assert_eq!(btc.invalidation_condition.as_deref(), Some("price < 100"));
    }

    #[test]
    fn matches_base_asset_keys() {
        let content = r#"{"BTC": {"signal": "sell_to_enter", "invalidation_condition": "price > 70000"},
                          "ETH": {"signal": "close_position"}}"#;
        assert_eq!(parse_decision(content, "ETHUSDT").unwrap().action, Action::Close);
        assert_eq!(parse_decision(content, "btc-usdt").unwrap().action, Action::OpenShort);
    }

    #[test]
    fn other_instruments_only_is_an_error() {
        let content = r#"{"BTC": {"signal": "buy_to_enter"}, "SOL": {"signal": "hold"}}"#;
        let err = parse_decision(content, "ETHUSDT").unwrap_err();
        assert!(err.contains("no entry for ETHUSDT"));
    }

    #[test]
    fn base_asset_strips_quote_suffix() {
        assert_eq!(base_asset("BTCUSDT"), "BTC");
        assert_eq!(base_asset("ETH-USD"), "ETH");
        assert_eq!(base_asset("SOL"), "SOL");
        assert_eq!(base_asset("USDT"), "USDT");
    }
}
