//! Configuration validation.
//!
//! Checks every field the agent reads before the first cycle runs, and
//! builds the typed indicator configuration from the `[indicators]` section.

use crate::domain::error::AgentError;
use crate::domain::indicator::macd::{DEFAULT_FAST, DEFAULT_SIGNAL, DEFAULT_SLOW};
use crate::domain::indicator_set::{IndicatorConfig, TimeframeSpec, DEFAULT_SERIES_LENGTH};
use crate::domain::timeframe::Timeframe;
use crate::ports::config_port::ConfigPort;

pub const FEED_SOURCES: &[&str] = &["csv", "binance", "sqlite"];

pub fn validate_agent_config(config: &dyn ConfigPort) -> Result<(), AgentError> {
    load_instruments(config)?;
    validate_positive(config, "agent", "interval_seconds", 180)?;
    validate_min_hold(config)?;
    let indicators = load_indicator_config(config)?;
    validate_positive(config, "agent", "history_limit", indicators.min_history() as i64)?;
    validate_feed(config)?;
    Ok(())
}

pub fn validate_model_config(config: &dyn ConfigPort) -> Result<(), AgentError> {
    config.require_string("model", "model")?;

    let temperature = config.get_double("model", "temperature", 0.7);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(invalid("model", "temperature", "temperature must be between 0 and 2"));
    }
    validate_positive(config, "model", "max_tokens", 2000)?;
    validate_positive(config, "model", "timeout_seconds", 60)?;
    Ok(())
}

/// `[agent] instruments` (comma-separated) or a single `[agent] instrument`.
pub fn load_instruments(config: &dyn ConfigPort) -> Result<Vec<String>, AgentError> {
    let list = config
        .get_list("agent", "instruments")
        .filter(|l| !l.is_empty())
        .or_else(|| {
            config
                .get_string("agent", "instrument")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map(|s| vec![s])
        });

    match list {
        Some(instruments) => {
            if let Some(bad) = instruments
                .iter()
                .find(|i| !i.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            {
                return Err(invalid(
                    "agent",
                    "instrument",
                    &format!("'{}' is not a valid instrument symbol", bad),
                ));
            }
            Ok(instruments)
        }
        None => Err(AgentError::ConfigMissing {
            section: "agent".to_string(),
            key: "instrument".to_string(),
        }),
    }
}

pub fn load_indicator_config(config: &dyn ConfigPort) -> Result<IndicatorConfig, AgentError> {
    let defaults = IndicatorConfig::default();

    let series_length = config.get_int(
        "indicators",
        "series_length",
        DEFAULT_SERIES_LENGTH as i64,
    );
    if series_length < 1 {
        return Err(invalid(
            "indicators",
            "series_length",
            "series_length must be at least 1",
        ));
    }

    let base = load_timeframe_spec(config, "base", &defaults.base)?;
    let higher = load_timeframe_spec(config, "higher", &defaults.higher)?;

    if higher.timeframe.minutes() <= base.timeframe.minutes()
        || !higher.timeframe.is_multiple_of(base.timeframe)
    {
        return Err(invalid(
            "indicators",
            "higher_timeframe",
            &format!(
                "higher timeframe {} must be a larger multiple of base timeframe {}",
                higher.timeframe, base.timeframe
            ),
        ));
    }

    Ok(IndicatorConfig {
        series_length: series_length as usize,
        base,
        higher,
    })
}

fn load_timeframe_spec(
    config: &dyn ConfigPort,
    prefix: &str,
    defaults: &TimeframeSpec,
) -> Result<TimeframeSpec, AgentError> {
    let key = |suffix: &str| format!("{}_{}", prefix, suffix);

    let timeframe = match config.get_string("indicators", &key("timeframe")) {
        None => defaults.timeframe,
        Some(s) => s
            .parse::<Timeframe>()
            .map_err(|reason| invalid("indicators", &key("timeframe"), &reason))?,
    };

    let macd = match config.get_string("indicators", &key("macd")) {
        None => defaults.macd,
        Some(s) if s.trim().eq_ignore_ascii_case("none") => None,
        Some(s) => Some(parse_macd(&s, &key("macd"))?),
    };

    let atr_period = match config.get_string("indicators", &key("atr")) {
        None => defaults.atr_period,
        Some(s) if s.trim().eq_ignore_ascii_case("none") => None,
        Some(s) => parse_periods(&s, &key("atr"))?.first().copied(),
    };

    Ok(TimeframeSpec {
        timeframe,
        ema_periods: periods_or(config, &key("ema"), &defaults.ema_periods)?,
        rsi_periods: periods_or(config, &key("rsi"), &defaults.rsi_periods)?,
        macd,
        atr_period,
    })
}

fn periods_or(
    config: &dyn ConfigPort,
    key: &str,
    default: &[usize],
) -> Result<Vec<usize>, AgentError> {
    match config.get_string("indicators", key) {
        None => Ok(default.to_vec()),
        Some(s) if s.trim().eq_ignore_ascii_case("none") => Ok(Vec::new()),
        Some(s) => parse_periods(&s, key),
    }
}

/// Comma-separated positive integers, e.g. `7, 14`.
fn parse_periods(value: &str, key: &str) -> Result<Vec<usize>, AgentError> {
    let mut periods = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.parse::<usize>() {
            Ok(n) if n > 0 => {
                if !periods.contains(&n) {
                    periods.push(n);
                }
            }
            _ => {
                return Err(invalid(
                    "indicators",
                    key,
                    &format!("'{}' is not a positive period", part),
                ));
            }
        }
    }
    if periods.is_empty() {
        return Err(invalid("indicators", key, "expected at least one period"));
    }
    Ok(periods)
}

fn parse_macd(value: &str, key: &str) -> Result<(usize, usize, usize), AgentError> {
    let periods: Vec<usize> = value
        .split(',')
        .map(|p| p.trim().parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid("indicators", key, "expected fast,slow,signal"))?;

    match periods.as_slice() {
        [fast, slow, signal] if *fast > 0 && *signal > 0 && fast < slow => {
            Ok((*fast, *slow, *signal))
        }
        [_, _, _] => Err(invalid(
            "indicators",
            key,
            "MACD periods must be positive with fast < slow",
        )),
        _ => Err(invalid(
            "indicators",
            key,
            &format!(
                "expected fast,slow,signal (e.g. {},{},{})",
                DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL
            ),
        )),
    }
}

fn validate_positive(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<(), AgentError> {
    if config.get_int(section, key, default) <= 0 {
        return Err(invalid(section, key, &format!("{} must be positive", key)));
    }
    Ok(())
}

fn validate_min_hold(config: &dyn ConfigPort) -> Result<(), AgentError> {
    if config.get_int("agent", "min_hold_minutes", 0) < 0 {
        return Err(invalid(
            "agent",
            "min_hold_minutes",
            "min_hold_minutes must be non-negative",
        ));
    }
    Ok(())
}

fn validate_feed(config: &dyn ConfigPort) -> Result<(), AgentError> {
    let source = config
        .get_string("feed", "source")
        .unwrap_or_else(|| "csv".to_string());

    if !FEED_SOURCES.contains(&source.trim()) {
        return Err(invalid(
            "feed",
            "source",
            &format!(
                "unknown feed source '{}', expected one of {}",
                source,
                FEED_SOURCES.join(", ")
            ),
        ));
    }
    if source.trim() == "csv" {
        config.require_string("feed", "csv_dir")?;
    }
    Ok(())
}

fn invalid(section: &str, key: &str, reason: &str) -> AgentError {
    AgentError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const VALID: &str = r#"
[agent]
instrument = BTCUSDT
interval_seconds = 180
history_limit = 4800

[indicators]
series_length = 10
base_timeframe = 3m
higher_timeframe = 4h

[feed]
source = csv
csv_dir = ./data

[model]
base_url = https://api.openai.com
model = gpt-4o-mini
"#;

    fn assert_invalid(err: AgentError, expected_key: &str) {
        match err {
            AgentError::ConfigInvalid { key, .. } => assert_eq!(key, expected_key),
            other => panic!("expected ConfigInvalid for {}, got {:?}", expected_key, other),
        }
    }

    #[test]
    fn valid_config_passes() {
        let config = make_config(VALID);
        assert!(validate_agent_config(&config).is_ok());
        assert!(validate_model_config(&config).is_ok());
    }

    #[test]
    fn missing_instrument_fails() {
        let config = make_config("[feed]\ncsv_dir = ./data\n");
        let err = validate_agent_config(&config).unwrap_err();
        assert!(matches!(err, AgentError::ConfigMissing { ref key, .. } if key == "instrument"));
    }

    #[test]
    fn instruments_list_accepted() {
        let config = make_config("[agent]\ninstruments = BTCUSDT, ETHUSDT\n");
        assert_eq!(
            load_instruments(&config).unwrap(),
            vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
        );
    }

    #[test]
    fn instrument_with_path_characters_fails() {
        let config = make_config("[agent]\ninstrument = ../etc\n");
        assert_invalid(load_instruments(&config).unwrap_err(), "instrument");
    }

    #[test]
    fn zero_interval_fails() {
        let config = make_config(&VALID.replace("interval_seconds = 180", "interval_seconds = 0"));
        assert_invalid(validate_agent_config(&config).unwrap_err(), "interval_seconds");
    }

    #[test]
    fn negative_min_hold_fails() {
        let config = make_config(&VALID.replace(
            "history_limit = 4800",
            "history_limit = 4800\nmin_hold_minutes = -5",
        ));
        assert_invalid(validate_agent_config(&config).unwrap_err(), "min_hold_minutes");
    }

    #[test]
    fn defaults_match_built_in_indicator_config() {
        let config = make_config("[agent]\ninstrument = BTC\n");
        assert_eq!(load_indicator_config(&config).unwrap(), IndicatorConfig::default());
    }

    #[test]
    fn custom_periods_are_parsed() {
        let config = make_config(
            "[indicators]\nbase_ema = 9, 21\nbase_rsi = none\nbase_macd = 8,17,9\nhigher_atr = none\n",
        );
        let ind = load_indicator_config(&config).unwrap();
        assert_eq!(ind.base.ema_periods, vec![9, 21]);
        assert!(ind.base.rsi_periods.is_empty());
        assert_eq!(ind.base.macd, Some((8, 17, 9)));
        assert_eq!(ind.higher.atr_period, None);
        assert_eq!(ind.base_macd(), (8, 17, 9));
    }

    #[test]
    fn bad_period_fails() {
        let config = make_config("[indicators]\nbase_rsi = 7, zero\n");
        assert_invalid(load_indicator_config(&config).unwrap_err(), "base_rsi");
    }

    #[test]
    fn macd_fast_must_be_below_slow() {
        let config = make_config("[indicators]\nhigher_macd = 26,12,9\n");
        assert_invalid(load_indicator_config(&config).unwrap_err(), "higher_macd");
    }

    #[test]
    fn higher_timeframe_must_be_multiple_of_base() {
        let config = make_config("[indicators]\nbase_timeframe = 7m\nhigher_timeframe = 1h\n");
        assert_invalid(load_indicator_config(&config).unwrap_err(), "higher_timeframe");

        let config = make_config("[indicators]\nbase_timeframe = 4h\nhigher_timeframe = 3m\n");
        assert_invalid(load_indicator_config(&config).unwrap_err(), "higher_timeframe");
    }

    #[test]
    fn unparseable_timeframe_fails() {
        let config = make_config("[indicators]\nbase_timeframe = fortnightly\n");
        assert_invalid(load_indicator_config(&config).unwrap_err(), "base_timeframe");
    }

    #[test]
    fn unknown_feed_source_fails() {
        let config = make_config(&VALID.replace("source = csv", "source = carrier_pigeon"));
        assert_invalid(validate_agent_config(&config).unwrap_err(), "source");
    }

    #[test]
    fn csv_feed_requires_directory() {
        let config = make_config("[agent]\ninstrument = BTC\n[feed]\nsource = csv\n");
        let err = validate_agent_config(&config).unwrap_err();
        assert!(matches!(err, AgentError::ConfigMissing { ref key, .. } if key == "csv_dir"));
    }

    #[test]
    fn model_temperature_out_of_range_fails() {
        let config = make_config(&VALID.replace(
            "model = gpt-4o-mini",
            "model = gpt-4o-mini\ntemperature = 3.5",
        ));
        assert_invalid(validate_model_config(&config).unwrap_err(), "temperature");
    }

    #[test]
    fn model_name_is_required() {
        let config = make_config("[model]\nbase_url = http://localhost:8080\n");
        let err = validate_model_config(&config).unwrap_err();
        assert!(matches!(err, AgentError::ConfigMissing { ref key, .. } if key == "model"));
    }
}
