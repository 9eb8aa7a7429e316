//! Core domain types and logic: indicators, prompts, decisions, the
//! position state machine and the cycle that ties them together.

pub mod candle;
pub mod config_validation;
pub mod cycle;
pub mod decision;
pub mod decision_client;
pub mod error;
pub mod indicator;
pub mod indicator_helpers;
pub mod indicator_set;
pub mod invalidation;
pub mod invalidation_eval;
pub mod invalidation_parser;
pub mod position;
pub mod prompt;
pub mod record;
pub mod run_stats;
pub mod state_machine;
pub mod timeframe;
