//! Concrete adapter implementations for ports.

pub mod binance_adapter;
pub mod csv_adapter;
pub mod file_config_adapter;
pub mod openai_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
