pub mod config_port;
pub mod conversation_port;
pub mod model_port;
pub mod price_feed_port;
