//! Price feed port.

use crate::domain::candle::Candle;
use crate::domain::error::AgentError;

pub trait PriceFeedPort {
    /// The most recent `limit` base-timeframe candles for `instrument`,
    /// oldest first, exactly as the source delivered them. Ordering and
    /// value checks happen in the indicator engine, not here.
    fn fetch_candles(&self, instrument: &str, limit: usize) -> Result<Vec<Candle>, AgentError>;
}
