//! SQLite conversation store and candle feed.

use crate::domain::candle::Candle;
use crate::domain::error::AgentError;
use crate::domain::record::{ConversationRecord, NewConversationRecord};
use crate::ports::config_port::ConfigPort;
use crate::ports::conversation_port::ConversationPort;
use crate::ports::price_feed_port::PriceFeedPort;
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, TransactionBehavior};

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

/// Columns of one `conversations` row before JSON decoding.
struct RawRecord {
    instrument: String,
    sequence: i64,
    timestamp: String,
    user_prompt: String,
    reasoning: Option<String>,
    summary: String,
    decision: String,
    position: String,
}

const RECORD_COLUMNS: &str =
    "instrument, sequence, timestamp, user_prompt, reasoning, summary, decision, position_snapshot";

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, AgentError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| AgentError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool =
            Pool::builder()
                .max_size(pool_size)
                .build(manager)
                .map_err(|e: r2d2::Error| AgentError::Database {
                    reason: e.to_string(),
                })?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, AgentError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| AgentError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, AgentError> {
        self.pool.get().map_err(|e: r2d2::Error| AgentError::Database {
            reason: e.to_string(),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), AgentError> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                instrument TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                user_prompt TEXT NOT NULL,
                reasoning TEXT,
                summary TEXT NOT NULL,
                decision TEXT NOT NULL,
                position_snapshot TEXT NOT NULL,
                PRIMARY KEY (instrument, sequence)
            );
            CREATE TABLE IF NOT EXISTS candles (
                instrument TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (instrument, timestamp)
            );",
        )
        .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
            reason: e.to_string(),
        })?;

        Ok(())
    }

    pub fn insert_candles(&self, instrument: &str, candles: &[Candle]) -> Result<(), AgentError> {
        let mut conn = self.conn()?;

        let tx =
            conn.transaction()
                .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                    reason: e.to_string(),
                })?;

        for candle in candles {
            tx.execute(
                "INSERT OR REPLACE INTO candles (instrument, timestamp, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    instrument,
                    candle.timestamp.timestamp_millis(),
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume
                ],
            )
            .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                reason: e.to_string(),
            })?;
        }

        tx.commit()
            .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                reason: e.to_string(),
            })?;

        Ok(())
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
        Ok(RawRecord {
            instrument: row.get(0)?,
            sequence: row.get(1)?,
            timestamp: row.get(2)?,
            user_prompt: row.get(3)?,
            reasoning: row.get(4)?,
            summary: row.get(5)?,
            decision: row.get(6)?,
            position: row.get(7)?,
        })
    }
}

impl RawRecord {
    fn decode(self) -> Result<ConversationRecord, AgentError> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| AgentError::DatabaseQuery {
                reason: format!("invalid stored timestamp '{}': {}", self.timestamp, e),
            })?;

        Ok(ConversationRecord {
            sequence: self.sequence as u64,
            timestamp,
            instrument: self.instrument,
            user_prompt: self.user_prompt,
            reasoning: self.reasoning,
            summary: self.summary,
            decision: serde_json::from_str(&self.decision).map_err(json_error)?,
            position: serde_json::from_str(&self.position).map_err(json_error)?,
        })
    }
}

fn json_error(e: serde_json::Error) -> AgentError {
    AgentError::DatabaseQuery {
        reason: format!("stored JSON could not be decoded: {}", e),
    }
}

impl ConversationPort for SqliteStore {
    fn append(&self, record: NewConversationRecord) -> Result<ConversationRecord, AgentError> {
        let decision = serde_json::to_string(&record.decision).map_err(json_error)?;
        let position = serde_json::to_string(&record.position).map_err(json_error)?;

        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                reason: e.to_string(),
            })?;

        let sequence: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM conversations WHERE instrument = ?1",
                params![record.instrument],
                |row| row.get(0),
            )
            .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                reason: e.to_string(),
            })?;

        tx.execute(
            "INSERT INTO conversations
                (instrument, sequence, timestamp, user_prompt, reasoning, summary, decision, position_snapshot)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.instrument,
                sequence,
                record.timestamp.to_rfc3339(),
                record.user_prompt,
                record.reasoning,
                record.summary,
                decision,
                position
            ],
        )
        .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
            reason: e.to_string(),
        })?;

        tx.commit()
            .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                reason: e.to_string(),
            })?;

        Ok(record.with_sequence(sequence as u64))
    }

    fn list(&self, instrument: &str, limit: usize) -> Result<Vec<ConversationRecord>, AgentError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM conversations WHERE instrument = ?1
                 ORDER BY sequence DESC LIMIT ?2",
                RECORD_COLUMNS
            ))
            .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                reason: e.to_string(),
            })?;

        let rows = stmt
            .query_map(params![instrument, limit as i64], Self::read_row)
            .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                reason: e.to_string(),
            })?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                reason: e.to_string(),
            })?;
            records.push(raw.decode()?);
        }
        records.reverse();

        Ok(records)
    }

    fn latest(&self, instrument: &str) -> Result<Option<ConversationRecord>, AgentError> {
        let conn = self.conn()?;

        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM conversations WHERE instrument = ?1
                     ORDER BY sequence DESC LIMIT 1",
                    RECORD_COLUMNS
                ),
                params![instrument],
                Self::read_row,
            )
            .optional()
            .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                reason: e.to_string(),
            })?;

        raw.map(RawRecord::decode).transpose()
    }
}

impl PriceFeedPort for SqliteStore {
    fn fetch_candles(&self, instrument: &str, limit: usize) -> Result<Vec<Candle>, AgentError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT timestamp, open, high, low, close, volume FROM candles
                 WHERE instrument = ?1 ORDER BY timestamp DESC LIMIT ?2",
            )
            .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                reason: e.to_string(),
            })?;

        let rows = stmt
            .query_map(params![instrument, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })
            .map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                reason: e.to_string(),
            })?;

        let mut candles = Vec::new();
        for row in rows {
            let (ms, open, high, low, close, volume) =
                row.map_err(|e: rusqlite::Error| AgentError::DatabaseQuery {
                    reason: e.to_string(),
                })?;
            let timestamp =
                DateTime::from_timestamp_millis(ms).ok_or_else(|| AgentError::DatabaseQuery {
                    reason: format!("stored candle timestamp {} out of range", ms),
                })?;
            candles.push(Candle {
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            });
        }
        candles.reverse();

        Ok(candles)
    }
}
