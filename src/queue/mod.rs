//! Durable work queue standing in for the donor's `signals_queue` message
//! broker (§4.1, §7 Redelivery).
//!
//! Grounded on `original_source/control-plane/app/queue/connection.py`,
//! `publisher.py` and `consumer.py`: queue name `signals_queue`, dead-letter
//! queue `signals_dead_letter`, prefetch depth 10, message TTL 86_400_000 ms
//! (24h), and bounded nack-then-requeue before dead-lettering. Implemented as
//! a `rusqlite` table rather than an external broker, matching this crate's
//! in-process durable-store convention (§2 Durable Store).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::Signal;

pub const QUEUE_NAME: &str = "signals_queue";
pub const DEAD_LETTER_QUEUE: &str = "signals_dead_letter";
pub const PREFETCH: usize = 10;
pub const MESSAGE_TTL_MS: i64 = 86_400_000;
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS queue_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    payload TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    visible_at TEXT NOT NULL,
    enqueued_at TEXT NOT NULL,
    leased_until TEXT
);
CREATE INDEX IF NOT EXISTS idx_queue_messages_visible
    ON queue_messages(queue, visible_at);
"#;

pub struct Message {
    pub id: i64,
    pub signal: Signal,
    pub attempts: u32,
}

pub struct Queue {
    conn: Mutex<Connection>,
}

impl Queue {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("opening queue store")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("initializing queue schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory queue store")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Publish a Signal onto `signals_queue` (§4.1 step 1, called from the
    /// ingest handler after payload validation).
    pub fn publish(&self, signal: &Signal) -> Result<()> {
        let conn = self.conn.lock();
        let payload = serde_json::to_string(signal).context("serializing signal for queue")?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO queue_messages (queue, payload, attempts, visible_at, enqueued_at)
             VALUES (?1, ?2, 0, ?3, ?4)",
            params![QUEUE_NAME, payload, now.to_rfc3339(), now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Lease up to `PREFETCH` visible messages, marking them invisible for
    /// 30s (the consumer's processing budget) until acked or nacked.
    pub fn consume_batch(&self) -> Result<Vec<Message>> {
        let conn = self.conn.lock();
        let now = Utc::now();
        let lease_until = now + chrono::Duration::seconds(30);
        let mut stmt = conn.prepare(
            "SELECT id, payload, attempts FROM queue_messages
             WHERE queue = ?1 AND visible_at <= ?2
               AND (leased_until IS NULL OR leased_until <= ?2)
             ORDER BY id ASC
             LIMIT ?3",
        )?;
        let rows: Vec<(i64, String, i64)> = stmt
            .query_map(
                params![QUEUE_NAME, now.to_rfc3339(), PREFETCH as i64],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut messages = Vec::with_capacity(rows.len());
        for (id, payload, attempts) in rows {
            conn.execute(
                "UPDATE queue_messages SET leased_until = ?1 WHERE id = ?2",
                params![lease_until.to_rfc3339(), id],
            )?;
            let signal: Signal =
                serde_json::from_str(&payload).context("deserializing queued signal")?;
            messages.push(Message {
                id,
                signal,
                attempts: attempts as u32,
            });
        }
        Ok(messages)
    }

    /// Acknowledge successful processing: delete the message.
    pub fn ack(&self, message_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM queue_messages WHERE id = ?1",
            params![message_id],
        )?;
        Ok(())
    }

    /// Negative-acknowledge a message: requeue it immediately with an
    /// incremented attempt count, unless `MAX_DELIVERY_ATTEMPTS` is reached,
    /// in which case it is moved to `signals_dead_letter` instead (§7
    /// Redelivery).
    pub fn nack(&self, message_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT payload, attempts FROM queue_messages WHERE id = ?1",
                params![message_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((payload, attempts)) = row else {
            return Ok(());
        };
        let attempts = attempts + 1;
        if attempts as u32 >= MAX_DELIVERY_ATTEMPTS {
            conn.execute(
                "UPDATE queue_messages SET queue = ?1, attempts = ?2, visible_at = ?3, leased_until = NULL
                 WHERE id = ?4",
                params![
                    DEAD_LETTER_QUEUE,
                    attempts,
                    Utc::now().to_rfc3339(),
                    message_id
                ],
            )?;
        } else {
            conn.execute(
                "UPDATE queue_messages SET attempts = ?1, visible_at = ?2, leased_until = NULL
                 WHERE id = ?3",
                params![attempts, Utc::now().to_rfc3339(), message_id],
            )?;
        }
        Ok(())
    }

    /// Sweep messages whose TTL (`MESSAGE_TTL_MS`) has elapsed since
    /// enqueueing, regardless of queue. Dropped messages are not
    /// dead-lettered; TTL expiry is a hard discard per the donor broker's
    /// own policy.
    pub fn sweep_expired(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let cutoff = Utc::now() - chrono::Duration::milliseconds(MESSAGE_TTL_MS);
        Ok(conn.execute(
            "DELETE FROM queue_messages WHERE enqueued_at < ?1",
            params![cutoff.to_rfc3339()],
        )?)
    }

    pub fn dead_letter_depth(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1",
            params![DEAD_LETTER_QUEUE],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn queue_depth(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1",
            params![QUEUE_NAME],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

/// Just the enqueued-at timestamp, used by tests to check TTL sweep math
/// without reaching back into the connection.
#[allow(dead_code)]
fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalStatus;

    fn sample_signal() -> Signal {
        Signal::new("tenant-a", "svc", "/ep", SignalStatus::Success, 12.0)
    }

    #[test]
    fn publish_then_consume_round_trip() {
        let queue = Queue::in_memory().unwrap();
        queue.publish(&sample_signal()).unwrap();
        let batch = queue.consume_batch().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].attempts, 0);
    }

    #[test]
    fn leased_message_not_redelivered_until_lease_expires() {
        let queue = Queue::in_memory().unwrap();
        queue.publish(&sample_signal()).unwrap();
        let first = queue.consume_batch().unwrap();
        assert_eq!(first.len(), 1);
        let second = queue.consume_batch().unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn ack_removes_message() {
        let queue = Queue::in_memory().unwrap();
        queue.publish(&sample_signal()).unwrap();
        let batch = queue.consume_batch().unwrap();
        queue.ack(batch[0].id).unwrap();
        assert_eq!(queue.queue_depth().unwrap(), 0);
    }

    #[test]
    fn nack_requeues_until_attempts_exhausted_then_dead_letters() {
        let queue = Queue::in_memory().unwrap();
        queue.publish(&sample_signal()).unwrap();

        for _ in 0..MAX_DELIVERY_ATTEMPTS {
            let batch = queue.consume_batch().unwrap();
            assert_eq!(batch.len(), 1, "message should remain consumable until dead-lettered");
            queue.nack(batch[0].id).unwrap();
        }

        assert_eq!(queue.queue_depth().unwrap(), 0);
        assert_eq!(queue.dead_letter_depth().unwrap(), 1);
    }

    #[test]
    fn prefetch_limits_batch_size() {
        let queue = Queue::in_memory().unwrap();
        for _ in 0..(PREFETCH + 5) {
            queue.publish(&sample_signal()).unwrap();
        }
        let batch = queue.consume_batch().unwrap();
        assert_eq!(batch.len(), PREFETCH);
    }
}
