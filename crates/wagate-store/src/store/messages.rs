//! Outgoing message log.

use super::{now, page, parse_ts, Store};
use tracing::debug;
use uuid::Uuid;
use wagate_core::error::WagateError;
use wagate_core::types::{MessageRecord, MessageStatus, NewMessage};

type MessageRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    String,
);

const MESSAGE_COLUMNS: &str =
    "id, account_id, recipient, kind, body, media_name, status, wa_message_id, error, created_at";

fn message_from_row(row: MessageRow) -> Result<MessageRecord, WagateError> {
    let (id, account_id, recipient, kind, body, media_name, status, wa_message_id, error, created_at) =
        row;
    Ok(MessageRecord {
        id,
        account_id,
        recipient,
        kind: kind.parse()?,
        body,
        media_name,
        status: status.parse()?,
        wa_message_id,
        error,
        created_at: parse_ts(&created_at)?,
    })
}

/// Sent/failed totals for an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounts {
    pub sent: i64,
    pub failed: i64,
}

impl Store {
    /// Append an entry to the message log. Returns the log id.
    pub async fn log_message(&self, msg: &NewMessage) -> Result<String, WagateError> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO messages \
             (id, account_id, recipient, kind, body, media_name, status, wa_message_id, error, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&msg.account_id)
        .bind(&msg.recipient)
        .bind(msg.kind.as_str())
        .bind(&msg.body)
        .bind(&msg.media_name)
        .bind(msg.status.as_str())
        .bind(&msg.wa_message_id)
        .bind(&msg.error)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(|e| WagateError::Store(format!("message log write failed: {e}")))?;

        debug!(
            "message log: {} -> {} [{}]",
            msg.account_id,
            msg.recipient,
            msg.status.as_str()
        );
        Ok(id)
    }

    /// Message log, newest first, optionally for one account.
    pub async fn list_messages(
        &self,
        account_id: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<MessageRecord>, WagateError> {
        let (limit, offset) = page(limit, offset);

        // rowid breaks ties between rows written within the same timestamp.
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE ?1 IS NULL OR account_id = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3"
        ))
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WagateError::Store(format!("list messages failed: {e}")))?;

        rows.into_iter().map(message_from_row).collect()
    }

    /// Count sent and failed messages for an account.
    pub async fn count_messages_by_status(
        &self,
        account_id: &str,
    ) -> Result<MessageCounts, WagateError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM messages WHERE account_id = ? GROUP BY status",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WagateError::Store(format!("count messages failed: {e}")))?;

        let mut counts = MessageCounts::default();
        for (status, n) in rows {
            match status.parse::<MessageStatus>()? {
                MessageStatus::Sent => counts.sent = n,
                MessageStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }
}
