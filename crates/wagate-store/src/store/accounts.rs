//! WhatsApp account rows and their persisted session status.

use super::{now, parse_ts, write_err, Store};
use uuid::Uuid;
use wagate_core::error::WagateError;
use wagate_core::types::{Account, AccountStatus};

type AccountRow = (
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    String,
    String,
);

const ACCOUNT_COLUMNS: &str =
    "id, name, phone, status, last_connected_at, created_at, updated_at";

fn account_from_row(row: AccountRow) -> Result<Account, WagateError> {
    let (id, name, phone, status, last_connected_at, created_at, updated_at) = row;
    Ok(Account {
        id,
        name,
        phone,
        status: status.parse()?,
        last_connected_at: last_connected_at.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

impl Store {
    /// Create an account in the `disconnected` state.
    pub async fn create_account(
        &self,
        name: &str,
        phone: Option<&str>,
    ) -> Result<Account, WagateError> {
        let id = Uuid::new_v4().to_string();
        let ts = now();

        sqlx::query(
            "INSERT INTO accounts (id, name, phone, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(phone)
        .bind(AccountStatus::Disconnected.as_str())
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await
        .map_err(|e| write_err("account", e))?;

        tracing::info!("account created: {id} ({name})");
        self.get_account(&id).await
    }

    pub async fn get_account(&self, id: &str) -> Result<Account, WagateError> {
        let row: Option<AccountRow> =
            sqlx::query_as(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| WagateError::Store(format!("get account failed: {e}")))?;

        row.map(account_from_row)
            .transpose()?
            .ok_or_else(|| WagateError::NotFound(format!("account {id}")))
    }

    /// All accounts, oldest first.
    pub async fn list_accounts(&self) -> Result<Vec<Account>, WagateError> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WagateError::Store(format!("list accounts failed: {e}")))?;

        rows.into_iter().map(account_from_row).collect()
    }

    /// Accounts currently persisted with the given status.
    pub async fn accounts_with_status(
        &self,
        status: AccountStatus,
    ) -> Result<Vec<Account>, WagateError> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE status = ? ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WagateError::Store(format!("list accounts by status failed: {e}")))?;

        rows.into_iter().map(account_from_row).collect()
    }

    /// Update name and phone. `None` leaves a field unchanged.
    pub async fn update_account(
        &self,
        id: &str,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Account, WagateError> {
        let result = sqlx::query(
            "UPDATE accounts SET name = COALESCE(?, name), phone = COALESCE(?, phone), \
             updated_at = ? WHERE id = ?",
        )
        .bind(name)
        .bind(phone)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| write_err("account", e))?;

        if result.rows_affected() == 0 {
            return Err(WagateError::NotFound(format!("account {id}")));
        }
        self.get_account(id).await
    }

    /// Record a session status change. `connected` also stamps `last_connected_at`.
    pub async fn set_account_status(
        &self,
        id: &str,
        status: AccountStatus,
    ) -> Result<(), WagateError> {
        let ts = now();
        let query = if status == AccountStatus::Connected {
            sqlx::query(
                "UPDATE accounts SET status = ?, last_connected_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(status.as_str())
            .bind(ts.clone())
            .bind(ts)
            .bind(id)
        } else {
            sqlx::query("UPDATE accounts SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(ts)
                .bind(id)
        };

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| WagateError::Store(format!("set account status failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(WagateError::NotFound(format!("account {id}")));
        }
        Ok(())
    }

    /// Delete an account and, through the foreign key, its message log.
    pub async fn delete_account(&self, id: &str) -> Result<(), WagateError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| WagateError::Store(format!("delete account failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(WagateError::NotFound(format!("account {id}")));
        }
        tracing::info!("account deleted: {id}");
        Ok(())
    }
}
