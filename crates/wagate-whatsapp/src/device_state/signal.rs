//! Signal protocol state: identities, sessions, prekeys, signed prekeys, sender keys.

use async_trait::async_trait;
use wacore::store::error::db_err;
use wacore::store::traits::SignalStore;

use super::SqlxDeviceStore;

type Result<T> = wacore::store::error::Result<T>;

impl SqlxDeviceStore {
    /// Fetch one blob column keyed by `(account_id, key)`.
    async fn fetch_blob(&self, sql: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(sql)
            .bind(&self.account_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|(d,)| d))
    }

    /// Run a write/delete keyed by `(account_id, key)` with an optional blob.
    async fn exec_keyed(&self, sql: &str, key: &str, blob: Option<&[u8]>) -> Result<()> {
        let mut query = sqlx::query(sql).bind(&self.account_id).bind(key);
        if let Some(blob) = blob {
            query = query.bind(blob);
        }
        query.execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl SignalStore for SqlxDeviceStore {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> Result<()> {
        self.exec_keyed(
            "INSERT OR REPLACE INTO wa_identities (account_id, address, key_data) VALUES (?, ?, ?)",
            address,
            Some(key.as_slice()),
        )
        .await
    }

    async fn load_identity(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.fetch_blob(
            "SELECT key_data FROM wa_identities WHERE account_id = ? AND address = ?",
            address,
        )
        .await
    }

    async fn delete_identity(&self, address: &str) -> Result<()> {
        self.exec_keyed(
            "DELETE FROM wa_identities WHERE account_id = ? AND address = ?",
            address,
            None,
        )
        .await
    }

    async fn get_session(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.fetch_blob(
            "SELECT session_data FROM wa_sessions WHERE account_id = ? AND address = ?",
            address,
        )
        .await
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> Result<()> {
        self.exec_keyed(
            "INSERT OR REPLACE INTO wa_sessions (account_id, address, session_data) VALUES (?, ?, ?)",
            address,
            Some(session),
        )
        .await
    }

    async fn delete_session(&self, address: &str) -> Result<()> {
        self.exec_keyed(
            "DELETE FROM wa_sessions WHERE account_id = ? AND address = ?",
            address,
            None,
        )
        .await
    }

    async fn store_prekey(&self, id: u32, record: &[u8], uploaded: bool) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO wa_prekeys (account_id, id, record, uploaded) VALUES (?, ?, ?, ?)",
        )
        .bind(&self.account_id)
        .bind(i64::from(id))
        .bind(record)
        .bind(uploaded)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT record FROM wa_prekeys WHERE account_id = ? AND id = ?")
                .bind(&self.account_id)
                .bind(i64::from(id))
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(|(d,)| d))
    }

    async fn remove_prekey(&self, id: u32) -> Result<()> {
        sqlx::query("DELETE FROM wa_prekeys WHERE account_id = ? AND id = ?")
            .bind(&self.account_id)
            .bind(i64::from(id))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn store_signed_prekey(&self, id: u32, record: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO wa_signed_prekeys (account_id, id, record) VALUES (?, ?, ?)",
        )
        .bind(&self.account_id)
        .bind(i64::from(id))
        .bind(record)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_signed_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT record FROM wa_signed_prekeys WHERE account_id = ? AND id = ?")
                .bind(&self.account_id)
                .bind(i64::from(id))
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(|(d,)| d))
    }

    async fn load_all_signed_prekeys(&self) -> Result<Vec<(u32, Vec<u8>)>> {
        let rows: Vec<(i64, Vec<u8>)> =
            sqlx::query_as("SELECT id, record FROM wa_signed_prekeys WHERE account_id = ?")
                .bind(&self.account_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows.into_iter().map(|(id, r)| (id as u32, r)).collect())
    }

    async fn remove_signed_prekey(&self, id: u32) -> Result<()> {
        sqlx::query("DELETE FROM wa_signed_prekeys WHERE account_id = ? AND id = ?")
            .bind(&self.account_id)
            .bind(i64::from(id))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn put_sender_key(&self, address: &str, record: &[u8]) -> Result<()> {
        self.exec_keyed(
            "INSERT OR REPLACE INTO wa_sender_keys (account_id, address, record) VALUES (?, ?, ?)",
            address,
            Some(record),
        )
        .await
    }

    async fn get_sender_key(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.fetch_blob(
            "SELECT record FROM wa_sender_keys WHERE account_id = ? AND address = ?",
            address,
        )
        .await
    }

    async fn delete_sender_key(&self, address: &str) -> Result<()> {
        self.exec_keyed(
            "DELETE FROM wa_sender_keys WHERE account_id = ? AND address = ?",
            address,
            None,
        )
        .await
    }
}
