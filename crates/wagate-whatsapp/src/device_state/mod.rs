//! SQLx-based storage backend for `whatsapp-rust`, scoped per account.
//!
//! Implements the `Backend` trait (SignalStore + AppSyncStore + ProtocolStore + DeviceStore)
//! on the gateway's shared SQLite pool. Every row carries the owning `account_id`,
//! so any number of accounts live side by side in one database.

mod app_sync;
mod device;
mod protocol;
mod signal;

use sqlx::SqlitePool;
use tracing::info;

/// Tables holding per-account device state, in purge order.
const TABLES: [&str; 14] = [
    "wa_identities",
    "wa_sessions",
    "wa_prekeys",
    "wa_signed_prekeys",
    "wa_sender_keys",
    "wa_app_sync_keys",
    "wa_app_versions",
    "wa_mutation_macs",
    "wa_skdm_recipients",
    "wa_lid_mappings",
    "wa_base_keys",
    "wa_device_lists",
    "wa_forget_sender_keys",
    "wa_device_info",
];

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS wa_identities (
    account_id TEXT NOT NULL,
    address    TEXT NOT NULL,
    key_data   BLOB NOT NULL,
    PRIMARY KEY (account_id, address)
);
CREATE TABLE IF NOT EXISTS wa_sessions (
    account_id   TEXT NOT NULL,
    address      TEXT NOT NULL,
    session_data BLOB NOT NULL,
    PRIMARY KEY (account_id, address)
);
CREATE TABLE IF NOT EXISTS wa_prekeys (
    account_id TEXT NOT NULL,
    id         INTEGER NOT NULL,
    record     BLOB NOT NULL,
    uploaded   INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (account_id, id)
);
CREATE TABLE IF NOT EXISTS wa_signed_prekeys (
    account_id TEXT NOT NULL,
    id         INTEGER NOT NULL,
    record     BLOB NOT NULL,
    PRIMARY KEY (account_id, id)
);
CREATE TABLE IF NOT EXISTS wa_sender_keys (
    account_id TEXT NOT NULL,
    address    TEXT NOT NULL,
    record     BLOB NOT NULL,
    PRIMARY KEY (account_id, address)
);
CREATE TABLE IF NOT EXISTS wa_app_sync_keys (
    account_id  TEXT NOT NULL,
    key_id      BLOB NOT NULL,
    key_data    BLOB NOT NULL,
    timestamp   INTEGER NOT NULL DEFAULT 0,
    fingerprint BLOB,
    PRIMARY KEY (account_id, key_id)
);
CREATE TABLE IF NOT EXISTS wa_app_versions (
    account_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    data       TEXT NOT NULL,
    PRIMARY KEY (account_id, collection)
);
CREATE TABLE IF NOT EXISTS wa_mutation_macs (
    account_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    index_mac  BLOB NOT NULL,
    version    INTEGER NOT NULL,
    value_mac  BLOB NOT NULL,
    PRIMARY KEY (account_id, collection, index_mac)
);
CREATE TABLE IF NOT EXISTS wa_skdm_recipients (
    account_id TEXT NOT NULL,
    group_jid  TEXT NOT NULL,
    device_jid TEXT NOT NULL,
    PRIMARY KEY (account_id, group_jid, device_jid)
);
CREATE TABLE IF NOT EXISTS wa_lid_mappings (
    account_id      TEXT NOT NULL,
    lid             TEXT NOT NULL,
    phone_number    TEXT NOT NULL,
    created_at      INTEGER NOT NULL DEFAULT 0,
    updated_at      INTEGER NOT NULL DEFAULT 0,
    learning_source TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (account_id, lid)
);
CREATE INDEX IF NOT EXISTS idx_wa_lid_phone ON wa_lid_mappings(account_id, phone_number);
CREATE TABLE IF NOT EXISTS wa_base_keys (
    account_id TEXT NOT NULL,
    address    TEXT NOT NULL,
    message_id TEXT NOT NULL,
    base_key   BLOB NOT NULL,
    PRIMARY KEY (account_id, address, message_id)
);
CREATE TABLE IF NOT EXISTS wa_device_lists (
    account_id TEXT NOT NULL,
    user       TEXT NOT NULL,
    data       TEXT NOT NULL,
    PRIMARY KEY (account_id, user)
);
CREATE TABLE IF NOT EXISTS wa_forget_sender_keys (
    account_id  TEXT NOT NULL,
    group_jid   TEXT NOT NULL,
    participant TEXT NOT NULL,
    PRIMARY KEY (account_id, group_jid, participant)
);
CREATE TABLE IF NOT EXISTS wa_device_info (
    account_id TEXT PRIMARY KEY,
    data       BLOB NOT NULL
);
";

/// Device state of one account, stored in the shared pool.
#[derive(Clone)]
pub struct SqlxDeviceStore {
    pool: SqlitePool,
    account_id: String,
}

impl SqlxDeviceStore {
    /// Create the device-state tables if they do not exist yet.
    pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA).execute(pool).await?;
        Ok(())
    }

    /// A view of `pool` restricted to one account's rows.
    pub fn new(pool: SqlitePool, account_id: &str) -> Self {
        Self {
            pool,
            account_id: account_id.to_string(),
        }
    }

    /// Delete every credential and protocol record of this account.
    ///
    /// The next connection starts unpaired and produces QR codes.
    pub async fn purge(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for table in TABLES {
            sqlx::query(&format!("DELETE FROM {table} WHERE account_id = ?"))
                .bind(&self.account_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!("purged WhatsApp device state for account {}", self.account_id);
        Ok(())
    }

    /// Whether the account has paired device credentials.
    pub async fn has_device(&self) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM wa_device_info WHERE account_id = ?")
                .bind(&self.account_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }
}
