//! Device identity persistence (save/load/exists/create).

use async_trait::async_trait;
use wacore::store::error::{db_err, StoreError};
use wacore::store::traits::DeviceStore;
use wacore::store::Device;

use super::SqlxDeviceStore;

type Result<T> = wacore::store::error::Result<T>;

#[async_trait]
impl DeviceStore for SqlxDeviceStore {
    async fn save(&self, device: &Device) -> Result<()> {
        // Device keys use serde helpers that only round-trip through a binary format.
        let data =
            bincode::serialize(device).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query("INSERT OR REPLACE INTO wa_device_info (account_id, data) VALUES (?, ?)")
            .bind(&self.account_id)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<Device>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM wa_device_info WHERE account_id = ?")
                .bind(&self.account_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.map(|(data,)| {
            bincode::deserialize(&data).map_err(|e| StoreError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn exists(&self) -> Result<bool> {
        self.has_device().await.map_err(db_err)
    }

    async fn create(&self) -> Result<i32> {
        // One device per account row; the Device itself is written by save()
        // once keys are generated during pairing.
        Ok(1)
    }
}
