//! WhatsApp Web session per account — pure Rust implementation via `whatsapp-rust`.
//!
//! Uses the WhatsApp Web protocol (Noise handshake + Signal encryption).
//! Pairing is done by scanning a QR code, like WhatsApp Web.
//! Device credentials live in the shared database, keyed by account id.

mod bot;
mod qr;
mod send;


pub use qr::{generate_qr_image, generate_qr_terminal};

use crate::device_state::SqlxDeviceStore;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use wagate_core::{
    config::WhatsAppConfig,
    error::WagateError,
    traits::{Session, SessionFactory},
    types::{MediaPayload, SessionEvent, SessionEventKind},
};
use whatsapp_rust::client::Client;

/// One account's WhatsApp Web session.
pub struct WhatsAppSession {
    pub(super) account_id: String,
    pub(super) config: WhatsAppConfig,
    pub(super) device: SqlxDeviceStore,
    pub(super) events: mpsc::Sender<SessionEvent>,
    /// Client handle for sending messages — set on `Connected`, cleared on disconnect/logout.
    pub(super) client: Arc<Mutex<Option<Arc<Client>>>>,
    /// Last QR code data, buffered so late callers can still render it.
    pub(super) last_qr: Arc<Mutex<Option<String>>>,
    /// Background task driving the bot.
    pub(super) bot_task: Mutex<Option<JoinHandle<()>>>,
}

impl WhatsAppSession {
    pub fn new(
        account_id: &str,
        config: WhatsAppConfig,
        pool: SqlitePool,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            config,
            device: SqlxDeviceStore::new(pool, account_id),
            events,
            client: Arc::new(Mutex::new(None)),
            last_qr: Arc::new(Mutex::new(None)),
            bot_task: Mutex::new(None),
        }
    }

    /// Publish a lifecycle event. A closed receiver is logged, not fatal.
    pub(super) async fn emit(&self, kind: SessionEventKind) {
        emit_to(&self.events, &self.account_id, kind).await;
    }

    /// Clone the connected client out of the lock so sends don't hold it.
    async fn connected_client(&self) -> Result<Arc<Client>, WagateError> {
        self.client.lock().await.clone().ok_or_else(|| {
            WagateError::Session(format!("account {} is not connected", self.account_id))
        })
    }

    /// Start a bot unless one is already running.
    ///
    /// The task slot stays locked while `build` runs, so concurrent callers
    /// wait and then see the new task instead of starting a second bot.
    async fn start_bot<F, Fut>(&self, build: F) -> Result<(), WagateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<JoinHandle<()>, WagateError>>,
    {
        let mut task = self.bot_task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            info!("account {} already running, connect ignored", self.account_id);
            return Ok(());
        }

        self.emit(SessionEventKind::Connecting).await;
        *task = Some(build().await?);
        Ok(())
    }

    /// Stop the bot task and forget the client without emitting anything.
    async fn stop_bot(&self) -> bool {
        let task = self.bot_task.lock().await.take();
        *self.client.lock().await = None;
        *self.last_qr.lock().await = None;
        match task {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

pub(super) async fn emit_to(
    events: &mpsc::Sender<SessionEvent>,
    account_id: &str,
    kind: SessionEventKind,
) {
    let event = SessionEvent {
        account_id: account_id.to_string(),
        kind,
    };
    if events.send(event).await.is_err() {
        warn!("session event receiver dropped (account {account_id})");
    }
}

#[async_trait]
impl Session for WhatsAppSession {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn connect(&self) -> Result<(), WagateError> {
        self.start_bot(|| self.build_and_run_bot()).await
    }

    async fn disconnect(&self) -> Result<(), WagateError> {
        if self.stop_bot().await {
            info!("account {} disconnected", self.account_id);
        }
        self.emit(SessionEventKind::Disconnected).await;
        Ok(())
    }

    async fn reset(&self) -> Result<(), WagateError> {
        self.forget().await?;
        info!("account {} reset, starting fresh pairing", self.account_id);
        self.connect().await
    }

    async fn forget(&self) -> Result<(), WagateError> {
        self.stop_bot().await;
        self.device
            .purge()
            .await
            .map_err(|e| WagateError::Session(format!("failed to clear device state: {e}")))
    }

    async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    async fn latest_qr(&self) -> Option<String> {
        self.last_qr.lock().await.clone()
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<String, WagateError> {
        let client = self.connected_client().await?;
        send::send_text(&client, to, text, self.config.max_message_len).await
    }

    async fn send_media(&self, to: &str, media: &MediaPayload) -> Result<String, WagateError> {
        let client = self.connected_client().await?;
        send::send_media(&client, to, media).await
    }
}

/// Builds [`WhatsAppSession`]s on the shared pool.
pub struct WhatsAppSessionFactory {
    pool: SqlitePool,
    config: WhatsAppConfig,
}

impl WhatsAppSessionFactory {
    /// Prepare the device-state schema and return a factory.
    pub async fn new(pool: SqlitePool, config: WhatsAppConfig) -> Result<Self, WagateError> {
        SqlxDeviceStore::init_schema(&pool)
            .await
            .map_err(|e| WagateError::Store(format!("device state schema init failed: {e}")))?;
        Ok(Self { pool, config })
    }
}

impl SessionFactory for WhatsAppSessionFactory {
    fn create(&self, account_id: &str, events: mpsc::Sender<SessionEvent>) -> Arc<dyn Session> {
        Arc::new(WhatsAppSession::new(
            account_id,
            self.config.clone(),
            self.pool.clone(),
            events,
        ))
    }
}
