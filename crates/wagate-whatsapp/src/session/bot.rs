//! Bot lifecycle — building the WhatsApp bot and translating its events.

use super::{emit_to, WhatsAppSession};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wacore::types::events::Event;
use wagate_core::{error::WagateError, types::SessionEventKind};
use whatsapp_rust::bot::Bot;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

impl WhatsAppSession {
    /// Build a bot on this account's device state and run it in the background.
    ///
    /// The event handler writes into the same `Arc`-wrapped fields the session
    /// reads, so a restarted bot keeps feeding the same session.
    pub(super) async fn build_and_run_bot(&self) -> Result<JoinHandle<()>, WagateError> {
        let account_id = self.account_id.clone();
        info!("WhatsApp bot building for account {account_id}...");

        let backend = Arc::new(self.device.clone());
        let client_handle = self.client.clone();
        let last_qr_handle = self.last_qr.clone();
        let events = self.events.clone();

        let mut bot = Bot::builder()
            .with_backend(backend)
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .with_device_props(
                Some(self.config.device_name.clone()),
                None,
                Some(waproto::whatsapp::device_props::PlatformType::Desktop),
            )
            .on_event(move |event, client| {
                let account_id = account_id.clone();
                let client_store = client_handle.clone();
                let last_qr = last_qr_handle.clone();
                let events = events.clone();
                async move {
                    let kind = match event {
                        Event::PairingQrCode { code, .. } => {
                            info!("account {account_id}: QR code generated (scan to pair)");
                            debug!("QR data: {code}");
                            *last_qr.lock().await = Some(code.clone());
                            SessionEventKind::QrCode(code)
                        }
                        Event::PairSuccess(_) => {
                            info!("account {account_id}: pairing successful");
                            SessionEventKind::Paired
                        }
                        Event::Connected(_) => {
                            info!("account {account_id}: connected");
                            *client_store.lock().await = Some(client);
                            *last_qr.lock().await = None;
                            SessionEventKind::Connected
                        }
                        Event::Disconnected(_) => {
                            warn!("account {account_id}: disconnected");
                            *client_store.lock().await = None;
                            SessionEventKind::Disconnected
                        }
                        Event::LoggedOut(_) => {
                            warn!("account {account_id}: logged out, session invalidated");
                            *client_store.lock().await = None;
                            SessionEventKind::LoggedOut
                        }
                        _ => return,
                    };
                    emit_to(&events, &account_id, kind).await;
                }
            })
            .build()
            .await
            .map_err(|e| WagateError::Session(format!("whatsapp bot build failed: {e}")))?;

        let handle = bot
            .run()
            .await
            .map_err(|e| WagateError::Session(format!("whatsapp bot run failed: {e}")))?;

        info!("WhatsApp bot started for account {}", self.account_id);
        Ok(handle)
    }
}
