use crate::{
    error::WagateError,
    types::{MediaPayload, SessionEvent},
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A WhatsApp linked-device session for one account.
///
/// The WhatsApp Web implementation lives in `wagate-whatsapp`; the HTTP layer
/// and the session manager only see this trait.
#[async_trait]
pub trait Session: Send + Sync {
    /// Id of the account this session belongs to.
    fn account_id(&self) -> &str;

    /// Start the session in the background. Returns once the client is running;
    /// pairing progress is reported through [`SessionEvent`]s.
    async fn connect(&self) -> Result<(), WagateError>;

    /// Stop the running client. Stored credentials are kept.
    async fn disconnect(&self) -> Result<(), WagateError>;

    /// Discard stored credentials and start a fresh pairing.
    async fn reset(&self) -> Result<(), WagateError>;

    /// Stop the client and discard stored credentials, without reconnecting.
    async fn forget(&self) -> Result<(), WagateError>;

    /// Whether a connected client is available for sending.
    async fn is_connected(&self) -> bool;

    /// Latest QR payload, if the session is waiting to be paired.
    async fn latest_qr(&self) -> Option<String>;

    /// Send a text message. Returns the WhatsApp message id.
    async fn send_text(&self, to: &str, text: &str) -> Result<String, WagateError>;

    /// Upload and send a media message. Returns the WhatsApp message id.
    async fn send_media(&self, to: &str, media: &MediaPayload) -> Result<String, WagateError>;
}

/// Builds sessions for accounts.
pub trait SessionFactory: Send + Sync {
    fn create(&self, account_id: &str, events: mpsc::Sender<SessionEvent>) -> Arc<dyn Session>;
}
