//! Outbound delivery — single sends, media sends, and sequential bulk sends.
//!
//! Every attempt that reaches a session is written to the message log,
//! whether it succeeded or failed.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use wagate_core::{
    config::BulkConfig,
    error::WagateError,
    phone, template,
    traits::Session,
    types::{DeliveryResult, MediaPayload, MessageKind, MessageStatus, NewMessage, Template},
};
use wagate_store::Store;

use crate::sessions::SessionManager;

/// Text to send: literal, or a stored template rendered per recipient.
#[derive(Debug, Clone)]
pub enum Content {
    Text(String),
    Template(Template),
}

impl Content {
    /// Resolve a request's `message` / `template_id` pair. Exactly one must be set.
    pub async fn resolve(
        store: &Store,
        message: Option<String>,
        template_id: Option<String>,
    ) -> Result<Self, WagateError> {
        match (message, template_id) {
            (Some(_), Some(_)) => Err(WagateError::Validation(
                "provide either message or template_id, not both".into(),
            )),
            (None, None) => Err(WagateError::Validation(
                "one of message or template_id is required".into(),
            )),
            (Some(text), None) => {
                if text.trim().is_empty() {
                    return Err(WagateError::Validation("message must not be empty".into()));
                }
                Ok(Self::Text(text))
            }
            (None, Some(id)) => Ok(Self::Template(store.get_template(&id).await?)),
        }
    }

    fn render(&self, vars: &HashMap<String, String>) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Template(t) => template::render(&t.body, vars),
        }
    }
}

/// Result of a bulk send.
#[derive(Debug, Clone, Serialize)]
pub struct BulkReport {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub results: Vec<DeliveryResult>,
}

/// Confirmation of a single successful send.
#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub recipient: String,
    pub message_id: String,
}

enum Outgoing<'a> {
    Text(String),
    Media(&'a MediaPayload),
}

/// Sends messages through account sessions and records the outcome.
pub struct Dispatcher {
    store: Store,
    sessions: Arc<SessionManager>,
    bulk: BulkConfig,
}

impl Dispatcher {
    pub fn new(store: Store, sessions: Arc<SessionManager>, bulk: BulkConfig) -> Self {
        Self {
            store,
            sessions,
            bulk,
        }
    }

    /// Session for an account, which must currently be connected.
    async fn connected_session(&self, account_id: &str) -> Result<Arc<dyn Session>, WagateError> {
        let session = self.sessions.get(account_id).await?;
        if !session.is_connected().await {
            return Err(WagateError::Conflict(format!(
                "account {account_id} is not connected"
            )));
        }
        Ok(session)
    }

    /// Send one text message. A delivery failure is logged, then returned as an error.
    pub async fn send_one(
        &self,
        account_id: &str,
        to: &str,
        content: &Content,
        vars: &HashMap<String, String>,
    ) -> Result<SendReceipt, WagateError> {
        let recipient = phone::recipient_key(to)?;
        let jid = phone::to_jid(to)?;
        let session = self.connected_session(account_id).await?;

        let vars = self.recipient_vars(content, vars, &recipient).await;
        let body = content.render(&vars);
        let result = self
            .deliver(session.as_ref(), account_id, &recipient, &jid, Outgoing::Text(body))
            .await;
        into_receipt(result)
    }

    /// Upload and send one media file.
    pub async fn send_media(
        &self,
        account_id: &str,
        to: &str,
        media: &MediaPayload,
    ) -> Result<SendReceipt, WagateError> {
        let recipient = phone::recipient_key(to)?;
        let jid = phone::to_jid(to)?;
        let session = self.connected_session(account_id).await?;

        let result = self
            .deliver(session.as_ref(), account_id, &recipient, &jid, Outgoing::Media(media))
            .await;
        into_receipt(result)
    }

    /// Send the same content to many recipients, one after another.
    ///
    /// Recipients are deduplicated after normalization, keeping first-seen
    /// order. A bad number or a failed send is recorded in the report and the
    /// loop moves on.
    pub async fn send_bulk(
        &self,
        account_id: &str,
        recipients: &[String],
        content: &Content,
        vars: &HashMap<String, String>,
    ) -> Result<BulkReport, WagateError> {
        if recipients.is_empty() {
            return Err(WagateError::Validation("recipients must not be empty".into()));
        }

        let mut seen = HashSet::new();
        let mut targets: Vec<Result<(String, String), (String, WagateError)>> = Vec::new();
        for raw in recipients {
            match phone::recipient_key(raw).and_then(|key| Ok((key, phone::to_jid(raw)?))) {
                Ok((key, jid)) => {
                    if seen.insert(key.clone()) {
                        targets.push(Ok((key, jid)));
                    }
                }
                Err(e) => targets.push(Err((raw.clone(), e))),
            }
        }

        if targets.len() > self.bulk.max_recipients {
            return Err(WagateError::Validation(format!(
                "too many recipients: {} (max {})",
                targets.len(),
                self.bulk.max_recipients
            )));
        }

        let session = self.connected_session(account_id).await?;
        info!(
            "bulk send on account {account_id}: {} recipients",
            targets.len()
        );

        let delay = Duration::from_millis(self.bulk.delay_ms);
        let mut results = Vec::with_capacity(targets.len());
        let mut attempted = false;

        for target in targets {
            let (recipient, jid) = match target {
                Ok(t) => t,
                Err((raw, e)) => {
                    results.push(DeliveryResult {
                        recipient: raw,
                        status: MessageStatus::Failed,
                        message_id: None,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };

            if attempted && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempted = true;

            let vars = self.recipient_vars(content, vars, &recipient).await;
            let body = content.render(&vars);
            results.push(
                self.deliver(session.as_ref(), account_id, &recipient, &jid, Outgoing::Text(body))
                    .await,
            );
        }

        let sent = results
            .iter()
            .filter(|r| r.status == MessageStatus::Sent)
            .count();
        let report = BulkReport {
            total: results.len(),
            sent,
            failed: results.len() - sent,
            results,
        };
        info!(
            "bulk send on account {account_id} done: {} sent, {} failed",
            report.sent, report.failed
        );
        Ok(report)
    }

    /// Template variables for one recipient.
    ///
    /// Request variables come first; a contact stored under the recipient's
    /// number then overrides `name` and `phone`. `phone` falls back to the
    /// recipient itself.
    async fn recipient_vars(
        &self,
        content: &Content,
        vars: &HashMap<String, String>,
        recipient: &str,
    ) -> HashMap<String, String> {
        let mut merged = vars.clone();
        if !matches!(content, Content::Template(_)) {
            return merged;
        }

        merged
            .entry("phone".to_string())
            .or_insert_with(|| recipient.to_string());

        match self.store.find_contact_by_phone(recipient).await {
            Ok(Some(contact)) => {
                merged.insert("name".to_string(), contact.name);
                merged.insert("phone".to_string(), contact.phone);
            }
            Ok(None) => {}
            Err(e) => warn!("contact lookup for {recipient} failed: {e}"),
        }
        merged
    }

    /// Send through the session and write the outcome to the message log.
    async fn deliver(
        &self,
        session: &dyn Session,
        account_id: &str,
        recipient: &str,
        jid: &str,
        outgoing: Outgoing<'_>,
    ) -> DeliveryResult {
        let (kind, body, media_name, sent) = match outgoing {
            Outgoing::Text(text) => {
                let sent = session.send_text(jid, &text).await;
                (MessageKind::Text, text, None, sent)
            }
            Outgoing::Media(media) => {
                let sent = session.send_media(jid, media).await;
                (
                    media.kind,
                    media.caption.clone().unwrap_or_default(),
                    Some(media.file_name.clone()),
                    sent,
                )
            }
        };

        let (status, message_id, error) = match sent {
            Ok(id) => (MessageStatus::Sent, Some(id), None),
            Err(e) => {
                warn!("send to {recipient} via account {account_id} failed: {e}");
                (MessageStatus::Failed, None, Some(e.to_string()))
            }
        };

        let record = NewMessage {
            account_id: account_id.to_string(),
            recipient: recipient.to_string(),
            kind,
            body,
            media_name,
            status,
            wa_message_id: message_id.clone(),
            error: error.clone(),
        };
        if let Err(e) = self.store.log_message(&record).await {
            warn!("failed to log message to {recipient}: {e}");
        }

        DeliveryResult {
            recipient: recipient.to_string(),
            status,
            message_id,
            error,
        }
    }
}

fn into_receipt(result: DeliveryResult) -> Result<SendReceipt, WagateError> {
    match (result.status, result.message_id) {
        (MessageStatus::Sent, Some(message_id)) => Ok(SendReceipt {
            recipient: result.recipient,
            message_id,
        }),
        _ => Err(WagateError::Session(
            result.error.unwrap_or_else(|| "send failed".to_string()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::tests::{wait_status, MockFactory};
    use wagate_core::types::AccountStatus;

    fn bulk_config() -> BulkConfig {
        BulkConfig {
            delay_ms: 0,
            max_recipients: 3,
        }
    }

    async fn setup(factory: MockFactory) -> (Store, Dispatcher, String) {
        let store = Store::in_memory().await.unwrap();
        let sessions = SessionManager::new(store.clone(), Arc::new(factory));
        let account = store.create_account("Main", None).await.unwrap();
        sessions.connect(&account.id).await.unwrap();
        wait_status(&store, &account.id, AccountStatus::Connected).await;
        let dispatcher = Dispatcher::new(store.clone(), sessions, bulk_config());
        (store, dispatcher, account.id)
    }

    #[tokio::test]
    async fn test_content_requires_exactly_one_source() {
        let store = Store::in_memory().await.unwrap();
        assert!(matches!(
            Content::resolve(&store, None, None).await,
            Err(WagateError::Validation(_))
        ));
        assert!(matches!(
            Content::resolve(&store, Some("hi".into()), Some("t".into())).await,
            Err(WagateError::Validation(_))
        ));
        assert!(matches!(
            Content::resolve(&store, Some("   ".into()), None).await,
            Err(WagateError::Validation(_))
        ));
        assert!(matches!(
            Content::resolve(&store, None, Some("missing".into())).await,
            Err(WagateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_send_one_logs_success() {
        let factory = MockFactory::default();
        let sent = factory.sent.clone();
        let (store, dispatcher, account_id) = setup(factory).await;

        let receipt = dispatcher
            .send_one(
                &account_id,
                "+55 11 99988-7766",
                &Content::Text("hello".into()),
                &HashMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(receipt.recipient, "5511999887766");
        assert_eq!(receipt.message_id, "MSG1");

        let sent = sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![("5511999887766@s.whatsapp.net".to_string(), "hello".to_string())]
        );

        let log = store.list_messages(Some(&account_id), None, None).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, MessageStatus::Sent);
        assert_eq!(log[0].wa_message_id.as_deref(), Some("MSG1"));
    }

    #[tokio::test]
    async fn test_send_one_failure_is_logged_and_returned() {
        let factory = MockFactory {
            fail_to: Some("5511999887766@s.whatsapp.net".into()),
            ..Default::default()
        };
        let (store, dispatcher, account_id) = setup(factory).await;

        let err = dispatcher
            .send_one(
                &account_id,
                "5511999887766",
                &Content::Text("hello".into()),
                &HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WagateError::Session(_)));

        let log = store.list_messages(Some(&account_id), None, None).await.unwrap();
        assert_eq!(log[0].status, MessageStatus::Failed);
        assert!(log[0].error.as_deref().unwrap().contains("delivery failed"));
    }

    #[tokio::test]
    async fn test_send_requires_connected_account() {
        let store = Store::in_memory().await.unwrap();
        let sessions = SessionManager::new(store.clone(), Arc::new(MockFactory::default()));
        let account = store.create_account("Offline", None).await.unwrap();
        let dispatcher = Dispatcher::new(store.clone(), sessions, bulk_config());

        let err = dispatcher
            .send_one(
                &account.id,
                "5511999887766",
                &Content::Text("hi".into()),
                &HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WagateError::Conflict(_)));
        assert!(store.list_messages(None, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_recipient_rejected_before_sending() {
        let (_store, dispatcher, account_id) = setup(MockFactory::default()).await;
        let err = dispatcher
            .send_one(&account_id, "12ab", &Content::Text("hi".into()), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WagateError::Validation(_)));
    }

    #[tokio::test]
    async fn test_bulk_dedupes_and_continues_on_failure() {
        let factory = MockFactory {
            fail_to: Some("5511000000002@s.whatsapp.net".into()),
            ..Default::default()
        };
        let sent = factory.sent.clone();
        let (store, dispatcher, account_id) = setup(factory).await;

        let recipients = vec![
            "5511000000001".to_string(),
            "+55 11 00000-0001".to_string(),
            "5511000000002".to_string(),
            "not-a-number".to_string(),
        ];
        let report = dispatcher
            .send_bulk(
                &account_id,
                &recipients,
                &Content::Text("promo".into()),
                &HashMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.results[0].recipient, "5511000000001");
        assert_eq!(report.results[1].status, MessageStatus::Failed);
        assert_eq!(report.results[2].recipient, "not-a-number");
        assert_eq!(sent.lock().unwrap().len(), 1);

        // Invalid numbers never reach a session, so only two rows are logged.
        let counts = store.count_messages_by_status(&account_id).await.unwrap();
        assert_eq!((counts.sent, counts.failed), (1, 1));
    }

    #[tokio::test]
    async fn test_bulk_limits() {
        let (_store, dispatcher, account_id) = setup(MockFactory::default()).await;
        let content = Content::Text("x".into());

        let err = dispatcher
            .send_bulk(&account_id, &[], &content, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WagateError::Validation(_)));

        let many: Vec<String> = (1..=4).map(|i| format!("551100000000{i}")).collect();
        let err = dispatcher
            .send_bulk(&account_id, &many, &content, &HashMap::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too many recipients"));
    }

    #[tokio::test]
    async fn test_bulk_template_uses_contact_fields() {
        let factory = MockFactory::default();
        let sent = factory.sent.clone();
        let (store, dispatcher, account_id) = setup(factory).await;

        store
            .create_contact(wagate_store::ContactFields {
                name: Some("Ana"),
                phone: Some("5511000000001"),
                ..Default::default()
            })
            .await
            .unwrap();
        let tpl = store
            .create_template("greet", "Hi {{name}} ({{phone}}), code {{code}}")
            .await
            .unwrap();

        let vars = HashMap::from([
            ("name".to_string(), "friend".to_string()),
            ("code".to_string(), "X1".to_string()),
        ]);
        let recipients = vec!["5511000000001".to_string(), "5511000000002".to_string()];
        dispatcher
            .send_bulk(&account_id, &recipients, &Content::Template(tpl), &vars)
            .await
            .unwrap();

        let bodies: Vec<String> = sent.lock().unwrap().iter().map(|(_, b)| b.clone()).collect();
        assert_eq!(
            bodies,
            vec![
                "Hi Ana (5511000000001), code X1".to_string(),
                "Hi friend (5511000000002), code X1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_send_media_records_file_name() {
        let (store, dispatcher, account_id) = setup(MockFactory::default()).await;
        let media = MediaPayload {
            kind: MessageKind::Document,
            mime_type: "application/pdf".into(),
            file_name: "invoice.pdf".into(),
            caption: Some("your invoice".into()),
            data: vec![0x25, 0x50, 0x44, 0x46],
        };

        dispatcher
            .send_media(&account_id, "5511999887766", &media)
            .await
            .unwrap();

        let log = store.list_messages(Some(&account_id), None, None).await.unwrap();
        assert_eq!(log[0].kind, MessageKind::Document);
        assert_eq!(log[0].media_name.as_deref(), Some("invoice.pdf"));
        assert_eq!(log[0].body, "your invoice");
    }
}
