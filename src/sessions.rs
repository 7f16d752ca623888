//! Session manager: one live session per account, with status persisted from events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};
use wagate_core::{
    error::WagateError,
    traits::{Session, SessionFactory},
    types::{AccountStatus, SessionEvent, SessionEventKind},
};
use wagate_store::Store;

/// Capacity of the session event queue and the broadcast fan-out.
const EVENT_BUFFER: usize = 64;

/// What a caller waiting on pairing got back.
#[derive(Debug, Clone, PartialEq)]
pub enum PairingState {
    /// The account is connected; no QR needed.
    Connected,
    /// A QR code is waiting to be scanned.
    Qr(String),
    /// Nothing arrived before the deadline.
    Pending,
}

/// Owns the session of every account that has been touched since startup.
pub struct SessionManager {
    store: Store,
    factory: Arc<dyn SessionFactory>,
    sessions: Mutex<HashMap<String, Arc<dyn Session>>>,
    events: mpsc::Sender<SessionEvent>,
    updates: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Create the manager and spawn the task that persists session events.
    pub fn new(store: Store, factory: Arc<dyn SessionFactory>) -> Arc<Self> {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let (updates, _) = broadcast::channel(EVENT_BUFFER);

        tokio::spawn(persist_events(store.clone(), rx, updates.clone()));

        Arc::new(Self {
            store,
            factory,
            sessions: Mutex::new(HashMap::new()),
            events,
            updates,
        })
    }

    /// Session for an account, created on first use. The account must exist.
    pub async fn get(&self, account_id: &str) -> Result<Arc<dyn Session>, WagateError> {
        self.store.get_account(account_id).await?;

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(account_id.to_string())
            .or_insert_with(|| self.factory.create(account_id, self.events.clone()));
        Ok(session.clone())
    }

    /// Session for an account only if one is already running.
    async fn existing(&self, account_id: &str) -> Option<Arc<dyn Session>> {
        self.sessions.lock().await.get(account_id).cloned()
    }

    pub async fn connect(&self, account_id: &str) -> Result<(), WagateError> {
        let session = self.get(account_id).await?;
        session.connect().await
    }

    pub async fn disconnect(&self, account_id: &str) -> Result<(), WagateError> {
        let session = self.get(account_id).await?;
        session.disconnect().await
    }

    pub async fn reconnect(&self, account_id: &str) -> Result<(), WagateError> {
        let session = self.get(account_id).await?;
        session.disconnect().await?;
        session.connect().await
    }

    pub async fn reset(&self, account_id: &str) -> Result<(), WagateError> {
        let session = self.get(account_id).await?;
        session.reset().await
    }

    /// Stop the account's session, wipe its credentials, and drop it from the manager.
    pub async fn remove(&self, account_id: &str) -> Result<(), WagateError> {
        let session = self.get(account_id).await?;
        session.forget().await?;
        self.sessions.lock().await.remove(account_id);
        info!("session removed for account {account_id}");
        Ok(())
    }

    pub async fn is_connected(&self, account_id: &str) -> bool {
        match self.existing(account_id).await {
            Some(session) => session.is_connected().await,
            None => false,
        }
    }

    /// Number of sessions with a live client.
    pub async fn connected_count(&self) -> usize {
        let sessions: Vec<_> = self.sessions.lock().await.values().cloned().collect();
        let mut count = 0;
        for session in sessions {
            if session.is_connected().await {
                count += 1;
            }
        }
        count
    }

    /// Latest buffered QR code, if the account is waiting to be paired.
    pub async fn latest_qr(&self, account_id: &str) -> Result<Option<String>, WagateError> {
        self.store.get_account(account_id).await?;
        Ok(match self.existing(account_id).await {
            Some(session) => session.latest_qr().await,
            None => None,
        })
    }

    /// Subscribe to session events after they have been persisted.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.updates.subscribe()
    }

    /// Wait for the first QR code (or a connection) of an account.
    ///
    /// A QR code buffered before the call is returned immediately.
    pub async fn wait_for_qr(
        &self,
        account_id: &str,
        timeout: Duration,
    ) -> Result<PairingState, WagateError> {
        let mut rx = self.subscribe();
        let session = self.get(account_id).await?;

        if session.is_connected().await {
            return Ok(PairingState::Connected);
        }
        if let Some(qr) = session.latest_qr().await {
            return Ok(PairingState::Qr(qr));
        }

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.account_id == account_id => match event.kind {
                        SessionEventKind::QrCode(qr) => return PairingState::Qr(qr),
                        SessionEventKind::Connected | SessionEventKind::Paired => {
                            return PairingState::Connected
                        }
                        _ => {}
                    },
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("pairing waiter lagged by {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return PairingState::Pending,
                }
            }
        };

        Ok(tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(PairingState::Pending))
    }

    /// Wait until an account is connected. Returns whether it is.
    pub async fn wait_for_connected(
        &self,
        account_id: &str,
        timeout: Duration,
    ) -> Result<bool, WagateError> {
        let mut rx = self.subscribe();
        let session = self.get(account_id).await?;
        if session.is_connected().await {
            return Ok(true);
        }

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.account_id == account_id => {
                        if event.kind == SessionEventKind::Connected {
                            return true;
                        }
                        if event.kind == SessionEventKind::LoggedOut {
                            return false;
                        }
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        };

        Ok(tokio::time::timeout(timeout, wait).await.unwrap_or(false))
    }

    /// Bring sessions back after a restart.
    ///
    /// Accounts stored as `connected` are reconnected when `auto_reconnect`
    /// is set. Any other in-flight status left by the previous process
    /// is reset to `disconnected`.
    pub async fn restore(&self, auto_reconnect: bool) -> Result<usize, WagateError> {
        let mut restored = 0;
        for account in self.store.list_accounts().await? {
            match account.status {
                AccountStatus::Connected if auto_reconnect => {
                    info!("restoring session for account {} ({})", account.id, account.name);
                    match self.connect(&account.id).await {
                        Ok(()) => restored += 1,
                        Err(e) => {
                            warn!("failed to restore account {}: {e}", account.id);
                            self.store
                                .set_account_status(&account.id, AccountStatus::Disconnected)
                                .await?;
                        }
                    }
                }
                AccountStatus::Connected
                | AccountStatus::Connecting
                | AccountStatus::QrPending => {
                    self.store
                        .set_account_status(&account.id, AccountStatus::Disconnected)
                        .await?;
                }
                AccountStatus::Disconnected | AccountStatus::LoggedOut => {}
            }
        }
        Ok(restored)
    }
}

/// Persist each event's status, then fan it out to waiters.
async fn persist_events(
    store: Store,
    mut rx: mpsc::Receiver<SessionEvent>,
    updates: broadcast::Sender<SessionEvent>,
) {
    while let Some(event) = rx.recv().await {
        let status = event.kind.status();
        match store.set_account_status(&event.account_id, status).await {
            Ok(()) => debug!("account {} is now {status}", event.account_id),
            // The account was deleted while its session was shutting down.
            Err(WagateError::NotFound(_)) => {
                debug!("status {status} for deleted account {}", event.account_id)
            }
            Err(e) => warn!("failed to persist status for {}: {e}", event.account_id),
        }
        // No subscribers is fine.
        let _ = updates.send(event);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use wagate_core::types::MediaPayload;

    /// In-memory session driven by the test: connects instantly, or emits a QR.
    pub(crate) struct MockSession {
        account_id: String,
        events: mpsc::Sender<SessionEvent>,
        pair_with_qr: bool,
        connected: StdMutex<bool>,
        qr: StdMutex<Option<String>>,
        pub(crate) sent: Arc<StdMutex<Vec<(String, String)>>>,
        pub(crate) fail_to: Option<String>,
    }

    impl MockSession {
        async fn emit(&self, kind: SessionEventKind) {
            let _ = self
                .events
                .send(SessionEvent {
                    account_id: self.account_id.clone(),
                    kind,
                })
                .await;
        }

        fn check_send(&self, to: &str, body: &str) -> Result<String, WagateError> {
            if !*self.connected.lock().unwrap() {
                return Err(WagateError::Session("not connected".into()));
            }
            if self.fail_to.as_deref() == Some(to) {
                return Err(WagateError::Session("delivery failed".into()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((to.to_string(), body.to_string()));
            Ok(format!("MSG{}", sent.len()))
        }
    }

    #[async_trait]
    impl Session for MockSession {
        fn account_id(&self) -> &str {
            &self.account_id
        }

        async fn connect(&self) -> Result<(), WagateError> {
            self.emit(SessionEventKind::Connecting).await;
            if self.pair_with_qr {
                *self.qr.lock().unwrap() = Some("2@mock-qr".to_string());
                self.emit(SessionEventKind::QrCode("2@mock-qr".into())).await;
            } else {
                *self.connected.lock().unwrap() = true;
                self.emit(SessionEventKind::Connected).await;
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), WagateError> {
            *self.connected.lock().unwrap() = false;
            self.emit(SessionEventKind::Disconnected).await;
            Ok(())
        }

        async fn reset(&self) -> Result<(), WagateError> {
            self.forget().await?;
            self.connect().await
        }

        async fn forget(&self) -> Result<(), WagateError> {
            *self.connected.lock().unwrap() = false;
            *self.qr.lock().unwrap() = None;
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            *self.connected.lock().unwrap()
        }

        async fn latest_qr(&self) -> Option<String> {
            self.qr.lock().unwrap().clone()
        }

        async fn send_text(&self, to: &str, text: &str) -> Result<String, WagateError> {
            self.check_send(to, text)
        }

        async fn send_media(&self, to: &str, media: &MediaPayload) -> Result<String, WagateError> {
            self.check_send(to, &format!("[{}] {}", media.kind.as_str(), media.file_name))
        }
    }

    /// Factory for [`MockSession`]s sharing one record of sent messages.
    #[derive(Default)]
    pub(crate) struct MockFactory {
        pub(crate) pair_with_qr: bool,
        pub(crate) fail_to: Option<String>,
        pub(crate) sent: Arc<StdMutex<Vec<(String, String)>>>,
    }

    impl SessionFactory for MockFactory {
        fn create(&self, account_id: &str, events: mpsc::Sender<SessionEvent>) -> Arc<dyn Session> {
            Arc::new(MockSession {
                account_id: account_id.to_string(),
                events,
                pair_with_qr: self.pair_with_qr,
                connected: StdMutex::new(false),
                qr: StdMutex::new(None),
                sent: self.sent.clone(),
                fail_to: self.fail_to.clone(),
            })
        }
    }

    /// Wait until the persisted status matches, since events are applied asynchronously.
    pub(crate) async fn wait_status(store: &Store, id: &str, want: AccountStatus) {
        for _ in 0..100 {
            if store.get_account(id).await.unwrap().status == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("account {id} never reached {want}");
    }

    async fn setup(factory: MockFactory) -> (Store, Arc<SessionManager>) {
        let store = Store::in_memory().await.unwrap();
        let manager = SessionManager::new(store.clone(), Arc::new(factory));
        (store, manager)
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let (_store, manager) = setup(MockFactory::default()).await;
        let err = manager.connect("nope").await.unwrap_err();
        assert!(matches!(err, WagateError::NotFound(_)));
        assert!(!manager.is_connected("nope").await);
    }

    #[tokio::test]
    async fn test_connect_persists_status() {
        let (store, manager) = setup(MockFactory::default()).await;
        let account = store.create_account("Sales", None).await.unwrap();

        manager.connect(&account.id).await.unwrap();
        wait_status(&store, &account.id, AccountStatus::Connected).await;
        assert!(manager.is_connected(&account.id).await);
        assert_eq!(manager.connected_count().await, 1);

        let stored = store.get_account(&account.id).await.unwrap();
        assert!(stored.last_connected_at.is_some());

        manager.disconnect(&account.id).await.unwrap();
        wait_status(&store, &account.id, AccountStatus::Disconnected).await;
        assert!(!manager.is_connected(&account.id).await);
    }

    #[tokio::test]
    async fn test_reconnect_ends_connected() {
        let (store, manager) = setup(MockFactory::default()).await;
        let account = store.create_account("Support", None).await.unwrap();

        manager.connect(&account.id).await.unwrap();
        manager.reconnect(&account.id).await.unwrap();
        wait_status(&store, &account.id, AccountStatus::Connected).await;
        assert!(manager.is_connected(&account.id).await);
    }

    #[tokio::test]
    async fn test_wait_for_qr_returns_buffered_code() {
        let factory = MockFactory {
            pair_with_qr: true,
            ..Default::default()
        };
        let (store, manager) = setup(factory).await;
        let account = store.create_account("New", None).await.unwrap();

        manager.connect(&account.id).await.unwrap();
        let state = manager
            .wait_for_qr(&account.id, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(state, PairingState::Qr("2@mock-qr".into()));
        wait_status(&store, &account.id, AccountStatus::QrPending).await;
        assert_eq!(
            manager.latest_qr(&account.id).await.unwrap().as_deref(),
            Some("2@mock-qr")
        );
    }

    #[tokio::test]
    async fn test_wait_for_qr_times_out_as_pending() {
        let (store, manager) = setup(MockFactory {
            pair_with_qr: true,
            ..Default::default()
        })
        .await;
        let account = store.create_account("Idle", None).await.unwrap();

        // Never connected, so nothing will arrive.
        let state = manager
            .wait_for_qr(&account.id, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(state, PairingState::Pending);
        assert!(!manager
            .wait_for_connected(&account.id, Duration::from_millis(50))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_restore_reconnects_connected_accounts() {
        let (store, manager) = setup(MockFactory::default()).await;
        let live = store.create_account("Live", None).await.unwrap();
        let stale = store.create_account("Stale", None).await.unwrap();
        let off = store.create_account("Off", None).await.unwrap();
        store
            .set_account_status(&live.id, AccountStatus::Connected)
            .await
            .unwrap();
        store
            .set_account_status(&stale.id, AccountStatus::QrPending)
            .await
            .unwrap();

        let restored = manager.restore(true).await.unwrap();
        assert_eq!(restored, 1);
        assert!(manager.is_connected(&live.id).await);
        assert_eq!(
            store.get_account(&stale.id).await.unwrap().status,
            AccountStatus::Disconnected
        );
        assert!(!manager.is_connected(&off.id).await);
    }

    #[tokio::test]
    async fn test_restore_without_auto_reconnect() {
        let (store, manager) = setup(MockFactory::default()).await;
        let live = store.create_account("Live", None).await.unwrap();
        store
            .set_account_status(&live.id, AccountStatus::Connected)
            .await
            .unwrap();

        assert_eq!(manager.restore(false).await.unwrap(), 0);
        assert_eq!(
            store.get_account(&live.id).await.unwrap().status,
            AccountStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn test_remove_drops_session() {
        let (store, manager) = setup(MockFactory::default()).await;
        let account = store.create_account("Gone", None).await.unwrap();
        manager.connect(&account.id).await.unwrap();

        manager.remove(&account.id).await.unwrap();
        assert!(!manager.is_connected(&account.id).await);
        assert_eq!(manager.connected_count().await, 0);
    }
}
