//! Invoice lifecycle: creation, settlement polling, and teardown.
//!
//! [`InvoiceManager`] drives the lifecycle
//! `Idle → Creating → AwaitingSettlement → {Settled | Cancelled | TimedOut}`.
//! The pure transition logic lives in [`crate::core::watch`]; this module
//! owns the one monitoring session that may exist at a time: the spawned
//! poll task, its liveness flag, and the teardown paths.
//!
//! # Concurrency
//!
//! Poll ticks are strictly sequential: each tick awaits its balance call
//! inline, so a pending request is never duplicated by the next tick.
//! Cancellation flips the monitoring session's `alive` flag before any
//! state is cleared; a tick that started before cancellation re-checks the
//! flag after its network call and completes as a no-op. The flag belongs
//! to the monitoring-session instance, not the invoice, so a replaced
//! watch can never act on a stale completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::core::amount::{normalize_balance, Msat};
use crate::core::watch::{Invoice, InvoiceStatus, SettlementWatch, WatchEvent, WatchInput};
use crate::provider::{WalletError, WalletEvent, WalletEventEmitter, WalletProvider};
use crate::session::WalletSession;

// ============================================================================
// Configuration
// ============================================================================

/// Timing configuration for settlement monitoring.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between balance polls.
    ///
    /// Default: 3 seconds
    pub poll_interval: Duration,

    /// Number of poll ticks before the watch gives up.
    ///
    /// Default: 200 (about 10 minutes at the default interval)
    pub max_attempts: u32,

    /// Delay between settlement detection and clearing the invoice, so the
    /// payer-facing surface can show the paid state briefly.
    ///
    /// Default: 1.5 seconds
    pub settle_grace: Duration,

    /// How long a settlement notification stays visible.
    ///
    /// Default: 10 seconds
    pub notification_ttl: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            max_attempts: 200,
            settle_grace: Duration::from_millis(1500),
            notification_ttl: Duration::from_secs(10),
        }
    }
}

impl MonitorConfig {
    /// Configuration with shortened timings for tests.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_attempts: 5,
            settle_grace: Duration::from_millis(20),
            notification_ttl: Duration::from_millis(50),
        }
    }
}

// ============================================================================
// Lifecycle phase
// ============================================================================

/// Externally observable phase of the invoice lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Idle,
    Creating,
    AwaitingSettlement,
    Settled,
    Cancelled,
    TimedOut,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecyclePhase::Idle => write!(f, "idle"),
            LifecyclePhase::Creating => write!(f, "creating"),
            LifecyclePhase::AwaitingSettlement => write!(f, "awaiting_settlement"),
            LifecyclePhase::Settled => write!(f, "settled"),
            LifecyclePhase::Cancelled => write!(f, "cancelled"),
            LifecyclePhase::TimedOut => write!(f, "timed_out"),
        }
    }
}

// ============================================================================
// Monitoring session
// ============================================================================

/// The one active monitoring session. Dropping it stops the poll task.
struct ActiveMonitor {
    watch: Arc<Mutex<SettlementWatch>>,
    /// Liveness flag for this specific monitoring session.
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Drop for ActiveMonitor {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.task.abort();
    }
}

// ============================================================================
// Invoice Manager
// ============================================================================

/// Creates invoices and supervises settlement detection for them.
///
/// At most one monitoring session is active per manager; starting a new
/// invoice tears down the previous session first. The manager borrows the
/// session's provider handle per operation and never keeps its own copy
/// past the lifetime of the monitoring session it hands it to.
pub struct InvoiceManager<E>
where
    E: WalletEventEmitter + 'static,
{
    session: WalletSession,
    emitter: Arc<E>,
    config: MonitorConfig,
    active: Arc<Mutex<Option<ActiveMonitor>>>,
    invoice: Arc<Mutex<Option<Invoice>>>,
    phase_tx: Arc<watch::Sender<LifecyclePhase>>,
}

impl<E> Clone for InvoiceManager<E>
where
    E: WalletEventEmitter + 'static,
{
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            emitter: Arc::clone(&self.emitter),
            config: self.config.clone(),
            active: Arc::clone(&self.active),
            invoice: Arc::clone(&self.invoice),
            phase_tx: Arc::clone(&self.phase_tx),
        }
    }
}

impl<E> InvoiceManager<E>
where
    E: WalletEventEmitter + 'static,
{
    pub fn new(session: WalletSession, emitter: Arc<E>, config: MonitorConfig) -> Self {
        let (phase_tx, _) = watch::channel(LifecyclePhase::Idle);
        Self {
            session,
            emitter,
            config,
            active: Arc::new(Mutex::new(None)),
            invoice: Arc::new(Mutex::new(None)),
            phase_tx: Arc::new(phase_tx),
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase_tx.borrow()
    }

    /// Subscribes to lifecycle phase changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase_tx.subscribe()
    }

    pub fn current_invoice(&self) -> Option<Invoice> {
        self.invoice.lock().unwrap().clone()
    }

    /// Creates a payment request for `amount_sats` and starts watching for
    /// its settlement.
    ///
    /// The balance snapshot is taken before the watch starts; a fresh read
    /// is preferred, a recently cached value is accepted when the read
    /// fails. The expected balance is computed once from that snapshot and
    /// the requested amount.
    pub async fn create_invoice(
        &self,
        amount_sats: u64,
        description: &str,
    ) -> Result<Invoice, WalletError> {
        if amount_sats == 0 {
            // Rejected before any external call.
            return Err(WalletError::InvalidAmount);
        }
        let provider = self.session.provider().await.ok_or(WalletError::NotConnected)?;

        // A new invoice replaces whatever was being watched.
        self.cancel().await;
        self.phase_tx.send_replace(LifecyclePhase::Creating);

        let snapshot = match provider.get_balance().await {
            Ok(raw) => {
                let balance = normalize_balance(raw);
                self.session.set_balance(balance).await;
                balance
            }
            Err(e) => {
                warn!("balance snapshot read failed, using cached value: {:#}", e);
                match self.session.balance().await {
                    Some(cached) => cached,
                    None => {
                        self.phase_tx.send_replace(LifecyclePhase::Idle);
                        return Err(WalletError::BalanceFetchFailed(format!("{:#}", e)));
                    }
                }
            }
        };

        let payment_request = match provider.make_invoice(amount_sats, description).await {
            Ok(payment_request) => payment_request,
            Err(e) => {
                self.phase_tx.send_replace(LifecyclePhase::Idle);
                return Err(WalletError::InvoiceCreationFailed(format!("{:#}", e)));
            }
        };

        let invoice = Invoice {
            payment_request,
            amount_sats,
            description: description.to_string(),
            created_at_balance: snapshot,
            status: InvoiceStatus::Pending,
        };
        *self.invoice.lock().unwrap() = Some(invoice.clone());

        self.emitter
            .emit(WalletEvent::InvoiceCreated {
                payment_request: invoice.payment_request.clone(),
                amount_sats,
            })
            .await;

        self.start_monitor(provider, snapshot, amount_sats, &invoice.payment_request);
        self.phase_tx.send_replace(LifecyclePhase::AwaitingSettlement);
        Ok(invoice)
    }

    fn start_monitor(
        &self,
        provider: Arc<dyn WalletProvider>,
        snapshot: Msat,
        amount_sats: u64,
        payment_request: &str,
    ) {
        let watch = Arc::new(Mutex::new(SettlementWatch::new(
            snapshot,
            amount_sats,
            self.config.max_attempts,
        )));
        let alive = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(
            MonitorTask {
                provider,
                session: self.session.clone(),
                emitter: Arc::clone(&self.emitter),
                watch: Arc::clone(&watch),
                alive: Arc::clone(&alive),
                invoice: Arc::clone(&self.invoice),
                active: Arc::clone(&self.active),
                phase_tx: Arc::clone(&self.phase_tx),
                config: self.config.clone(),
                amount_sats,
                payment_request: payment_request.to_string(),
            }
            .run(),
        );

        let mut active = self.active.lock().unwrap();
        debug_assert!(active.is_none(), "monitoring session already active");
        *active = Some(ActiveMonitor { watch, alive, task });
    }

    /// Stops the active monitoring session and discards the invoice.
    ///
    /// The poll timer is stopped before any state is cleared, and a tick
    /// already in flight is prevented from settling afterwards. Safe to
    /// call repeatedly or with nothing being watched.
    pub async fn cancel(&self) {
        let monitor = self.active.lock().unwrap().take();
        let Some(monitor) = monitor else {
            self.invoice.lock().unwrap().take();
            return;
        };

        monitor.alive.store(false, Ordering::Release);
        let events = monitor.watch.lock().unwrap().apply(WatchInput::Cancel);
        monitor.task.abort();

        if let Some(mut invoice) = self.invoice.lock().unwrap().take() {
            if invoice.status == InvoiceStatus::Pending {
                invoice.status = InvoiceStatus::Cancelled;
            }
            debug!("invoice discarded ({})", invoice.status);
        }

        // Empty when the watch already reached a terminal phase: nothing
        // was cancelled then, and the terminal phase stands.
        if !events.is_empty() {
            debug!("settlement watch cancelled");
            self.phase_tx.send_replace(LifecyclePhase::Cancelled);
            self.emitter.emit(WalletEvent::WatchCancelled).await;
        }
    }
}

// ============================================================================
// Poll task
// ============================================================================

struct MonitorTask<E>
where
    E: WalletEventEmitter + 'static,
{
    provider: Arc<dyn WalletProvider>,
    session: WalletSession,
    emitter: Arc<E>,
    watch: Arc<Mutex<SettlementWatch>>,
    alive: Arc<AtomicBool>,
    invoice: Arc<Mutex<Option<Invoice>>>,
    active: Arc<Mutex<Option<ActiveMonitor>>>,
    phase_tx: Arc<watch::Sender<LifecyclePhase>>,
    config: MonitorConfig,
    amount_sats: u64,
    payment_request: String,
}

impl<E> MonitorTask<E>
where
    E: WalletEventEmitter + 'static,
{
    async fn run(self) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; the first
        // poll should happen one period after the watch starts.
        interval.tick().await;

        loop {
            interval.tick().await;
            if !self.alive.load(Ordering::Acquire) {
                break;
            }

            // One outstanding request per tick; the next tick is not
            // scheduled until this call and its state update complete.
            let observed = self.provider.get_balance().await;

            // The session may have been torn down while the request was in
            // flight; a late completion must not settle anything.
            if !self.alive.load(Ordering::Acquire) {
                break;
            }

            let input = match observed {
                Ok(raw) => WatchInput::BalanceObserved(normalize_balance(raw)),
                Err(e) => {
                    // A transient failure only delays detection by one
                    // interval; the loop keeps going.
                    warn!("balance poll failed: {:#}", e);
                    WatchInput::TickFailed
                }
            };

            let events = self.watch.lock().unwrap().apply(input);
            for event in events {
                self.handle_event(event).await;
            }

            if self.watch.lock().unwrap().is_terminal() {
                break;
            }
        }
    }

    async fn handle_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::SettlementDetected {
                observed, attempts, ..
            } => {
                debug!(
                    "settlement detected after {} attempts, balance {}",
                    attempts, observed
                );
                self.session.set_balance(observed).await;
                if let Some(invoice) = self.invoice.lock().unwrap().as_mut() {
                    invoice.status = InvoiceStatus::Settled;
                }
                self.phase_tx.send_replace(LifecyclePhase::Settled);

                self.emitter
                    .emit(WalletEvent::BalanceUpdated { balance: observed })
                    .await;
                self.emitter
                    .emit(WalletEvent::SettlementDetected {
                        amount_sats: self.amount_sats,
                        balance: observed,
                    })
                    .await;
                self.emitter
                    .emit(WalletEvent::TransactionsRefreshRequested)
                    .await;

                self.spawn_dismiss();
            }
            WatchEvent::TimedOut { attempts } => {
                // Policy: no user-facing error. The invoice stays visible
                // and unpaid; it may still settle later.
                debug!("settlement watch gave up after {} attempts", attempts);
                self.phase_tx.send_replace(LifecyclePhase::TimedOut);
                self.emitter
                    .emit(WalletEvent::SettlementTimedOut { attempts })
                    .await;
            }
            WatchEvent::Cancelled => {}
        }
    }

    /// Clears the settled invoice after the grace delay, unless it was
    /// replaced in the meantime.
    fn spawn_dismiss(&self) {
        let invoice = Arc::clone(&self.invoice);
        let active = Arc::clone(&self.active);
        let alive = Arc::clone(&self.alive);
        let emitter = Arc::clone(&self.emitter);
        let phase_tx = Arc::clone(&self.phase_tx);
        let payment_request = self.payment_request.clone();
        let grace = self.config.settle_grace;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            {
                let mut slot = invoice.lock().unwrap();
                let ours = slot
                    .as_ref()
                    .is_some_and(|inv| inv.payment_request == payment_request);
                if !ours {
                    return; // replaced or already cleared
                }
                slot.take();
            }
            // Drop the finished monitoring session, but only our own: a new
            // invoice may have installed a fresh one already.
            {
                let mut slot = active.lock().unwrap();
                if slot
                    .as_ref()
                    .is_some_and(|m| Arc::ptr_eq(&m.alive, &alive))
                {
                    slot.take();
                }
            }

            emitter.emit(WalletEvent::InvoiceDismissed).await;
            phase_tx.send_replace(LifecyclePhase::Idle);
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{NoOpEmitter, WalletConnector};
    use crate::session::MemoryUriStore;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicU64};

    const URI: &str = "nostr+walletconnect://pubkey?relay=wss://r.example.com&secret=s";

    struct MockWallet {
        balance: AtomicU64,
        balance_calls: AtomicU32,
        invoice_calls: AtomicU32,
        fail_invoice: AtomicBool,
    }

    impl MockWallet {
        fn new(balance: u64) -> Arc<Self> {
            Arc::new(Self {
                balance: AtomicU64::new(balance),
                balance_calls: AtomicU32::new(0),
                invoice_calls: AtomicU32::new(0),
                fail_invoice: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl WalletProvider for MockWallet {
        async fn get_balance(&self) -> Result<u64> {
            self.balance_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.balance.load(Ordering::SeqCst))
        }

        async fn make_invoice(&self, amount_sats: u64, _description: &str) -> Result<String> {
            self.invoice_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_invoice.load(Ordering::SeqCst) {
                return Err(anyhow!("wallet refused"));
            }
            Ok(format!("lnbc{}mock", amount_sats))
        }

        async fn list_transactions(&self) -> Result<Vec<crate::core::history::Transaction>> {
            Ok(Vec::new())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct MockConnector {
        wallet: Arc<MockWallet>,
    }

    #[async_trait]
    impl WalletConnector for MockConnector {
        async fn connect(&self, _uri: &str) -> Result<Arc<dyn WalletProvider>> {
            Ok(self.wallet.clone() as Arc<dyn WalletProvider>)
        }
    }

    async fn connected_manager(
        wallet: Arc<MockWallet>,
    ) -> (InvoiceManager<NoOpEmitter>, WalletSession) {
        let session = WalletSession::new(
            Arc::new(MockConnector {
                wallet: wallet.clone(),
            }),
            Arc::new(MemoryUriStore::new()),
        );
        session.connect(URI).await.unwrap();
        let manager = InvoiceManager::new(
            session.clone(),
            Arc::new(NoOpEmitter),
            MonitorConfig::for_testing(),
        );
        (manager, session)
    }

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.max_attempts, 200);
        assert_eq!(config.settle_grace, Duration::from_millis(1500));
        assert_eq!(config.notification_ttl, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_zero_amount_makes_no_external_call() {
        let wallet = MockWallet::new(10_000);
        let (manager, _session) = connected_manager(wallet.clone()).await;
        let calls_before = wallet.balance_calls.load(Ordering::SeqCst);

        let err = manager.create_invoice(0, "").await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount));
        assert_eq!(wallet.invoice_calls.load(Ordering::SeqCst), 0);
        assert_eq!(wallet.balance_calls.load(Ordering::SeqCst), calls_before);
        assert_eq!(manager.phase(), LifecyclePhase::Idle);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let wallet = MockWallet::new(10_000);
        let session = WalletSession::new(
            Arc::new(MockConnector {
                wallet: wallet.clone(),
            }),
            Arc::new(MemoryUriStore::new()),
        );
        let manager = InvoiceManager::new(
            session,
            Arc::new(NoOpEmitter),
            MonitorConfig::for_testing(),
        );

        let err = manager.create_invoice(5, "").await.unwrap_err();
        assert!(matches!(err, WalletError::NotConnected));
        assert_eq!(wallet.invoice_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_snapshots_balance_before_watching() {
        let wallet = MockWallet::new(10_000);
        let (manager, _session) = connected_manager(wallet.clone()).await;

        let invoice = manager.create_invoice(5, "coffee").await.unwrap();
        assert_eq!(invoice.created_at_balance, Msat(10_000));
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(invoice.payment_request, "lnbc5mock");
        assert_eq!(manager.phase(), LifecyclePhase::AwaitingSettlement);

        manager.cancel().await;
    }

    #[tokio::test]
    async fn test_creation_failure_surfaces_and_resets() {
        let wallet = MockWallet::new(10_000);
        wallet.fail_invoice.store(true, Ordering::SeqCst);
        let (manager, _session) = connected_manager(wallet.clone()).await;

        let err = manager.create_invoice(5, "").await.unwrap_err();
        assert!(matches!(err, WalletError::InvoiceCreationFailed(_)));
        assert_eq!(manager.phase(), LifecyclePhase::Idle);
        assert!(manager.current_invoice().is_none());
    }

    #[tokio::test]
    async fn test_settles_and_updates_session_balance() {
        let wallet = MockWallet::new(10_000);
        let (manager, session) = connected_manager(wallet.clone()).await;

        manager.create_invoice(5, "").await.unwrap();
        // Expected balance is 10_000 + 5_000.
        wallet.balance.store(15_000, Ordering::SeqCst);

        let mut rx = manager.subscribe();
        while !matches!(*rx.borrow(), LifecyclePhase::Settled | LifecyclePhase::Idle) {
            rx.changed().await.unwrap();
        }
        assert_eq!(session.balance().await, Some(Msat(15_000)));
    }

    #[tokio::test]
    async fn test_settled_invoice_dismissed_after_grace() {
        let wallet = MockWallet::new(10_000);
        let (manager, _session) = connected_manager(wallet.clone()).await;

        manager.create_invoice(5, "").await.unwrap();
        wallet.balance.store(15_000, Ordering::SeqCst);

        let mut rx = manager.subscribe();
        while !matches!(*rx.borrow(), LifecyclePhase::Idle) {
            rx.changed().await.unwrap();
        }
        assert!(manager.current_invoice().is_none());
    }

    #[tokio::test]
    async fn test_cancel_on_idle_is_noop() {
        let wallet = MockWallet::new(10_000);
        let (manager, _session) = connected_manager(wallet).await;
        manager.cancel().await;
        manager.cancel().await;
        assert_eq!(manager.phase(), LifecyclePhase::Idle);
    }

    #[tokio::test]
    async fn test_cancel_discards_invoice_and_stops_polling() {
        let wallet = MockWallet::new(10_000);
        let (manager, _session) = connected_manager(wallet.clone()).await;

        manager.create_invoice(5, "").await.unwrap();
        manager.cancel().await;
        assert_eq!(manager.phase(), LifecyclePhase::Cancelled);
        assert!(manager.current_invoice().is_none());

        let calls_after_cancel = wallet.balance_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(wallet.balance_calls.load(Ordering::SeqCst), calls_after_cancel);

        // Idempotent.
        manager.cancel().await;
    }

    #[tokio::test]
    async fn test_new_invoice_replaces_monitor() {
        let wallet = MockWallet::new(10_000);
        let (manager, _session) = connected_manager(wallet.clone()).await;

        let first = manager.create_invoice(5, "first").await.unwrap();
        let second = manager.create_invoice(7, "second").await.unwrap();
        assert_ne!(first.payment_request, second.payment_request);

        let current = manager.current_invoice().unwrap();
        assert_eq!(current.amount_sats, 7);
        // Second snapshot was taken fresh; expected tracks the new amount.
        assert_eq!(manager.phase(), LifecyclePhase::AwaitingSettlement);

        manager.cancel().await;
    }
}
