//! Trait seams toward the external collaborators: the wallet-connect SDK,
//! the price API, and the event sink. Real implementations live under
//! `adapters`; tests substitute mocks.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::amount::Msat;
use crate::core::history::Transaction;

// ============================================================================
// Wallet provider
// ============================================================================

/// A connected remote wallet.
///
/// The handle is owned exclusively by the wallet session; other components
/// borrow it for calls and never store their own copy beyond the lifetime
/// of one operation.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Returns the raw balance as reported by the backend. The unit is not
    /// trustworthy; callers must run the value through
    /// [`crate::core::amount::normalize_balance`].
    async fn get_balance(&self) -> Result<u64>;

    /// Creates a payment request for `amount_sats`, returning the encoded
    /// bolt11 string.
    async fn make_invoice(&self, amount_sats: u64, description: &str) -> Result<String>;

    async fn list_transactions(&self) -> Result<Vec<Transaction>>;

    /// Releases the connection. Best effort: callers swallow errors.
    async fn close(&self) -> Result<()>;
}

/// Establishes a wallet connection from an authorization URI.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    /// Validates the URI and connects. Fails on a malformed URI or an
    /// unreachable wallet service.
    async fn connect(&self, uri: &str) -> Result<Arc<dyn WalletProvider>>;
}

// ============================================================================
// Price source
// ============================================================================

/// Best-effort source for the BTC-USD rate.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn btc_usd(&self) -> Result<f64>;
}

// ============================================================================
// Events
// ============================================================================

/// Events raised by the wallet components for consumers to react to:
/// notifications, list refreshes, UI teardown.
#[derive(Debug, Clone)]
pub enum WalletEvent {
    InvoiceCreated {
        payment_request: String,
        amount_sats: u64,
    },
    /// The expected amount arrived. Raised exactly once per invoice.
    SettlementDetected {
        amount_sats: u64,
        balance: Msat,
    },
    /// Consumers holding a transaction list should refetch it.
    TransactionsRefreshRequested,
    /// The settled invoice was cleared after the grace delay.
    InvoiceDismissed,
    /// Polling gave up without settlement. Not a failure: the invoice may
    /// still be paid later.
    SettlementTimedOut {
        attempts: u32,
    },
    WatchCancelled,
    BalanceUpdated {
        balance: Msat,
    },
}

/// Sink for wallet events. Implementations should be fast and
/// non-blocking.
#[async_trait]
pub trait WalletEventEmitter: Send + Sync {
    async fn emit(&self, event: WalletEvent);

    /// Emit multiple events in order.
    async fn emit_all(&self, events: Vec<WalletEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }
}

/// Event emitter that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoOpEmitter;

#[async_trait]
impl WalletEventEmitter for NoOpEmitter {
    async fn emit(&self, _event: WalletEvent) {}
}

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced to the user by wallet operations.
///
/// Mid-poll balance fetch failures and disconnect-time cleanup failures are
/// not represented here: those are swallowed and logged where they occur.
#[derive(Debug, Clone)]
pub enum WalletError {
    /// An operation that needs a connected wallet was called without one.
    NotConnected,
    /// Invoice amount must be greater than zero.
    InvalidAmount,
    ConnectionFailed(String),
    BalanceFetchFailed(String),
    InvoiceCreationFailed(String),
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "no wallet connected"),
            Self::InvalidAmount => write!(f, "invoice amount must be greater than zero"),
            Self::ConnectionFailed(e) => write!(f, "wallet connection failed: {}", e),
            Self::BalanceFetchFailed(e) => write!(f, "balance fetch failed: {}", e),
            Self::InvoiceCreationFailed(e) => write!(f, "invoice creation failed: {}", e),
        }
    }
}

impl std::error::Error for WalletError {}
