//! Lightning wallet client over Nostr Wallet Connect.
//!
//! Connects a remote Lightning wallet through a `nostr+walletconnect://`
//! authorization URI, tracks its balance, generates payment requests, and
//! detects incoming settlement by watching for the expected balance delta.
//!
//! The crate is layered the same way top to bottom:
//!
//! - [`core`]: pure logic. Amounts and unit normalization, the
//!   settlement watch state machine, history aggregation.
//! - [`provider`]: trait seams toward the wallet SDK, the price API, and
//!   the event sink.
//! - [`session`], [`invoice`], [`price`], [`notify`]: the stateful
//!   components. Wallet session, invoice lifecycle with its monitoring
//!   task, price feed, notifications.
//! - [`adapters`]: real implementations of the provider traits.

pub mod adapters;
pub mod core;
pub mod invoice;
pub mod notify;
pub mod price;
pub mod provider;
pub mod session;

pub use crate::core::amount::{format_amount, format_sats, normalize_balance, Msat};
pub use crate::core::history::{Direction, Period, Transaction};
pub use crate::core::watch::{Invoice, InvoiceStatus};
pub use crate::invoice::{InvoiceManager, LifecyclePhase, MonitorConfig};
pub use crate::provider::{WalletError, WalletEvent, WalletEventEmitter};
pub use crate::session::WalletSession;
