//! Pure, I/O-free core logic: amounts, the settlement watch state machine,
//! and transaction history aggregation.

pub mod amount;
pub mod history;
pub mod watch;
