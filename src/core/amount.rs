//! Millisatoshi amounts and display formatting.
//!
//! Balances are held internally in millisatoshi. Wallet backends are not
//! consistent about the unit of the balance they report, so every raw
//! balance read goes through [`normalize_balance`] before it is stored or
//! compared.

use std::fmt;

pub const MSAT_PER_SAT: u64 = 1000;
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Threshold below which a raw balance is assumed to be expressed in
/// satoshis rather than millisatoshis.
const SAT_GUESS_THRESHOLD: u64 = 1000;

/// A monetary amount in millisatoshi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Msat(pub u64);

impl Msat {
    /// Constructs a new `Msat` from a `u64` millisatoshi value.
    pub fn from_msat(msat: u64) -> Self {
        Msat(msat)
    }

    /// Constructs a new `Msat` from a satoshi value.
    pub fn from_sats(sats: u64) -> Self {
        Msat(sats.saturating_mul(MSAT_PER_SAT))
    }

    /// Returns the msat value as `u64`.
    pub fn msat(&self) -> u64 {
        self.0
    }

    /// Returns the sat amount, floored. 100678 msat becomes 100 sats.
    pub fn to_sats_floor(&self) -> u64 {
        self.0 / MSAT_PER_SAT
    }

    /// Returns the amount in BTC.
    pub fn to_btc(&self) -> f64 {
        self.0 as f64 / (MSAT_PER_SAT * SATS_PER_BTC) as f64
    }

    pub fn saturating_add(self, other: Msat) -> Msat {
        Msat(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Msat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_msat", self.0)
    }
}

/// Normalizes a raw balance reported by a wallet backend into msat.
///
/// Some backends report the balance in satoshis, some in millisatoshis.
/// A magnitude below 1000 is taken to be sats and multiplied up; anything
/// at or above the threshold is taken to already be msat. Must be applied
/// identically everywhere a balance is read.
pub fn normalize_balance(raw: u64) -> Msat {
    if raw < SAT_GUESS_THRESHOLD {
        Msat(raw.saturating_mul(MSAT_PER_SAT))
    } else {
        Msat(raw)
    }
}

/// Converts an msat amount to its USD value given a BTC-USD rate.
///
/// Returns `None` when no rate is available; callers fall back to a
/// sats-only display.
pub fn usd_value(amount: Msat, btc_usd: Option<f64>) -> Option<f64> {
    btc_usd.map(|rate| amount.to_btc() * rate)
}

/// Formats an amount in sats, e.g. `"1234 sats"`.
pub fn format_sats(amount: Msat) -> String {
    format!("{} sats", amount.to_sats_floor())
}

/// Formats an amount in USD when a rate is available, falling back to
/// sats otherwise.
pub fn format_amount(amount: Msat, btc_usd: Option<f64>) -> String {
    match usd_value(amount, btc_usd) {
        Some(usd) => format!("{:.2} USD", usd),
        None => format_sats(amount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_small_value_is_sats() {
        assert_eq!(normalize_balance(500), Msat(500_000));
        assert_eq!(normalize_balance(1), Msat(1000));
    }

    #[test]
    fn test_normalize_large_value_is_msat() {
        assert_eq!(normalize_balance(50_000), Msat(50_000));
        assert_eq!(normalize_balance(1_000_000), Msat(1_000_000));
    }

    #[test]
    fn test_normalize_threshold_boundary() {
        // 999 is guessed to be sats, 1000 is already msat.
        assert_eq!(normalize_balance(999), Msat(999_000));
        assert_eq!(normalize_balance(1000), Msat(1000));
    }

    #[test]
    fn test_sats_floor() {
        assert_eq!(Msat(100_678).to_sats_floor(), 100);
        assert_eq!(Msat(999).to_sats_floor(), 0);
    }

    #[test]
    fn test_to_btc() {
        assert_eq!(Msat::from_sats(100_000_000).to_btc(), 1.0);
        assert_eq!(Msat::from_sats(50_000_000).to_btc(), 0.5);
    }

    #[test]
    fn test_usd_value_missing_rate() {
        assert_eq!(usd_value(Msat(1_000_000), None), None);
    }

    #[test]
    fn test_usd_value_with_rate() {
        // 0.5 BTC at 100k USD/BTC.
        let amount = Msat::from_sats(50_000_000);
        assert_eq!(usd_value(amount, Some(100_000.0)), Some(50_000.0));
    }

    #[test]
    fn test_format_amount_falls_back_to_sats() {
        let amount = Msat::from_sats(1234);
        assert_eq!(format_amount(amount, None), "1234 sats");
        assert_eq!(format_amount(amount, Some(100_000.0)), "1.23 USD");
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Msat(15_000)), "15000_msat");
    }
}
