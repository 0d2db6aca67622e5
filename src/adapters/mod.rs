//! Implementations of the provider traits over the real external
//! services: the `nwc` wallet-connect SDK and the CoinGecko price API.

pub mod coingecko;
pub mod nwc;
