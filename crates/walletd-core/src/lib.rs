pub mod address;
pub mod broadcast;
pub mod builder;
pub mod cache;
pub mod codec;
pub mod error;
pub mod fees;
pub mod reader;
pub mod sources;
pub mod status;
pub mod transport;
pub mod types;
pub mod wallet;

#[cfg(test)]
mod test_util;

pub use error::CoreError;
pub use types::{Balance, Network, TransactionStatus, Utxo, UtxoSet};
pub use wallet::{Wallet, WalletConfig};
