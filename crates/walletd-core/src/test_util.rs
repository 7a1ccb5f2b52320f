//! Shared test helpers for `walletd-core` unit tests.
//!
//! Raw transaction fixtures and scratch-directory helpers used across the
//! codec, cache, builder, and broadcast tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

// ==============================================================================
// Transaction Fixtures
// ==============================================================================

/// Bitcoin genesis block coinbase.
pub const GENESIS_COINBASE_HEX: &str = concat!(
    "01000000",
    "01",
    "0000000000000000000000000000000000000000000000000000000000000000",
    "ffffffff",
    "4d",
    "04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272",
    "696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73",
    "ffffffff",
    "01",
    "00f2052a01000000",
    "43",
    "4104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e5",
    "1ec112de5c384df7ba0b8d578a4c702b6bf11d5fac",
    "00000000",
);

pub const GENESIS_COINBASE_TXID: &str =
    "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

const PREV_TXID_LE: &str = "1111111111111111111111111111111111111111111111111111111111111111";
const P2WPKH_OUTPUT: &str = "a086010000000000160014751e76e8199196d454941c45d1b3a323f1433bd6";

/// One input with an empty scriptSig, one P2WPKH output, locktime 0x11.
pub fn legacy_tx_hex() -> String {
    format!("02000000 01 {PREV_TXID_LE} 00000000 00 fdffffff 01 {P2WPKH_OUTPUT} 11000000")
        .replace(' ', "")
}

/// Same transaction as [`legacy_tx_hex`] with a two-item witness stack.
pub fn segwit_tx_hex() -> String {
    format!(
        "02000000 0001 01 {PREV_TXID_LE} 00000000 00 fdffffff 01 {P2WPKH_OUTPUT} 02 02abcd 01ef 11000000"
    )
    .replace(' ', "")
}

// ==============================================================================
// Scratch Directories
// ==============================================================================

/// A fresh directory path under the system temp dir. Not created.
pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "walletd-{prefix}-{}-{nanos}-{seq}",
        std::process::id()
    ))
}
