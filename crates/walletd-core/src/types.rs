//! Domain types shared by the chain reader, builder, broadcaster, and
//! status tracker.
//!
//! Amounts are plain satoshi integers. Explorer responses disagree on
//! representation, so every source parser normalizes into these shapes
//! before anything else looks at the data.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ==============================================================================
// Network
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub const ALL: [Network; 2] = [Network::Mainnet, Network::Testnet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
        }
    }

    pub fn is_mainnet(&self) -> bool {
        matches!(self, Self::Mainnet)
    }

    /// The `bitcoin` crate network used for address encoding.
    pub fn to_bitcoin(self) -> bitcoin::Network {
        match self {
            Self::Mainnet => bitcoin::Network::Bitcoin,
            Self::Testnet => bitcoin::Network::Testnet,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(Self::Mainnet),
            "testnet" | "test" | "testnet3" => Ok(Self::Testnet),
            other => Err(format!(
                "unknown network `{other}`; expected mainnet or testnet"
            )),
        }
    }
}

// ==============================================================================
// UTXO
// ==============================================================================

/// An unspent output, identified by `(txid, vout)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    /// Hex scriptPubKey; empty when the source does not report it.
    #[serde(default)]
    pub script_pub_key: String,
    #[serde(default)]
    pub confirmations: u64,
    pub address: String,
}

impl Utxo {
    pub fn is_spendable(&self) -> bool {
        self.value > 0
    }
}

/// UTXOs for one address, largest value first, with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoSet {
    pub address: String,
    pub network: Network,
    pub utxos: Vec<Utxo>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl UtxoSet {
    pub fn total_value(&self) -> u64 {
        self.utxos.iter().map(|u| u.value).sum()
    }
}

// ==============================================================================
// Balance
// ==============================================================================

/// How a balance answer was reached across sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusKind {
    /// Only one source answered; unverified.
    SingleSource,
    /// Every queried source returned the same value.
    Unanimous,
    /// A tie-break source sided with one of the disagreeing answers.
    Majority,
    /// No majority; the mean of all observations.
    Average,
    /// Served from the disk cache rather than a live source.
    Cached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub address: String,
    pub network: Network,
    /// Confirmed satoshis. Never negative once returned to a caller.
    pub confirmed: i64,
    /// Net mempool delta; negative when unconfirmed spends outweigh receipts.
    pub unconfirmed: i64,
    pub sources_checked: usize,
    pub sources_agreed: usize,
    pub source: String,
    pub consensus: ConsensusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Balance {
    /// Zeroed balance for an address with nothing cached in offline mode.
    pub fn empty(address: &str, network: Network, source: &str) -> Self {
        Self {
            address: address.to_owned(),
            network,
            confirmed: 0,
            unconfirmed: 0,
            sources_checked: 0,
            sources_agreed: 0,
            source: source.to_owned(),
            consensus: ConsensusKind::Cached,
            warning: None,
        }
    }
}

/// A single source's view of an address balance, before consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BalanceObservation {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

// ==============================================================================
// Transaction Status
// ==============================================================================

/// Confirmation depth at which a transaction counts as settled.
pub const SETTLED_CONFIRMATIONS: u64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Pending,
    Confirming,
    Confirmed,
    Unknown,
    UnknownCached,
    ConfirmedCached,
}

impl StatusKind {
    pub fn from_confirmations(confirmations: u64) -> Self {
        match confirmations {
            0 => Self::Pending,
            c if c >= SETTLED_CONFIRMATIONS => Self::Confirmed,
            _ => Self::Confirming,
        }
    }

    /// The label used when this status is served from a stale cache entry.
    pub fn as_cached(self) -> Self {
        match self {
            Self::Confirmed | Self::ConfirmedCached => Self::ConfirmedCached,
            _ => Self::UnknownCached,
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Confirming => "confirming",
            Self::Confirmed => "confirmed",
            Self::Unknown => "unknown",
            Self::UnknownCached => "unknown_cached",
            Self::ConfirmedCached => "confirmed_cached",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub txid: String,
    pub status: StatusKind,
    pub confirmations: u64,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    /// Block time as Unix seconds; `None` while unconfirmed.
    pub timestamp: Option<u64>,
    pub explorer_url: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ==============================================================================
// Helpers
// ==============================================================================

/// `true` for exactly 64 hex characters (either case).
pub fn is_txid_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_confirmation_depth() {
        assert_eq!(StatusKind::from_confirmations(0), StatusKind::Pending);
        assert_eq!(StatusKind::from_confirmations(1), StatusKind::Confirming);
        assert_eq!(StatusKind::from_confirmations(5), StatusKind::Confirming);
        assert_eq!(StatusKind::from_confirmations(6), StatusKind::Confirmed);
        assert_eq!(StatusKind::from_confirmations(700), StatusKind::Confirmed);
    }

    #[test]
    fn cached_labels() {
        assert_eq!(StatusKind::Confirmed.as_cached(), StatusKind::ConfirmedCached);
        assert_eq!(StatusKind::Confirming.as_cached(), StatusKind::UnknownCached);
        assert_eq!(StatusKind::Pending.as_cached(), StatusKind::UnknownCached);
        assert_eq!(StatusKind::UnknownCached.to_string(), "unknown_cached");
    }

    #[test]
    fn network_parses_aliases() {
        assert_eq!("mainnet".parse::<Network>(), Ok(Network::Mainnet));
        assert_eq!("TestNet".parse::<Network>(), Ok(Network::Testnet));
        assert!("regtest".parse::<Network>().is_err());
    }

    #[test]
    fn txid_hex_check() {
        assert!(is_txid_hex(&"ab".repeat(32)));
        assert!(!is_txid_hex(&"ab".repeat(31)));
        assert!(!is_txid_hex(&"zz".repeat(32)));
    }
}
