//! Address derivation from a public key.
//!
//! One [`AddressFormatter`] per output type. Callers pick one with
//! [`formatter_for`] and get a typed error back instead of probing for
//! capabilities.

use std::str::FromStr;

use bitcoin::key::{CompressedPublicKey, PublicKey};
use bitcoin::secp256k1::{Secp256k1, XOnlyPublicKey};
use bitcoin::Address;
use serde::{Deserialize, Serialize};

use crate::types::Network;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error("{0} requires a compressed public key")]
    UncompressedKey(AddressFormat),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFormat {
    #[serde(rename = "p2pkh", alias = "legacy")]
    P2pkh,
    #[serde(rename = "p2sh-p2wpkh", alias = "p2sh_p2wpkh", alias = "nested-segwit")]
    P2shP2wpkh,
    #[serde(rename = "p2wpkh", alias = "segwit", alias = "bech32")]
    P2wpkh,
    #[serde(rename = "p2tr", alias = "taproot")]
    P2tr,
}

impl AddressFormat {
    pub const ALL: [AddressFormat; 4] = [Self::P2pkh, Self::P2shP2wpkh, Self::P2wpkh, Self::P2tr];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P2pkh => "p2pkh",
            Self::P2shP2wpkh => "p2sh-p2wpkh",
            Self::P2wpkh => "p2wpkh",
            Self::P2tr => "p2tr",
        }
    }
}

impl std::fmt::Display for AddressFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait AddressFormatter: Send + Sync {
    fn format(&self, public_key: &PublicKey, network: Network) -> Result<String, AddressError>;
}

pub struct P2pkh;
pub struct P2shP2wpkh;
pub struct P2wpkh;
pub struct P2tr;

fn compressed(public_key: &PublicKey, format: AddressFormat) -> Result<CompressedPublicKey, AddressError> {
    if !public_key.compressed {
        return Err(AddressError::UncompressedKey(format));
    }
    Ok(CompressedPublicKey(public_key.inner))
}

impl AddressFormatter for P2pkh {
    fn format(&self, public_key: &PublicKey, network: Network) -> Result<String, AddressError> {
        Ok(Address::p2pkh(public_key.pubkey_hash(), network.to_bitcoin()).to_string())
    }
}

impl AddressFormatter for P2shP2wpkh {
    fn format(&self, public_key: &PublicKey, network: Network) -> Result<String, AddressError> {
        let key = compressed(public_key, AddressFormat::P2shP2wpkh)?;
        Ok(Address::p2shwpkh(&key, network.to_bitcoin()).to_string())
    }
}

impl AddressFormatter for P2wpkh {
    fn format(&self, public_key: &PublicKey, network: Network) -> Result<String, AddressError> {
        let key = compressed(public_key, AddressFormat::P2wpkh)?;
        Ok(Address::p2wpkh(&key, network.to_bitcoin()).to_string())
    }
}

impl AddressFormatter for P2tr {
    /// Key-path-only output (no script tree) with the BIP86 tweak.
    fn format(&self, public_key: &PublicKey, network: Network) -> Result<String, AddressError> {
        let key = compressed(public_key, AddressFormat::P2tr)?;
        let internal = XOnlyPublicKey::from(key.0);
        let secp = Secp256k1::verification_only();
        Ok(Address::p2tr(&secp, internal, None, network.to_bitcoin()).to_string())
    }
}

pub fn formatter_for(format: AddressFormat) -> &'static dyn AddressFormatter {
    match format {
        AddressFormat::P2pkh => &P2pkh,
        AddressFormat::P2shP2wpkh => &P2shP2wpkh,
        AddressFormat::P2wpkh => &P2wpkh,
        AddressFormat::P2tr => &P2tr,
    }
}

/// Parse a hex public key and derive the address for `format`.
pub fn derive_address(public_key_hex: &str, format: AddressFormat, network: Network) -> Result<String, AddressError> {
    let key = PublicKey::from_str(public_key_hex.trim()).map_err(|e| AddressError::InvalidKey(e.to_string()))?;
    formatter_for(format).format(&key, network)
}
