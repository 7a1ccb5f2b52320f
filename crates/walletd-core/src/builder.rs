//! Unsigned transaction construction.
//!
//! Inputs and outputs are checked field by field, assembled into a
//! version-2 transaction with empty scriptSigs, and serialized. When every
//! input value is known the fee is the exact residual; otherwise it is
//! estimated from a size model and the requested fee rate. Identical
//! requests within a short window are answered from an LRU.

use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::varint_len;
use crate::error::CoreError;
use crate::types::{is_txid_hex, Network};

/// scriptSig bytes assumed per input when estimating size: push of a DER
/// signature (up to 72 + sighash) and a compressed public key.
const EST_SCRIPT_SIG_LEN: usize = 107;

// ==============================================================================
// Request / Result
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInputSpec {
    pub txid: Option<String>,
    pub vout: Option<u32>,
    /// Value of the spent output in satoshis, if known.
    #[serde(default)]
    pub value: Option<u64>,
    #[serde(default)]
    pub sequence: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutputSpec {
    pub address: Option<String>,
    pub value: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub inputs: Vec<TxInputSpec>,
    pub outputs: Vec<TxOutputSpec>,
    /// sat/vB; used only when some input value is unknown.
    #[serde(default, alias = "feeRate")]
    pub fee_rate: Option<f64>,
    pub network: Network,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltTransaction {
    pub raw_hex: String,
    /// Txid of the unsigned serialization. Legacy inputs change it once
    /// signed.
    pub txid: String,
    pub fee: u64,
    /// `true` when `fee` came from the size model rather than known values.
    pub fee_estimated: bool,
    pub input_total: Option<u64>,
    pub output_total: u64,
    pub estimated_size: usize,
}

// ==============================================================================
// Builder
// ==============================================================================

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    /// Rate applied when fees must be estimated and the request has none.
    pub default_fee_rate: f64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 128,
            cache_ttl: Duration::from_secs(60),
            default_fee_rate: 1.0,
        }
    }
}

pub struct TransactionBuilder {
    config: BuilderConfig,
    recent: Mutex<LruCache<String, (Instant, BuiltTransaction)>>,
}

struct CheckedInput {
    outpoint: OutPoint,
    value: Option<u64>,
    sequence: Sequence,
}

struct CheckedOutput {
    script_pubkey: ScriptBuf,
    value: u64,
}

impl TransactionBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            recent: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of results held for replay.
    pub fn cached_results(&self) -> usize {
        self.recent.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn build(&self, request: &BuildRequest) -> Result<BuiltTransaction, CoreError> {
        let key = serde_json::to_string(request)
            .map_err(|e| CoreError::InvalidInput(format!("unserializable request: {e}")))?;

        {
            let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
            if let Some((built_at, result)) = recent.get(&key) {
                if built_at.elapsed() < self.config.cache_ttl {
                    debug!(txid = %result.txid, "build served from recent results");
                    return Ok(result.clone());
                }
            }
        }

        let result = self.build_uncached(request)?;
        self.recent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .put(key, (Instant::now(), result.clone()));
        Ok(result)
    }

    fn build_uncached(&self, request: &BuildRequest) -> Result<BuiltTransaction, CoreError> {
        let inputs = check_inputs(&request.inputs)?;
        let outputs = check_outputs(&request.outputs, request.network)?;
        let fee_rate = match request.fee_rate {
            Some(rate) if !(rate.is_finite() && rate > 0.0) => {
                return Err(CoreError::InvalidInput(format!(
                    "fee_rate must be a positive number, got {rate}"
                )));
            }
            Some(rate) => rate,
            None => self.config.default_fee_rate,
        };

        let output_total = outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
            .ok_or_else(|| CoreError::InvalidOutput("output values overflow".to_owned()))?;
        let mut input_total = Some(0u64);
        for value in inputs.iter().map(|i| i.value) {
            input_total = match (input_total, value) {
                (Some(acc), Some(v)) => Some(
                    acc.checked_add(v)
                        .ok_or_else(|| CoreError::InvalidInput("input values overflow".to_owned()))?,
                ),
                _ => None,
            };
        }
        let estimated_size = estimate_size(inputs.len(), outputs.iter().map(|o| o.script_pubkey.len()));

        let (fee, fee_estimated) = match input_total {
            Some(total) if output_total > total => {
                return Err(CoreError::InsufficientFunds {
                    inputs: total,
                    outputs: output_total,
                });
            }
            Some(total) => (total - output_total, false),
            None => ((estimated_size as f64 * fee_rate).ceil() as u64, true),
        };

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs
                .iter()
                .map(|i| TxIn {
                    previous_output: i.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: i.sequence,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs
                .into_iter()
                .map(|o| TxOut {
                    value: Amount::from_sat(o.value),
                    script_pubkey: o.script_pubkey,
                })
                .collect(),
        };

        let built = BuiltTransaction {
            raw_hex: bitcoin::consensus::encode::serialize_hex(&tx),
            txid: tx.compute_txid().to_string(),
            fee,
            fee_estimated,
            input_total,
            output_total,
            estimated_size,
        };
        debug!(txid = %built.txid, fee, fee_estimated, "built transaction");
        Ok(built)
    }
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new(BuilderConfig::default())
    }
}

fn check_inputs(specs: &[TxInputSpec]) -> Result<Vec<CheckedInput>, CoreError> {
    if specs.is_empty() {
        return Err(CoreError::InvalidInput("at least one input is required".to_owned()));
    }
    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let txid = spec
                .txid
                .as_deref()
                .ok_or_else(|| CoreError::InvalidInput(format!("input {i}: missing txid")))?;
            if !is_txid_hex(txid) {
                return Err(CoreError::InvalidInput(format!(
                    "input {i}: txid must be 64 hex characters"
                )));
            }
            let txid = Txid::from_str(txid)
                .map_err(|e| CoreError::InvalidInput(format!("input {i}: {e}")))?;
            let vout = spec
                .vout
                .ok_or_else(|| CoreError::InvalidInput(format!("input {i}: missing vout")))?;
            match spec.value {
                Some(0) => {
                    return Err(CoreError::InvalidInput(format!("input {i}: value must be positive")));
                }
                Some(v) if v > Amount::MAX_MONEY.to_sat() => {
                    return Err(CoreError::InvalidInput(format!(
                        "input {i}: value {v} exceeds the 21M BTC supply"
                    )));
                }
                _ => {}
            }
            Ok(CheckedInput {
                outpoint: OutPoint { txid, vout },
                value: spec.value,
                sequence: spec
                    .sequence
                    .map(Sequence)
                    .unwrap_or(Sequence::ENABLE_RBF_NO_LOCKTIME),
            })
        })
        .collect()
}

fn check_outputs(specs: &[TxOutputSpec], network: Network) -> Result<Vec<CheckedOutput>, CoreError> {
    if specs.is_empty() {
        return Err(CoreError::InvalidOutput("at least one output is required".to_owned()));
    }
    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let address = spec
                .address
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .ok_or_else(|| CoreError::InvalidOutput(format!("output {i}: missing address")))?;
            let value = spec
                .value
                .filter(|v| *v > 0)
                .ok_or_else(|| CoreError::InvalidOutput(format!("output {i}: value must be positive")))?;
            if value > Amount::MAX_MONEY.to_sat() {
                return Err(CoreError::InvalidOutput(format!(
                    "output {i}: value {value} exceeds the 21M BTC supply"
                )));
            }
            let address = Address::from_str(address)
                .map_err(|e| CoreError::InvalidOutput(format!("output {i}: {e}")))?
                .require_network(network.to_bitcoin())
                .map_err(|_| {
                    CoreError::InvalidOutput(format!("output {i}: address is not valid on {network}"))
                })?;
            Ok(CheckedOutput {
                script_pubkey: address.script_pubkey(),
                value,
            })
        })
        .collect()
}

/// Signed size estimate for `inputs` P2PKH-style inputs and outputs with
/// the given scriptPubKey lengths.
pub fn estimate_size(inputs: usize, output_script_lens: impl Iterator<Item = usize>) -> usize {
    let input_size = 36 + varint_len(EST_SCRIPT_SIG_LEN as u64) + EST_SCRIPT_SIG_LEN + 4;
    let mut outputs = 0usize;
    let mut size = 0usize;
    for len in output_script_lens {
        outputs += 1;
        size += 8 + varint_len(len as u64) + len;
    }
    4 + varint_len(inputs as u64) + inputs * input_size + varint_len(outputs as u64) + size + 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    const TESTNET_ADDR: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";
    const MAINNET_ADDR: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

    fn input(value: Option<u64>) -> TxInputSpec {
        TxInputSpec {
            txid: Some("aa".repeat(32)),
            vout: Some(0),
            value,
            sequence: None,
        }
    }

    fn output(value: u64) -> TxOutputSpec {
        TxOutputSpec {
            address: Some(TESTNET_ADDR.to_owned()),
            value: Some(value),
        }
    }

    fn request(inputs: Vec<TxInputSpec>, outputs: Vec<TxOutputSpec>) -> BuildRequest {
        BuildRequest {
            inputs,
            outputs,
            fee_rate: Some(2.0),
            network: Network::Testnet,
        }
    }

    #[test]
    fn known_values_give_exact_residual_fee() {
        let built = TransactionBuilder::default()
            .build(&request(vec![input(Some(5_000_000))], vec![output(4_990_000)]))
            .unwrap();
        assert_eq!(built.fee, 10_000);
        assert!(!built.fee_estimated);

        let report = codec::validate(&built.raw_hex);
        assert!(report.valid, "{report:?}");
        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.input_count, 1);
        assert_eq!(metrics.output_count, 1);
        assert_eq!(metrics.txid, built.txid);
    }

    #[test]
    fn fee_is_residual_for_any_covered_amount() {
        let builder = TransactionBuilder::default();
        for (inp, out) in [(1_000u64, 1_000u64), (10_000, 1), (u64::from(u32::MAX), 546)] {
            let built = builder
                .build(&request(vec![input(Some(inp))], vec![output(out)]))
                .unwrap();
            assert_eq!(built.fee, inp - out);
        }
    }

    #[test]
    fn values_above_supply_are_rejected_not_summed() {
        let builder = TransactionBuilder::default();
        let result = builder.build(&request(vec![input(Some(u64::MAX)), input(Some(10))], vec![output(5)]));
        assert!(matches!(result, Err(CoreError::InvalidInput(ref m)) if m.contains("input 0")));

        let result = builder.build(&request(vec![input(Some(10))], vec![output(u64::MAX)]));
        assert!(matches!(result, Err(CoreError::InvalidOutput(_))));

        let max = Amount::MAX_MONEY.to_sat();
        let built = builder
            .build(&request(vec![input(Some(max))], vec![output(max - 1_000)]))
            .unwrap();
        assert_eq!(built.fee, 1_000);
        assert_eq!(built.input_total, Some(max));
    }

    #[test]
    fn outputs_above_inputs_is_insufficient_funds() {
        let err = TransactionBuilder::default()
            .build(&request(vec![input(Some(1_000))], vec![output(600), output(401)]))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::InsufficientFunds {
                inputs: 1_000,
                outputs: 1_001
            }
        ));
    }

    #[test]
    fn unknown_values_estimate_from_size() {
        let built = TransactionBuilder::default()
            .build(&request(vec![input(None)], vec![output(10_000)]))
            .unwrap();
        // 4 + 1 + 148 + 1 + (8 + 1 + 22) + 4
        assert_eq!(built.estimated_size, 189);
        assert_eq!(built.fee, 378);
        assert!(built.fee_estimated);
        assert_eq!(built.input_total, None);
    }

    #[test]
    fn missing_fields_are_rejected() {
        let b = TransactionBuilder::default();

        let mut no_txid = input(Some(1));
        no_txid.txid = None;
        assert!(matches!(
            b.build(&request(vec![no_txid], vec![output(1)])),
            Err(CoreError::InvalidInput(_))
        ));

        let mut no_vout = input(Some(1));
        no_vout.vout = None;
        assert!(matches!(
            b.build(&request(vec![no_vout], vec![output(1)])),
            Err(CoreError::InvalidInput(_))
        ));

        let no_address = TxOutputSpec {
            address: None,
            value: Some(1),
        };
        assert!(matches!(
            b.build(&request(vec![input(Some(5))], vec![no_address])),
            Err(CoreError::InvalidOutput(_))
        ));

        assert!(matches!(
            b.build(&request(vec![input(Some(5))], vec![output(0)])),
            Err(CoreError::InvalidOutput(_))
        ));
        assert!(matches!(
            b.build(&request(vec![], vec![output(1)])),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            b.build(&request(vec![input(Some(5))], vec![])),
            Err(CoreError::InvalidOutput(_))
        ));
    }

    #[test]
    fn address_must_match_network() {
        let wrong = TxOutputSpec {
            address: Some(MAINNET_ADDR.to_owned()),
            value: Some(1),
        };
        let err = TransactionBuilder::default()
            .build(&request(vec![input(Some(5))], vec![wrong]))
            .unwrap_err();
        assert!(err.to_string().contains("testnet"), "{err}");
    }

    #[test]
    fn identical_requests_share_a_cached_result() {
        let builder = TransactionBuilder::default();
        let req = request(vec![input(Some(5_000))], vec![output(4_000)]);
        let first = builder.build(&req).unwrap();
        let second = builder.build(&req).unwrap();
        assert_eq!(first, second);
        assert_eq!(builder.cached_results(), 1);

        builder
            .build(&request(vec![input(Some(5_000))], vec![output(3_000)]))
            .unwrap();
        assert_eq!(builder.cached_results(), 2);
    }

    #[test]
    fn request_accepts_camel_case_fee_rate() {
        let req: BuildRequest = serde_json::from_value(serde_json::json!({
            "inputs": [{"txid": "aa".repeat(32), "vout": 0, "value": 5_000_000}],
            "outputs": [{"address": TESTNET_ADDR, "value": 4_990_000}],
            "feeRate": 2.0,
            "network": "testnet"
        }))
        .unwrap();
        assert_eq!(req.fee_rate, Some(2.0));
    }
}
