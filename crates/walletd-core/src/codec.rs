//! Raw transaction decoding and structural validation.
//!
//! Walks the Bitcoin wire format byte by byte (version, optional SegWit
//! marker/flag, inputs, outputs, witness section, locktime) without
//! evaluating scripts, signatures, or amounts. The goal is to reject
//! malformed or truncated hex before it is handed to a broadcast service,
//! with an error precise enough to debug from the response alone.

use bitcoin::hashes::{sha256d, Hash};
use bitcoin::hex::DisplayHex;
use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::is_txid_hex;

/// Shortest hex string worth attempting to parse.
pub const MIN_TX_HEX_LEN: usize = 20;

/// Bytes shown on either side of a decode failure.
const CONTEXT_RADIUS: usize = 8;

// ==============================================================================
// VarInt
// ==============================================================================

/// Decode a Bitcoin VarInt (CompactSize) at `pos`.
///
/// Returns `(value, width)` or `None` if the encoding runs past the end of
/// the buffer.
pub fn read_varint(bytes: &[u8], pos: usize) -> Option<(u64, usize)> {
    let first = *bytes.get(pos)?;
    let width = match first {
        0xfd => 3,
        0xfe => 5,
        0xff => 9,
        n => return Some((u64::from(n), 1)),
    };
    let payload = bytes.get(pos + 1..pos + width)?;
    let mut buf = [0u8; 8];
    buf[..payload.len()].copy_from_slice(payload);
    Some((u64::from_le_bytes(buf), width))
}

pub fn varint_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

pub fn encode_varint(n: u64) -> Vec<u8> {
    let le = n.to_le_bytes();
    match varint_len(n) {
        1 => vec![n as u8],
        3 => [&[0xfd][..], &le[..2]].concat(),
        5 => [&[0xfe][..], &le[..4]].concat(),
        _ => [&[0xff][..], &le[..]].concat(),
    }
}

// ==============================================================================
// Errors
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorKind {
    InvalidHex,
    TooShort,
    Truncated,
    MalformedVarint,
    NoInputs,
    NoOutputs,
    TxidUnavailable,
}

impl DecodeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidHex => "invalid_hex",
            Self::TooShort => "too_short",
            Self::Truncated => "truncated",
            Self::MalformedVarint => "malformed_varint",
            Self::NoInputs => "no_inputs",
            Self::NoOutputs => "no_outputs",
            Self::TxidUnavailable => "txid_unavailable",
        }
    }
}

impl std::fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}{}", self.location())]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub message: String,
    /// Byte offset (or hex character offset for `InvalidHex`).
    pub offset: Option<usize>,
    /// Hex of the bytes around `offset`, with the failing byte bracketed.
    pub context: Option<String>,
}

impl DecodeError {
    fn new(kind: DecodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            offset: None,
            context: None,
        }
    }

    fn at(kind: DecodeErrorKind, message: impl Into<String>, bytes: &[u8], offset: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            offset: Some(offset),
            context: Some(byte_context(bytes, offset)),
        }
    }

    fn location(&self) -> String {
        match (&self.offset, &self.context) {
            (Some(offset), Some(context)) => format!(" at offset {offset} near {context}"),
            (Some(offset), None) => format!(" at offset {offset}"),
            _ => String::new(),
        }
    }
}

fn byte_context(bytes: &[u8], offset: usize) -> String {
    let start = offset.saturating_sub(CONTEXT_RADIUS).min(bytes.len());
    let end = offset.saturating_add(CONTEXT_RADIUS).min(bytes.len());
    let split = offset.min(bytes.len());
    let before = bytes[start..split].to_lower_hex_string();
    let (at, after) = match bytes.get(split) {
        Some(b) => (
            format!("[{b:02x}]"),
            bytes[(split + 1).min(end)..end].to_lower_hex_string(),
        ),
        None => ("[<end>]".to_owned(), String::new()),
    };
    format!("{before}{at}{after}")
}

// ==============================================================================
// Decoded Shapes
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInput {
    /// Previous txid in display (reversed) byte order.
    pub prev_txid: String,
    pub prev_vout: u32,
    pub script_sig: String,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedOutput {
    pub value: u64,
    pub script_pub_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedTransaction {
    pub version: i32,
    pub is_segwit: bool,
    pub inputs: Vec<DecodedInput>,
    pub outputs: Vec<DecodedOutput>,
    pub locktime: u32,
    pub txid: String,
    pub size: usize,
    /// Approximated as `size`; witness discounting is not applied.
    pub vsize: usize,
    /// Approximated as `size * 4`.
    pub weight: usize,
    /// Bytes left over after the locktime.
    pub trailing_bytes: usize,
}

// ==============================================================================
// Cursor
// ==============================================================================

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn peek(&self, n: usize) -> Option<&'a [u8]> {
        self.bytes.get(self.pos..self.pos.checked_add(n)?)
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::at(
                DecodeErrorKind::Truncated,
                format!(
                    "{what} needs {len} bytes but only {} remain",
                    self.remaining()
                ),
                self.bytes,
                self.pos,
            ));
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes[start..self.pos])
    }

    fn u32_le(&mut self, what: &str) -> Result<u32, DecodeError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64_le(&mut self, what: &str) -> Result<u64, DecodeError> {
        let b = self.take(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn varint(&mut self, what: &str) -> Result<u64, DecodeError> {
        let (value, width) = read_varint(self.bytes, self.pos).ok_or_else(|| {
            DecodeError::at(
                DecodeErrorKind::MalformedVarint,
                format!("{what} varint runs past end of data"),
                self.bytes,
                self.pos,
            )
        })?;
        self.pos += width;
        Ok(value)
    }

    /// Read a VarInt length and take that many bytes.
    fn var_bytes(&mut self, what: &str) -> Result<&'a [u8], DecodeError> {
        let start = self.pos;
        let len = self.varint(&format!("{what} length"))?;
        let len = usize::try_from(len)
            .ok()
            .filter(|&l| l <= self.remaining())
            .ok_or_else(|| {
                DecodeError::at(
                    DecodeErrorKind::Truncated,
                    format!(
                        "{what} declares {len} bytes but only {} remain",
                        self.remaining()
                    ),
                    self.bytes,
                    start,
                )
            })?;
        self.take(len, what)
    }
}

// ==============================================================================
// Decoding
// ==============================================================================

/// Decode hex into bytes, reporting the first offending character.
pub fn decode_hex(hex: &str) -> Result<Vec<u8>, DecodeError> {
    let hex = hex.trim();
    if let Some(pos) = hex.bytes().position(|b| !b.is_ascii_hexdigit()) {
        let ch = hex[pos..].chars().next().unwrap_or('?');
        let start = pos.saturating_sub(CONTEXT_RADIUS);
        let end = (pos + CONTEXT_RADIUS).min(hex.len());
        return Err(DecodeError {
            kind: DecodeErrorKind::InvalidHex,
            message: format!("non-hex character {ch:?}"),
            offset: Some(pos),
            context: hex.get(start..end).map(str::to_owned),
        });
    }
    if hex.len() % 2 != 0 {
        return Err(DecodeError::new(
            DecodeErrorKind::InvalidHex,
            format!("odd number of hex characters ({})", hex.len()),
        ));
    }
    if hex.len() < MIN_TX_HEX_LEN {
        return Err(DecodeError::new(
            DecodeErrorKind::TooShort,
            format!(
                "transaction too short: {} hex characters (minimum {MIN_TX_HEX_LEN})",
                hex.len()
            ),
        ));
    }

    Ok(hex
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| (nibble(pair[0]) << 4) | nibble(pair[1]))
        .collect())
}

fn nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        _ => c - b'A' + 10,
    }
}

pub fn decode_transaction(hex: &str) -> Result<DecodedTransaction, DecodeError> {
    let bytes = decode_hex(hex)?;
    decode_bytes(&bytes)
}

pub fn decode_bytes(bytes: &[u8]) -> Result<DecodedTransaction, DecodeError> {
    let mut cur = Cursor::new(bytes);

    let version = cur.u32_le("version")? as i32;

    let is_segwit = matches!(cur.peek(2), Some([0x00, 0x01 | 0x02]));
    if is_segwit {
        cur.pos += 2;
    }
    let body_start = cur.pos;

    let input_count = cur.varint("input count")?;
    if input_count == 0 {
        return Err(DecodeError::at(
            DecodeErrorKind::NoInputs,
            "no inputs: not a standard transaction",
            bytes,
            body_start,
        ));
    }
    let mut inputs = Vec::new();
    for i in 0..input_count {
        let outpoint = cur.take(36, &format!("input {i} outpoint"))?;
        let mut prev_hash = outpoint[..32].to_vec();
        prev_hash.reverse();
        let prev_vout = u32::from_le_bytes([outpoint[32], outpoint[33], outpoint[34], outpoint[35]]);
        let script_sig = cur.var_bytes(&format!("input {i} scriptSig"))?;
        let sequence = cur.u32_le(&format!("input {i} sequence"))?;
        inputs.push(DecodedInput {
            prev_txid: prev_hash.to_lower_hex_string(),
            prev_vout,
            script_sig: script_sig.to_lower_hex_string(),
            sequence,
        });
    }

    let outputs_start = cur.pos;
    let output_count = cur.varint("output count")?;
    if output_count == 0 {
        return Err(DecodeError::at(
            DecodeErrorKind::NoOutputs,
            "no outputs",
            bytes,
            outputs_start,
        ));
    }
    let mut outputs = Vec::new();
    for i in 0..output_count {
        let value = cur.u64_le(&format!("output {i} value"))?;
        let script = cur.var_bytes(&format!("output {i} scriptPubKey"))?;
        outputs.push(DecodedOutput {
            value,
            script_pub_key: script.to_lower_hex_string(),
        });
    }
    let body_end = cur.pos;

    if is_segwit {
        // Step over each input's witness stack so the locktime is read from
        // the right place. Items are not interpreted.
        for i in 0..inputs.len() {
            let items = cur.varint(&format!("input {i} witness item count"))?;
            for j in 0..items {
                cur.var_bytes(&format!("input {i} witness item {j}"))?;
            }
        }
    }

    let locktime_start = cur.pos;
    let locktime = cur.u32_le("locktime")?;

    let trailing_bytes = cur.remaining();
    if trailing_bytes > 0 {
        warn!(
            trailing_bytes,
            offset = cur.pos,
            "transaction has data after locktime"
        );
    }

    let txid = compute_txid(
        bytes,
        body_start..body_end,
        locktime_start..locktime_start + 4,
    );
    if !is_txid_hex(&txid) {
        return Err(DecodeError::new(
            DecodeErrorKind::TxidUnavailable,
            format!("computed txid is not 64 hex characters: {txid}"),
        ));
    }

    let size = bytes.len();
    Ok(DecodedTransaction {
        version,
        is_segwit,
        inputs,
        outputs,
        locktime,
        txid,
        size,
        vsize: size,
        weight: size * 4,
        trailing_bytes,
    })
}

/// Double-SHA256 over version, body (inputs and outputs), and locktime,
/// i.e. the non-witness serialization, in display byte order.
fn compute_txid(
    bytes: &[u8],
    body: std::ops::Range<usize>,
    locktime: std::ops::Range<usize>,
) -> String {
    let mut engine = sha256d::Hash::engine();
    bitcoin::hashes::HashEngine::input(&mut engine, &bytes[..4]);
    bitcoin::hashes::HashEngine::input(&mut engine, &bytes[body]);
    bitcoin::hashes::HashEngine::input(&mut engine, &bytes[locktime]);
    Txid::from_raw_hash(sha256d::Hash::from_engine(engine)).to_string()
}

// ==============================================================================
// Validation Report
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMetrics {
    pub version: i32,
    pub txid: String,
    pub is_segwit: bool,
    pub input_count: usize,
    pub output_count: usize,
    pub locktime: u32,
    pub size: usize,
    pub vsize: usize,
    pub weight: usize,
}

impl From<&DecodedTransaction> for TxMetrics {
    fn from(tx: &DecodedTransaction) -> Self {
        Self {
            version: tx.version,
            txid: tx.txid.clone(),
            is_segwit: tx.is_segwit,
            input_count: tx.inputs.len(),
            output_count: tx.outputs.len(),
            locktime: tx.locktime,
            size: tx.size,
            vsize: tx.vsize,
            weight: tx.weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<DecodeErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(flatten)]
    pub metrics: Option<TxMetrics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Validate raw transaction hex. Never panics; every failure is reported as
/// `valid = false` with a reason.
pub fn validate(hex: &str) -> ValidationReport {
    match decode_transaction(hex) {
        Ok(tx) => {
            let mut warnings = Vec::new();
            if tx.trailing_bytes > 0 {
                warnings.push(format!(
                    "{} unexpected bytes after locktime",
                    tx.trailing_bytes
                ));
            }
            ValidationReport {
                valid: true,
                reason: None,
                error_kind: None,
                offset: None,
                context: None,
                metrics: Some(TxMetrics::from(&tx)),
                warnings,
            }
        }
        Err(err) => ValidationReport {
            valid: false,
            reason: Some(err.to_string()),
            error_kind: Some(err.kind),
            offset: err.offset,
            context: err.context,
            metrics: None,
            warnings: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{legacy_tx_hex, segwit_tx_hex, GENESIS_COINBASE_HEX, GENESIS_COINBASE_TXID};

    #[test]
    fn varint_round_trip_widths() {
        let cases = [
            (0u64, 1usize),
            (1, 1),
            (252, 1),
            (253, 3),
            (65_535, 3),
            (65_536, 5),
            (4_294_967_295, 5),
            (4_294_967_296, 9),
        ];
        for (n, width) in cases {
            let encoded = encode_varint(n);
            assert_eq!(encoded.len(), width, "width for {n}");
            assert_eq!(read_varint(&encoded, 0), Some((n, width)), "decode {n}");
        }
    }

    #[test]
    fn varint_truncation_is_none() {
        assert_eq!(read_varint(&[], 0), None);
        assert_eq!(read_varint(&[0xfd, 0x01], 0), None);
        assert_eq!(read_varint(&[0xfe, 0, 0, 0], 0), None);
        assert_eq!(read_varint(&[0xff, 0, 0, 0, 0, 0, 0, 0], 0), None);
    }

    #[test]
    fn decodes_genesis_coinbase() {
        let tx = decode_transaction(GENESIS_COINBASE_HEX).unwrap();
        assert_eq!(tx.txid, GENESIS_COINBASE_TXID);
        assert_eq!(tx.version, 1);
        assert!(!tx.is_segwit);
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.inputs[0].prev_txid, "00".repeat(32));
        assert_eq!(tx.inputs[0].prev_vout, u32::MAX);
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, 5_000_000_000);
        assert_eq!(tx.locktime, 0);
        assert_eq!(tx.size, GENESIS_COINBASE_HEX.len() / 2);
        assert_eq!(tx.vsize, tx.size);
        assert_eq!(tx.weight, tx.size * 4);
    }

    #[test]
    fn txid_is_deterministic_lowercase() {
        let hex = legacy_tx_hex();
        let a = decode_transaction(&hex).unwrap().txid;
        let b = decode_transaction(&hex.to_uppercase()).unwrap().txid;
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.bytes().all(|c| c.is_ascii_digit() || (b'a'..=b'f').contains(&c)));
    }

    #[test]
    fn every_prefix_truncation_is_invalid() {
        for hex in [legacy_tx_hex(), segwit_tx_hex(), GENESIS_COINBASE_HEX.to_owned()] {
            for cut in (0..hex.len()).step_by(2) {
                let report = validate(&hex[..cut]);
                assert!(!report.valid, "prefix of {cut} hex chars must be invalid");
                assert!(
                    report.reason.as_deref().is_some_and(|r| !r.is_empty()),
                    "prefix of {cut} hex chars needs a reason"
                );
            }
            assert!(validate(&hex).valid);
        }
    }

    #[test]
    fn segwit_txid_excludes_witness() {
        let tx = decode_transaction(&segwit_tx_hex()).unwrap();
        assert!(tx.is_segwit);
        assert_eq!(tx.locktime, 0x11);
        assert_eq!(tx.trailing_bytes, 0);

        // Same transaction without marker, flag, and witness.
        let legacy = decode_transaction(&legacy_tx_hex()).unwrap();
        assert_eq!(tx.txid, legacy.txid);
    }

    #[test]
    fn rejects_bad_hex() {
        let err = decode_transaction("0100zz00000000000000").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidHex);
        assert_eq!(err.offset, Some(4));

        let err = decode_transaction("010").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidHex);

        let err = decode_transaction("0100000000").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TooShort);
    }

    #[test]
    fn rejects_zero_inputs() {
        // version, input count 0, then filler.
        let hex = format!("02000000{}", "00ff".repeat(8));
        let err = decode_transaction(&hex).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::NoInputs);
        assert_eq!(err.offset, Some(4));
    }

    #[test]
    fn rejects_zero_outputs() {
        let hex = legacy_tx_hex();
        let tx = decode_transaction(&hex).unwrap();
        // Replace output count and outputs with a single zero byte + locktime.
        let input_end_hex = (4 + 1 + 36 + 1 + 4) * 2;
        assert_eq!(tx.inputs[0].script_sig, "");
        let broken = format!("{}00{}", &hex[..input_end_hex], "00000000");
        let err = decode_transaction(&broken).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::NoOutputs);
    }

    #[test]
    fn oversized_script_length_is_truncation_with_context() {
        let hex = legacy_tx_hex();
        // Input script length byte sits right after version + count + outpoint.
        let idx = (4 + 1 + 36) * 2;
        let broken = format!("{}fd{}", &hex[..idx], &hex[idx + 2..]);
        let report = validate(&broken);
        assert!(!report.valid);
        assert_eq!(report.error_kind, Some(DecodeErrorKind::Truncated));
        assert_eq!(report.offset, Some(41));
        assert!(report.context.as_deref().is_some_and(|c| c.contains("[fd]")));
    }

    #[test]
    fn trailing_bytes_warn_but_stay_valid() {
        let hex = format!("{}dead", legacy_tx_hex());
        let report = validate(&hex);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
        let clean = validate(&legacy_tx_hex());
        assert_eq!(
            report.metrics.as_ref().map(|m| &m.txid),
            clean.metrics.as_ref().map(|m| &m.txid)
        );
    }

    #[test]
    fn report_serializes_flat_metrics() {
        let json = serde_json::to_value(validate(&legacy_tx_hex())).unwrap();
        assert_eq!(json["valid"], true);
        assert_eq!(json["input_count"], 1);
        assert_eq!(json["output_count"], 1);
        assert!(json.get("reason").is_none());
    }
}
