//! Blockchair dashboard parsers.
//!
//! Dashboards wrap results as `{"data": {"<id>": {...}}, "context": {...}}`
//! and report the chain tip as `context.state`, which lets confirmation
//! counts be derived from `block_id` without a second request.

use serde_json::Value;

use crate::types::{BalanceObservation, Utxo};

use super::{
    as_int, confirmations_at, parse_utc_timestamp, require_int, require_non_negative,
    StatusObservation,
};

/// Entry for `id` under `data`, falling back to the only entry present
/// (Blockchair normalizes address case in keys).
fn dashboard_entry<'a>(raw: &'a Value, id: &str) -> Result<&'a Value, String> {
    let data = raw
        .get("data")
        .and_then(Value::as_object)
        .ok_or("missing `data` object")?;
    data.get(id)
        .or_else(|| if data.len() == 1 { data.values().next() } else { None })
        .ok_or_else(|| format!("no dashboard entry for {id}"))
}

fn chain_tip(raw: &Value) -> Option<u64> {
    as_int(raw.pointer("/context/state")).and_then(|s| u64::try_from(s).ok())
}

pub(super) fn parse_balance(raw: &Value, address: &str) -> Result<BalanceObservation, String> {
    let entry = dashboard_entry(raw, address)?;
    let total = require_int(entry.pointer("/address/balance"), "address.balance")?;

    // Blockchair folds mempool outputs into `balance`; split them back out
    // using the utxo listing (block_id = -1 for mempool).
    let unconfirmed = entry
        .get("utxo")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|u| as_int(u.get("block_id")).unwrap_or(-1) <= 0)
        .filter_map(|u| as_int(u.get("value")))
        .try_fold(0i64, i64::checked_add)
        .ok_or("mempool utxo values overflow")?;

    Ok(BalanceObservation {
        confirmed: total
            .checked_sub(unconfirmed)
            .ok_or("balance out of range")?,
        unconfirmed,
    })
}

pub(super) fn parse_utxos(raw: &Value, address: &str) -> Result<Vec<Utxo>, String> {
    let entry = dashboard_entry(raw, address)?;
    let tip = chain_tip(raw);
    let Some(items) = entry.get("utxo").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    items
        .iter()
        .map(|u| -> Result<Utxo, String> {
            let txid = u
                .get("transaction_hash")
                .and_then(Value::as_str)
                .ok_or("utxo missing `transaction_hash`")?;
            let vout = require_non_negative(u.get("index"), "index")?;
            let block_id = as_int(u.get("block_id")).unwrap_or(-1);
            let confirmations = match (tip, u64::try_from(block_id)) {
                (Some(tip), Ok(height)) => confirmations_at(tip, height),
                (None, Ok(height)) if height > 0 => 1,
                _ => 0,
            };
            Ok(Utxo {
                txid: txid.to_owned(),
                vout: u32::try_from(vout).map_err(|_| format!("vout out of range: {vout}"))?,
                value: require_non_negative(u.get("value"), "value")?,
                script_pub_key: String::new(),
                confirmations,
                address: address.to_owned(),
            })
        })
        .collect()
}

pub(super) fn parse_status(raw: &Value, _tip: Option<u64>) -> Result<StatusObservation, String> {
    let data = raw
        .get("data")
        .and_then(Value::as_object)
        .ok_or("missing `data` object")?;
    let tx = data
        .values()
        .next()
        .and_then(|entry| entry.get("transaction"))
        .ok_or("transaction not found")?;

    let block_height = as_int(tx.get("block_id")).and_then(|h| u64::try_from(h).ok());
    let confirmations = match (chain_tip(raw), block_height) {
        (Some(tip), Some(height)) => confirmations_at(tip, height),
        (None, Some(height)) if height > 0 => 1,
        _ => 0,
    };

    Ok(StatusObservation {
        confirmations,
        block_height: block_height.filter(|_| confirmations > 0),
        block_hash: None,
        timestamp: tx
            .get("time")
            .and_then(Value::as_str)
            .and_then(parse_utc_timestamp)
            .filter(|_| confirmations > 0),
    })
}
