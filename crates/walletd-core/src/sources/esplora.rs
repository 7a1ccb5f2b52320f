//! Esplora-schema parsers (mempool.space and blockstream.info).

use serde_json::Value;

use crate::types::{BalanceObservation, Utxo};

use super::{as_int, confirmations_at, require_int, require_non_negative, StatusObservation};

pub(super) fn parse_balance(raw: &Value, _address: &str) -> Result<BalanceObservation, String> {
    let net = |stats: &str| -> Result<i64, String> {
        let stats = raw
            .get(stats)
            .ok_or_else(|| format!("missing `{stats}`"))?;
        let funded = require_int(stats.get("funded_txo_sum"), "funded_txo_sum")?;
        let spent = require_int(stats.get("spent_txo_sum"), "spent_txo_sum")?;
        funded
            .checked_sub(spent)
            .ok_or_else(|| format!("`{stats}` sums out of range"))
    };

    Ok(BalanceObservation {
        confirmed: net("chain_stats")?,
        unconfirmed: net("mempool_stats")?,
    })
}

pub(super) fn parse_utxos(raw: &Value, address: &str) -> Result<Vec<Utxo>, String> {
    let items = raw.as_array().ok_or("expected a JSON array of outputs")?;
    items
        .iter()
        .map(|item| -> Result<Utxo, String> {
            let txid = item
                .get("txid")
                .and_then(Value::as_str)
                .ok_or("utxo missing `txid`")?;
            let vout = require_non_negative(item.get("vout"), "vout")?;
            let confirmed = item
                .pointer("/status/confirmed")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(Utxo {
                txid: txid.to_owned(),
                vout: u32::try_from(vout).map_err(|_| format!("vout out of range: {vout}"))?,
                value: require_non_negative(item.get("value"), "value")?,
                script_pub_key: item
                    .get("scriptpubkey")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                // Esplora's utxo listing carries no depth, only a flag.
                confirmations: u64::from(confirmed),
                address: address.to_owned(),
            })
        })
        .collect()
}

pub(super) fn parse_status(raw: &Value, tip: Option<u64>) -> Result<StatusObservation, String> {
    let status = raw.get("status").ok_or("missing `status`")?;
    let confirmed = status
        .get("confirmed")
        .and_then(Value::as_bool)
        .ok_or("missing `status.confirmed`")?;

    if !confirmed {
        return Ok(StatusObservation {
            confirmations: 0,
            block_height: None,
            block_hash: None,
            timestamp: None,
        });
    }

    let block_height = as_int(status.get("block_height")).and_then(|h| u64::try_from(h).ok());
    let confirmations = match (tip, block_height) {
        (Some(tip), Some(height)) => confirmations_at(tip, height).max(1),
        _ => 1,
    };

    Ok(StatusObservation {
        confirmations,
        block_height,
        block_hash: status
            .get("block_hash")
            .and_then(Value::as_str)
            .map(str::to_owned),
        timestamp: as_int(status.get("block_time")).and_then(|t| u64::try_from(t).ok()),
    })
}
