//! BlockCypher parsers.

use serde_json::Value;

use crate::types::{BalanceObservation, Utxo};

use super::{as_int, parse_utc_timestamp, require_int, require_non_negative, StatusObservation};

pub(super) fn parse_balance(raw: &Value, _address: &str) -> Result<BalanceObservation, String> {
    Ok(BalanceObservation {
        confirmed: require_int(raw.get("balance"), "balance")?,
        unconfirmed: as_int(raw.get("unconfirmed_balance")).unwrap_or(0),
    })
}

pub(super) fn parse_utxos(raw: &Value, address: &str) -> Result<Vec<Utxo>, String> {
    if !raw.is_object() {
        return Err("expected a JSON object".to_owned());
    }
    let confirmed = raw.get("txrefs").and_then(Value::as_array);
    let unconfirmed = raw.get("unconfirmed_txrefs").and_then(Value::as_array);

    confirmed
        .into_iter()
        .chain(unconfirmed)
        .flatten()
        // Spent refs only appear when unspentOnly is ignored upstream.
        .filter(|r| !r.get("spent").and_then(Value::as_bool).unwrap_or(false))
        .map(|r| -> Result<Utxo, String> {
            let txid = r
                .get("tx_hash")
                .and_then(Value::as_str)
                .ok_or("txref missing `tx_hash`")?;
            let vout = require_non_negative(r.get("tx_output_n"), "tx_output_n")?;
            Ok(Utxo {
                txid: txid.to_owned(),
                vout: u32::try_from(vout).map_err(|_| format!("vout out of range: {vout}"))?,
                value: require_non_negative(r.get("value"), "value")?,
                script_pub_key: r
                    .get("script")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                confirmations: as_int(r.get("confirmations"))
                    .and_then(|c| u64::try_from(c).ok())
                    .unwrap_or(0),
                address: address.to_owned(),
            })
        })
        .collect()
}

pub(super) fn parse_status(raw: &Value, _tip: Option<u64>) -> Result<StatusObservation, String> {
    if raw.get("hash").is_none() {
        return Err("response is not a transaction".to_owned());
    }
    let confirmations = as_int(raw.get("confirmations"))
        .and_then(|c| u64::try_from(c).ok())
        .unwrap_or(0);
    // Unconfirmed transactions report block_height = -1.
    let block_height = as_int(raw.get("block_height")).and_then(|h| u64::try_from(h).ok());

    Ok(StatusObservation {
        confirmations,
        block_height: block_height.filter(|_| confirmations > 0),
        block_hash: raw
            .get("block_hash")
            .and_then(Value::as_str)
            .map(str::to_owned),
        timestamp: raw
            .get("confirmed")
            .and_then(Value::as_str)
            .and_then(parse_utc_timestamp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn balance_fields() {
        let obs = parse_balance(
            &json!({"balance": 42_000, "unconfirmed_balance": -1_000, "final_balance": 41_000}),
            "x",
        )
        .unwrap();
        assert_eq!(obs.confirmed, 42_000);
        assert_eq!(obs.unconfirmed, -1_000);
    }

    #[test]
    fn utxos_merge_confirmed_and_mempool_refs() {
        let raw = json!({
            "txrefs": [
                {"tx_hash": "aa", "tx_output_n": 0, "value": 10_000, "confirmations": 12, "script": "0014ab"},
                {"tx_hash": "cc", "tx_output_n": 2, "value": 99, "confirmations": 3, "spent": true}
            ],
            "unconfirmed_txrefs": [
                {"tx_hash": "bb", "tx_output_n": 1, "value": 2_000, "confirmations": 0}
            ]
        });
        let utxos = parse_utxos(&raw, "addr").unwrap();
        assert_eq!(utxos.len(), 2);
        assert_eq!(utxos[0].script_pub_key, "0014ab");
        assert_eq!(utxos[0].confirmations, 12);
        assert_eq!(utxos[1].txid, "bb");
    }

    #[test]
    fn address_without_refs_has_no_utxos() {
        assert!(parse_utxos(&json!({"address": "x", "balance": 0}), "x")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn unconfirmed_status_drops_sentinel_height() {
        let obs = parse_status(
            &json!({"hash": "ab", "block_height": -1, "confirmations": 0}),
            None,
        )
        .unwrap();
        assert_eq!(obs.confirmations, 0);
        assert_eq!(obs.block_height, None);
    }

    #[test]
    fn confirmed_status() {
        let obs = parse_status(
            &json!({
                "hash": "ab", "block_height": 2_500_000, "block_hash": "0000ff",
                "confirmations": 7, "confirmed": "2023-04-01T12:00:00Z"
            }),
            None,
        )
        .unwrap();
        assert_eq!(obs.confirmations, 7);
        assert_eq!(obs.block_height, Some(2_500_000));
        assert_eq!(obs.timestamp, Some(1_680_350_400));
    }
}
