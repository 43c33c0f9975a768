//! Server state in client-friendly form
//!
//! `server_state` reports amounts in drops and keys in snake_case. These
//! helpers return the same information with camelCase keys and amounts in
//! CSC (1 CSC = 10^8 drops), as decimal strings.
//!
//! ```rust,no_run
//! use csclink_client::{server_info, Connection};
//!
//! # async fn example(connection: Connection) -> csclink_core::Result<()> {
//! let info = server_info::get_server_info(&connection).await?;
//! println!("{} at ledger {}", info["serverState"], info["validatedLedger"]["ledgerVersion"]);
//! println!("fee: {} CSC", server_info::get_fee(&connection).await?);
//! # Ok(())
//! # }
//! ```

use crate::client::LedgerClient;
use csclink_core::{Decimal, Error, Result};
use serde_json::{json, Map, Value};
use std::str::FromStr;

/// Decimal places between drops and CSC
pub const CSC_DECIMALS: u32 = 8;

const VALIDATED_LEDGER_RENAMES: [(&str, &str); 4] = [
    ("baseFee", "baseFeeCSC"),
    ("reserveBase", "reserveBaseCSC"),
    ("reserveInc", "reserveIncrementCSC"),
    ("seq", "ledgerVersion"),
];

const DROP_AMOUNTS: [&str; 3] = ["baseFeeCSC", "reserveBaseCSC", "reserveIncrementCSC"];

/// `server_state`, camelCased, with validated-ledger amounts in CSC
///
/// # Errors
///
/// Request errors pass through; `Error::ResponseFormat` when the result
/// has no `state` or an amount is not a number.
pub async fn get_server_info<C: LedgerClient + ?Sized>(client: &C) -> Result<Value> {
    let response = client.request(json!({"command": "server_state"}), None).await?;
    let state = response
        .get("state")
        .ok_or_else(|| Error::ResponseFormat("server_state result has no state".into()))?;

    let mut info = camel_case_keys(state);
    if let Some(Value::Object(ledger)) = info.get_mut("validatedLedger") {
        for (from, to) in VALIDATED_LEDGER_RENAMES {
            if let Some(value) = ledger.remove(from) {
                ledger.insert(to.to_string(), value);
            }
        }
        for key in DROP_AMOUNTS {
            if let Some(value) = ledger.get_mut(key) {
                *value = Value::String(drops_value_to_csc(value)?);
            }
        }
    }
    Ok(info)
}

/// Base fee of the last validated ledger, in CSC
pub async fn get_fee<C: LedgerClient + ?Sized>(client: &C) -> Result<String> {
    let info = get_server_info(client).await?;
    info.get("validatedLedger")
        .and_then(|ledger| ledger.get("baseFeeCSC"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::ResponseFormat("server state has no validated ledger".into()))
}

/// Recursively rename `snake_case` object keys to `camelCase`
pub fn camel_case_keys(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(key, value)| (camel_case(key), camel_case_keys(value)))
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(camel_case_keys).collect()),
        other => other.clone(),
    }
}

// only an underscore between two letters is a word break
fn camel_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len());
    let mut i = 0;
    while i < chars.len() {
        let breaks = chars[i] == '_'
            && i > 0
            && i + 1 < chars.len()
            && chars[i - 1].is_ascii_alphabetic()
            && chars[i + 1].is_ascii_alphabetic();
        if breaks {
            out.push(chars[i + 1].to_ascii_uppercase());
            i += 2;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Convert a drops amount to CSC, exactly
///
/// Plain and scientific notation are both accepted.
///
/// ```rust
/// use csclink_client::server_info::drops_to_csc;
///
/// assert_eq!(drops_to_csc("100000000").unwrap(), "1");
/// assert_eq!(drops_to_csc("10").unwrap(), "0.0000001");
/// assert_eq!(drops_to_csc("2500000000").unwrap(), "25");
/// assert_eq!(drops_to_csc("1e3").unwrap(), "0.00001");
/// ```
///
/// # Errors
///
/// Returns `Error::ResponseFormat` when `drops` is not a decimal number.
pub fn drops_to_csc(drops: &str) -> Result<String> {
    let text = drops.trim();
    let amount = Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|_| Error::ResponseFormat(format!("invalid drops amount: {:?}", drops)))?;
    csc_from_drops(amount)
}

/// [`drops_to_csc`] for an already parsed amount
pub fn csc_from_drops(drops: Decimal) -> Result<String> {
    drops
        .checked_mul(Decimal::new(1, CSC_DECIMALS))
        .map(|csc| csc.normalize().to_string())
        .ok_or_else(|| Error::ResponseFormat(format!("drops amount out of range: {}", drops)))
}

/// [`drops_to_csc`] for a JSON number or numeric string
pub fn drops_value_to_csc(value: &Value) -> Result<String> {
    match value {
        Value::Number(n) => drops_to_csc(&n.to_string()),
        Value::String(s) => drops_to_csc(s),
        other => Err(Error::ResponseFormat(format!(
            "drops amount must be a number, got {}",
            other
        ))),
    }
}
