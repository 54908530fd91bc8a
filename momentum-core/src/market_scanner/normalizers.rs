//! Shape-specific normalizers
//!
//! Each endpoint is statically tagged with the layout it returns. The
//! normalizer turns one decoded body into canonical [`Token`] records and
//! applies the opportunity window. Bad records are skipped one at a time;
//! a body that does not match its tag yields nothing.

use serde_json::Value;
use tracing::debug;

use super::endpoints::ShapeTag;
use super::{unix_timestamp, OpportunityWindow, Token};
use crate::errors::NormalizeError;

const FLAT_PRICE_FIELDS: &[&str] = &["priceUsd", "price"];
const FLAT_CHANGE_FIELDS: &[&str] = &["changePercent24Hr", "percent_change_24h"];
const FLAT_VOLUME_FIELDS: &[&str] = &["volumeUsd24Hr", "volume_24h"];

#[derive(Debug, Clone)]
pub struct Normalizer {
    chain_tag: String,
    window: OpportunityWindow,
}

impl Normalizer {
    pub fn new(chain_tag: impl Into<String>, window: OpportunityWindow) -> Self {
        Self {
            chain_tag: chain_tag.into(),
            window,
        }
    }

    /// Normalize one response body. Only tokens inside the window are returned.
    pub fn normalize(&self, body: &Value, shape: ShapeTag) -> Vec<Token> {
        let records = match shape {
            ShapeTag::PairList => body.get("pairs").and_then(Value::as_array),
            ShapeTag::FlatList => body.as_array(),
        };

        let Some(records) = records else {
            debug!("Response body does not match the {} layout", shape);
            return Vec::new();
        };

        let captured_at = unix_timestamp();
        let mut tokens = Vec::new();

        for record in records {
            let parsed = match shape {
                ShapeTag::PairList => self.parse_pair(record, captured_at),
                ShapeTag::FlatList => self.parse_flat(record, captured_at),
            };

            match parsed {
                Ok(token) if self.window.contains(token.price_change_24h) => tokens.push(token),
                Ok(_) => {}
                Err(e) => debug!("Skipping {} record: {}", shape, e),
            }
        }

        tokens
    }

    fn parse_pair(&self, pair: &Value, captured_at: f64) -> Result<Token, NormalizeError> {
        if !pair.is_object() {
            return Err(NormalizeError::NotAnObject);
        }

        Ok(Token {
            address: text(lookup(pair, &["baseToken", "address"])),
            symbol: text(lookup(pair, &["baseToken", "symbol"])),
            name: text(lookup(pair, &["baseToken", "name"])),
            price: quantity(lookup(pair, &["priceUsd"])),
            price_change_24h: change("priceChange.h24", lookup(pair, &["priceChange", "h24"]))?,
            volume_24h: quantity(lookup(pair, &["volume", "h24"])),
            chain: self.chain_tag.clone(),
            timestamp: captured_at,
        })
    }

    fn parse_flat(&self, item: &Value, captured_at: f64) -> Result<Token, NormalizeError> {
        if !item.is_object() {
            return Err(NormalizeError::NotAnObject);
        }

        Ok(Token {
            address: text(lookup(item, &["id"])),
            symbol: text(lookup(item, &["symbol"])).to_uppercase(),
            name: text(lookup(item, &["name"])),
            price: quantity(first_present(item, FLAT_PRICE_FIELDS)),
            price_change_24h: change("changePercent24Hr", first_present(item, FLAT_CHANGE_FIELDS))?,
            volume_24h: quantity(first_present(item, FLAT_VOLUME_FIELDS)),
            chain: self.chain_tag.clone(),
            timestamp: captured_at,
        })
    }
}

/// Walk nested objects. `null` counts as absent.
fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    (!current.is_null()).then_some(current)
}

/// First candidate field that is present wins.
fn first_present<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| lookup(value, &[*name]))
}

/// Upstreams send numbers both as JSON numbers and as decimal strings.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn quantity(value: Option<&Value>) -> f64 {
    value
        .and_then(numeric)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(0.0)
}

fn change(field: &'static str, value: Option<&Value>) -> Result<f64, NormalizeError> {
    let Some(value) = value else {
        return Ok(0.0);
    };

    numeric(value)
        .filter(|v| v.is_finite())
        .ok_or_else(|| NormalizeError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
