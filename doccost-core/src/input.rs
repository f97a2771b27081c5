//! Validation of raw user input (form fields, command line values)

use crate::query::JoinStrategy;
use crate::sharding::ShardingStrategy;
use crate::{CostError, Result, Selectivity};

/// Parse a non-negative integer count
pub fn parse_count(field: &str, text: &str) -> Result<u64> {
    let text = text.trim().replace('_', "");
    if text.is_empty() {
        return Err(CostError::invalid_input(field, "a value is required"));
    }
    if text.starts_with('-') {
        return Err(CostError::invalid_input(field, "must not be negative"));
    }
    text.parse::<u64>()
        .map_err(|_| CostError::invalid_input(field, format!("'{}' is not a whole number", text)))
}

/// Parse an optional count; blank means absent
pub fn parse_optional_count(field: &str, text: &str) -> Result<Option<u64>> {
    if text.trim().is_empty() {
        Ok(None)
    } else {
        parse_count(field, text).map(Some)
    }
}

/// Parse a server count, at least one
pub fn parse_servers(field: &str, text: &str) -> Result<u64> {
    match parse_count(field, text)? {
        0 => Err(CostError::invalid_input(field, "at least one server is required")),
        n => Ok(n),
    }
}

/// Parse a selectivity written as a decimal (`0.01`) or a ratio (`1/100`)
pub fn parse_selectivity(field: &str, text: &str) -> Result<Selectivity> {
    let text = text.trim();
    let parsed = match text.split_once('/') {
        Some((num, den)) => {
            let num = parse_count(field, num)?;
            let den = parse_count(field, den)?;
            Selectivity::new(num, den)
        }
        None => text
            .parse::<f64>()
            .ok()
            .and_then(Selectivity::from_fraction),
    };
    parsed.ok_or_else(|| CostError::invalid_input(field, "must be a fraction between 0 and 1"))
}

/// Split a comma separated list of keys, ignoring blanks
pub fn parse_key_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Blank means no key
pub fn parse_optional_key(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

pub fn parse_strategy(field: &str, text: &str) -> Result<ShardingStrategy> {
    ShardingStrategy::from_name(text.trim())
        .ok_or_else(|| CostError::invalid_input(field, format!("unknown sharding strategy '{}'", text.trim())))
}

pub fn parse_join_strategy(field: &str, text: &str) -> Result<JoinStrategy> {
    JoinStrategy::from_name(text.trim())
        .ok_or_else(|| CostError::invalid_input(field, format!("unknown join strategy '{}'", text.trim())))
}
