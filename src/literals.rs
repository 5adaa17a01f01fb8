//! Dictionary-literal synthesis from observed key shapes.
//!
//! A function that reads `order['price']` and `order.get('count')` is
//! telling us what records it consumes. This module turns that observed
//! key set into a populated Python dict literal, dropping keys the
//! function appears to compute itself and assigning per-key values from
//! the canonical category table.

use crate::heuristics::{self, PyValue, OUTPUT_KEY_HINTS, ROLE_LITERALS};

/// Keys that survive the output-field filter. Keys whose names look like
/// computed outputs (totals, results) are presumed to be written by the
/// function under test, not supplied by the caller.
pub fn input_keys(keys: &[String]) -> Vec<String> {
    keys.iter()
        .filter(|key| {
            let lower = key.to_lowercase();
            !OUTPUT_KEY_HINTS.iter().any(|hint| lower.contains(hint))
        })
        .cloned()
        .collect()
}

/// First observed string literal recognized as a role value.
pub fn role_hint(string_literals: &[String]) -> Option<&str> {
    string_literals
        .iter()
        .find(|lit| {
            let lower = lit.to_lowercase();
            ROLE_LITERALS.iter().any(|role| lower == *role)
        })
        .map(String::as_str)
}

/// Value assigned to one dict key.
pub fn value_for_key(key: &str, role_hint: Option<&str>) -> PyValue {
    heuristics::category_default(heuristics::key_category(key), role_hint)
}

/// Build a populated dict literal for an observed key set.
///
/// When the output filter would remove every key, filtering is skipped so
/// the literal never comes out empty.
pub fn dict_literal(dict_keys: &[String], string_literals: &[String]) -> PyValue {
    if dict_keys.is_empty() {
        return PyValue::Dict(vec![("key".to_string(), PyValue::str("value"))]);
    }
    let filtered = input_keys(dict_keys);
    let keys: &[String] = if filtered.is_empty() {
        dict_keys
    } else {
        &filtered
    };
    let hint = role_hint(string_literals);
    PyValue::Dict(
        keys.iter()
            .map(|key| (key.clone(), value_for_key(key, hint)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn output_like_keys_are_dropped() {
        let literal = dict_literal(&keys(&["price", "quantity", "total"]), &[]);
        let rendered = literal.to_string();
        assert!(rendered.contains("'price'"));
        assert!(rendered.contains("'quantity'"));
        assert!(!rendered.contains("'total'"));
    }

    #[test]
    fn filter_is_skipped_when_it_would_empty_the_literal() {
        let literal = dict_literal(&keys(&["total", "result"]), &[]);
        let rendered = literal.to_string();
        assert!(rendered.contains("'total'"));
        assert!(rendered.contains("'result'"));
    }

    #[test]
    fn price_and_quantity_values_stay_distinct() {
        let literal = dict_literal(&keys(&["price", "quantity"]), &[]);
        assert_eq!(literal.to_string(), "{'price': 100, 'quantity': 5}");
    }

    #[test]
    fn observed_role_literal_feeds_role_keys() {
        let lits = vec!["admin".to_string(), "other".to_string()];
        let literal = dict_literal(&keys(&["role"]), &lits);
        assert_eq!(literal.to_string(), "{'role': 'admin'}");
    }

    #[test]
    fn role_keys_fall_back_to_manager() {
        let literal = dict_literal(&keys(&["role"]), &[]);
        assert_eq!(literal.to_string(), "{'role': 'manager'}");
    }

    #[test]
    fn year_and_name_keys_use_table_defaults() {
        let literal = dict_literal(&keys(&["year", "name"]), &[]);
        assert_eq!(literal.to_string(), "{'year': 2020, 'name': 'Test Item'}");
    }

    #[test]
    fn empty_key_set_yields_generic_literal() {
        assert_eq!(dict_literal(&[], &[]).to_string(), "{'key': 'value'}");
    }
}
