//! Storage key layout: `{table.len()}:{table}:{key}`.
//!
//! The length prefix fixes where the table name ends, so `:` is allowed in
//! both components without two records ever sharing a storage key. Keys of
//! one table share `table_prefix(table)` and sort together.

/// Maps (table, key) to the flat key stored in the engine.
pub fn compose(table: &str, key: &str) -> String {
    let mut row_key = table_prefix(table);
    row_key.push_str(key);
    row_key
}

/// Prefix shared by every storage key of `table`.
pub fn table_prefix(table: &str) -> String {
    format!("{}:{}:", table.len(), table)
}

/// Inverse of [`compose`]. `None` for strings `compose` never produces.
pub fn split(row_key: &str) -> Option<(&str, &str)> {
    let (len, rest) = row_key.split_once(':')?;
    if len.is_empty() || (len.len() > 1 && len.starts_with('0')) {
        return None;
    }
    let len: usize = len.parse().ok()?;
    let table = rest.get(..len)?;
    let key = rest.get(len..)?.strip_prefix(':')?;
    Some((table, key))
}
