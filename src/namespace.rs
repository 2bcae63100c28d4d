//! Qualified-name helpers for the registry (spec §3 glossary: "Qualified
//! name"). A tool/resource/prompt is globally identified by the pair
//! `(server_name, item_name)`; the TCP dispatcher additionally accepts that
//! pair packed into a single `"server/item"` string (spec §4.5).

/// Join a server name and item name into the `"server/item"` form used by
/// the TCP dispatcher's `name` field.
pub fn qualify(server: &str, item: &str) -> String {
    format!("{server}/{item}")
}

/// Split a `"server/item"` string back into its parts. Splits on the first
/// `/` only, so item names containing `/` (e.g. resource URIs) survive
/// intact in the second half.
pub fn unqualify(qualified: &str) -> Option<(&str, &str)> {
    qualified.split_once('/')
}
