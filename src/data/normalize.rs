//! Lookup-key normalization for country and region names.
//!
//! Every cache and source lookup keys on the normalized form; the raw form is
//! kept alongside it for display.

/// Canonicalize a free-text key: trim, collapse whitespace runs to one space, lowercase.
///
/// Total and idempotent: `normalize(&normalize(s)) == normalize(s)`.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for word in raw.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}
