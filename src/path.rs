//! Dot-delimited watch expressions (`"a.b.c"`).

/// Split a watch path into its segments.
///
/// Only letters, digits, `$`, `_` and `.` are accepted; anything else
/// (brackets, operators, whitespace) returns `None`.
pub fn parse_path(path: &str) -> Option<Vec<String>> {
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '.' | '$' | '_'));
    valid.then(|| path.split('.').map(str::to_owned).collect())
}
