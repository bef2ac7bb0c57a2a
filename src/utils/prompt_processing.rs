use std::collections::{HashMap, HashSet};
use regex::{Captures, Regex};
use lazy_static::lazy_static;

lazy_static! {
    /// Matches `{name}` where `name` is an identifier. Braces around anything else
    /// (JSON examples, code) are left alone.
    pub(crate) static ref PLACEHOLDER_MATCH_RE: Regex = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// Replaces every placeholder that has a value in `mapping`. Placeholders without a value are kept verbatim.
pub(crate) fn replace_all_placeholders(original: &str, mapping: &HashMap<String, Option<String>>) -> String {
    PLACEHOLDER_MATCH_RE.replace_all(original, |captures: &Captures| {
        match mapping.get(&captures[1]) {
            Some(Some(value)) => value.clone(),
            _ => captures[0].to_string(),
        }
    }).into_owned()
}

/// Collects the names of all placeholders in a string.
pub fn get_placeholders(string: &str) -> HashSet<String> {
    PLACEHOLDER_MATCH_RE.captures_iter(string)
        .map(|captures| captures[1].to_string())
        .collect()
}

/// Returns true if the string still contains a `{name}` placeholder.
#[cfg(test)]
pub fn has_placeholders(string: &str) -> bool {
    PLACEHOLDER_MATCH_RE.is_match(string)
}
