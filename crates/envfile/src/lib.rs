//! Flat `KEY=value` environment file support.
//!
//! Lines whose first non-whitespace character is `#` are comments. Blank
//! lines and lines without `=` are ignored. The first `=` splits the key
//! from the value.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Variables with this suffix hold base64 ciphertext. The plaintext
/// variable name is the suffix-stripped key.
pub const ENCRYPTED_SUFFIX: &str = "_ENCRYPTED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entry {
    pub key: Arc<str>,
    pub value: Arc<str>,
}

impl Entry {
    pub fn is_encrypted(&self) -> bool {
        is_encrypted_key(self.key.as_ref())
    }
}

pub fn is_encrypted_key(key: &str) -> bool {
    key.ends_with(ENCRYPTED_SUFFIX)
}

/// Returns the plaintext variable name for an encrypted key.
pub fn decrypted_key(key: &str) -> Option<&str> {
    key.strip_suffix(ENCRYPTED_SUFFIX)
}

pub fn parse(content: &str) -> Vec<Entry> {
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            entries.push(Entry {
                key: key.into(),
                value: value.into(),
            });
        }
    }
    entries
}

pub fn read_entries(path: &std::path::Path) -> anyhow::Result<Vec<Entry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read environment file {}", path.display()))?;
    Ok(parse(content.as_str()))
}

/// The set of assignment keys in an environment file, used for drift
/// comparison by set difference.
pub fn read_keys(path: &std::path::Path) -> anyhow::Result<BTreeSet<Arc<str>>> {
    let entries = read_entries(path)?;
    Ok(entries.into_iter().map(|entry| entry.key).collect())
}

#[cfg(test)]
mod test {
    use super::*;

    const CONTENT: &str = r#"# leading comment
GCP_PROJECT_ID=my-project
  # indented comment
PASSWORD_ENCRYPTED=c2VjcmV0

not an assignment
EMPTY=
MULTI=a=b=c
"#;

    #[test]
    fn test_parse_skips_comments_and_non_assignments() {
        let entries = parse(CONTENT);
        let keys = entries
            .iter()
            .map(|entry| entry.key.as_ref())
            .collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec!["GCP_PROJECT_ID", "PASSWORD_ENCRYPTED", "EMPTY", "MULTI"]
        );
    }

    #[test]
    fn test_first_equals_splits_key_from_value() {
        let entries = parse("MULTI=a=b=c");
        assert_eq!(entries[0].key.as_ref(), "MULTI");
        assert_eq!(entries[0].value.as_ref(), "a=b=c");
    }

    #[test]
    fn test_encrypted_suffix() {
        assert!(is_encrypted_key("PASSWORD_ENCRYPTED"));
        assert!(!is_encrypted_key("PASSWORD"));
        assert_eq!(decrypted_key("PASSWORD_ENCRYPTED"), Some("PASSWORD"));
        assert_eq!(decrypted_key("PASSWORD"), None);
    }

    #[test]
    fn test_entry_is_encrypted() {
        let entries = parse(CONTENT);
        assert!(!entries[0].is_encrypted());
        assert!(entries[1].is_encrypted());
    }
}
