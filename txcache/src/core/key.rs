//! Cache key derivation
//!
//! A key is a SHA-256 digest over the result kind and length-prefixed
//! segments: scope, normalized command text, then each parameter name and
//! JSON-encoded value in order.
//! Length prefixes keep segment boundaries unambiguous, so two different
//! compositions never feed the hasher the same bytes.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Collapse whitespace runs outside quoted literals and trim the ends.
///
/// Quoted text (`'...'`, `"..."`, `` `...` ``, `[...]`) is kept verbatim so
/// literals that differ only in spacing keep distinct keys.
pub fn normalize_command_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut closing: Option<char> = None;
    let mut pending_space = false;

    for ch in text.trim().chars() {
        if let Some(close) = closing {
            out.push(ch);
            if ch == close {
                closing = None;
            }
            continue;
        }

        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }

        if pending_space {
            out.push(' ');
            pending_space = false;
        }

        closing = match ch {
            '\'' | '"' | '`' => Some(ch),
            '[' => Some(']'),
            _ => None,
        };
        out.push(ch);
    }

    out
}

/// Stable fingerprint of a query shape, used by the query registries
pub fn query_fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_command_text(text).as_bytes());
    hex::encode(hasher.finalize())
}

fn update_segment(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Shape of a cached result. Reader and scalar results of the same command
/// live under different keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Rows,
    Scalar,
}

impl ResultKind {
    fn tag(self) -> u8 {
        match self {
            Self::Rows => b'R',
            Self::Scalar => b'S',
        }
    }
}

/// Deterministic key for a command's cached result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a row result, from scope, command text and ordered parameters
    pub fn new(scope: &str, command_text: &str, parameters: &[(String, Value)]) -> Self {
        Self::for_kind(ResultKind::Rows, scope, command_text, parameters)
    }

    pub fn for_kind(
        kind: ResultKind,
        scope: &str,
        command_text: &str,
        parameters: &[(String, Value)],
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update([kind.tag()]);
        update_segment(&mut hasher, scope.as_bytes());
        update_segment(&mut hasher, normalize_command_text(command_text).as_bytes());

        hasher.update((parameters.len() as u64).to_le_bytes());
        for (name, value) in parameters {
            update_segment(&mut hasher, name.as_bytes());
            // serde_json maps are ordered, so encoding is deterministic
            update_segment(&mut hasher, value.to_string().as_bytes());
        }

        Self(format!("{}:{}", scope, hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
