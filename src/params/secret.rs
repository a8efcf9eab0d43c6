// src/params/secret.rs

//! Secret byte buffers and output redaction.

use std::fmt;

use zeroize::Zeroizing;

/// Replacement written wherever a bound secret appeared.
pub const REDACTED: &str = "***";

/// Bytes of a resolved parameter value.
///
/// The buffer is overwritten when dropped. `Debug` never shows the content
/// and there is deliberately no `Display` or `Serialize`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Zeroizing<Vec<u8>>);

impl SecretValue {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    /// UTF-8 view, if the value is valid UTF-8.
    pub fn expose_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

/// Replaces every occurrence of the bound secrets in captured output.
///
/// Longer secrets are matched first so a secret that contains another one
/// is hidden whole.
#[derive(Clone, Default)]
pub struct Redactor {
    needles: Vec<Zeroizing<Vec<u8>>>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start redacting `secret`. Empty values are ignored.
    pub fn add(&mut self, secret: &SecretValue) {
        if secret.is_empty() || self.needles.iter().any(|n| n.as_slice() == secret.expose()) {
            return;
        }
        self.needles.push(Zeroizing::new(secret.expose().to_vec()));
        self.needles.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    pub fn is_empty(&self) -> bool {
        self.needles.is_empty()
    }

    pub fn redact(&self, input: &[u8]) -> Vec<u8> {
        if self.needles.is_empty() {
            return input.to_vec();
        }

        let mut out = Vec::with_capacity(input.len());
        let mut i = 0;
        'scan: while i < input.len() {
            for needle in &self.needles {
                if input[i..].starts_with(needle) {
                    out.extend_from_slice(REDACTED.as_bytes());
                    i += needle.len();
                    continue 'scan;
                }
            }
            out.push(input[i]);
            i += 1;
        }
        out
    }

    /// Redact a buffer that was cut off at an arbitrary point. A trailing
    /// fragment that could be the start of a secret is dropped as well.
    pub fn redact_truncated(&self, input: &[u8]) -> Vec<u8> {
        let cut = self
            .needles
            .iter()
            .filter_map(|n| {
                (1..n.len().min(input.len() + 1))
                    .rev()
                    .find(|&k| input.ends_with(&n[..k]))
            })
            .max()
            .unwrap_or(0);
        self.redact(&input[..input.len() - cut])
    }

    /// Redact and decode as (lossy) UTF-8.
    pub fn redact_to_string(&self, input: &[u8]) -> String {
        String::from_utf8_lossy(&self.redact(input)).into_owned()
    }
}

impl fmt::Debug for Redactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redactor")
            .field("secrets", &self.needles.len())
            .finish()
    }
}
