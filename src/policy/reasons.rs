use serde::Serialize;
use std::fmt;

/// Why a suspension was granted. Used for logging, never for decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SuspensionReasons {
    reasons: Vec<String>,
}

impl SuspensionReasons {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nothing_noteworthy() -> Self {
        Self::default()
    }

    pub fn single(reason: impl Into<String>) -> Self {
        let mut reasons = Self::new();
        reasons.add(reason);
        reasons
    }

    pub fn add(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    /// Append the reasons of `other`.
    pub fn mixin(&mut self, other: SuspensionReasons) {
        self.reasons.extend(other.reasons);
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.reasons.iter().map(String::as_str)
    }
}

impl fmt::Display for SuspensionReasons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reasons.join("; "))
    }
}
