//! Composite browser fingerprint (canvas + `WebGL` + audio hashes).

use serde::{Deserialize, Serialize};

/// Pipe-joined triple of client-reported hashes. Each component may be
/// empty but the separators are always present, e.g. `"abc||"` when only
/// the canvas hash was sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CompositeFingerprint(pub String);

impl CompositeFingerprint {
    /// Compose the canonical string from the three raw hashes.
    #[must_use]
    pub fn new(canvas: &str, webgl: &str, audio: &str) -> Self {
        Self(format!("{canvas}|{webgl}|{audio}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CompositeFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_pipe_joined_triple() {
        let fp = CompositeFingerprint::new("abc", "def", "ghi");
        assert_eq!(fp.as_str(), "abc|def|ghi");
    }

    #[test]
    fn empty_components_keep_separators() {
        let fp = CompositeFingerprint::new("", "", "");
        assert_eq!(fp.as_str(), "||");
    }
}
