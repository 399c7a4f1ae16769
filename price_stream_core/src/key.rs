// Token key normalization
// Upstream delivers the same mint with and without its vanity suffix and in mixed case.

/// Suffix pump.fun mints carry in their base58 address.
pub const DEFAULT_KEY_SUFFIX: &str = "pump";

#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    suffix: String,
}

impl KeyNormalizer {
    pub fn new(suffix: &str) -> Self {
        Self {
            suffix: suffix.to_lowercase(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Canonical cache key. Only case is folded at write time.
    pub fn normalize(&self, raw: &str) -> String {
        raw.to_lowercase()
    }

    /// Keys to probe for `raw`, in priority order:
    /// the normalized key, the key with the suffix appended, the key with the suffix stripped.
    pub fn candidates(&self, raw: &str) -> Vec<String> {
        let key = self.normalize(raw);
        if self.suffix.is_empty() {
            return vec![key];
        }

        let mut out = Vec::with_capacity(2);
        match key.strip_suffix(self.suffix.as_str()) {
            Some(stripped) => {
                if !stripped.is_empty() {
                    out.push(stripped.to_string());
                }
            }
            None => out.push(format!("{}{}", key, self.suffix)),
        }
        out.insert(0, key);
        out
    }
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_case_only() {
        let n = KeyNormalizer::default();
        assert_eq!(n.normalize("AbCdPUMP"), "abcdpump");
        assert_eq!(n.normalize(" Mixed "), " mixed ");
    }

    #[test]
    fn test_candidates_without_suffix() {
        let n = KeyNormalizer::default();
        assert_eq!(n.candidates("ABC"), vec!["abc".to_string(), "abcpump".to_string()]);
    }

    #[test]
    fn test_candidates_with_suffix() {
        let n = KeyNormalizer::default();
        assert_eq!(n.candidates("ABCPump"), vec!["abcpump".to_string(), "abc".to_string()]);
    }

    #[test]
    fn test_bare_suffix_is_not_stripped_to_empty() {
        let n = KeyNormalizer::default();
        assert_eq!(n.candidates("PUMP"), vec!["pump".to_string()]);
    }

    #[test]
    fn test_empty_suffix_yields_only_normalized() {
        let n = KeyNormalizer::new("");
        assert_eq!(n.candidates("Mint"), vec!["mint".to_string()]);
    }
}
