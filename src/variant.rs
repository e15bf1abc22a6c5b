//! Variants: named transformations applied before output generation.
//!
//! A variant marks components as not fitted. Outputs that honor variants
//! build a temporary filtered copy of the board/schematic (paste stripped,
//! Fab layer crossed out, symbols marked DNP) and feed that copy to the
//! external tool instead of the original.

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::ConfigError;

/// One entry of the config's `variants:` list.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Variant {
    /// Name used to select the variant.
    pub name: String,
    /// A comment for documentation purposes.
    #[serde(default)]
    pub comment: String,
    /// Value for the `%v` filename expansion. Defaults to the name.
    #[serde(default)]
    pub file_id: String,
    /// References of not-fitted components. Glob patterns allowed
    /// (`R1`, `TP*`, `C1?`).
    #[serde(default)]
    pub not_fitted: Vec<String>,
}

impl Variant {
    /// Validates the entry and fills derived fields.
    pub fn finish(mut self) -> Result<Self, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::validation("variant needs a name"));
        }
        if self.file_id.is_empty() {
            self.file_id = format!("-{}", self.name);
        }
        Ok(self)
    }

    /// Resolves the not-fitted patterns against the actual reference list.
    #[must_use]
    pub fn resolve(&self, references: &[String]) -> HashSet<String> {
        let mut result = HashSet::new();
        for pattern in &self.not_fitted {
            if let Ok(matcher) = glob::Pattern::new(pattern) {
                for r in references {
                    if matcher.matches(r) {
                        result.insert(r.clone());
                    }
                }
            } else if references.contains(pattern) {
                // Not a valid glob, treat it as a literal reference.
                result.insert(pattern.clone());
            }
        }
        result
    }

    /// True when the variant excludes at least one component pattern.
    #[must_use]
    pub fn has_exclusions(&self) -> bool {
        !self.not_fitted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs() -> Vec<String> {
        ["R1", "R2", "C1", "TP1", "TP2"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn file_id_defaults_to_dash_name() {
        let v = Variant {
            name: "production".to_string(),
            comment: String::new(),
            file_id: String::new(),
            not_fitted: vec![],
        }
        .finish()
        .unwrap();
        assert_eq!(v.file_id, "-production");
    }

    #[test]
    fn globs_match_references() {
        let v = Variant {
            name: "test".to_string(),
            comment: String::new(),
            file_id: "_t".to_string(),
            not_fitted: vec!["TP*".to_string(), "C1".to_string()],
        };
        let excluded = v.resolve(&refs());
        assert_eq!(excluded.len(), 3);
        assert!(excluded.contains("TP1"));
        assert!(excluded.contains("C1"));
        assert!(!excluded.contains("R1"));
    }

    #[test]
    fn nameless_variant_is_rejected() {
        let v = Variant {
            name: String::new(),
            comment: String::new(),
            file_id: String::new(),
            not_fitted: vec![],
        };
        assert!(v.finish().is_err());
    }
}
