//! Attachment rule matching: filename -> ingestion rule

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RuleConfig;
use crate::error::{IngestError, Result};

/// How a filename is matched against rule base tokens
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Plain case-insensitive containment; the first rule in file order wins
    FirstMatch,
    /// Containment anchored on name boundaries; more than one hit is an error
    #[default]
    Strict,
}

/// One configured ingestion rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRule {
    /// Rule key as written in the config (e.g. `IB_Calls.csv`)
    pub key: String,
    /// Key with its extension stripped (e.g. `IB_Calls`); names staged files
    pub base: String,
    /// Passed through to the transformer untouched
    pub columns: Vec<String>,
    needle: String,
}

/// Strip the first matching suffix (case-insensitive) from a rule key
pub fn base_token(key: &str, suffixes: &[String]) -> String {
    for suffix in suffixes {
        if let Some(cut) = key.len().checked_sub(suffix.len()) {
            if key.is_char_boundary(cut) && key[cut..].eq_ignore_ascii_case(suffix) {
                return key[..cut].to_string();
            }
        }
    }
    key.to_string()
}

/// Immutable rule set for one invocation
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    rules: Vec<AttachmentRule>,
    suffixes: Vec<String>,
    policy: MatchPolicy,
}

/// Suffixes stripped from rule keys: the configured extensions plus `.csv`
pub fn rule_suffixes(extensions: &[String]) -> Vec<String> {
    let mut suffixes = extensions.to_vec();
    if !suffixes.iter().any(|s| s.eq_ignore_ascii_case(".csv")) {
        suffixes.push(".csv".to_string());
    }
    suffixes
}

impl RuleMatcher {
    pub fn new(rules: &IndexMap<String, RuleConfig>, suffixes: &[String], policy: MatchPolicy) -> Self {
        let known_suffixes = rule_suffixes(suffixes);

        let rules = rules
            .iter()
            .map(|(key, rule)| {
                let base = base_token(key, &known_suffixes);
                AttachmentRule {
                    key: key.clone(),
                    needle: base.to_lowercase(),
                    base,
                    columns: rule.columns.clone(),
                }
            })
            .collect();

        Self {
            rules,
            suffixes: known_suffixes,
            policy,
        }
    }

    pub fn rules(&self) -> &[AttachmentRule] {
        &self.rules
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the rule a filename belongs to.
    ///
    /// `Ok(None)` means no rule applies. Under [`MatchPolicy::Strict`] a name
    /// whose stem equals one rule base belongs to that rule; otherwise a name
    /// hitting several rules yields [`IngestError::AmbiguousRule`].
    pub fn match_filename(&self, filename: &str) -> Result<Option<&AttachmentRule>> {
        let name = filename.to_lowercase();

        match self.policy {
            MatchPolicy::FirstMatch => Ok(self
                .rules
                .iter()
                .find(|rule| !rule.needle.is_empty() && name.contains(&rule.needle))),
            MatchPolicy::Strict => {
                let hits: Vec<&AttachmentRule> = self
                    .rules
                    .iter()
                    .filter(|rule| contains_on_boundary(&name, &rule.needle))
                    .collect();

                match hits.as_slice() {
                    [] => Ok(None),
                    [rule] => Ok(Some(*rule)),
                    _ => {
                        let stem = base_token(&name, &self.suffixes);
                        if let Some(exact) = hits.iter().find(|rule| rule.needle == stem) {
                            return Ok(Some(*exact));
                        }
                        debug!("{} matched {} rules", filename, hits.len());
                        Err(IngestError::AmbiguousRule {
                            filename: filename.to_string(),
                            rules: hits.iter().map(|r| r.key.clone()).collect(),
                        })
                    }
                }
            }
        }
    }
}

/// True when `needle` occurs in `haystack` with no letter or digit glued to
/// either side of it
fn contains_on_boundary(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    haystack.match_indices(needle).any(|(start, matched)| {
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[start + matched.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(keys: &[&str]) -> IndexMap<String, RuleConfig> {
        keys.iter()
            .map(|k| {
                (
                    k.to_string(),
                    RuleConfig {
                        columns: vec!["Date".to_string()],
                    },
                )
            })
            .collect()
    }

    fn csv() -> Vec<String> {
        vec![".csv".to_string()]
    }

    #[test]
    fn test_base_token_strips_suffix_case_insensitively() {
        assert_eq!(base_token("IB_Calls.csv", &csv()), "IB_Calls");
        assert_eq!(base_token("IB_Calls.CSV", &csv()), "IB_Calls");
        assert_eq!(base_token("Agents", &csv()), "Agents");
        assert_eq!(
            base_token("export.txt", &[".csv".to_string(), ".txt".to_string()]),
            "export"
        );
    }

    #[test]
    fn test_case_insensitive_match() {
        let matcher = RuleMatcher::new(&rules(&["IB_Calls.csv"]), &csv(), MatchPolicy::Strict);
        let rule = matcher.match_filename("ib_calls_extra.CSV").unwrap().unwrap();
        assert_eq!(rule.key, "IB_Calls.csv");
        assert_eq!(rule.base, "IB_Calls");
        assert_eq!(rule.columns, vec!["Date".to_string()]);

        let first = RuleMatcher::new(&rules(&["IB_Calls.csv"]), &csv(), MatchPolicy::FirstMatch);
        assert!(first.match_filename("ib_calls_extra.CSV").unwrap().is_some());
    }

    #[test]
    fn test_no_match() {
        let matcher = RuleMatcher::new(&rules(&["IB_Calls.csv"]), &csv(), MatchPolicy::Strict);
        assert!(matcher.match_filename("OB_Calls.csv").unwrap().is_none());
        assert!(matcher.match_filename("invoice.pdf").unwrap().is_none());
    }

    #[test]
    fn test_first_match_follows_config_order() {
        let matcher = RuleMatcher::new(
            &rules(&["Calls.csv", "IB_Calls.csv"]),
            &csv(),
            MatchPolicy::FirstMatch,
        );
        let rule = matcher.match_filename("IB_Calls.csv").unwrap().unwrap();
        assert_eq!(rule.key, "Calls.csv");
    }

    #[test]
    fn test_strict_rejects_glued_substrings() {
        let matcher = RuleMatcher::new(&rules(&["Calls.csv"]), &csv(), MatchPolicy::Strict);
        assert!(matcher.match_filename("MissedCalls.csv").unwrap().is_none());
        assert!(matcher.match_filename("Callsheet.csv").unwrap().is_none());
        assert!(matcher.match_filename("Missed-Calls.csv").unwrap().is_some());

        let loose = RuleMatcher::new(&rules(&["Calls.csv"]), &csv(), MatchPolicy::FirstMatch);
        assert!(loose.match_filename("MissedCalls.csv").unwrap().is_some());
    }

    #[test]
    fn test_strict_fails_loudly_on_multiple_rules() {
        let matcher = RuleMatcher::new(
            &rules(&["Calls.csv", "IB_Calls.csv"]),
            &csv(),
            MatchPolicy::Strict,
        );
        let err = matcher.match_filename("IB_Calls_Daily.csv").unwrap_err();
        match err {
            IngestError::AmbiguousRule { filename, rules } => {
                assert_eq!(filename, "IB_Calls_Daily.csv");
                assert_eq!(rules, vec!["Calls.csv".to_string(), "IB_Calls.csv".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_strict_exact_stem_is_not_ambiguous() {
        let matcher = RuleMatcher::new(
            &rules(&["IB_Calls_Summary.csv", "IB_Calls.csv"]),
            &csv(),
            MatchPolicy::default(),
        );

        let summary = matcher.match_filename("IB_Calls_Summary.csv").unwrap().unwrap();
        assert_eq!(summary.key, "IB_Calls_Summary.csv");

        let calls = matcher.match_filename("ib_calls.CSV").unwrap().unwrap();
        assert_eq!(calls.key, "IB_Calls.csv");

        assert!(matches!(
            matcher.match_filename("IB_Calls_Summary_v2.csv"),
            Err(IngestError::AmbiguousRule { .. })
        ));
    }

    #[test]
    fn test_contains_on_boundary() {
        assert!(contains_on_boundary("ib_calls.csv", "ib_calls"));
        assert!(contains_on_boundary("report ib_calls (2).csv", "ib_calls"));
        assert!(!contains_on_boundary("xib_calls.csv", "ib_calls"));
        // second occurrence is on a boundary even though the first is not
        assert!(contains_on_boundary("xib_calls_ib_calls.csv", "ib_calls"));
        assert!(!contains_on_boundary("anything.csv", ""));
    }
}
