//! Named pattern rules matched against message bodies
//!
//! A pattern matches a message at most once no matter how many times its
//! rule occurs inside the body. Matching is case-insensitive.

use crate::error::{Error, Result};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;

/// A single named rule.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Unique key, used as the counter name locally and on the wire
    pub name: String,
    /// Compiled rule
    pub regex: Regex,
}

/// An immutable set of compiled patterns, built once at startup.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    /// Compile a name -> rule mapping into a matcher.
    ///
    /// Rules compile case-insensitively; an invalid rule is a configuration
    /// error surfaced at startup rather than skipped.
    pub fn compile(rules: &BTreeMap<String, String>) -> Result<Self> {
        let mut patterns = Vec::with_capacity(rules.len());

        for (name, rule) in rules {
            let regex = RegexBuilder::new(rule)
                .case_insensitive(true)
                .build()
                .map_err(|e| Error::Pattern {
                    name: name.clone(),
                    source: e,
                })?;

            patterns.push(Pattern {
                name: name.clone(),
                regex,
            });
        }

        Ok(Self { patterns })
    }

    /// Names of all patterns whose rule matches anywhere in the body.
    ///
    /// Each name appears at most once per call; a rule satisfied N times
    /// still yields a single entry. Patterns are independent, so zero, one,
    /// or many names may be returned for the same body.
    pub fn matches<'a>(&'a self, body: &str) -> Vec<&'a str> {
        self.patterns
            .iter()
            .filter(|p| p.regex.is_match(body))
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Iterate over the configured patterns.
    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter()
    }

    /// Number of configured patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when no patterns are configured.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_set() -> PatternSet {
        let rules: BTreeMap<String, String> = [
            ("absolutely", r"You(?:'re| are) absolutely right"),
            ("right", r"You(?:'re| are) right"),
            ("perfect", r"Perfect!"),
        ]
        .iter()
        .map(|(n, r)| (n.to_string(), r.to_string()))
        .collect();
        PatternSet::compile(&rules).unwrap()
    }

    #[test]
    fn test_matches_once_per_message() {
        let set = test_set();
        let matched = set.matches("Perfect! Perfect! Perfect!");
        assert_eq!(matched, vec!["perfect"]);
    }

    #[test]
    fn test_multiple_independent_patterns() {
        let set = test_set();
        let matched = set.matches("You're absolutely right! Perfect!");
        assert_eq!(matched, vec!["absolutely", "perfect"]);
    }

    #[test]
    fn test_case_insensitive() {
        let set = test_set();
        assert_eq!(set.matches("you ARE right about that"), vec!["right"]);
    }

    #[test]
    fn test_no_match() {
        let set = test_set();
        assert!(set.matches("Let me look at the code.").is_empty());
    }

    #[test]
    fn test_alternation_forms() {
        let set = test_set();
        assert_eq!(
            set.matches("You are absolutely right."),
            vec!["absolutely"]
        );
        // "absolutely right" is not a plain "right" match
        assert!(!set
            .matches("You're absolutely right.")
            .contains(&"right"));
    }

    #[test]
    fn test_invalid_rule_is_config_error() {
        let rules: BTreeMap<String, String> =
            [("broken".to_string(), "(unclosed".to_string())].into();
        assert!(PatternSet::compile(&rules).is_err());
    }
}
