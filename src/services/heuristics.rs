//! Ordered regex rule tables.
//!
//! Code detection, thought classification, file references and satisfaction
//! signals are all lists of `(pattern, label)` rules evaluated in order, so
//! each table can be swapped out or unit-tested without the stream plumbing.

use regex::Regex;

/// One pattern with the label it assigns.
#[derive(Debug, Clone)]
pub struct Rule<L> {
    pattern: Regex,
    name: String,
    label: L,
}

impl<L: Copy> Rule<L> {
    pub fn new(pattern: &str, label: L) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            name: pattern.to_string(),
            label,
        })
    }

    /// Case-insensitive literal substring match, named by the keyword itself.
    pub fn keyword(word: &str, label: L) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&format!("(?i){}", regex::escape(word)))?,
            name: word.to_string(),
            label,
        })
    }

    pub fn label(&self) -> L {
        self.label
    }

    /// Human-readable name: the keyword, or the pattern source.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    /// First capture group of the first match.
    pub fn capture<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

/// Rules evaluated in insertion order.
#[derive(Debug, Clone)]
pub struct RuleSet<L> {
    rules: Vec<Rule<L>>,
}

impl<L: Copy> Default for RuleSet<L> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<L: Copy> RuleSet<L> {
    pub fn new(rules: Vec<Rule<L>>) -> Self {
        Self { rules }
    }

    /// Build from static pattern tables. Panics on an invalid pattern, so
    /// only use it with literals covered by tests.
    pub fn from_patterns(patterns: &[(&str, L)]) -> Self {
        let rules = patterns
            .iter()
            .map(|(pattern, label)| Rule::new(pattern, *label).unwrap())
            .collect();
        Self { rules }
    }

    /// Keyword counterpart of [`RuleSet::from_patterns`].
    pub fn from_keywords(words: &[(&str, L)]) -> Self {
        let rules = words
            .iter()
            .map(|(word, label)| Rule::keyword(word, *label).unwrap())
            .collect();
        Self { rules }
    }

    pub fn push(&mut self, rule: Rule<L>) {
        self.rules.push(rule);
    }

    /// Append all rules of `other` after this set's rules.
    pub fn extend(&mut self, other: RuleSet<L>) {
        self.rules.extend(other.rules);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.rules.iter().any(|r| r.is_match(text))
    }

    /// Label of the first matching rule.
    pub fn classify(&self, text: &str) -> Option<L> {
        self.rules.iter().find(|r| r.is_match(text)).map(|r| r.label)
    }

    /// Every matching rule, in order.
    pub fn matches<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a Rule<L>> + 'a {
        self.rules.iter().filter(move |r| r.is_match(text))
    }

    /// First capture group of the first rule that captures anything.
    pub fn first_capture<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.rules.iter().find_map(|r| r.capture(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Color {
        Red,
        Blue,
    }

    #[test]
    fn test_classify_uses_first_match() {
        let rules = RuleSet::from_patterns(&[("apple", Color::Red), ("a", Color::Blue)]);
        assert_eq!(rules.classify("apple pie"), Some(Color::Red));
        assert_eq!(rules.classify("banana"), Some(Color::Blue));
        assert_eq!(rules.classify("kiwi"), None);
    }

    #[test]
    fn test_matches_returns_all_in_order() {
        let rules = RuleSet::from_patterns(&[("x", Color::Red), ("y", Color::Blue), ("z", Color::Red)]);
        let names: Vec<&str> = rules.matches("xz").map(|r| r.name()).collect();
        assert_eq!(names, vec!["x", "z"]);
    }

    #[test]
    fn test_keyword_is_literal_and_case_insensitive() {
        let rule = Rule::keyword("SHIP IT", Color::Red).unwrap();
        assert!(rule.is_match("ok, ship it!"));
        assert_eq!(rule.name(), "SHIP IT");

        let dotted = Rule::keyword("a.b", Color::Blue).unwrap();
        assert!(!dotted.is_match("axb"));
    }

    #[test]
    fn test_first_capture() {
        let rules = RuleSet::from_patterns(&[(r"in (\w+)", ()), (r"at (\w+)", ())]);
        assert_eq!(rules.first_capture("look at this"), Some("this"));
        assert_eq!(rules.first_capture("nothing"), None);
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(Rule::new("(unclosed", Color::Red).is_err());
    }
}
