//! Attribute match expressions.
//!
//! A filter is a conjunction of [`MatchAttribute`] predicates, each testing
//! one host attribute by equality or regular expression, optionally negated.
//! Values parsed from text carry `fuzzy = true` so numeric and boolean
//! attributes compare by their string form.

use regex::Regex;

use crate::value::Value;

/// The right-hand side of a single attribute predicate.
#[derive(Debug, Clone)]
pub enum MatchValue {
    /// Compare against a concrete value
    Value(Value),
    /// Compare against a compiled regular expression
    Regex(Regex),
}

/// A single attribute predicate.
#[derive(Debug, Clone)]
pub struct MatchAttribute {
    /// Attribute name to look up on the host
    pub name: String,
    /// What to compare against
    pub value: MatchValue,
    /// Invert the final outcome
    pub negate: bool,
    /// The value came from text; coerce both sides to string
    pub fuzzy: bool,
}

/// A conjunctive (AND) list of predicates.
pub type MatchAttributes = Vec<MatchAttribute>;

impl MatchAttribute {
    /// `name = value`, fuzzily typed (text origin).
    pub fn matching(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: MatchValue::Value(value.into()),
            negate: false,
            fuzzy: true,
        }
    }

    /// `name != value`, fuzzily typed.
    pub fn not_matching(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            negate: true,
            ..Self::matching(name, value)
        }
    }

    /// `name =~ pattern`
    pub fn matching_regex(name: impl Into<String>, regex: Regex) -> Self {
        Self {
            name: name.into(),
            value: MatchValue::Regex(regex),
            negate: false,
            fuzzy: false,
        }
    }

    /// `name !~ pattern`
    pub fn not_matching_regex(name: impl Into<String>, regex: Regex) -> Self {
        Self {
            negate: true,
            ..Self::matching_regex(name, regex)
        }
    }

    /// Tests the predicate against one host attribute value.
    ///
    /// List-valued attributes match when any element matches; `negate`
    /// inverts the final outcome.
    pub fn matches(&self, value: &Value) -> bool {
        let hit = match value {
            Value::List(items) => items.iter().any(|item| self.matches_scalar(item)),
            scalar => self.matches_scalar(scalar),
        };
        hit != self.negate
    }

    fn matches_scalar(&self, value: &Value) -> bool {
        match &self.value {
            MatchValue::Regex(re) => value
                .coerce_str()
                .map(|s| re.is_match(&s))
                .unwrap_or(false),
            MatchValue::Value(expected) => {
                if self.fuzzy {
                    match (value.coerce_str(), expected.coerce_str()) {
                        (Some(a), Some(b)) => a == b,
                        _ => false,
                    }
                } else {
                    value == expected
                }
            }
        }
    }
}

// Regexes compare by pattern so parsed command queues can be compared in
// tests and by the duplicate-command check.
impl PartialEq for MatchAttribute {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name || self.negate != other.negate || self.fuzzy != other.fuzzy {
            return false;
        }
        match (&self.value, &other.value) {
            (MatchValue::Value(a), MatchValue::Value(b)) => a == b,
            (MatchValue::Regex(a), MatchValue::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl std::fmt::Display for MatchAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match (&self.value, self.negate) {
            (MatchValue::Regex(_), false) => "=~",
            (MatchValue::Regex(_), true) => "!~",
            (MatchValue::Value(_), false) => "=",
            (MatchValue::Value(_), true) => "!=",
        };
        match &self.value {
            MatchValue::Regex(re) => write!(f, "{}{}{}", self.name, op, re.as_str()),
            MatchValue::Value(v) => write!(f, "{}{}{}", self.name, op, v),
        }
    }
}
