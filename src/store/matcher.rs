//! Label matchers and block pruning
//!
//! [`prune`] decides, without any I/O, whether a block can contribute to a
//! query. The time test runs first; matchers on the block's external labels
//! are then resolved at block level and only the rest are handed on for
//! series-level evaluation.

use crate::block::descriptor::BlockDescriptor;
use crate::block::error::{StoreError, StoreResult};
use crate::block::types::{Labels, TimeRange};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Matcher operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOp {
    /// `name="value"`
    Equal,
    /// `name!="value"`
    NotEqual,
    /// `name=~"regex"`
    RegexMatch,
    /// `name!~"regex"`
    NotRegexMatch,
}

impl MatchOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::RegexMatch => "=~",
            Self::NotRegexMatch => "!~",
        }
    }
}

/// A predicate on the value of one label
///
/// Regular expressions are anchored at both ends and compiled once.
#[derive(Debug, Clone)]
pub struct Matcher {
    name: String,
    op: MatchOp,
    value: String,
    regex: Option<Regex>,
}

impl Matcher {
    pub fn new(name: impl Into<String>, op: MatchOp, value: impl Into<String>) -> StoreResult<Self> {
        let name = name.into();
        let value = value.into();
        let regex = match op {
            MatchOp::RegexMatch | MatchOp::NotRegexMatch => {
                let anchored = format!("^(?:{})$", value);
                Some(Regex::new(&anchored).map_err(|e| {
                    StoreError::InvalidMatcher(format!("{}{}{:?}: {}", name, op.symbol(), value, e))
                })?)
            }
            MatchOp::Equal | MatchOp::NotEqual => None,
        };
        Ok(Self {
            name,
            op,
            value,
            regex,
        })
    }

    /// Equality matcher (cannot fail)
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Equal,
            value: value.into(),
            regex: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> MatchOp {
        self.op
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Evaluate against a label value
    pub fn matches(&self, value: &str) -> bool {
        match (self.op, &self.regex) {
            (MatchOp::Equal, _) => value == self.value,
            (MatchOp::NotEqual, _) => value != self.value,
            (MatchOp::RegexMatch, Some(re)) => re.is_match(value),
            (MatchOp::NotRegexMatch, Some(re)) => !re.is_match(value),
            // Constructors always compile a regex for regex operators
            (MatchOp::RegexMatch | MatchOp::NotRegexMatch, None) => false,
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.op == other.op && self.value == other.value
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op.symbol(), self.value)
    }
}

/// Check a label set against every matcher
///
/// A label missing from the set is matched as the empty string.
pub fn matches_labels(labels: &Labels, matchers: &[Matcher]) -> bool {
    matchers
        .iter()
        .all(|m| m.matches(labels.get(m.name()).unwrap_or("")))
}

/// Outcome of pruning one block against a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pruned {
    /// Matchers left for series-level evaluation, in input order
    pub matchers: Vec<Matcher>,
    /// Whether the block can contribute any result
    pub eligible: bool,
}

impl Pruned {
    fn ineligible() -> Self {
        Self {
            matchers: Vec::new(),
            eligible: false,
        }
    }
}

/// Prune a block against a query's time range and matchers
pub fn prune(block: &BlockDescriptor, min_time: i64, max_time: i64, matchers: &[Matcher]) -> Pruned {
    prune_range(
        block.time_range(),
        block.external_labels(),
        min_time,
        max_time,
        matchers,
    )
}

/// [`prune`] over the raw block attributes
pub fn prune_range(
    range: TimeRange,
    external: &BTreeMap<String, String>,
    min_time: i64,
    max_time: i64,
    matchers: &[Matcher],
) -> Pruned {
    if !range.overlaps(min_time, max_time) {
        return Pruned::ineligible();
    }

    let mut residual = Vec::with_capacity(matchers.len());
    for matcher in matchers {
        match external.get(matcher.name()) {
            Some(value) if matcher.matches(value) => {}
            Some(_) => return Pruned::ineligible(),
            None => residual.push(matcher.clone()),
        }
    }

    Pruned {
        matchers: residual,
        eligible: true,
    }
}
