//! Stack view: filtered, forward-only projection of a tree's `Stacks` field.
//!
//! Candidates are produced in field order. A candidate is exposed only when
//! every predicate holds; the predicates are a conjunction, so the selected set
//! does not depend on their order.

use super::error::StxError;
use super::tree::{self, EvaluatedTree, Fields};
use super::types::{Flags, Stack};
use regex::Regex;
use serde_json::Value;

/// Field holding the stack declarations.
pub const STACKS_FIELD: &str = "Stacks";

/// One test over a candidate (label, value).
#[derive(Debug, Clone)]
pub enum FilterPredicate {
    /// Stack label matches a regex
    NameMatches(Regex),
    /// String at `path` equals `expected`
    Equals { path: Vec<String>, expected: String },
    /// Something exists at `path`
    Exists(Vec<String>),
}

impl FilterPredicate {
    pub fn matches(&self, label: &str, value: &Value) -> bool {
        match self {
            FilterPredicate::NameMatches(re) => re.is_match(label),
            FilterPredicate::Equals { path, expected } => match tree::lookup(value, path.as_slice()) {
                Some(Value::String(s)) => s == expected,
                Some(other) => {
                    tracing::debug!(label, ?path, found = %other, "filter field is not a string");
                    false
                }
                None => false,
            },
            FilterPredicate::Exists(path) => tree::lookup(value, path.as_slice()).is_some(),
        }
    }
}

/// Conjunctive predicate chain built from operator flags.
#[derive(Debug, Clone, Default)]
pub struct StackFilter {
    predicates: Vec<FilterPredicate>,
}

impl StackFilter {
    /// Compile flags once; an invalid `--stacks` regex is fatal.
    pub fn from_flags(flags: &Flags) -> Result<Self, StxError> {
        let mut filter = Self::default();
        if let Some(pattern) = flags.stacks.as_deref().filter(|p| !p.is_empty()) {
            let re = Regex::new(pattern).map_err(|source| StxError::FilterCompile {
                flag: "--stacks",
                source,
            })?;
            filter = filter.with(FilterPredicate::NameMatches(re));
        }
        for (field, value) in [
            ("Environment", &flags.environment),
            ("RegionCode", &flags.region_code),
            ("Profile", &flags.profile),
        ] {
            if let Some(expected) = value.as_deref().filter(|v| !v.is_empty()) {
                filter = filter.with(FilterPredicate::Equals {
                    path: vec![field.to_string()],
                    expected: expected.to_string(),
                });
            }
        }
        if let Some(has) = flags.has.as_deref().filter(|p| !p.is_empty()) {
            filter = filter.with(FilterPredicate::Exists(tree::split_path(has)));
        }
        Ok(filter)
    }

    pub fn with(mut self, predicate: FilterPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn accepts(&self, label: &str, value: &Value) -> bool {
        self.predicates.iter().all(|p| p.matches(label, value))
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// Lazy cursor over the accepted stacks of one tree.
pub struct StackView<'a> {
    fields: Fields<'a>,
    filter: &'a StackFilter,
    current: Option<(&'a str, &'a Value)>,
}

impl<'a> StackView<'a> {
    /// `StacksNotFound` when the tree has no `Stacks` struct.
    pub fn new(tree: &'a EvaluatedTree, filter: &'a StackFilter) -> Result<Self, StxError> {
        let fields = tree
            .fields(&[STACKS_FIELD])
            .ok_or(StxError::StacksNotFound)?;
        Ok(Self {
            fields,
            filter,
            current: None,
        })
    }

    /// Move to the next accepted candidate. Returns `false` once exhausted.
    pub fn advance(&mut self) -> bool {
        for (label, value) in self.fields.by_ref() {
            if self.filter.accepts(label, value) {
                self.current = Some((label, value));
                return true;
            }
            tracing::trace!(label, "stack filtered out");
        }
        self.current = None;
        false
    }

    /// Raw value of the current candidate.
    pub fn current(&self) -> Option<&'a Value> {
        self.current.map(|(_, v)| v)
    }

    pub fn label(&self) -> Option<&'a str> {
        self.current.map(|(l, _)| l)
    }

    /// Decode the current candidate. `Name` defaults to the label.
    pub fn decode(&self) -> Result<Stack, StxError> {
        let (label, value) = self.current.ok_or_else(|| StxError::Decode {
            label: String::new(),
            message: "no current stack".to_string(),
        })?;
        let mut stack: Stack = tree::decode(value).map_err(|e| StxError::Decode {
            label: label.to_string(),
            message: e.to_string(),
        })?;
        if stack.name.is_empty() {
            stack.name = label.to_string();
        }
        Ok(stack)
    }
}
