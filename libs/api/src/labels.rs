//! Label sets and selectors.
//!
//! A selector is a conjunction of requirements over a `string → string` map.
//! The surface syntax is the comma-joined form accepted on the `labels=` and
//! `fields=` query parameters: `k=v`, `k==v`, `k!=v`, `k in (a,b)`,
//! `k notin (a,b)`, `k` (present), `!k` (absent). An empty selector matches
//! every set.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub type Labels = BTreeMap<String, String>;

/// One term of a selector conjunction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &Labels) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(k, values) => !labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Requirement::Equals(k, _)
            | Requirement::NotEquals(k, _)
            | Requirement::In(k, _)
            | Requirement::NotIn(k, _)
            | Requirement::Exists(k)
            | Requirement::DoesNotExist(k) => k,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(k, v) => write!(f, "{k}={v}"),
            Requirement::NotEquals(k, v) => write!(f, "{k}!={v}"),
            Requirement::In(k, vs) => {
                write!(f, "{k} in ({})", vs.iter().cloned().collect::<Vec<_>>().join(","))
            }
            Requirement::NotIn(k, vs) => {
                write!(f, "{k} notin ({})", vs.iter().cloned().collect::<Vec<_>>().join(","))
            }
            Requirement::Exists(k) => write!(f, "{k}"),
            Requirement::DoesNotExist(k) => write!(f, "!{k}"),
        }
    }
}

/// Conjunction of [`Requirement`]s.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// The selector that matches everything.
    pub fn everything() -> Selector {
        Selector::default()
    }

    /// Exact-match selector over a label map, the form replication
    /// controllers and services store.
    pub fn from_labels(labels: &Labels) -> Selector {
        Selector {
            requirements: labels
                .iter()
                .map(|(k, v)| Requirement::Equals(k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Split on commas that are not inside an `in (…)` value list.
    fn split_terms(s: &str) -> Vec<&str> {
        let mut terms = Vec::new();
        let mut depth = 0usize;
        let mut start = 0usize;
        for (i, c) in s.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    terms.push(&s[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        terms.push(&s[start..]);
        terms
    }

    fn parse_term(term: &str) -> Result<Requirement> {
        let invalid = || Error::Decode(format!("invalid selector term {term:?}"));

        if let Some(key) = term.strip_prefix('!') {
            let key = key.trim();
            if key.is_empty() {
                return Err(invalid());
            }
            return Ok(Requirement::DoesNotExist(key.to_string()));
        }
        if let Some((key, rest)) = term.split_once("!=") {
            return Ok(Requirement::NotEquals(
                non_empty(key.trim(), invalid)?,
                rest.trim().to_string(),
            ));
        }
        if let Some((key, rest)) = term.split_once("==") {
            return Ok(Requirement::Equals(
                non_empty(key.trim(), invalid)?,
                rest.trim().to_string(),
            ));
        }
        if let Some((key, rest)) = split_set_op(term, " notin ") {
            return Ok(Requirement::NotIn(
                non_empty(key.trim(), invalid)?,
                parse_values(rest, invalid)?,
            ));
        }
        if let Some((key, rest)) = split_set_op(term, " in ") {
            return Ok(Requirement::In(
                non_empty(key.trim(), invalid)?,
                parse_values(rest, invalid)?,
            ));
        }
        if let Some((key, rest)) = term.split_once('=') {
            return Ok(Requirement::Equals(
                non_empty(key.trim(), invalid)?,
                rest.trim().to_string(),
            ));
        }
        Ok(Requirement::Exists(non_empty(term.trim(), invalid)?))
    }
}

fn non_empty(s: &str, invalid: impl Fn() -> Error) -> Result<String> {
    if s.is_empty() {
        return Err(invalid());
    }
    Ok(s.to_string())
}

fn split_set_op<'a>(term: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let idx = term.find(op)?;
    Some((&term[..idx], &term[idx + op.len()..]))
}

fn parse_values(rest: &str, invalid: impl Fn() -> Error) -> Result<BTreeSet<String>> {
    let rest = rest.trim();
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(&invalid)?;
    let values: BTreeSet<String> = inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err(invalid());
    }
    Ok(values)
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Selector> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Selector::everything());
        }
        let requirements = Selector::split_terms(s)
            .into_iter()
            .map(|t| Selector::parse_term(t.trim()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Selector { requirements })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", terms.join(","))
    }
}

/// True when `required` is a subset of `labels`. Used by the scheduler's
/// node-selector predicate.
pub fn subset(required: &Labels, labels: &Labels) -> bool {
    required.iter().all(|(k, v)| labels.get(k) == Some(v))
}
