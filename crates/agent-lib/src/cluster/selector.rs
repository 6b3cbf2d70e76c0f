//! Label selectors in the Kubernetes string syntax
//!
//! Selectors built through [`LabelSelector::owned`] always carry the
//! ownership requirement, so anything matched by them was created by the
//! agent.

use crate::error::ValidationError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Marks every object the agent creates
pub const MANAGED_LABEL: &str = "dcagent.io/managed";
/// Name of the service manifest an object belongs to
pub const SERVICE_LABEL: &str = "dcagent.io/service";
/// Task that produced the object
pub const TASK_LABEL: &str = "dcagent.io/task";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, set) => labels.get(k).map_or(false, |v| set.contains(v)),
            Requirement::NotIn(k, set) => labels.get(k).map_or(true, |v| !set.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Requirement::Equals(k, v) => write!(f, "{}={}", k, v),
            Requirement::NotEquals(k, v) => write!(f, "{}!={}", k, v),
            Requirement::In(k, set) => write!(f, "{} in ({})", k, join(set)),
            Requirement::NotIn(k, set) => write!(f, "{} notin ({})", k, join(set)),
            Requirement::Exists(k) => write!(f, "{}", k),
            Requirement::DoesNotExist(k) => write!(f, "!{}", k),
        }
    }
}

/// Conjunction of label requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector that matches every object
    pub fn everything() -> Self {
        Self::default()
    }

    /// Selector restricted to agent-owned objects
    pub fn owned() -> Self {
        Self::everything().equals(MANAGED_LABEL, "true")
    }

    pub fn equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::Equals(key.into(), value.into()));
        self
    }

    pub fn not_equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::NotEquals(key.into(), value.into()));
        self
    }

    /// `key notin (values)`; an empty set adds no constraint
    pub fn not_in<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        if !set.is_empty() {
            self.requirements.push(Requirement::NotIn(key.into(), set));
        }
        self
    }

    pub fn in_set<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = values.into_iter().map(Into::into).collect();
        self.requirements.push(Requirement::In(key.into(), set));
        self
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Whether the selector requires the ownership label
    pub fn is_owned(&self) -> bool {
        self.requirements
            .iter()
            .any(|r| matches!(r, Requirement::Equals(k, v) if k == MANAGED_LABEL && v == "true"))
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Parse the comma separated Kubernetes selector syntax
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let mut selector = Self::everything();
        for clause in split_clauses(input)? {
            selector.requirements.push(parse_requirement(&clause)?);
        }
        Ok(selector)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

/// Split on commas outside parentheses
fn split_clauses(input: &str) -> Result<Vec<String>, ValidationError> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for c in input.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ValidationError::Selector(input.to_string()))?;
                current.push(c);
            }
            ',' if depth == 0 => clauses.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if depth != 0 {
        return Err(ValidationError::Selector(input.to_string()));
    }
    clauses.push(current);

    Ok(clauses
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect())
}

fn parse_set(key: &str, rest: &str, clause: &str) -> Result<(String, BTreeSet<String>), ValidationError> {
    let inner = rest
        .trim()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| ValidationError::Selector(clause.to_string()))?;
    let set = inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    Ok((key.trim().to_string(), set))
}

fn parse_requirement(clause: &str) -> Result<Requirement, ValidationError> {
    if let Some((key, rest)) = clause.split_once(" notin ") {
        let (key, set) = parse_set(key, rest, clause)?;
        return Ok(Requirement::NotIn(key, set));
    }
    if let Some((key, rest)) = clause.split_once(" in ") {
        let (key, set) = parse_set(key, rest, clause)?;
        return Ok(Requirement::In(key, set));
    }
    if let Some((key, value)) = clause.split_once("!=") {
        return Ok(Requirement::NotEquals(
            key.trim().to_string(),
            value.trim().to_string(),
        ));
    }
    if let Some((key, value)) = clause.split_once("==").or_else(|| clause.split_once('=')) {
        return Ok(Requirement::Equals(
            key.trim().to_string(),
            value.trim().to_string(),
        ));
    }
    if let Some(key) = clause.strip_prefix('!') {
        return Ok(Requirement::DoesNotExist(key.trim().to_string()));
    }
    if clause.contains(char::is_whitespace) {
        return Err(ValidationError::Selector(clause.to_string()));
    }
    Ok(Requirement::Exists(clause.to_string()))
}
