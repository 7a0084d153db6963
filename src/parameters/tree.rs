//! The parameter tree: dotted paths to date-indexed policy values.

use super::scale::{MarginalScale, ScaleSeries};
use crate::compute::ComputationError;
use crate::period::Period;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParameterLoadError {
    #[error("Failed to read parameter file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed parameter document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Parameter document root must be a branch")]
    RootNotBranch,
}

/// Revisions of a single value. A `null` revision retires the parameter from that date on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterSeries {
    pub values: BTreeMap<NaiveDate, Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl ParameterSeries {
    pub fn new(values: impl IntoIterator<Item = (NaiveDate, f64)>) -> Self {
        Self {
            values: values.into_iter().map(|(d, v)| (d, Some(v))).collect(),
            ..Default::default()
        }
    }

    /// The latest revision at or before `date`, if it carries a value.
    pub fn value_at(&self, date: NaiveDate) -> Option<f64> {
        self.values.range(..=date).next_back().and_then(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterNode {
    Value(ParameterSeries),
    Scale(ScaleSeries),
    Branch(BTreeMap<String, ParameterNode>),
}

impl ParameterNode {
    fn kind(&self) -> &'static str {
        match self {
            ParameterNode::Value(_) => "value",
            ParameterNode::Scale(_) => "scale",
            ParameterNode::Branch(_) => "branch",
        }
    }
}

/// Immutable policy parameters for a simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTree {
    root: ParameterNode,
}

impl Default for ParameterTree {
    fn default() -> Self {
        Self { root: ParameterNode::Branch(BTreeMap::new()) }
    }
}

impl ParameterTree {
    pub fn new(root: BTreeMap<String, ParameterNode>) -> Self {
        Self { root: ParameterNode::Branch(root) }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ParameterLoadError> {
        let root: ParameterNode = serde_json::from_str(json)?;
        Self::from_root(root)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ParameterLoadError> {
        let file = std::fs::File::open(path)?;
        let root: ParameterNode = serde_json::from_reader(std::io::BufReader::new(file))?;
        Self::from_root(root)
    }

    fn from_root(root: ParameterNode) -> Result<Self, ParameterLoadError> {
        match root {
            ParameterNode::Branch(_) => Ok(Self { root }),
            _ => Err(ParameterLoadError::RootNotBranch),
        }
    }

    /// Inserts or replaces the node at `path`, creating intermediate branches.
    /// Used to build reform scenarios from a baseline tree.
    pub fn set(&mut self, path: &str, node: ParameterNode) -> Result<(), ComputationError> {
        let mut current = &mut self.root;
        let mut walked = String::new();
        for segment in path.split('.') {
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(segment);
            let ParameterNode::Branch(children) = current else {
                return Err(ComputationError::ParameterType { path: walked, expected: "branch" });
            };
            current = children
                .entry(segment.to_string())
                .or_insert_with(|| ParameterNode::Branch(BTreeMap::new()));
        }
        *current = node;
        Ok(())
    }

    /// Resolves a dotted path to its node.
    pub fn node(&self, path: &str) -> Result<&ParameterNode, ComputationError> {
        resolve(&self.root, "", path)
    }

    /// The value at `path` in effect at the start of `period`.
    pub fn get(&self, path: &str, period: Period) -> Result<f64, ComputationError> {
        self.at(period).value(path)
    }

    pub fn at(&self, period: Period) -> ParameterSnapshot<'_> {
        ParameterSnapshot { node: &self.root, path: String::new(), instant: period.start() }
    }
}

fn join(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{prefix}.{path}")
    }
}

fn resolve<'a>(root: &'a ParameterNode, prefix: &str, path: &str) -> Result<&'a ParameterNode, ComputationError> {
    let mut current = root;
    if path.is_empty() {
        return Ok(current);
    }
    for segment in path.split('.') {
        current = match current {
            ParameterNode::Branch(children) => children.get(segment),
            _ => None,
        }
        .ok_or_else(|| ComputationError::ParameterNotFound { path: join(prefix, path) })?;
    }
    Ok(current)
}

/// A view of the parameter tree at one instant, rooted at some sub-tree.
#[derive(Debug, Clone)]
pub struct ParameterSnapshot<'a> {
    node: &'a ParameterNode,
    path: String,
    instant: NaiveDate,
}

impl<'a> ParameterSnapshot<'a> {
    pub fn instant(&self) -> NaiveDate {
        self.instant
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Descends into the sub-tree at `path`.
    pub fn child(&self, path: &str) -> Result<ParameterSnapshot<'a>, ComputationError> {
        let node = resolve(self.node, &self.path, path)?;
        let full = join(&self.path, path);
        match node {
            ParameterNode::Branch(_) => Ok(ParameterSnapshot { node, path: full, instant: self.instant }),
            _ => Err(ComputationError::ParameterType { path: full, expected: "branch" }),
        }
    }

    pub fn keys(&self) -> Vec<&'a str> {
        match self.node {
            ParameterNode::Branch(children) => children.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn value(&self, path: &str) -> Result<f64, ComputationError> {
        let full = join(&self.path, path);
        match resolve(self.node, &self.path, path)? {
            ParameterNode::Value(series) => series
                .value_at(self.instant)
                .ok_or(ComputationError::NoEffectiveValue { path: full, date: self.instant }),
            other => {
                tracing::debug!(path = %full, kind = other.kind(), "parameter is not a value");
                Err(ComputationError::ParameterType { path: full, expected: "value" })
            }
        }
    }

    pub fn scale(&self, path: &str) -> Result<MarginalScale, ComputationError> {
        let full = join(&self.path, path);
        match resolve(self.node, &self.path, path)? {
            ParameterNode::Scale(series) => series
                .at(self.instant)
                .ok_or(ComputationError::NoEffectiveValue { path: full, date: self.instant }),
            _ => Err(ComputationError::ParameterType { path: full, expected: "scale" }),
        }
    }

    /// Per-record lookup of the child named by each record's category label.
    ///
    /// `codes` holds category indices into `labels`, as stored by categorical variables.
    pub fn by_category(&self, path: &str, codes: &[f64], labels: &[String]) -> Result<Vec<f64>, ComputationError> {
        let branch = self.child(path)?;
        let mut resolved: Vec<Option<f64>> = vec![None; labels.len()];
        codes
            .iter()
            .map(|&code| {
                let idx = code as usize;
                let label = labels.get(idx).filter(|_| code >= 0.0 && code.fract() == 0.0).ok_or_else(|| {
                    ComputationError::ParameterNotFound { path: format!("{}[{code}]", branch.path) }
                })?;
                if let Some(v) = resolved[idx] {
                    return Ok(v);
                }
                let v = branch.value(label)?;
                resolved[idx] = Some(v);
                Ok(v)
            })
            .collect()
    }
}
