//! Data versions and their metadata record.

use crate::domain::date_iterator::DateParameters;
use crate::domain::error::QuantwalkError;
use crate::domain::universe::UniverseArgs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstructorType {
    Universe,
    #[serde(alias = "etfs")]
    Ids,
    Indexes,
}

impl ConstructorType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "universe" => Some(ConstructorType::Universe),
            "ids" | "etfs" => Some(ConstructorType::Ids),
            "indexes" | "indices" => Some(ConstructorType::Indexes),
            _ => None,
        }
    }
}

impl fmt::Display for ConstructorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstructorType::Universe => "universe",
            ConstructorType::Ids => "ids",
            ConstructorType::Indexes => "indexes",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterArguments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universe: Option<UniverseArgs>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub features: Vec<String>,
    pub constructor_type: ConstructorType,
    pub start_time: String,
    pub strategy_name: String,
    pub version: String,
    pub git_branch: String,
    pub git_commit: String,
    pub description: String,
    pub date_parameters: Option<DateParameters>,
    pub filter_arguments: FilterArguments,
    pub max_date: Option<String>,
    #[serde(default)]
    pub newly_created_files: Vec<String>,
}

impl VersionMetadata {
    pub fn to_json(&self) -> Result<String, QuantwalkError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, QuantwalkError> {
        serde_json::from_str(text).map_err(|e| QuantwalkError::Metadata {
            reason: e.to_string(),
        })
    }
}

pub fn version_name(number: u32) -> String {
    format!("version_{:03}", number)
}

pub fn parse_version_number(name: &str) -> Option<u32> {
    name.strip_prefix("version_")?.parse().ok()
}

/// Name following the highest existing `version_NNN`.
pub fn next_version_name<S: AsRef<str>>(existing: &[S]) -> String {
    let next = existing
        .iter()
        .filter_map(|n| parse_version_number(n.as_ref()))
        .max()
        .map_or(1, |n| n + 1);
    version_name(next)
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Current branch and commit, `"unknown"` outside a git checkout.
pub fn git_info() -> (String, String) {
    let branch = git_output(&["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(|| "unknown".into());
    let commit = git_output(&["rev-parse", "HEAD"]).unwrap_or_else(|| "unknown".into());
    (branch, commit)
}
