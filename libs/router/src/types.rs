use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ActionCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Evaluate and route, never execute.
    #[default]
    Shadow,
    /// Execute according to the rollout scope.
    Canary,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionScope {
    #[default]
    Test,
    Canary,
    Production,
}

impl ExecutionScope {
    pub fn promoted(self) -> Option<Self> {
        match self {
            Self::Test => Some(Self::Canary),
            Self::Canary => Some(Self::Production),
            Self::Production => None,
        }
    }

    pub fn rolled_back(self) -> Option<Self> {
        match self {
            Self::Test => None,
            Self::Canary => Some(Self::Test),
            Self::Production => Some(Self::Canary),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseModeError {
    kind: &'static str,
    value: String,
}

impl FromStr for ExecutionMode {
    type Err = ParseModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shadow" => Ok(Self::Shadow),
            "canary" => Ok(Self::Canary),
            "production" => Ok(Self::Production),
            other => Err(ParseModeError {
                kind: "execution mode",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for ExecutionScope {
    type Err = ParseModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Self::Test),
            "canary" => Ok(Self::Canary),
            "production" => Ok(Self::Production),
            other => Err(ParseModeError {
                kind: "execution scope",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shadow => "shadow",
            Self::Canary => "canary",
            Self::Production => "production",
        })
    }
}

impl fmt::Display for ExecutionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Test => "test",
            Self::Canary => "canary",
            Self::Production => "production",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    pub scope: ExecutionScope,
    /// Last value seen from the store. Informational only; `route` always
    /// re-fetches.
    pub kill_switch_enabled: bool,
}

/// How far a canary-mode execution reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStage {
    Sandbox,
    Partial,
    Full,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub title: String,
    #[serde(default)]
    pub rationale: String,
    /// Skips keyword classification when set.
    #[serde(default)]
    pub category: Option<ActionCategory>,
}

impl ActionProposal {
    pub fn new(title: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            rationale: rationale.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: ActionCategory) -> Self {
        self.category = Some(category);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub should_execute: bool,
    pub reason: String,
    pub mode: ExecutionMode,
    pub scope: ExecutionScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ActionCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canary_rollout: Option<RolloutStage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScopeTransition {
    pub success: bool,
    pub from: ExecutionScope,
    pub to: ExecutionScope,
}
