//! Shared domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::EngineError;

/// Identifier of a generated application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub i64);

impl AppId {
    /// Reject non-positive identifiers before any side effect happens.
    pub fn validate(self) -> Result<Self, EngineError> {
        if self.0 <= 0 {
            return Err(EngineError::Validation(format!(
                "invalid application id: {}",
                self.0
            )));
        }
        Ok(self)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Code generation strategy chosen for an application.
///
/// Fixed at creation time. The wire value doubles as the prefix of the
/// application's artifact directory (`{strategy}_{appId}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// One self-contained HTML document
    #[serde(rename = "html")]
    SingleDocument,

    /// Separate markup, style and script files
    #[serde(rename = "multi_file")]
    MultiFile,

    /// Full project written through file tools and built before publishing
    #[serde(rename = "vue_project")]
    ToolBuiltProject,
}

impl Strategy {
    /// All strategies, in routing-prompt order
    pub const ALL: [Strategy; 3] = [
        Strategy::SingleDocument,
        Strategy::MultiFile,
        Strategy::ToolBuiltProject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SingleDocument => "html",
            Strategy::MultiFile => "multi_file",
            Strategy::ToolBuiltProject => "vue_project",
        }
    }

    /// Name of the artifact directory for an application using this strategy
    pub fn artifact_dir_name(&self, app_id: AppId) -> String {
        format!("{}_{}", self.as_str(), app_id)
    }

    /// Whether publishing requires an external build step
    pub fn requires_build(&self) -> bool {
        match self {
            Strategy::SingleDocument | Strategy::MultiFile => false,
            Strategy::ToolBuiltProject => true,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "html" => Ok(Strategy::SingleDocument),
            "multi_file" => Ok(Strategy::MultiFile),
            "vue_project" => Ok(Strategy::ToolBuiltProject),
            other => Err(EngineError::UnsupportedStrategy(other.to_string())),
        }
    }
}

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl FromStr for TurnRole {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TurnRole::User),
            "assistant" | "ai" => Ok(TurnRole::Assistant),
            other => Err(EngineError::Database(format!("unknown turn role '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_wire_values() {
        assert_eq!(Strategy::SingleDocument.as_str(), "html");
        assert_eq!(Strategy::MultiFile.as_str(), "multi_file");
        assert_eq!(Strategy::ToolBuiltProject.as_str(), "vue_project");

        let json = serde_json::to_string(&Strategy::ToolBuiltProject).unwrap();
        assert_eq!(json, "\"vue_project\"");
    }

    #[test]
    fn test_strategy_parse_rejects_unknown() {
        assert_eq!("multi_file".parse::<Strategy>().unwrap(), Strategy::MultiFile);
        let err = "react_native".parse::<Strategy>().unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedStrategy(v) if v == "react_native"));
    }

    #[test]
    fn test_artifact_dir_name() {
        assert_eq!(
            Strategy::SingleDocument.artifact_dir_name(AppId(12)),
            "html_12"
        );
        assert_eq!(
            Strategy::ToolBuiltProject.artifact_dir_name(AppId(3)),
            "vue_project_3"
        );
    }

    #[test]
    fn test_only_projects_require_build() {
        assert!(!Strategy::SingleDocument.requires_build());
        assert!(!Strategy::MultiFile.requires_build());
        assert!(Strategy::ToolBuiltProject.requires_build());
    }

    #[test]
    fn test_app_id_validation() {
        assert!(AppId(1).validate().is_ok());
        assert!(matches!(
            AppId(0).validate(),
            Err(EngineError::Validation(_))
        ));
        assert!(AppId(-5).validate().is_err());
    }

    #[test]
    fn test_turn_role_parse() {
        assert_eq!("user".parse::<TurnRole>().unwrap(), TurnRole::User);
        assert_eq!("ai".parse::<TurnRole>().unwrap(), TurnRole::Assistant);
        assert!("system".parse::<TurnRole>().is_err());
    }
}
