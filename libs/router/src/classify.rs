use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    OpenResource,
    RevealFile,
    Notification,
    Message,
    Automation,
    General,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; 6] = [
        Self::OpenResource,
        Self::RevealFile,
        Self::Notification,
        Self::Message,
        Self::Automation,
        Self::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenResource => "open_resource",
            Self::RevealFile => "reveal_file",
            Self::Notification => "notification",
            Self::Message => "message",
            Self::Automation => "automation",
            Self::General => "general",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClassificationRule {
    pub category: ActionCategory,
    /// Lowercase substrings; any match selects the category.
    pub triggers: &'static [&'static str],
}

/// Ordered: the first rule with a matching trigger wins.
pub const CLASSIFICATION_RULES: &[ClassificationRule] = &[
    ClassificationRule {
        category: ActionCategory::OpenResource,
        triggers: &["open ", "open_url", "browse", "http://", "https://", "url", "launch"],
    },
    ClassificationRule {
        category: ActionCategory::RevealFile,
        triggers: &["reveal", "finder", "show file", "show the file", "locate file"],
    },
    ClassificationRule {
        category: ActionCategory::Notification,
        triggers: &["notify", "notification", "alert", "remind"],
    },
    ClassificationRule {
        category: ActionCategory::Message,
        triggers: &["send message", "message", "reply", "telegram", "slack", "dm "],
    },
    ClassificationRule {
        category: ActionCategory::Automation,
        triggers: &["automation", "automate", "shortcut", "workflow", "script", "run "],
    },
];

/// Classify a proposal from its title and rationale text.
pub fn classify(title: &str, rationale: &str) -> ActionCategory {
    let text = format!("{title} {rationale}").to_lowercase();
    CLASSIFICATION_RULES
        .iter()
        .find(|rule| rule.triggers.iter().any(|trigger| text.contains(trigger)))
        .map_or(ActionCategory::General, |rule| rule.category)
}
