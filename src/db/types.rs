use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::Type;

/// Closed set of exam lifecycle states. Ids come from the `exam_states` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateName {
    Active,
    Inactive,
    Finished,
}

impl StateName {
    pub const ALL: [StateName; 3] = [StateName::Active, StateName::Inactive, StateName::Finished];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "closereason", rename_all = "lowercase")]
pub enum CloseReason {
    /// The student finished the attempt.
    Submitted,
    /// The exam window ended and the scheduler closed the attempt.
    Forced,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Forced => "forced",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "lifecyclejobkind", rename_all = "lowercase")]
pub enum JobKind {
    Start,
    End,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
        }
    }

    /// Job-table key: the exam id for the end action, `exam_id + "start"` for the start action.
    pub fn key_for(self, exam_id: &str) -> String {
        match self {
            Self::Start => format!("{exam_id}start"),
            Self::End => exam_id.to_string(),
        }
    }
}
