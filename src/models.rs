use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single task record. This is the only persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: Uuid,
    pub text: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields that may be overridden on an existing todo.
///
/// `id` and `created_at` are deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoChanges {
    pub text: Option<String>,
    pub completed: Option<bool>,
}

impl TodoChanges {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            completed: None,
        }
    }

    pub fn completed(completed: bool) -> Self {
        Self {
            text: None,
            completed: Some(completed),
        }
    }
}

/// View-level selector over the collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    #[default]
    All,
    Active,
    Completed,
}

impl Filter {
    pub const ALL: [Filter; 3] = [Filter::All, Filter::Active, Filter::Completed];

    pub fn as_str(self) -> &'static str {
        match self {
            Filter::All => "all",
            Filter::Active => "active",
            Filter::Completed => "completed",
        }
    }

    pub fn matches(self, todo: &Todo) -> bool {
        match self {
            Filter::All => true,
            Filter::Active => !todo.completed,
            Filter::Completed => todo.completed,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown filter '{0}', expected one of: all, active, completed")]
pub struct ParseFilterError(pub String);

impl FromStr for Filter {
    type Err = ParseFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Filter::All),
            "active" => Ok(Filter::Active),
            "completed" => Ok(Filter::Completed),
            _ => Err(ParseFilterError(s.to_string())),
        }
    }
}

/// Derived statistics, always recomputed from the live collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TodoCounts {
    pub all: usize,
    pub active: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "NOT_FOUND_ERROR")]
    NotFound,
    #[serde(rename = "STORAGE_ERROR")]
    Storage,
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

impl ErrorKind {
    /// Whether re-invoking the operation may succeed. A missing id means the
    /// caller is holding a stale view, so retrying cannot help.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::NotFound)
    }
}

/// An error as data, as surfaced to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorState {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub retryable: bool,
}

impl ErrorState {
    pub fn new(kind: ErrorKind, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp,
            retryable: kind.is_retryable(),
        }
    }
}

/// The `(loading, error, todos)` tuple observed by subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TodoState {
    pub loading: bool,
    pub error: Option<ErrorState>,
    pub todos: Vec<Todo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Todo {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        Todo {
            id: Uuid::parse_str("3f2b8c1e-9a4d-4e6f-8b7a-1c2d3e4f5a6b").unwrap(),
            text: "Buy milk".to_string(),
            completed: false,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn todo_serializes_with_camel_case_fields() {
        let value = serde_json::to_value(sample()).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object["id"], "3f2b8c1e-9a4d-4e6f-8b7a-1c2d3e4f5a6b");
        assert_eq!(object["text"], "Buy milk");
        assert_eq!(object["completed"], false);
        assert!(object.contains_key("createdAt"));
        assert!(object.contains_key("updatedAt"));
    }

    #[test]
    fn todo_decodes_browser_iso_timestamps() {
        let json = r#"{
            "id": "3f2b8c1e-9a4d-4e6f-8b7a-1c2d3e4f5a6b",
            "text": "Buy milk",
            "completed": true,
            "createdAt": "2024-03-01T09:30:00.000Z",
            "updatedAt": "2024-03-01T10:00:00.000Z"
        }"#;
        let todo: Todo = serde_json::from_str(json).unwrap();
        assert!(todo.completed);
        assert_eq!(todo.created_at, sample().created_at);
    }

    #[test]
    fn filter_parses_case_insensitively() {
        assert_eq!("Active".parse::<Filter>(), Ok(Filter::Active));
        assert_eq!(" completed ".parse::<Filter>(), Ok(Filter::Completed));
        assert!("done".parse::<Filter>().is_err());
        for filter in Filter::ALL {
            assert_eq!(filter.to_string().parse::<Filter>(), Ok(filter));
        }
    }

    #[test]
    fn error_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(ErrorKind::NotFound).unwrap(),
            "NOT_FOUND_ERROR"
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::Storage).unwrap(),
            "STORAGE_ERROR"
        );
    }

    #[test]
    fn only_not_found_is_final() {
        let now = Utc::now();
        assert!(!ErrorState::new(ErrorKind::NotFound, "gone", now).retryable);
        assert!(ErrorState::new(ErrorKind::Validation, "bad", now).retryable);
        assert!(ErrorState::new(ErrorKind::Storage, "full", now).retryable);
        assert!(ErrorState::new(ErrorKind::Unknown, "?", now).retryable);
    }
}
