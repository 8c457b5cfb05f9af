//! Text and identifier validation.
//!
//! User input is always sanitized first and validated second: stripping markup
//! can move a string across either length threshold, so the checks apply to
//! what would actually be stored.

use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

/// Maximum todo length, in characters, after sanitization and trimming.
pub const MAX_TODO_LENGTH: usize = 500;

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("SCRIPT_BLOCK: invalid regex pattern")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("TAG: invalid regex pattern"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("WHITESPACE: invalid regex pattern"));

// 8-4-4-4-12 hex groups, version nibble 4, variant nibble 8/9/a/b.
static UUID_V4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("UUID_V4: invalid regex pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Todo text cannot be empty.")]
    Empty,

    #[error("Todo text must be {max} characters or less.")]
    TooLong { max: usize, len: usize },

    #[error("Todo ID must be a valid string")]
    MissingId,

    #[error("Todo ID must be a valid UUID")]
    InvalidId(String),
}

/// Strips script blocks and tag-like markup, collapses whitespace runs into a
/// single space and trims the result.
pub fn sanitize(raw: &str) -> String {
    let without_scripts = SCRIPT_BLOCK.replace_all(raw, "");
    let without_tags = TAG.replace_all(&without_scripts, "");
    WHITESPACE
        .replace_all(&without_tags, " ")
        .trim()
        .to_string()
}

/// Trims `raw` and checks it against the length rules, returning the trimmed
/// text on success.
pub fn validate_text(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }

    let len = trimmed.chars().count();
    if len > MAX_TODO_LENGTH {
        return Err(ValidationError::TooLong {
            max: MAX_TODO_LENGTH,
            len,
        });
    }

    Ok(trimmed.to_string())
}

/// The single entry point used for any text headed for storage.
pub fn validate_and_sanitize(raw: &str) -> Result<String, ValidationError> {
    validate_text(&sanitize(raw))
}

pub fn validate_id(id: &str) -> Result<Uuid, ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::MissingId);
    }
    if !UUID_V4.is_match(id) {
        return Err(ValidationError::InvalidId(id.to_string()));
    }
    Uuid::parse_str(id).map_err(|_| ValidationError::InvalidId(id.to_string()))
}

pub fn is_empty(text: &str) -> bool {
    text.trim().is_empty()
}

pub fn is_text_too_long(text: &str, limit: usize) -> bool {
    text.trim().chars().count() > limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_blank_text_is_rejected() {
        assert_eq!(validate_text(""), Err(ValidationError::Empty));
        assert_eq!(validate_text("   "), Err(ValidationError::Empty));
        assert_eq!(validate_text("\t\n"), Err(ValidationError::Empty));
    }

    #[test]
    fn text_over_the_limit_is_rejected() {
        let long = "a".repeat(MAX_TODO_LENGTH + 1);
        assert_eq!(
            validate_text(&long),
            Err(ValidationError::TooLong { max: 500, len: 501 })
        );
        assert!(validate_text(&"a".repeat(MAX_TODO_LENGTH)).is_ok());
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let accented = "é".repeat(MAX_TODO_LENGTH);
        assert!(accented.len() > MAX_TODO_LENGTH);
        assert!(validate_text(&accented).is_ok());
    }

    #[test]
    fn valid_text_is_trimmed() {
        assert_eq!(validate_text(" hello "), Ok("hello".to_string()));
    }

    #[test]
    fn sanitize_strips_tags() {
        assert_eq!(sanitize("<b>hi</b>"), "hi");
        assert_eq!(sanitize("<a href=\"x\">link</a> text"), "link text");
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize("a   b"), "a b");
        assert_eq!(sanitize("  a \n\t b  "), "a b");
    }

    #[test]
    fn sanitize_drops_script_blocks_with_their_body() {
        assert_eq!(sanitize("ok<script>alert('x')</script> done"), "ok done");
        assert_eq!(
            sanitize("<SCRIPT type=\"text/javascript\">\nlet a = 1;\n</SCRIPT>kept"),
            "kept"
        );
    }

    #[test]
    fn sanitizing_can_leave_nothing_behind() {
        assert_eq!(
            validate_and_sanitize("<br/><hr>"),
            Err(ValidationError::Empty)
        );
    }

    #[test]
    fn sanitizing_can_bring_text_under_the_limit() {
        let raw = format!("<em>{}</em>", "x".repeat(MAX_TODO_LENGTH - 2));
        assert!(raw.chars().count() > MAX_TODO_LENGTH);
        assert_eq!(
            validate_and_sanitize(&raw).map(|s| s.len()),
            Ok(MAX_TODO_LENGTH - 2)
        );
    }

    #[test]
    fn validates_uuid_v4_ids() {
        let id = "3f2b8c1e-9a4d-4e6f-8b7a-1c2d3e4f5a6b";
        assert_eq!(validate_id(id).unwrap().to_string(), id);
        assert!(validate_id(&id.to_uppercase()).is_ok());

        assert_eq!(validate_id(""), Err(ValidationError::MissingId));
        assert!(validate_id("nonexistent-id").is_err());
        // version 1
        assert!(validate_id("3f2b8c1e-9a4d-1e6f-8b7a-1c2d3e4f5a6b").is_err());
        // variant nibble 'c'
        assert!(validate_id("3f2b8c1e-9a4d-4e6f-cb7a-1c2d3e4f5a6b").is_err());
    }

    #[test]
    fn helpers_ignore_surrounding_whitespace() {
        assert!(is_empty("  "));
        assert!(!is_empty(" x "));
        assert!(!is_text_too_long("  abc  ", 3));
        assert!(is_text_too_long("abcd", 3));
    }
}
