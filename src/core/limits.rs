//! Normative field limits.
//!
//! These values are format-binding: records that exceed them are rejected at
//! the setter, and canonical bytes that exceed them fail to decode.

use serde::{Deserialize, Serialize};

use super::error::LimitViolation;

/// Field limits shared by entries, histories, and jacket identity.
///
/// Values are byte lengths, not character counts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_id_text_bytes: usize,
    pub max_title_bytes: usize,
    pub max_body_bytes: usize,
    pub max_tag_bytes: usize,
    pub max_attach_name_bytes: usize,
    pub max_user_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_id_text_bytes: 128,
            max_title_bytes: 128,
            max_body_bytes: 8192,
            max_tag_bytes: 128,
            max_attach_name_bytes: 255,
            max_user_bytes: 64,
        }
    }
}

impl Limits {
    pub fn check_id_text(&self, text: &str) -> Result<(), LimitViolation> {
        check_plain("id_text", text, self.max_id_text_bytes)
    }

    pub fn check_title(&self, title: &str) -> Result<(), LimitViolation> {
        check_plain("title", title, self.max_title_bytes)
    }

    pub fn check_user(&self, user: &str) -> Result<(), LimitViolation> {
        check_plain("user", user, self.max_user_bytes)
    }

    /// Body allows whitespace (including newlines) but no other control
    /// characters.
    pub fn check_body(&self, body: &str) -> Result<(), LimitViolation> {
        if body.is_empty() {
            return Err(LimitViolation::new("body", "empty"));
        }
        if body.len() > self.max_body_bytes {
            return Err(LimitViolation::new(
                "body",
                format!("{} bytes exceeds {}", body.len(), self.max_body_bytes),
            ));
        }
        for c in body.chars() {
            if c.is_control() && !c.is_whitespace() {
                return Err(LimitViolation::new("body", "contains control character"));
            }
        }
        Ok(())
    }

    /// Validates and normalizes a tag.
    ///
    /// A tag containing `:` is normalized to `prefix: suffix` (single space
    /// after the colon, surrounding whitespace stripped).
    pub fn check_tag(&self, tag: &str) -> Result<String, LimitViolation> {
        let tag = match tag.split_once(':') {
            Some((prefix, suffix)) => format!("{}: {}", prefix.trim(), suffix.trim()),
            None => tag.to_string(),
        };
        check_plain("tag", &tag, self.max_tag_bytes)?;
        if tag.contains(['/', '\\', '*', '?']) {
            return Err(LimitViolation::new("tag", "contains reserved character"));
        }
        if tag.starts_with('_') {
            return Err(LimitViolation::new("tag", "leading underscore is reserved"));
        }
        Ok(tag)
    }

    pub fn check_attach_name(&self, name: &str) -> Result<(), LimitViolation> {
        check_plain("attachment name", name, self.max_attach_name_bytes)?;
        if name.contains(['/', '\\', '*', '?']) {
            return Err(LimitViolation::new(
                "attachment name",
                "contains reserved character",
            ));
        }
        Ok(())
    }
}

fn check_plain(field: &'static str, value: &str, max: usize) -> Result<(), LimitViolation> {
    if value.is_empty() {
        return Err(LimitViolation::new(field, "empty"));
    }
    if value.len() > max {
        return Err(LimitViolation::new(
            field,
            format!("{} bytes exceeds {}", value.len(), max),
        ));
    }
    if value.chars().any(char::is_control) {
        return Err(LimitViolation::new(field, "contains control character"));
    }
    Ok(())
}
