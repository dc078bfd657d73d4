//! Security utilities for tsbridge.
//!
//! Credentials for backends are held in [`SecureString`], and every tag value
//! that ends up as a directory or file name goes through [`PathSecurity`].

use crate::error::{Result, TsdbError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A secure string that automatically clears its contents when dropped.
#[derive(Clone, Default, ZeroizeOnDrop)]
pub struct SecureString(String);

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureString(***)")
    }
}

impl SecureString {
    /// Create a new secure string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the string value. Use carefully and avoid storing the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true when no secret has been configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert to a regular string. The SecureString will be zeroized.
    pub fn into_string(mut self) -> String {
        let value = std::mem::take(&mut self.0);
        self.0.zeroize();
        value
    }
}

impl From<String> for SecureString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecureString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// Secrets are accepted from config files but never written back out.
impl Serialize for SecureString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

impl<'de> Deserialize<'de> for SecureString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecureString)
    }
}

/// Validation of values that become filesystem path segments.
pub struct PathSecurity;

impl PathSecurity {
    /// Maximum length of a single directory or file name segment.
    pub const MAX_SEGMENT_LENGTH: usize = 255;

    /// Validates a value that will be used verbatim as one path segment.
    ///
    /// Rejects empty values, `.`/`..`, separators, NUL bytes and control
    /// characters so a tag value can never escape the configured base directory.
    pub fn validate_segment(segment: &str) -> Result<()> {
        Self::validate_name(segment, &['/', '\\'])
    }

    /// Validates an encoded RRD file name.
    ///
    /// Same rules as [`PathSecurity::validate_segment`] except that `\` is
    /// allowed, since the tag codec uses it as its escape character.
    pub fn validate_file_name(name: &str) -> Result<()> {
        Self::validate_name(name, &['/'])
    }

    fn validate_name(segment: &str, separators: &[char]) -> Result<()> {
        if segment.is_empty() {
            return Err(TsdbError::Security(
                "Path segment cannot be empty".to_string(),
            ));
        }

        if segment == "." || segment == ".." {
            return Err(TsdbError::Security(format!(
                "Path segment '{segment}' is not allowed"
            )));
        }

        if segment.len() > Self::MAX_SEGMENT_LENGTH {
            return Err(TsdbError::Security(format!(
                "Path segment too long (max {} bytes)",
                Self::MAX_SEGMENT_LENGTH
            )));
        }

        if segment
            .chars()
            .any(|c| separators.contains(&c) || c == '\0' || c.is_control())
        {
            return Err(TsdbError::Security(format!(
                "Path segment '{}' contains a separator or control character",
                segment.escape_default()
            )));
        }

        Ok(())
    }

    /// Strips every character that is not safe in a file name.
    ///
    /// Keeps ASCII alphanumerics, `_`, `-` and `.`, and drops leading dots so the
    /// result is never hidden or a relative path component.
    pub fn sanitize_file_stem(name: &str) -> String {
        let kept: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            .collect();
        kept.trim_start_matches('.').to_string()
    }
}
