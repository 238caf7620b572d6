//! Public link parsing
//!
//! Two forms name an object:
//!
//! - compact: `/{hash}{id}[/name]`, e.g. `/AgADbc1234/movie.mkv`
//! - query: `/{id}[/name]?hash={hash}`
//!
//! An all-digit first segment is always read as the query form.

use serde::Deserialize;

use crate::error::AppError;
use crate::streaming::SECURE_HASH_LENGTH;

/// Query parameters accepted on media links
#[derive(Debug, Default, Deserialize)]
pub struct LinkQuery {
    pub hash: Option<String>,
}

/// Object reference and capability hash taken from a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLink {
    pub message_id: i64,
    pub hash: String,
}

impl MediaLink {
    /// Parse a decoded request path (without the leading slash)
    pub fn parse(path: &str, hash_query: Option<&str>) -> Result<Self, AppError> {
        let path = path.trim_matches('/');
        let head = path.split('/').next().unwrap_or_default();

        if is_digits(head) {
            return Ok(Self {
                message_id: parse_id(head)?,
                hash: hash_query.unwrap_or_default().to_string(),
            });
        }

        if !head.is_char_boundary(SECURE_HASH_LENGTH) {
            return Err(AppError::InvalidLink);
        }
        let (hash, id) = head.split_at(SECURE_HASH_LENGTH);
        if hash.bytes().all(|b| b.is_ascii_alphanumeric()) && is_digits(id) {
            return Ok(Self {
                message_id: parse_id(id)?,
                hash: hash.to_string(),
            });
        }

        Err(AppError::InvalidLink)
    }

    /// Path of the compact form, with the display name appended when given
    pub fn compact_path(&self, name: Option<&str>) -> String {
        match name {
            Some(name) => format!("/{}{}/{}", self.hash, self.message_id, urlencoding::encode(name)),
            None => format!("/{}{}", self.hash, self.message_id),
        }
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_id(s: &str) -> Result<i64, AppError> {
    s.parse().map_err(|_| AppError::InvalidLink)
}
