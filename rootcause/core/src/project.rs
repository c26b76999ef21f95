//! Project Namespacing
//!
//! Every incident is filed under a [`ProjectHash`]: the first 16 hex characters
//! (64 bits) of the SHA-256 digest of the project's normalized absolute path.
//! The hash is the only tenant isolation boundary in the store, and the
//! plaintext path is never written next to a record.
//!
//! Collision resistance is probabilistic. With 64 bits, the birthday bound for
//! a 1% collision chance sits around 600 million distinct projects.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Number of hex characters kept from the digest
pub const PROJECT_HASH_LEN: usize = 16;

/// Rejected project hash text
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProjectHashError {
    /// Empty input
    #[error("project hash is empty")]
    Empty,

    /// Anything other than lowercase hex digits
    #[error("project hash must be lowercase hex: {0:?}")]
    NotHex(String),
}

/// Lowercase hex identifier of a project namespace
///
/// Only hex digits are accepted, so a hash can never smuggle a `:` into the
/// persistence key layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectHash(String);

impl ProjectHash {
    /// Parse an existing hash (for example one read back from storage)
    pub fn parse(value: impl Into<String>) -> Result<Self, ProjectHashError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ProjectHashError::Empty);
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(ProjectHashError::NotHex(value));
        }
        Ok(Self(value))
    }

    /// Borrow as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProjectHash {
    type Err = ProjectHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ProjectHash {
    type Error = ProjectHashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ProjectHash> for String {
    fn from(hash: ProjectHash) -> Self {
        hash.0
    }
}

/// Derives [`ProjectHash`] values from project paths
#[derive(Clone, Copy, Debug)]
pub struct ProjectHasher {
    case_insensitive: bool,
}

impl Default for ProjectHasher {
    fn default() -> Self {
        Self {
            case_insensitive: cfg!(any(target_os = "windows", target_os = "macos")),
        }
    }
}

impl ProjectHasher {
    /// Hasher using the platform's default case sensitivity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override case folding (e.g. for a case-insensitive volume on Linux)
    #[must_use]
    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    /// Hash a project path
    ///
    /// Works on the path's raw bytes, so paths that are not valid UTF-8 still
    /// hash apart. For UTF-8 paths the result equals [`ProjectHasher::hash_str`].
    #[must_use]
    pub fn hash(&self, path: &Path) -> ProjectHash {
        digest(&self.normalize_bytes(path.as_os_str().as_encoded_bytes()))
    }

    /// Hash a project path given as text
    #[must_use]
    pub fn hash_str(&self, path: &str) -> ProjectHash {
        digest(&self.normalize_bytes(path.as_bytes()))
    }

    /// Lexical normalization applied before hashing
    ///
    /// Never touches the filesystem: symlinks are not resolved.
    #[must_use]
    pub fn normalize(&self, path: &str) -> String {
        // Splitting and joining on ASCII separators keeps UTF-8 input valid
        String::from_utf8_lossy(&self.normalize_bytes(path.as_bytes())).into_owned()
    }

    fn normalize_bytes(&self, path: &[u8]) -> Vec<u8> {
        let unified: Vec<u8> = path
            .iter()
            .map(|&b| if b == b'\\' { b'/' } else { b })
            .collect();
        let absolute = unified.first() == Some(&b'/');

        // Keep a drive prefix like "C:" as the first component
        let mut parts: Vec<&[u8]> = Vec::new();
        for component in unified.split(|&b| b == b'/') {
            match component {
                b"" | b"." => {}
                b".." => {
                    let at_drive_root =
                        parts.len() == 1 && parts[0].ends_with(b":") && !absolute;
                    if !parts.is_empty() && !at_drive_root {
                        parts.pop();
                    }
                }
                other => parts.push(other),
            }
        }

        let mut normalized = parts.join(&b'/');
        if absolute || normalized.is_empty() {
            normalized.insert(0, b'/');
        }

        if !self.case_insensitive {
            return normalized;
        }
        match String::from_utf8(normalized) {
            Ok(text) => text.to_lowercase().into_bytes(),
            Err(e) => {
                let mut bytes = e.into_bytes();
                bytes.make_ascii_lowercase();
                bytes
            }
        }
    }
}

fn digest(normalized: &[u8]) -> ProjectHash {
    let mut hasher = Sha256::new();
    hasher.update(normalized);
    let digest = hex::encode(hasher.finalize());
    ProjectHash(digest[..PROJECT_HASH_LEN].to_string())
}
