use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A commit id, opaque outside of this crate and `coordinator`. Crosses the
/// `store` boundary only via [`Oid::to_string`]/[`Oid::from_str`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Oid(String);

#[derive(Error, Debug)]
#[error("'{0}' is not a valid commit id")]
pub struct ParseOidError(String);

impl Oid {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl FromStr for Oid {
    type Err = ParseOidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseOidError(s.to_owned()));
        }
        Ok(Oid(s.to_owned()))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
