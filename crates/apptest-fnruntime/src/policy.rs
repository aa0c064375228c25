//! Image pull policy.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FnError;

/// When the function image is fetched before a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ImagePullPolicy {
    /// Refresh the image before every invocation.
    Always,
    /// Fetch only when the image is missing locally.
    #[default]
    IfNotPresent,
    /// Never fetch; a missing image is an error.
    Never,
}

impl ImagePullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImagePullPolicy::Always => "Always",
            ImagePullPolicy::IfNotPresent => "IfNotPresent",
            ImagePullPolicy::Never => "Never",
        }
    }
}

impl std::fmt::Display for ImagePullPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImagePullPolicy {
    type Err = FnError;

    /// Case-insensitive: `always`, `ifNotPresent` and `NEVER` are all valid.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(ImagePullPolicy::Always),
            "ifnotpresent" => Ok(ImagePullPolicy::IfNotPresent),
            "never" => Ok(ImagePullPolicy::Never),
            _ => Err(FnError::InvalidPullPolicy(s.to_string())),
        }
    }
}
