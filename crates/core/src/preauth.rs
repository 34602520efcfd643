//! Pre-authorized download tokens.
//!
//! A preauth token is an unauthenticated, single-purpose capability bound to
//! one node and one action, valid until `valid_till`.

use crate::error::PreauthError;
use crate::ids::NodeId;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::{Duration, OffsetDateTime};

/// Length of generated preauth token IDs.
pub const PREAUTH_ID_LEN: usize = 20;

/// Option key carrying the download filename.
pub const FILENAME_OPTION: &str = "filename";

/// Action a preauth token permits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreauthAction {
    Download,
}

impl PreauthAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
        }
    }
}

impl FromStr for PreauthAction {
    type Err = PreauthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(Self::Download),
            other => Err(PreauthError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for PreauthAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issued preauth token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreauthToken {
    pub id: String,
    pub action: PreauthAction,
    pub node_id: NodeId,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_till: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PreauthToken {
    /// Mint a token with a fresh random ID valid for `ttl` from `now`.
    pub fn issue(
        action: PreauthAction,
        node_id: NodeId,
        options: BTreeMap<String, String>,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: random_id(PREAUTH_ID_LEN),
            action,
            node_id,
            options,
            valid_till: now + ttl,
            created_at: now,
        }
    }

    /// Expired strictly after `valid_till`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.valid_till
    }

    /// Check that the token may be redeemed for `action` at `now`.
    pub fn check(&self, action: PreauthAction, now: OffsetDateTime) -> Result<(), PreauthError> {
        if self.is_expired_at(now) {
            return Err(PreauthError::Expired(self.id.clone()));
        }
        if self.action != action {
            return Err(PreauthError::ActionMismatch {
                expected: action.to_string(),
                actual: self.action.to_string(),
            });
        }
        Ok(())
    }

    pub fn filename(&self) -> Option<&str> {
        self.options.get(FILENAME_OPTION).map(String::as_str)
    }
}

/// Random alphanumeric string drawn from the thread-local CSPRNG.
pub fn random_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
