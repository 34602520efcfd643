//! Node access-control lists.
//!
//! Every node carries exactly one owner plus three membership sets. The owner
//! holds every right implicitly and is never stored in a set. An empty read
//! set makes the node public when the service-wide [`PublicRead`] policy allows
//! it; that policy never grants write or delete.

use crate::error::AclError;
use crate::ids::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Service-wide policy for nodes whose read set is empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublicRead {
    /// Empty read set means everyone, including anonymous requesters.
    Allowed,
    /// Empty read set means nobody but the owner.
    Denied,
}

impl PublicRead {
    pub fn from_flag(anonymous_read: bool) -> Self {
        if anonymous_read {
            Self::Allowed
        } else {
            Self::Denied
        }
    }
}

/// Rights a requester holds on a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Rights {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl Rights {
    pub const ALL: Self = Self {
        read: true,
        write: true,
        delete: true,
    };
}

/// Subset of the stored categories a mutation applies to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RightsMask {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl RightsMask {
    pub const READ: Self = Self {
        read: true,
        write: false,
        delete: false,
    };
    pub const WRITE: Self = Self {
        read: false,
        write: true,
        delete: false,
    };
    pub const DELETE: Self = Self {
        read: false,
        write: false,
        delete: true,
    };
    pub const ALL: Self = Self {
        read: true,
        write: true,
        delete: true,
    };
}

/// Category named by an ACL request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AclCategory {
    Read,
    Write,
    Delete,
    Owner,
    /// Shorthand for read, write and delete together.
    All,
}

impl AclCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Owner => "owner",
            Self::All => "all",
        }
    }

    /// Membership sets this category touches. `None` for ownership, which is
    /// changed only through [`Acl::transfer_ownership`].
    pub fn mask(&self) -> Option<RightsMask> {
        match self {
            Self::Read => Some(RightsMask::READ),
            Self::Write => Some(RightsMask::WRITE),
            Self::Delete => Some(RightsMask::DELETE),
            Self::All => Some(RightsMask::ALL),
            Self::Owner => None,
        }
    }
}

impl FromStr for AclCategory {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "delete" => Ok(Self::Delete),
            "owner" => Ok(Self::Owner),
            "all" => Ok(Self::All),
            other => Err(AclError::InvalidCategory(other.to_string())),
        }
    }
}

impl fmt::Display for AclCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access-control list embedded in a node document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredAcl")]
pub struct Acl {
    owner: UserId,
    read: BTreeSet<UserId>,
    write: BTreeSet<UserId>,
    delete: BTreeSet<UserId>,
}

/// Wire shape used on deserialization so loaded documents are normalized.
#[derive(Deserialize)]
struct StoredAcl {
    owner: UserId,
    #[serde(default)]
    read: BTreeSet<UserId>,
    #[serde(default)]
    write: BTreeSet<UserId>,
    #[serde(default)]
    delete: BTreeSet<UserId>,
}

impl From<StoredAcl> for Acl {
    fn from(stored: StoredAcl) -> Self {
        let mut acl = Acl {
            owner: stored.owner,
            read: stored.read,
            write: stored.write,
            delete: stored.delete,
        };
        acl.strip_owner();
        acl
    }
}

impl Acl {
    /// A private ACL owned by `owner` with empty membership sets.
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            read: BTreeSet::new(),
            write: BTreeSet::new(),
            delete: BTreeSet::new(),
        }
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn read(&self) -> &BTreeSet<UserId> {
        &self.read
    }

    pub fn write(&self) -> &BTreeSet<UserId> {
        &self.write
    }

    pub fn delete(&self) -> &BTreeSet<UserId> {
        &self.delete
    }

    /// Compute the rights `user` holds. `None` is an anonymous requester.
    pub fn check(&self, user: Option<&UserId>, policy: PublicRead) -> Rights {
        let Some(user) = user else {
            return Rights {
                read: self.is_public(policy),
                write: false,
                delete: false,
            };
        };
        if *user == self.owner {
            return Rights::ALL;
        }
        Rights {
            read: self.read.contains(user) || self.is_public(policy),
            write: self.write.contains(user),
            delete: self.delete.contains(user),
        }
    }

    /// Whether the read set is empty and the policy opens it to everyone.
    pub fn is_public(&self, policy: PublicRead) -> bool {
        self.read.is_empty() && policy == PublicRead::Allowed
    }

    /// Replace the owner. The new owner leaves every membership set so that
    /// it never appears in both places.
    pub fn set_owner(&mut self, user: UserId) {
        self.owner = user;
        self.strip_owner();
    }

    /// Add `user` to every category in `mask`. Idempotent; a no-op for the owner.
    pub fn set(&mut self, user: UserId, mask: RightsMask) {
        if user == self.owner {
            return;
        }
        if mask.read {
            self.read.insert(user);
        }
        if mask.write {
            self.write.insert(user);
        }
        if mask.delete {
            self.delete.insert(user);
        }
    }

    /// Remove `user` from every category in `mask`. Idempotent.
    pub fn unset(&mut self, user: &UserId, mask: RightsMask) {
        if mask.read {
            self.read.remove(user);
        }
        if mask.write {
            self.write.remove(user);
        }
        if mask.delete {
            self.delete.remove(user);
        }
    }

    /// Hand the node to exactly one new owner on behalf of `requester`.
    ///
    /// Only the current owner may do this. The ACL is left untouched on error.
    pub fn transfer_ownership(
        &mut self,
        requester: &UserId,
        targets: &[UserId],
    ) -> Result<(), AclError> {
        if *requester != self.owner {
            return Err(AclError::NotOwner);
        }
        match targets {
            [target] => {
                self.set_owner(*target);
                Ok(())
            }
            _ => Err(AclError::TooManyOwners(targets.len())),
        }
    }

    /// JSON view of one category as answered by the ACL endpoints.
    pub fn category_view(&self, category: AclCategory) -> serde_json::Value {
        match category {
            AclCategory::Read => serde_json::json!({ "read": self.read }),
            AclCategory::Write => serde_json::json!({ "write": self.write }),
            AclCategory::Delete => serde_json::json!({ "delete": self.delete }),
            AclCategory::Owner => serde_json::json!({ "owner": self.owner }),
            AclCategory::All => serde_json::json!(self),
        }
    }

    fn strip_owner(&mut self) {
        self.read.remove(&self.owner);
        self.write.remove(&self.owner);
        self.delete.remove(&self.owner);
    }
}
