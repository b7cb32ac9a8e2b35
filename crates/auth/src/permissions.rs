use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque dotted strings (e.g. "pr.approve"). The wildcard
/// `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    /// Submit a requisition into approval.
    pub const PR_SUBMIT: Permission = Permission(Cow::Borrowed("pr.submit"));
    /// Approve, reject or return a requisition stage.
    pub const PR_APPROVE: Permission = Permission(Cow::Borrowed("pr.approve"));
    /// Cancel a requisition someone else created.
    pub const PR_CANCEL: Permission = Permission(Cow::Borrowed("pr.cancel"));
    /// Read approval status.
    pub const PR_READ: Permission = Permission(Cow::Borrowed("pr.read"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// Effective permissions of a user within one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "permissions", rename_all = "snake_case")]
pub enum PermissionSet {
    /// Administrator short-circuit: every permission is granted.
    All,
    Granted(BTreeSet<Permission>),
}

impl PermissionSet {
    pub fn empty() -> Self {
        Self::Granted(BTreeSet::new())
    }

    pub fn contains(&self, required: &Permission) -> bool {
        match self {
            PermissionSet::All => true,
            PermissionSet::Granted(set) => {
                set.contains(&Permission::WILDCARD) || set.contains(required)
            }
        }
    }

    /// Sorted permission codes, `["*"]` for the administrator set.
    pub fn codes(&self) -> Vec<String> {
        match self {
            PermissionSet::All => vec![Permission::WILDCARD.to_string()],
            PermissionSet::Granted(set) => set.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PermissionSet::All)
    }
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self::Granted(iter.into_iter().collect())
    }
}
