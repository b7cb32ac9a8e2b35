use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Permission;

/// Role code, unique only within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleCode(Cow<'static, str>);

impl RoleCode {
    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for RoleCode {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// A tenant administrator's role definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub code: RoleCode,
    pub permissions: BTreeSet<Permission>,
    /// Parent role code, looked up in the same tenant.
    pub inherits_from: Option<RoleCode>,
}

impl RoleDefinition {
    pub fn new(
        code: impl Into<RoleCode>,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            code: code.into(),
            permissions: permissions.into_iter().collect(),
            inherits_from: None,
        }
    }

    pub fn inheriting(mut self, parent: impl Into<RoleCode>) -> Self {
        self.inherits_from = Some(parent.into());
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleError {
    #[error("role '{role}' inherits from itself through '{revisited}'")]
    InheritanceCycle { role: RoleCode, revisited: RoleCode },

    #[error("role '{role}' has an inheritance chain deeper than {max_depth}")]
    DepthExceeded { role: RoleCode, max_depth: usize },
}

/// Bookkeeping for walking a role's ancestor chain one lookup at a time.
///
/// The caller performs the (possibly async) parent lookups and reports every
/// parent code through [`InheritanceWalk::visit`] before loading it. A chain
/// that revisits a code, or is longer than `max_depth` hops, is rejected.
#[derive(Debug, Clone)]
pub struct InheritanceWalk {
    root: RoleCode,
    visited: Vec<RoleCode>,
    max_depth: usize,
}

impl InheritanceWalk {
    pub fn new(root: &RoleCode, max_depth: usize) -> Self {
        Self {
            root: root.clone(),
            visited: vec![root.clone()],
            max_depth,
        }
    }

    pub fn visit(&mut self, parent: &RoleCode) -> Result<(), RoleError> {
        if self.visited.contains(parent) {
            return Err(RoleError::InheritanceCycle {
                role: self.root.clone(),
                revisited: parent.clone(),
            });
        }
        if self.depth() >= self.max_depth {
            return Err(RoleError::DepthExceeded {
                role: self.root.clone(),
                max_depth: self.max_depth,
            });
        }
        self.visited.push(parent.clone());
        Ok(())
    }

    /// Number of parent hops taken so far.
    pub fn depth(&self) -> usize {
        self.visited.len() - 1
    }

    pub fn chain(&self) -> &[RoleCode] {
        &self.visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_chain_is_accepted() {
        let mut walk = InheritanceWalk::new(&RoleCode::new("buyer"), 4);
        walk.visit(&RoleCode::new("requester")).unwrap();
        walk.visit(&RoleCode::new("employee")).unwrap();
        assert_eq!(walk.depth(), 2);
        assert_eq!(walk.chain().len(), 3);
    }

    #[test]
    fn revisiting_a_code_is_a_cycle() {
        let mut walk = InheritanceWalk::new(&RoleCode::new("a"), 8);
        walk.visit(&RoleCode::new("b")).unwrap();
        let err = walk.visit(&RoleCode::new("a")).unwrap_err();
        assert_eq!(
            err,
            RoleError::InheritanceCycle {
                role: RoleCode::new("a"),
                revisited: RoleCode::new("a"),
            }
        );
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let mut walk = InheritanceWalk::new(&RoleCode::new("loop"), 8);
        assert!(matches!(
            walk.visit(&RoleCode::new("loop")),
            Err(RoleError::InheritanceCycle { .. })
        ));
    }

    #[test]
    fn depth_limit_applies() {
        let mut walk = InheritanceWalk::new(&RoleCode::new("r0"), 1);
        walk.visit(&RoleCode::new("r1")).unwrap();
        assert!(matches!(
            walk.visit(&RoleCode::new("r2")),
            Err(RoleError::DepthExceeded { max_depth: 1, .. })
        ));
    }
}
