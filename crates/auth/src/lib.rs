//! `procura-auth` — role/permission model (pure, storage-agnostic).
//!
//! Loading users and roles is an infrastructure concern; this crate only knows
//! how to combine role definitions into a permission set, how to cache that
//! set, and how to decide whether a permission is granted.

pub mod authorize;
pub mod cache;
pub mod permissions;
pub mod roles;

pub use authorize::{authorize, AuthzError, Principal};
pub use cache::{CacheError, PermissionCache};
pub use permissions::{Permission, PermissionSet};
pub use roles::{InheritanceWalk, RoleCode, RoleDefinition, RoleError};
