//! Infrastructure layer: ledger storage, permission resolution, org-chart
//! lookups, configuration and the approval engine that composes them.

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod event_store;
pub mod ledger;
pub mod permission_store;
pub mod projector;
pub mod read_model;
pub mod requisitions;
pub mod resolver;

pub use config::{ApproverResolution, PermissionsConfig, Settings, WorkflowConfig};
pub use directory::{Directory, InMemoryDirectory, UserRecord};
pub use engine::ApprovalEngine;
pub use error::{ErrorBody, StoreError, WorkflowError};
pub use ledger::{ApprovalLedger, LoadedWorkflow};
pub use permission_store::PermissionStore;
pub use projector::StatusProjector;
pub use requisitions::{InMemoryRequisitions, RequisitionRepository};
pub use resolver::ApproverResolver;
