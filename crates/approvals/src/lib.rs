//! Requisition approval domain (event-sourced, pure).
//!
//! Business rules of the approval workflow implemented as deterministic domain
//! logic: no IO, no HTTP, no storage. Approver sets and permissions are
//! resolved by the infrastructure layer and handed in with each command.

pub mod error;
pub mod history;
pub mod requisition;
pub mod stage;
pub mod view;
pub mod workflow;

pub use error::ApprovalError;
pub use history::{ActionType, ApprovalHistoryEntry};
pub use requisition::{
    ApprovalInstanceId, CostCenter, CostCenterId, Department, DepartmentId, Requisition,
    RequisitionId, RequisitionItem, RequisitionStatus,
};
pub use stage::{
    plan_stages, ApproverRule, Decision, DecisionOutcome, PlannedStage, ResolvedApprovers, Stage,
    StageDescriptor, StageStatus,
};
pub use view::{ApprovalStatus, CompletedStage, StageSummary, StatusView};
pub use workflow::{
    ApprovalCancelled, ApprovalCommand, ApprovalEvent, ApprovalInstance, ApprovalSubmitted,
    ApprovalWorkflow, Cancel, Decide, InstanceOutcome, ReturnToStage, ReturnedToStage,
    StageApproved, StageRef, StageRejected, Submit, Transition,
};
