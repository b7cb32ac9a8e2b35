//! Read-side status view (never persisted).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::UserId;

use crate::history::{ActionType, ApprovalHistoryEntry};
use crate::stage::StageStatus;
use crate::workflow::{ApprovalInstance, InstanceOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalStatus {
    #[serde(rename = "Not Started")]
    NotStarted,
    InProgress,
    Approved,
    Rejected,
    Cancelled,
}

impl ApprovalStatus {
    pub fn of(instance: &ApprovalInstance) -> Self {
        match instance.outcome {
            None => ApprovalStatus::InProgress,
            Some(InstanceOutcome::Approved) => ApprovalStatus::Approved,
            Some(InstanceOutcome::Rejected) => ApprovalStatus::Rejected,
            Some(InstanceOutcome::Cancelled) => ApprovalStatus::Cancelled,
        }
    }
}

impl core::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ApprovalStatus::NotStarted => "Not Started",
            ApprovalStatus::InProgress => "InProgress",
            ApprovalStatus::Approved => "Approved",
            ApprovalStatus::Rejected => "Rejected",
            ApprovalStatus::Cancelled => "Cancelled",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub order: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedStage {
    pub order: u32,
    pub name: String,
    pub approver: UserId,
    pub approver_role: Option<String>,
    pub status: StageStatus,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: ApprovalStatus,
    pub current_stage: Option<StageSummary>,
    pub current_approvers: Vec<UserId>,
    pub completed_stages: Vec<CompletedStage>,
    pub is_complete: bool,
}

impl StatusView {
    pub fn not_started() -> Self {
        Self {
            status: ApprovalStatus::NotStarted,
            current_stage: None,
            current_approvers: Vec::new(),
            completed_stages: Vec::new(),
            is_complete: false,
        }
    }

    /// Compose the view of `instance`.
    ///
    /// `current_approvers` is supplied by the caller according to the
    /// resolution policy and is ignored once the instance is complete.
    /// Completed stages come from `history`, not from the instance.
    pub fn compose(
        instance: Option<&ApprovalInstance>,
        history: &[ApprovalHistoryEntry],
        current_approvers: Vec<UserId>,
    ) -> Self {
        let Some(instance) = instance else {
            return Self::not_started();
        };

        let (current_stage, current_approvers) = match instance.current_stage() {
            Some(stage) if instance.is_active() => (
                Some(StageSummary {
                    order: stage.order,
                    name: stage.name.clone(),
                }),
                current_approvers,
            ),
            _ => (None, Vec::new()),
        };

        Self {
            status: ApprovalStatus::of(instance),
            current_stage,
            current_approvers,
            completed_stages: completed_stages(instance, history),
            is_complete: instance.is_complete,
        }
    }
}

/// Replay the instance's ledger entries: decisions add a completed stage, a
/// return drops every completed stage at or after its target.
fn completed_stages(
    instance: &ApprovalInstance,
    history: &[ApprovalHistoryEntry],
) -> Vec<CompletedStage> {
    let mut completed: Vec<CompletedStage> = Vec::new();

    for entry in history
        .iter()
        .filter(|e| e.approval_instance_id == Some(instance.id))
    {
        match (entry.action_type, &entry.stage) {
            (ActionType::Approved | ActionType::Rejected, Some(stage)) => {
                completed.push(CompletedStage {
                    order: stage.order,
                    name: stage.name.clone(),
                    approver: entry.action_by,
                    approver_role: entry.approver_role.clone(),
                    status: if entry.action_type == ActionType::Approved {
                        StageStatus::Approved
                    } else {
                        StageStatus::Rejected
                    },
                    comments: entry.comments.clone(),
                    decided_at: entry.action_date,
                });
            }
            (ActionType::Returned, _) => {
                if let Some(target) = &entry.return_to {
                    completed.retain(|c| c.order < target.order);
                }
            }
            _ => {}
        }
    }

    completed
}
