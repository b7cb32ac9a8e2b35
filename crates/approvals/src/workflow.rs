//! Approval state machine, event-sourced per requisition.
//!
//! One stream per requisition. The stream outlives individual approval runs:
//! each `Submit` opens a fresh [`ApprovalInstance`] and the previous one (if
//! any) stays in history only.
//!
//! Approver resolution needs IO, so commands arrive with the approver sets
//! already resolved by the caller; `handle` only validates and decides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{Aggregate, AggregateRoot, TenantId, UserId};
use procura_events::Event;

use crate::error::ApprovalError;
use crate::requisition::{ApprovalInstanceId, RequisitionId, RequisitionStatus};
use crate::stage::{Decision, DecisionOutcome, PlannedStage, ResolvedApprovers, Stage, StageStatus};

// ─────────────────────────────────────────────────────────────────────────────
// Instance state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceOutcome {
    Approved,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalInstance {
    pub id: ApprovalInstanceId,
    pub requisition_id: RequisitionId,
    pub tenant_id: TenantId,
    pub stages: Vec<Stage>,
    pub current_stage_index: usize,
    pub is_complete: bool,
    pub outcome: Option<InstanceOutcome>,
}

impl ApprovalInstance {
    pub fn is_active(&self) -> bool {
        !self.is_complete
    }

    pub fn current_stage(&self) -> Option<&Stage> {
        self.stages.get(self.current_stage_index)
    }

    pub fn next_stage(&self) -> Option<&Stage> {
        self.stages.get(self.current_stage_index + 1)
    }

    pub fn stage(&self, order: u32) -> Option<&Stage> {
        self.stages.get(order as usize)
    }

    fn current_stage_mut(&mut self) -> Option<&mut Stage> {
        self.stages.get_mut(self.current_stage_index)
    }

    fn close(&mut self, outcome: InstanceOutcome) {
        self.is_complete = true;
        self.outcome = Some(outcome);
    }
}

/// Stage coordinates as recorded in events and history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageRef {
    pub order: u32,
    pub name: String,
}

impl From<&Stage> for StageRef {
    fn from(stage: &Stage) -> Self {
        Self {
            order: stage.order,
            name: stage.name.clone(),
        }
    }
}

/// Aggregate root: the approval workflow of one requisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalWorkflow {
    id: RequisitionId,
    tenant_id: Option<TenantId>,
    instance: Option<ApprovalInstance>,
    status: Option<RequisitionStatus>,
    version: u64,
}

impl ApprovalWorkflow {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: RequisitionId) -> Self {
        Self {
            id,
            tenant_id: None,
            instance: None,
            status: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> RequisitionId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    /// Latest instance, whether still active or closed.
    pub fn instance(&self) -> Option<&ApprovalInstance> {
        self.instance.as_ref()
    }

    pub fn active_instance(&self) -> Option<&ApprovalInstance> {
        self.instance.as_ref().filter(|i| i.is_active())
    }

    /// Requisition status after the last recorded transition.
    pub fn status(&self) -> Option<RequisitionStatus> {
        self.status
    }
}

impl AggregateRoot for ApprovalWorkflow {
    type Id = RequisitionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Command: Submit (start a fresh approval instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submit {
    pub tenant_id: TenantId,
    pub requisition_id: RequisitionId,
    pub instance_id: ApprovalInstanceId,
    pub actor: UserId,
    /// Persisted requisition status at the time of the call.
    pub requisition_status: RequisitionStatus,
    pub stages: Vec<PlannedStage>,
    pub first_stage_approvers: ResolvedApprovers,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Decide (approve or reject the current stage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decide {
    pub tenant_id: TenantId,
    pub requisition_id: RequisitionId,
    pub actor: UserId,
    pub outcome: DecisionOutcome,
    pub comments: Option<String>,
    pub current_approvers: ResolvedApprovers,
    /// Approvers of the stage an approval would enter; `None` when the
    /// current stage is the last one.
    pub next_stage_approvers: Option<ResolvedApprovers>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnToStage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnToStage {
    pub tenant_id: TenantId,
    pub requisition_id: RequisitionId,
    pub actor: UserId,
    pub to_stage_order: u32,
    pub comments: Option<String>,
    pub current_approvers: ResolvedApprovers,
    pub target_approvers: ResolvedApprovers,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub tenant_id: TenantId,
    pub requisition_id: RequisitionId,
    pub actor: UserId,
    pub requisition_status: RequisitionStatus,
    pub comments: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalCommand {
    Submit(Submit),
    Decide(Decide),
    ReturnToStage(ReturnToStage),
    Cancel(Cancel),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Fields every transition records; they become the history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub tenant_id: TenantId,
    pub requisition_id: RequisitionId,
    pub approval_instance_id: Option<ApprovalInstanceId>,
    pub action_by: UserId,
    pub action_date: DateTime<Utc>,
    pub status_from: RequisitionStatus,
    pub status_to: RequisitionStatus,
    /// Status passed through on the way (`Submitted`, `Returned`).
    pub transient_status: Option<RequisitionStatus>,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSubmitted {
    pub transition: Transition,
    pub instance_id: ApprovalInstanceId,
    pub stages: Vec<PlannedStage>,
    pub first_stage_approvers: ResolvedApprovers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageApproved {
    pub transition: Transition,
    pub stage: StageRef,
    pub approver_role: Option<String>,
    /// Approvers of the stage entered next; `None` completes the instance.
    pub next_stage_approvers: Option<ResolvedApprovers>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRejected {
    pub transition: Transition,
    pub stage: StageRef,
    pub approver_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnedToStage {
    pub transition: Transition,
    pub from: StageRef,
    pub to: StageRef,
    pub approver_role: Option<String>,
    pub target_approvers: ResolvedApprovers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalCancelled {
    pub transition: Transition,
    /// Stage active at cancellation; `None` when no instance was running.
    pub stage: Option<StageRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalEvent {
    ApprovalSubmitted(ApprovalSubmitted),
    StageApproved(StageApproved),
    StageRejected(StageRejected),
    ReturnedToStage(ReturnedToStage),
    ApprovalCancelled(ApprovalCancelled),
}

impl ApprovalEvent {
    pub fn transition(&self) -> &Transition {
        match self {
            ApprovalEvent::ApprovalSubmitted(e) => &e.transition,
            ApprovalEvent::StageApproved(e) => &e.transition,
            ApprovalEvent::StageRejected(e) => &e.transition,
            ApprovalEvent::ReturnedToStage(e) => &e.transition,
            ApprovalEvent::ApprovalCancelled(e) => &e.transition,
        }
    }
}

impl Event for ApprovalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ApprovalEvent::ApprovalSubmitted(_) => "approvals.requisition.submitted",
            ApprovalEvent::StageApproved(_) => "approvals.requisition.stage_approved",
            ApprovalEvent::StageRejected(_) => "approvals.requisition.stage_rejected",
            ApprovalEvent::ReturnedToStage(_) => "approvals.requisition.returned",
            ApprovalEvent::ApprovalCancelled(_) => "approvals.requisition.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.transition().action_date
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for ApprovalWorkflow {
    type Command = ApprovalCommand;
    type Event = ApprovalEvent;
    type Error = ApprovalError;

    fn apply(&mut self, event: &Self::Event) {
        let transition = event.transition();
        self.tenant_id = Some(transition.tenant_id);
        self.status = Some(transition.status_to);

        match event {
            ApprovalEvent::ApprovalSubmitted(e) => {
                let mut stages: Vec<Stage> = e.stages.iter().map(Stage::not_started).collect();
                if let Some(first) = stages.first_mut() {
                    first.enter(e.first_stage_approvers.clone());
                }
                self.instance = Some(ApprovalInstance {
                    id: e.instance_id,
                    requisition_id: transition.requisition_id,
                    tenant_id: transition.tenant_id,
                    stages,
                    current_stage_index: 0,
                    is_complete: false,
                    outcome: None,
                });
            }
            ApprovalEvent::StageApproved(e) => {
                if let Some(instance) = self.instance.as_mut() {
                    if let Some(stage) = instance.current_stage_mut() {
                        stage.status = StageStatus::Approved;
                        stage.decisions.push(decision(transition, DecisionOutcome::Approve));
                    }
                    match &e.next_stage_approvers {
                        Some(approvers) => {
                            instance.current_stage_index += 1;
                            if let Some(next) = instance.current_stage_mut() {
                                next.enter(approvers.clone());
                            }
                        }
                        None => instance.close(InstanceOutcome::Approved),
                    }
                }
            }
            ApprovalEvent::StageRejected(_) => {
                if let Some(instance) = self.instance.as_mut() {
                    if let Some(stage) = instance.current_stage_mut() {
                        stage.status = StageStatus::Rejected;
                        stage.decisions.push(decision(transition, DecisionOutcome::Reject));
                    }
                    instance.close(InstanceOutcome::Rejected);
                }
            }
            ApprovalEvent::ReturnedToStage(e) => {
                if let Some(instance) = self.instance.as_mut() {
                    for stage in instance.stages.iter_mut().filter(|s| s.order >= e.to.order) {
                        stage.reset();
                    }
                    instance.current_stage_index = e.to.order as usize;
                    if let Some(target) = instance.current_stage_mut() {
                        target.enter(e.target_approvers.clone());
                    }
                }
            }
            ApprovalEvent::ApprovalCancelled(_) => match transition.approval_instance_id {
                Some(_) => {
                    if let Some(instance) = self.instance.as_mut() {
                        instance.close(InstanceOutcome::Cancelled);
                    }
                }
                // A requisition cancelled outside an approval run supersedes
                // whatever closed run preceded it.
                None => self.instance = None,
            },
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ApprovalCommand::Submit(cmd) => self.handle_submit(cmd),
            ApprovalCommand::Decide(cmd) => self.handle_decide(cmd),
            ApprovalCommand::ReturnToStage(cmd) => self.handle_return(cmd),
            ApprovalCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

fn decision(transition: &Transition, outcome: DecisionOutcome) -> Decision {
    Decision {
        approver: transition.action_by,
        outcome,
        comments: transition.comments.clone(),
        decided_at: transition.action_date,
    }
}

impl ApprovalWorkflow {
    fn ensure_target(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
    ) -> Result<(), ApprovalError> {
        if self.tenant_id.is_some_and(|t| t != tenant_id) {
            return Err(ApprovalError::TenantMismatch);
        }
        if self.id != requisition_id {
            return Err(ApprovalError::invalid("requisition_id mismatch"));
        }
        Ok(())
    }

    fn require_active(&self) -> Result<(&ApprovalInstance, &Stage), ApprovalError> {
        let instance = self
            .active_instance()
            .ok_or_else(|| ApprovalError::invalid("no approval is in progress"))?;
        let stage = instance
            .current_stage()
            .ok_or_else(|| ApprovalError::invalid("approval has no current stage"))?;
        Ok((instance, stage))
    }

    fn handle_submit(&self, cmd: &Submit) -> Result<Vec<ApprovalEvent>, ApprovalError> {
        self.ensure_target(cmd.tenant_id, cmd.requisition_id)?;

        if self.active_instance().is_some() {
            return Err(ApprovalError::invalid("an approval is already in progress"));
        }
        if !cmd.requisition_status.accepts_submission() {
            return Err(ApprovalError::from_status("submit", cmd.requisition_status));
        }

        let first = cmd.stages.first().ok_or_else(|| ApprovalError::NoEligibleApprover {
            stage: "no applicable stage".to_string(),
        })?;
        if cmd.stages.iter().enumerate().any(|(i, s)| s.order as usize != i) {
            return Err(ApprovalError::invalid("stage orders must be contiguous from 0"));
        }
        if cmd.first_stage_approvers.is_empty() {
            return Err(ApprovalError::NoEligibleApprover {
                stage: first.name.clone(),
            });
        }

        Ok(vec![ApprovalEvent::ApprovalSubmitted(ApprovalSubmitted {
            transition: Transition {
                tenant_id: cmd.tenant_id,
                requisition_id: cmd.requisition_id,
                approval_instance_id: Some(cmd.instance_id),
                action_by: cmd.actor,
                action_date: cmd.occurred_at,
                status_from: cmd.requisition_status,
                status_to: RequisitionStatus::InProgress,
                transient_status: Some(RequisitionStatus::Submitted),
                comments: None,
            },
            instance_id: cmd.instance_id,
            stages: cmd.stages.clone(),
            first_stage_approvers: cmd.first_stage_approvers.clone(),
        })])
    }

    fn handle_decide(&self, cmd: &Decide) -> Result<Vec<ApprovalEvent>, ApprovalError> {
        self.ensure_target(cmd.tenant_id, cmd.requisition_id)?;
        let (instance, stage) = self.require_active()?;

        if !cmd.current_approvers.contains(cmd.actor) {
            return Err(ApprovalError::NotEligibleApprover {
                user: cmd.actor,
                stage: stage.name.clone(),
            });
        }

        let status_to = match cmd.outcome {
            DecisionOutcome::Reject => RequisitionStatus::Rejected,
            DecisionOutcome::Approve if instance.next_stage().is_some() => {
                RequisitionStatus::InProgress
            }
            DecisionOutcome::Approve => RequisitionStatus::Approved,
        };
        let transition = Transition {
            tenant_id: cmd.tenant_id,
            requisition_id: cmd.requisition_id,
            approval_instance_id: Some(instance.id),
            action_by: cmd.actor,
            action_date: cmd.occurred_at,
            status_from: RequisitionStatus::InProgress,
            status_to,
            transient_status: None,
            comments: cmd.comments.clone(),
        };
        let approver_role = cmd.current_approvers.rule_label();

        let event = match cmd.outcome {
            DecisionOutcome::Reject => ApprovalEvent::StageRejected(StageRejected {
                transition,
                stage: stage.into(),
                approver_role,
            }),
            DecisionOutcome::Approve => {
                let next_stage_approvers = match instance.next_stage() {
                    None => None,
                    Some(next) => match &cmd.next_stage_approvers {
                        Some(approvers) if !approvers.is_empty() => Some(approvers.clone()),
                        _ => {
                            return Err(ApprovalError::NoEligibleApprover {
                                stage: next.name.clone(),
                            });
                        }
                    },
                };
                ApprovalEvent::StageApproved(StageApproved {
                    transition,
                    stage: stage.into(),
                    approver_role,
                    next_stage_approvers,
                })
            }
        };

        Ok(vec![event])
    }

    fn handle_return(&self, cmd: &ReturnToStage) -> Result<Vec<ApprovalEvent>, ApprovalError> {
        self.ensure_target(cmd.tenant_id, cmd.requisition_id)?;
        let (instance, stage) = self.require_active()?;

        if cmd.to_stage_order >= stage.order {
            return Err(ApprovalError::invalid(format!(
                "return target {} must be earlier than the current stage {}",
                cmd.to_stage_order, stage.order
            )));
        }
        if !cmd.current_approvers.contains(cmd.actor) {
            return Err(ApprovalError::NotEligibleApprover {
                user: cmd.actor,
                stage: stage.name.clone(),
            });
        }
        let target = instance
            .stage(cmd.to_stage_order)
            .ok_or_else(|| {
                ApprovalError::invalid(format!("unknown stage {}", cmd.to_stage_order))
            })?;
        if cmd.target_approvers.is_empty() {
            return Err(ApprovalError::NoEligibleApprover {
                stage: target.name.clone(),
            });
        }

        Ok(vec![ApprovalEvent::ReturnedToStage(ReturnedToStage {
            transition: Transition {
                tenant_id: cmd.tenant_id,
                requisition_id: cmd.requisition_id,
                approval_instance_id: Some(instance.id),
                action_by: cmd.actor,
                action_date: cmd.occurred_at,
                status_from: RequisitionStatus::InProgress,
                status_to: RequisitionStatus::InProgress,
                transient_status: Some(RequisitionStatus::Returned),
                comments: cmd.comments.clone(),
            },
            from: stage.into(),
            to: target.into(),
            approver_role: cmd.current_approvers.rule_label(),
            target_approvers: cmd.target_approvers.clone(),
        })])
    }

    /// Cancelling twice is a no-op: an already cancelled requisition yields no
    /// events.
    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<ApprovalEvent>, ApprovalError> {
        self.ensure_target(cmd.tenant_id, cmd.requisition_id)?;

        let (instance_id, stage, status_from) = match self.active_instance() {
            Some(instance) => (
                Some(instance.id),
                instance.current_stage().map(StageRef::from),
                RequisitionStatus::InProgress,
            ),
            None => match cmd.requisition_status {
                RequisitionStatus::Cancelled => return Ok(Vec::new()),
                status if status.is_terminal() => {
                    return Err(ApprovalError::from_status("cancel", status));
                }
                status => (None, None, status),
            },
        };

        Ok(vec![ApprovalEvent::ApprovalCancelled(ApprovalCancelled {
            transition: Transition {
                tenant_id: cmd.tenant_id,
                requisition_id: cmd.requisition_id,
                approval_instance_id: instance_id,
                action_by: cmd.actor,
                action_date: cmd.occurred_at,
                status_from,
                status_to: RequisitionStatus::Cancelled,
                transient_status: None,
                comments: cmd.comments.clone(),
            },
            stage,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::ApproverRule;

    struct Fixture {
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        requester: UserId,
        head: UserId,
        manager: UserId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tenant_id: TenantId::new(),
                requisition_id: RequisitionId::generate(),
                requester: UserId::new(),
                head: UserId::new(),
                manager: UserId::new(),
            }
        }

        fn stages(&self) -> Vec<PlannedStage> {
            vec![
                PlannedStage {
                    order: 0,
                    name: "CostCenter".into(),
                    rules: vec![ApproverRule::CostCenterHead],
                },
                PlannedStage {
                    order: 1,
                    name: "Department".into(),
                    rules: vec![ApproverRule::DepartmentManager],
                },
            ]
        }

        fn heads(&self) -> ResolvedApprovers {
            ResolvedApprovers::by_rule(ApproverRule::CostCenterHead, [self.head])
        }

        fn managers(&self) -> ResolvedApprovers {
            ResolvedApprovers::by_rule(ApproverRule::DepartmentManager, [self.manager])
        }

        fn submit(&self, status: RequisitionStatus) -> ApprovalCommand {
            ApprovalCommand::Submit(Submit {
                tenant_id: self.tenant_id,
                requisition_id: self.requisition_id,
                instance_id: ApprovalInstanceId::generate(),
                actor: self.requester,
                requisition_status: status,
                stages: self.stages(),
                first_stage_approvers: self.heads(),
                occurred_at: Utc::now(),
            })
        }

        fn decide(
            &self,
            actor: UserId,
            outcome: DecisionOutcome,
            current: ResolvedApprovers,
            next: Option<ResolvedApprovers>,
        ) -> ApprovalCommand {
            ApprovalCommand::Decide(Decide {
                tenant_id: self.tenant_id,
                requisition_id: self.requisition_id,
                actor,
                outcome,
                comments: Some("ok".into()),
                current_approvers: current,
                next_stage_approvers: next,
                occurred_at: Utc::now(),
            })
        }

        fn cancel(&self, status: RequisitionStatus) -> ApprovalCommand {
            ApprovalCommand::Cancel(Cancel {
                tenant_id: self.tenant_id,
                requisition_id: self.requisition_id,
                actor: self.requester,
                requisition_status: status,
                comments: None,
                occurred_at: Utc::now(),
            })
        }

        fn submitted(&self) -> ApprovalWorkflow {
            let mut wf = ApprovalWorkflow::empty(self.requisition_id);
            execute(&mut wf, &self.submit(RequisitionStatus::Draft)).unwrap();
            wf
        }
    }

    fn execute(
        wf: &mut ApprovalWorkflow,
        cmd: &ApprovalCommand,
    ) -> Result<Vec<ApprovalEvent>, ApprovalError> {
        let events = wf.handle(cmd)?;
        for e in &events {
            wf.apply(e);
        }
        Ok(events)
    }

    #[test]
    fn submit_opens_first_stage() {
        let f = Fixture::new();
        let wf = f.submitted();

        let instance = wf.active_instance().unwrap();
        assert_eq!(instance.current_stage_index, 0);
        assert_eq!(instance.stages[0].status, StageStatus::InProgress);
        assert_eq!(instance.stages[1].status, StageStatus::NotStarted);
        assert!(instance.stages[0].approvers.contains(f.head));
        assert_eq!(wf.status(), Some(RequisitionStatus::InProgress));
        assert_eq!(wf.version(), 1);
    }

    #[test]
    fn submit_without_first_stage_approvers_changes_nothing() {
        let f = Fixture::new();
        let wf = ApprovalWorkflow::empty(f.requisition_id);
        let mut cmd = f.submit(RequisitionStatus::Draft);
        if let ApprovalCommand::Submit(s) = &mut cmd {
            s.first_stage_approvers = ResolvedApprovers::none();
        }

        let err = wf.handle(&cmd).unwrap_err();

        assert_eq!(
            err,
            ApprovalError::NoEligibleApprover {
                stage: "CostCenter".into()
            }
        );
        assert!(wf.instance().is_none());
    }

    #[test]
    fn second_submit_while_in_progress_is_rejected() {
        let f = Fixture::new();
        let wf = f.submitted();
        assert!(matches!(
            wf.handle(&f.submit(RequisitionStatus::Draft)),
            Err(ApprovalError::InvalidTransition(_))
        ));
    }

    #[test]
    fn approvals_walk_every_stage_to_completion() {
        let f = Fixture::new();
        let mut wf = f.submitted();

        execute(
            &mut wf,
            &f.decide(f.head, DecisionOutcome::Approve, f.heads(), Some(f.managers())),
        )
        .unwrap();
        let instance = wf.active_instance().unwrap();
        assert_eq!(instance.current_stage_index, 1);
        assert_eq!(instance.stages[0].decisions.len(), 1);

        let decide = f.decide(f.manager, DecisionOutcome::Approve, f.managers(), None);
        let events = execute(&mut wf, &decide).unwrap();
        assert_eq!(events[0].transition().status_to, RequisitionStatus::Approved);

        let instance = wf.instance().unwrap();
        assert!(instance.is_complete);
        assert_eq!(instance.outcome, Some(InstanceOutcome::Approved));
        assert_eq!(wf.status(), Some(RequisitionStatus::Approved));
    }

    #[test]
    fn non_member_of_the_stage_cannot_decide() {
        let f = Fixture::new();
        let wf = f.submitted();

        let err = wf
            .handle(&f.decide(f.manager, DecisionOutcome::Approve, f.heads(), Some(f.managers())))
            .unwrap_err();

        assert!(
            matches!(err, ApprovalError::NotEligibleApprover { user, .. } if user == f.manager)
        );
    }

    #[test]
    fn approve_into_unresolvable_stage_is_parked() {
        let f = Fixture::new();
        let wf = f.submitted();

        let err = wf
            .handle(&f.decide(
                f.head,
                DecisionOutcome::Approve,
                f.heads(),
                Some(ResolvedApprovers::none()),
            ))
            .unwrap_err();

        assert_eq!(
            err,
            ApprovalError::NoEligibleApprover {
                stage: "Department".into()
            }
        );
        assert_eq!(wf.active_instance().unwrap().current_stage_index, 0);
    }

    #[test]
    fn reject_closes_the_instance() {
        let f = Fixture::new();
        let mut wf = f.submitted();

        execute(&mut wf, &f.decide(f.head, DecisionOutcome::Reject, f.heads(), None)).unwrap();

        assert_eq!(wf.instance().unwrap().outcome, Some(InstanceOutcome::Rejected));
        assert_eq!(wf.instance().unwrap().stages[0].status, StageStatus::Rejected);
        assert!(matches!(
            wf.handle(&f.decide(f.head, DecisionOutcome::Approve, f.heads(), None)),
            Err(ApprovalError::InvalidTransition(_))
        ));
    }

    #[test]
    fn return_resets_target_and_later_stages() {
        let f = Fixture::new();
        let mut wf = f.submitted();
        execute(
            &mut wf,
            &f.decide(f.head, DecisionOutcome::Approve, f.heads(), Some(f.managers())),
        )
        .unwrap();

        let events = execute(
            &mut wf,
            &ApprovalCommand::ReturnToStage(ReturnToStage {
                tenant_id: f.tenant_id,
                requisition_id: f.requisition_id,
                actor: f.manager,
                to_stage_order: 0,
                comments: Some("needs a second quote".into()),
                current_approvers: f.managers(),
                target_approvers: f.heads(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let t = events[0].transition();
        assert_eq!(t.transient_status, Some(RequisitionStatus::Returned));
        assert_eq!(t.status_to, RequisitionStatus::InProgress);

        let instance = wf.active_instance().unwrap();
        assert_eq!(instance.current_stage_index, 0);
        assert_eq!(instance.stages[0].status, StageStatus::InProgress);
        assert!(instance.stages[0].decisions.is_empty());
        assert_eq!(instance.stages[1].status, StageStatus::NotStarted);
    }

    #[test]
    fn return_to_current_or_later_stage_is_invalid() {
        let f = Fixture::new();
        let wf = f.submitted();

        let err = wf
            .handle(&ApprovalCommand::ReturnToStage(ReturnToStage {
                tenant_id: f.tenant_id,
                requisition_id: f.requisition_id,
                actor: f.head,
                to_stage_order: 0,
                comments: None,
                current_approvers: f.heads(),
                target_approvers: f.heads(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();

        assert!(matches!(err, ApprovalError::InvalidTransition(_)));
    }

    #[test]
    fn cancel_is_idempotent() {
        let f = Fixture::new();
        let mut wf = f.submitted();

        let first = execute(&mut wf, &f.cancel(RequisitionStatus::InProgress)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(wf.instance().unwrap().outcome, Some(InstanceOutcome::Cancelled));

        let second = execute(&mut wf, &f.cancel(RequisitionStatus::Cancelled)).unwrap();
        assert!(second.is_empty());
        assert_eq!(wf.version(), 2);
    }

    #[test]
    fn cancel_of_a_draft_records_without_an_instance() {
        let f = Fixture::new();
        let mut wf = ApprovalWorkflow::empty(f.requisition_id);

        let events = execute(&mut wf, &f.cancel(RequisitionStatus::Draft)).unwrap();

        assert_eq!(events[0].transition().approval_instance_id, None);
        assert_eq!(wf.status(), Some(RequisitionStatus::Cancelled));
        assert!(wf.instance().is_none());
    }

    #[test]
    fn cancel_after_approval_is_invalid() {
        let f = Fixture::new();
        let wf = ApprovalWorkflow::empty(f.requisition_id);
        assert!(matches!(
            wf.handle(&f.cancel(RequisitionStatus::Approved)),
            Err(ApprovalError::InvalidTransition(_))
        ));
    }

    #[test]
    fn commands_for_another_tenant_are_refused() {
        let f = Fixture::new();
        let wf = f.submitted();
        let mut cmd = f.cancel(RequisitionStatus::InProgress);
        if let ApprovalCommand::Cancel(c) = &mut cmd {
            c.tenant_id = TenantId::new();
        }
        assert_eq!(wf.handle(&cmd), Err(ApprovalError::TenantMismatch));
    }

    #[test]
    fn resubmission_after_rejection_opens_a_fresh_instance() {
        let f = Fixture::new();
        let mut wf = f.submitted();
        let first_id = wf.instance().unwrap().id;
        execute(&mut wf, &f.decide(f.head, DecisionOutcome::Reject, f.heads(), None)).unwrap();

        execute(&mut wf, &f.submit(RequisitionStatus::Draft)).unwrap();

        let instance = wf.active_instance().unwrap();
        assert_ne!(instance.id, first_id);
        assert_eq!(instance.current_stage_index, 0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Approve(usize),
            Reject(usize),
            Return(u32),
            Cancel,
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                4 => (0usize..4).prop_map(Op::Approve),
                1 => (0usize..4).prop_map(Op::Reject),
                2 => (0u32..3).prop_map(Op::Return),
                1 => Just(Op::Cancel),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: the stage index never moves backwards except on a
            /// return to a strictly earlier stage, every accepted command emits
            /// exactly one event and a refused one leaves the state untouched.
            #[test]
            fn index_is_monotone_and_events_match_transitions(
                ops in prop::collection::vec(op(), 1..30)
            ) {
                let tenant_id = TenantId::new();
                let requisition_id = RequisitionId::generate();
                let users: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();
                let pool = |i: usize| ResolvedApprovers::by_rule(
                    ApproverRule::RolePool { role: procura_auth::RoleCode::new("approver") },
                    [users[i % users.len()]],
                );
                let stages: Vec<PlannedStage> = (0..3)
                    .map(|order| PlannedStage {
                        order,
                        name: format!("S{order}"),
                        rules: vec![ApproverRule::CostCenterHead],
                    })
                    .collect();

                let mut wf = ApprovalWorkflow::empty(requisition_id);
                let submit = ApprovalCommand::Submit(Submit {
                    tenant_id,
                    requisition_id,
                    instance_id: ApprovalInstanceId::generate(),
                    actor: users[0],
                    requisition_status: RequisitionStatus::Draft,
                    stages,
                    first_stage_approvers: pool(0),
                    occurred_at: Utc::now(),
                });
                for e in wf.handle(&submit).unwrap() {
                    wf.apply(&e);
                }

                for op in ops {
                    let before = wf.clone();
                    let index_before = wf.instance().map(|i| i.current_stage_index).unwrap_or(0);
                    let current = pool(index_before);
                    let cmd = match &op {
                        Op::Approve(actor) | Op::Reject(actor) => ApprovalCommand::Decide(Decide {
                            tenant_id,
                            requisition_id,
                            actor: users[*actor],
                            outcome: if matches!(op, Op::Approve(_)) {
                                DecisionOutcome::Approve
                            } else {
                                DecisionOutcome::Reject
                            },
                            comments: None,
                            current_approvers: current,
                            next_stage_approvers: Some(pool(index_before + 1)),
                            occurred_at: Utc::now(),
                        }),
                        Op::Return(to) => ApprovalCommand::ReturnToStage(ReturnToStage {
                            tenant_id,
                            requisition_id,
                            actor: users[index_before % users.len()],
                            to_stage_order: *to,
                            comments: None,
                            current_approvers: current,
                            target_approvers: pool(*to as usize),
                            occurred_at: Utc::now(),
                        }),
                        Op::Cancel => ApprovalCommand::Cancel(Cancel {
                            tenant_id,
                            requisition_id,
                            actor: users[0],
                            requisition_status: wf.status().unwrap_or(RequisitionStatus::Draft),
                            comments: None,
                            occurred_at: Utc::now(),
                        }),
                    };

                    match wf.handle(&cmd) {
                        Ok(events) => {
                            let already_cancelled = matches!(op, Op::Cancel)
                                && before.status() == Some(RequisitionStatus::Cancelled);
                            prop_assert_eq!(events.len(), if already_cancelled { 0 } else { 1 });
                            for e in &events {
                                wf.apply(e);
                            }
                            let index_after =
                                wf.instance().map(|i| i.current_stage_index).unwrap_or(0);
                            match op {
                                Op::Return(to) => {
                                    prop_assert!((to as usize) < index_before);
                                    prop_assert_eq!(index_after, to as usize);
                                }
                                _ => prop_assert!(index_after >= index_before),
                            }
                            prop_assert_eq!(wf.version(), before.version() + events.len() as u64);
                        }
                        Err(_) => prop_assert_eq!(&wf, &before),
                    }
                }
            }
        }
    }
}
