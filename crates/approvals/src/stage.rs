//! Stages modelled as data.
//!
//! A tenant's approval plan is an ordered list of [`StageDescriptor`]s. Each
//! descriptor carries an ordered list of [`ApproverRule`]s; the first rule that
//! yields a non-empty approver set wins. New stage types are new rule variants,
//! the state machine never looks inside a rule.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_auth::RoleCode;
use procura_core::UserId;

use crate::requisition::Requisition;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ApproverRule {
    /// Head of the requisition's cost center.
    CostCenterHead,
    /// Manager of the requisition's department.
    DepartmentManager,
    /// Every active user of the tenant holding `role`.
    RolePool { role: RoleCode },
}

impl ApproverRule {
    /// Label recorded as `approver_role` in history.
    pub fn label(&self) -> String {
        match self {
            ApproverRule::CostCenterHead => "cost_center_head".to_string(),
            ApproverRule::DepartmentManager => "department_manager".to_string(),
            ApproverRule::RolePool { role } => role.to_string(),
        }
    }

    /// Whether the requisition carries the routing data the rule needs.
    pub fn applies_to(&self, requisition: &Requisition) -> bool {
        match self {
            ApproverRule::CostCenterHead => requisition.cost_center_id.is_some(),
            ApproverRule::DepartmentManager => requisition.department_id.is_some(),
            ApproverRule::RolePool { .. } => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub name: String,
    pub rules: Vec<ApproverRule>,
}

impl StageDescriptor {
    pub fn new(name: impl Into<String>, rules: impl IntoIterator<Item = ApproverRule>) -> Self {
        Self {
            name: name.into(),
            rules: rules.into_iter().collect(),
        }
    }

    /// Cost center head, then department manager.
    pub fn default_plan() -> Vec<StageDescriptor> {
        vec![
            StageDescriptor::new("CostCenter", [ApproverRule::CostCenterHead]),
            StageDescriptor::new("Department", [ApproverRule::DepartmentManager]),
        ]
    }
}

/// A descriptor instantiated for one requisition, with its final order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStage {
    pub order: u32,
    pub name: String,
    pub rules: Vec<ApproverRule>,
}

/// Instantiate the plan for a requisition.
///
/// Rules the requisition cannot satisfy are dropped, stages left without rules
/// are skipped, and the surviving stages are numbered contiguously from 0.
pub fn plan_stages(
    descriptors: &[StageDescriptor],
    requisition: &Requisition,
) -> Vec<PlannedStage> {
    descriptors
        .iter()
        .filter_map(|d| {
            let rules: Vec<ApproverRule> = d
                .rules
                .iter()
                .filter(|r| r.applies_to(requisition))
                .cloned()
                .collect();
            (!rules.is_empty()).then(|| (d.name.clone(), rules))
        })
        .enumerate()
        .map(|(order, (name, rules))| PlannedStage {
            order: order as u32,
            name,
            rules,
        })
        .collect()
}

/// Outcome of running a stage's rules: the approvers and the rule that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedApprovers {
    pub approvers: BTreeSet<UserId>,
    pub rule: Option<ApproverRule>,
}

impl ResolvedApprovers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn by_rule(rule: ApproverRule, approvers: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            approvers: approvers.into_iter().collect(),
            rule: Some(rule),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.approvers.is_empty()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.approvers.contains(&user_id)
    }

    pub fn rule_label(&self) -> Option<String> {
        self.rule.as_ref().map(ApproverRule::label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageStatus {
    NotStarted,
    InProgress,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub approver: UserId,
    pub outcome: DecisionOutcome,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub order: u32,
    pub name: String,
    pub rules: Vec<ApproverRule>,
    pub status: StageStatus,
    /// Approvers captured when the stage was last entered.
    pub approvers: ResolvedApprovers,
    pub decisions: Vec<Decision>,
}

impl Stage {
    pub fn not_started(planned: &PlannedStage) -> Self {
        Self {
            order: planned.order,
            name: planned.name.clone(),
            rules: planned.rules.clone(),
            status: StageStatus::NotStarted,
            approvers: ResolvedApprovers::none(),
            decisions: Vec::new(),
        }
    }

    pub fn planned(&self) -> PlannedStage {
        PlannedStage {
            order: self.order,
            name: self.name.clone(),
            rules: self.rules.clone(),
        }
    }

    pub(crate) fn enter(&mut self, approvers: ResolvedApprovers) {
        self.status = StageStatus::InProgress;
        self.approvers = approvers;
    }

    pub(crate) fn reset(&mut self) {
        self.status = StageStatus::NotStarted;
        self.approvers = ResolvedApprovers::none();
        self.decisions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requisition::{CostCenterId, DepartmentId};
    use procura_core::TenantId;

    fn finance_stage() -> StageDescriptor {
        StageDescriptor::new(
            "Finance",
            [ApproverRule::RolePool {
                role: RoleCode::new("finance"),
            }],
        )
    }

    #[test]
    fn full_routing_keeps_every_stage() {
        let req = Requisition::draft(TenantId::new(), UserId::new())
            .with_cost_center(CostCenterId::generate())
            .with_department(DepartmentId::generate());

        let plan = plan_stages(&StageDescriptor::default_plan(), &req);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].name, "CostCenter");
        assert_eq!(plan[1].order, 1);
    }

    #[test]
    fn stages_without_routing_are_skipped_and_renumbered() {
        let req = Requisition::draft(TenantId::new(), UserId::new())
            .with_department(DepartmentId::generate());
        let mut descriptors = StageDescriptor::default_plan();
        descriptors.push(finance_stage());

        let plan = plan_stages(&descriptors, &req);

        let names: Vec<_> = plan.iter().map(|s| (s.order, s.name.as_str())).collect();
        assert_eq!(names, vec![(0, "Department"), (1, "Finance")]);
    }

    #[test]
    fn fallback_rules_only_keep_applicable_entries() {
        let req = Requisition::draft(TenantId::new(), UserId::new());
        let descriptors = vec![StageDescriptor::new(
            "Manager",
            [
                ApproverRule::DepartmentManager,
                ApproverRule::RolePool {
                    role: RoleCode::new("procurement"),
                },
            ],
        )];

        let plan = plan_stages(&descriptors, &req);

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].rules.len(), 1);
        assert_eq!(plan[0].rules[0].label(), "procurement");
    }

    #[test]
    fn rules_deserialize_from_tagged_form() {
        let rule: ApproverRule =
            serde_json::from_str(r#"{"rule":"role_pool","role":"finance"}"#).unwrap();
        assert_eq!(
            rule,
            ApproverRule::RolePool {
                role: RoleCode::new("finance")
            }
        );
        let rule: ApproverRule = serde_json::from_str(r#"{"rule":"cost_center_head"}"#).unwrap();
        assert_eq!(rule, ApproverRule::CostCenterHead);
    }
}
