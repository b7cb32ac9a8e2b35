//! Requisitions and the org units that route them.
//!
//! These records are owned by the surrounding CRUD surface; the approval engine
//! reads them and only ever writes `status` and `approval_instance_id`.

use serde::{Deserialize, Serialize};

use procura_core::{AggregateId, TenantId, UserId};

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub AggregateId);

        impl $name {
            pub fn new(id: AggregateId) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(AggregateId::new())
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

typed_id!(
    /// Requisition identifier; also the key of its approval event stream.
    RequisitionId
);
typed_id!(
    /// One approval run of a requisition. Every submission gets a fresh one.
    ApprovalInstanceId
);
typed_id!(CostCenterId);
typed_id!(DepartmentId);

/// Requisition lifecycle status.
///
/// `Submitted` and `Returned` are transient: they are recorded in history but a
/// requisition never rests in them after an engine call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequisitionStatus {
    Draft,
    Submitted,
    InProgress,
    Approved,
    Rejected,
    Returned,
    Cancelled,
}

impl RequisitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequisitionStatus::Draft => "Draft",
            RequisitionStatus::Submitted => "Submitted",
            RequisitionStatus::InProgress => "InProgress",
            RequisitionStatus::Approved => "Approved",
            RequisitionStatus::Rejected => "Rejected",
            RequisitionStatus::Returned => "Returned",
            RequisitionStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequisitionStatus::Approved | RequisitionStatus::Rejected | RequisitionStatus::Cancelled
        )
    }

    /// Statuses from which a new approval run may start.
    pub fn accepts_submission(&self) -> bool {
        matches!(self, RequisitionStatus::Draft | RequisitionStatus::Returned)
    }
}

impl core::fmt::Display for RequisitionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionItem {
    pub line_no: u32,
    pub description: String,
    pub quantity: u32,
    /// Unit price in minor currency units.
    pub unit_price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requisition {
    pub id: RequisitionId,
    pub tenant_id: TenantId,
    pub created_by: UserId,
    pub cost_center_id: Option<CostCenterId>,
    pub department_id: Option<DepartmentId>,
    pub status: RequisitionStatus,
    pub approval_instance_id: Option<ApprovalInstanceId>,
    pub items: Vec<RequisitionItem>,
}

impl Requisition {
    /// A fresh draft with no routing and no items.
    pub fn draft(tenant_id: TenantId, created_by: UserId) -> Self {
        Self {
            id: RequisitionId::generate(),
            tenant_id,
            created_by,
            cost_center_id: None,
            department_id: None,
            status: RequisitionStatus::Draft,
            approval_instance_id: None,
            items: Vec::new(),
        }
    }

    pub fn with_cost_center(mut self, id: CostCenterId) -> Self {
        self.cost_center_id = Some(id);
        self
    }

    pub fn with_department(mut self, id: DepartmentId) -> Self {
        self.department_id = Some(id);
        self
    }

    pub fn with_item(
        mut self,
        description: impl Into<String>,
        quantity: u32,
        unit_price: i64,
    ) -> Self {
        let line_no = (self.items.len() as u32) + 1;
        self.items.push(RequisitionItem {
            line_no,
            description: description.into(),
            quantity,
            unit_price,
        });
        self
    }

    /// Sum of `quantity * unit_price` over all lines.
    pub fn total(&self) -> i64 {
        self.items
            .iter()
            .map(|i| i64::from(i.quantity) * i.unit_price)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostCenter {
    pub id: CostCenterId,
    pub tenant_id: TenantId,
    pub name: String,
    pub head: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub tenant_id: TenantId,
    pub name: String,
    pub manager: Option<UserId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_are_numbered_and_totalled() {
        let req = Requisition::draft(TenantId::new(), UserId::new())
            .with_item("laptop", 2, 120_000)
            .with_item("dock", 1, 15_000);

        assert_eq!(req.items[1].line_no, 2);
        assert_eq!(req.total(), 255_000);
        assert_eq!(req.status, RequisitionStatus::Draft);
    }

    #[test]
    fn only_draft_and_returned_accept_submission() {
        assert!(RequisitionStatus::Draft.accepts_submission());
        assert!(RequisitionStatus::Returned.accepts_submission());
        assert!(!RequisitionStatus::InProgress.accepts_submission());
        assert!(!RequisitionStatus::Cancelled.accepts_submission());
    }
}
