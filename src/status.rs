use serde::{Deserialize, Serialize};

/// loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    /// application submitted, awaiting decision
    Pending,
    /// approved, not yet disbursed
    Approved,
    /// disbursed and performing
    Active,
    /// at least one installment missed
    Overdue,
    /// escalated after repeated misses or failed collection
    Default,
    /// fully repaid
    PaidOff,
    /// declined at review
    Rejected,
    /// withdrawn before disbursement
    Cancelled,
    /// collateral seized and disposed
    Foreclosed,
}

impl LoanStatus {
    pub const ALL: [LoanStatus; 9] = [
        LoanStatus::Pending,
        LoanStatus::Approved,
        LoanStatus::Active,
        LoanStatus::Overdue,
        LoanStatus::Default,
        LoanStatus::PaidOff,
        LoanStatus::Rejected,
        LoanStatus::Cancelled,
        LoanStatus::Foreclosed,
    ];

    /// single source of truth for legal transitions
    pub fn can_transition_to(self, next: LoanStatus) -> bool {
        use LoanStatus::*;

        match (self, next) {
            (Pending, Approved) | (Pending, Rejected) | (Pending, Cancelled) => true,
            (Approved, Active) | (Approved, Cancelled) => true,
            (Active, Overdue) | (Active, PaidOff) => true,
            (Overdue, Active) | (Overdue, PaidOff) | (Overdue, Default) => true,
            (Default, Foreclosed) => true,
            (Pending, _) | (Approved, _) | (Active, _) | (Overdue, _) | (Default, _) => false,
            (PaidOff, _) | (Rejected, _) | (Cancelled, _) | (Foreclosed, _) => false,
        }
    }

    /// no transition leaves this state
    pub fn is_terminal(self) -> bool {
        LoanStatus::ALL
            .iter()
            .all(|next| !self.can_transition_to(*next))
    }

    /// balance and payment counters are frozen
    pub fn is_closed_for_repayment(self) -> bool {
        self.is_terminal() || self == LoanStatus::Default
    }

    /// payments can be applied
    pub fn accepts_payment(self) -> bool {
        matches!(self, LoanStatus::Active | LoanStatus::Overdue)
    }

    /// counts against the per-borrower concurrent loan cap
    pub fn is_open(self) -> bool {
        matches!(
            self,
            LoanStatus::Pending | LoanStatus::Approved | LoanStatus::Active | LoanStatus::Overdue
        )
    }
}
