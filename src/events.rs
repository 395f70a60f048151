use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::interfaces::EventSink;
use crate::types::{AccountId, CollectionMethod, Grade, LoanId, LoanType, PaymentMethod};

/// all events emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // application events
    LoanSubmitted {
        loan_id: LoanId,
        borrower_id: AccountId,
        loan_type: LoanType,
        amount: Money,
        term_months: u32,
        score: u32,
        grade: Grade,
        timestamp: DateTime<Utc>,
    },
    LoanApproved {
        loan_id: LoanId,
        approver: String,
        timestamp: DateTime<Utc>,
    },
    LoanRejected {
        loan_id: LoanId,
        approver: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    LoanCancelled {
        loan_id: LoanId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    LoanDisbursed {
        loan_id: LoanId,
        amount: Money,
        monthly_payment: Money,
        first_payment_date: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentMade {
        loan_id: LoanId,
        amount: Money,
        method: PaymentMethod,
        penalty_paid: Money,
        interest_paid: Money,
        principal_paid: Money,
        remaining_balance: Money,
        timestamp: DateTime<Utc>,
    },
    LoanPaidOff {
        loan_id: LoanId,
        total_interest_paid: Money,
        timestamp: DateTime<Utc>,
    },
    PenaltyWaived {
        loan_id: LoanId,
        approver: String,
        amount: Money,
        timestamp: DateTime<Utc>,
    },

    // delinquency events
    LoanOverdue {
        loan_id: LoanId,
        overdue_payments: u32,
        missed_amount: Money,
        overdue_amount: Money,
        timestamp: DateTime<Utc>,
    },
    PenaltyAccrued {
        loan_id: LoanId,
        amount: Money,
        days_charged: u32,
        timestamp: DateTime<Utc>,
    },
    CollectionAttempted {
        loan_id: LoanId,
        attempt: u32,
        method: CollectionMethod,
        timestamp: DateTime<Utc>,
    },
    LoanDefaulted {
        loan_id: LoanId,
        reason: String,
        outstanding: Money,
        timestamp: DateTime<Utc>,
    },
    CollateralSeized {
        loan_id: LoanId,
        seized_value: Money,
        applied: Money,
        refunded: Money,
        timestamp: DateTime<Utc>,
    },
    LoanForeclosed {
        loan_id: LoanId,
        deficiency: Money,
        timestamp: DateTime<Utc>,
    },

    // borrower events
    AccountSuspended {
        borrower_id: AccountId,
        overdue_payments: u32,
        timestamp: DateTime<Utc>,
    },
    SuspensionLifted {
        borrower_id: AccountId,
        timestamp: DateTime<Utc>,
    },
    BorrowerBlacklisted {
        borrower_id: AccountId,
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn loan_id(&self) -> Option<LoanId> {
        match self {
            Event::LoanSubmitted { loan_id, .. }
            | Event::LoanApproved { loan_id, .. }
            | Event::LoanRejected { loan_id, .. }
            | Event::LoanCancelled { loan_id, .. }
            | Event::LoanDisbursed { loan_id, .. }
            | Event::PaymentMade { loan_id, .. }
            | Event::LoanPaidOff { loan_id, .. }
            | Event::PenaltyWaived { loan_id, .. }
            | Event::LoanOverdue { loan_id, .. }
            | Event::PenaltyAccrued { loan_id, .. }
            | Event::CollectionAttempted { loan_id, .. }
            | Event::LoanDefaulted { loan_id, .. }
            | Event::CollateralSeized { loan_id, .. }
            | Event::LoanForeclosed { loan_id, .. }
            | Event::BorrowerBlacklisted { loan_id, .. } => Some(*loan_id),
            Event::AccountSuspended { .. } | Event::SuspensionLifted { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::LoanSubmitted { .. } => "LoanSubmitted",
            Event::LoanApproved { .. } => "LoanApproved",
            Event::LoanRejected { .. } => "LoanRejected",
            Event::LoanCancelled { .. } => "LoanCancelled",
            Event::LoanDisbursed { .. } => "LoanDisbursed",
            Event::PaymentMade { .. } => "PaymentMade",
            Event::LoanPaidOff { .. } => "LoanPaidOff",
            Event::PenaltyWaived { .. } => "PenaltyWaived",
            Event::LoanOverdue { .. } => "LoanOverdue",
            Event::PenaltyAccrued { .. } => "PenaltyAccrued",
            Event::CollectionAttempted { .. } => "CollectionAttempted",
            Event::LoanDefaulted { .. } => "LoanDefaulted",
            Event::CollateralSeized { .. } => "CollateralSeized",
            Event::LoanForeclosed { .. } => "LoanForeclosed",
            Event::AccountSuspended { .. } => "AccountSuspended",
            Event::SuspensionLifted { .. } => "SuspensionLifted",
            Event::BorrowerBlacklisted { .. } => "BorrowerBlacklisted",
        }
    }
}

/// in-memory event sink collecting events in publish order
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for EventLog {
    fn publish(&self, event: Event) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_event_log_collects_in_order() {
        let log = EventLog::new();
        let loan_id = Uuid::new_v4();
        let timestamp = Utc::now();

        log.publish(Event::LoanApproved { loan_id, approver: "admin".into(), timestamp });
        log.publish(Event::AccountSuspended {
            borrower_id: AccountId::new("alice"),
            overdue_payments: 3,
            timestamp,
        });

        assert_eq!(log.count("LoanApproved"), 1);
        let events = log.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].loan_id(), Some(loan_id));
        assert_eq!(events[1].loan_id(), None);
        assert!(log.events().is_empty());
    }
}
