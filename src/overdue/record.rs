use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::loan::Loan;
use crate::status::LoanStatus;
use crate::types::{AccountId, CollectionMethod, LoanId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverdueStatus {
    Active,
    Resolved,
    WrittenOff,
    Escalated,
}

/// delinquency episode of a loan
///
/// One record is active per loan while it is delinquent. Repeat misses merge into it; it is
/// closed with a final status once the loan recovers, defaults or is foreclosed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverdueRecord {
    pub record_id: Uuid,
    pub loan_id: LoanId,
    pub borrower_id: AccountId,
    pub overdue_amount: Money,
    pub overdue_payments: u32,
    pub first_overdue_at: DateTime<Utc>,
    pub last_overdue_at: DateTime<Utc>,
    pub accrued_penalty: Money,
    pub collection_attempts: u32,
    pub last_collection_at: Option<DateTime<Utc>>,
    /// overdue amount seen by the previous collection attempt
    pub amount_at_last_attempt: Option<Money>,
    pub status: OverdueStatus,
    pub closed_at: Option<DateTime<Utc>>,
}

impl OverdueRecord {
    pub fn open(loan: &Loan, at: DateTime<Utc>) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            loan_id: loan.loan_id,
            borrower_id: loan.borrower_id.clone(),
            overdue_amount: loan.overdue_amount(),
            overdue_payments: loan.overdue_payments,
            first_overdue_at: at,
            last_overdue_at: at,
            accrued_penalty: loan.accrued_penalty,
            collection_attempts: 0,
            last_collection_at: None,
            amount_at_last_attempt: None,
            status: OverdueStatus::Active,
            closed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == OverdueStatus::Active
    }

    /// merge a repeat miss
    pub fn record_miss(&mut self, loan: &Loan, at: DateTime<Utc>) {
        self.last_overdue_at = at;
        self.sync(loan);
    }

    /// copy the loan's delinquency figures
    pub fn sync(&mut self, loan: &Loan) {
        self.overdue_amount = loan.overdue_amount();
        self.overdue_payments = loan.overdue_payments;
        self.accrued_penalty = loan.accrued_penalty;
    }

    /// whether a collection attempt is due at `now`
    pub fn collection_due(&self, now: DateTime<Utc>, interval_days: u32) -> bool {
        match self.last_collection_at {
            None => true,
            Some(last) => (now.date_naive() - last.date_naive()).num_days() >= interval_days as i64,
        }
    }

    /// log a new collection attempt
    pub fn next_attempt(&mut self, loan: &Loan, at: DateTime<Utc>) -> CollectionAttempt {
        let overdue = loan.overdue_amount();
        let successful = self.amount_at_last_attempt.map(|prev| overdue < prev).unwrap_or(false);

        self.collection_attempts += 1;
        self.last_collection_at = Some(at);
        self.amount_at_last_attempt = Some(overdue);

        let method = CollectionMethod::for_attempt(self.collection_attempts);
        CollectionAttempt {
            attempt_id: Uuid::new_v4(),
            loan_id: self.loan_id,
            attempt_number: self.collection_attempts,
            method,
            attempted_at: at,
            successful,
            notes: format!("{:?} for overdue amount {}", method, overdue),
        }
    }

    /// final status for this record given the loan state, if the episode is over
    pub fn closing_status(loan: &Loan) -> Option<OverdueStatus> {
        match loan.status {
            LoanStatus::Active | LoanStatus::PaidOff => Some(OverdueStatus::Resolved),
            LoanStatus::Default => Some(OverdueStatus::Escalated),
            LoanStatus::Foreclosed => Some(OverdueStatus::WrittenOff),
            _ => None,
        }
    }

    pub fn close(&mut self, status: OverdueStatus, loan: &Loan, at: DateTime<Utc>) {
        self.sync(loan);
        self.status = status;
        self.closed_at = Some(at);
    }
}

/// append-only collection log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionAttempt {
    pub attempt_id: Uuid,
    pub loan_id: LoanId,
    pub attempt_number: u32,
    pub method: CollectionMethod,
    pub attempted_at: DateTime<Utc>,
    /// overdue amount fell since the previous attempt
    pub successful: bool,
    pub notes: String,
}
