//! contracts between the engine and its collaborators
//!
//! Every call is fallible. Implementations are expected to bound their own latency and report
//! failures as resource errors rather than block.

use chrono::{DateTime, Utc};

use crate::credit::CreditProfile;
use crate::decimal::Money;
use crate::errors::Result;
use crate::events::Event;
use crate::loan::Loan;
use crate::overdue::{CollectionAttempt, OverdueRecord, OverdueStatus};
use crate::payments::ScheduleEntry;
use crate::status::LoanStatus;
use crate::types::{AccountId, LoanId};

/// key-addressed loan persistence
pub trait LoanRepository: Send + Sync {
    fn insert_loan(&self, loan: &Loan) -> Result<()>;

    fn get_loan(&self, loan_id: LoanId) -> Result<Option<Loan>>;

    /// replace the stored record; fails if the loan does not exist
    fn update_loan(&self, loan: &Loan) -> Result<()>;

    fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<Loan>>;

    fn loans_by_borrower(&self, borrower: &AccountId) -> Result<Vec<Loan>>;

    fn save_schedule(&self, loan_id: LoanId, entries: &[ScheduleEntry]) -> Result<()>;

    fn schedule(&self, loan_id: LoanId) -> Result<Vec<ScheduleEntry>>;

    /// stamp the executed-payment fields of one schedule entry
    fn mark_installment_paid(
        &self,
        loan_id: LoanId,
        payment_number: u32,
        paid_at: DateTime<Utc>,
        amount: Money,
    ) -> Result<()>;

    fn append_collection_attempt(&self, attempt: &CollectionAttempt) -> Result<()>;

    fn collection_attempts(&self, loan_id: LoanId) -> Result<Vec<CollectionAttempt>>;

    /// most recent overdue record of a loan
    fn overdue_record(&self, loan_id: LoanId) -> Result<Option<OverdueRecord>>;

    /// insert or replace by record id
    fn save_overdue_record(&self, record: &OverdueRecord) -> Result<()>;

    fn overdue_records_by_status(&self, status: OverdueStatus) -> Result<Vec<OverdueRecord>>;
}

/// external wallet / ledger
pub trait Wallet: Send + Sync {
    /// fails with `InsufficientFunds` when the account cannot cover `amount`
    fn withdraw(&self, account: &AccountId, amount: Money) -> Result<()>;

    fn deposit(&self, account: &AccountId, amount: Money) -> Result<()>;
}

/// supplies the raw inputs of a credit score
pub trait CreditProfileSource: Send + Sync {
    fn profile(&self, borrower: &AccountId) -> Result<CreditProfile>;
}

/// consumer of lifecycle events
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}
