//! in-memory collaborators
//!
//! Loans live in one map keyed by loan id; the borrower and status views are derived from
//! it on every query so no secondary index can drift.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::credit::CreditProfile;
use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::interfaces::{CreditProfileSource, LoanRepository, Wallet};
use crate::loan::Loan;
use crate::overdue::{CollectionAttempt, OverdueRecord, OverdueStatus};
use crate::payments::ScheduleEntry;
use crate::status::LoanStatus;
use crate::types::{AccountId, LoanId};

#[derive(Default)]
pub struct InMemoryStore {
    loans: DashMap<LoanId, Loan>,
    schedules: DashMap<LoanId, Vec<ScheduleEntry>>,
    attempts: DashMap<LoanId, Vec<CollectionAttempt>>,
    overdue: DashMap<LoanId, Vec<OverdueRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loan_count(&self) -> usize {
        self.loans.len()
    }
}

impl LoanRepository for InMemoryStore {
    fn insert_loan(&self, loan: &Loan) -> Result<()> {
        if self.loans.contains_key(&loan.loan_id) {
            return Err(LoanError::persistence(format!("loan {} already exists", loan.loan_id)));
        }
        self.loans.insert(loan.loan_id, loan.clone());
        Ok(())
    }

    fn get_loan(&self, loan_id: LoanId) -> Result<Option<Loan>> {
        Ok(self.loans.get(&loan_id).map(|l| l.value().clone()))
    }

    fn update_loan(&self, loan: &Loan) -> Result<()> {
        match self.loans.get_mut(&loan.loan_id) {
            Some(mut stored) => {
                *stored = loan.clone();
                Ok(())
            }
            None => Err(LoanError::LoanNotFound { loan_id: loan.loan_id }),
        }
    }

    fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<Loan>> {
        let mut loans: Vec<Loan> = self
            .loans
            .iter()
            .filter(|l| l.status == status)
            .map(|l| l.value().clone())
            .collect();
        loans.sort_by_key(|l| (l.applied_at, l.loan_id));
        Ok(loans)
    }

    fn loans_by_borrower(&self, borrower: &AccountId) -> Result<Vec<Loan>> {
        let mut loans: Vec<Loan> = self
            .loans
            .iter()
            .filter(|l| &l.borrower_id == borrower)
            .map(|l| l.value().clone())
            .collect();
        loans.sort_by_key(|l| (l.applied_at, l.loan_id));
        Ok(loans)
    }

    fn save_schedule(&self, loan_id: LoanId, entries: &[ScheduleEntry]) -> Result<()> {
        self.schedules.insert(loan_id, entries.to_vec());
        Ok(())
    }

    fn schedule(&self, loan_id: LoanId) -> Result<Vec<ScheduleEntry>> {
        Ok(self.schedules.get(&loan_id).map(|s| s.value().clone()).unwrap_or_default())
    }

    fn mark_installment_paid(
        &self,
        loan_id: LoanId,
        payment_number: u32,
        paid_at: DateTime<Utc>,
        amount: Money,
    ) -> Result<()> {
        let mut schedule = self
            .schedules
            .get_mut(&loan_id)
            .ok_or_else(|| LoanError::persistence(format!("no schedule stored for loan {}", loan_id)))?;

        let entry = schedule
            .iter_mut()
            .find(|e| e.payment_number == payment_number)
            .ok_or_else(|| LoanError::persistence(format!("no installment {} on loan {}", payment_number, loan_id)))?;

        entry.actual_payment_date = Some(paid_at);
        entry.actual_payment_amount = Some(amount);
        Ok(())
    }

    fn append_collection_attempt(&self, attempt: &CollectionAttempt) -> Result<()> {
        self.attempts.entry(attempt.loan_id).or_default().push(attempt.clone());
        Ok(())
    }

    fn collection_attempts(&self, loan_id: LoanId) -> Result<Vec<CollectionAttempt>> {
        Ok(self.attempts.get(&loan_id).map(|a| a.value().clone()).unwrap_or_default())
    }

    fn overdue_record(&self, loan_id: LoanId) -> Result<Option<OverdueRecord>> {
        Ok(self.overdue.get(&loan_id).and_then(|records| records.last().cloned()))
    }

    fn save_overdue_record(&self, record: &OverdueRecord) -> Result<()> {
        let mut records = self.overdue.entry(record.loan_id).or_default();
        match records.iter_mut().find(|r| r.record_id == record.record_id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    fn overdue_records_by_status(&self, status: OverdueStatus) -> Result<Vec<OverdueRecord>> {
        Ok(self
            .overdue
            .iter()
            .flat_map(|records| records.iter().filter(|r| r.status == status).cloned().collect::<Vec<_>>())
            .collect())
    }
}

/// wallet keeping balances in memory
#[derive(Default)]
pub struct InMemoryWallet {
    balances: DashMap<AccountId, Money>,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, account: &AccountId) -> Money {
        self.balances.get(account).map(|b| *b).unwrap_or(Money::ZERO)
    }
}

impl Wallet for InMemoryWallet {
    fn withdraw(&self, account: &AccountId, amount: Money) -> Result<()> {
        if !amount.is_positive() {
            return Err(LoanError::InvalidAmount { amount });
        }

        let mut balance = self.balances.entry(account.clone()).or_default();
        if *balance < amount {
            return Err(LoanError::InsufficientFunds {
                available: *balance,
                requested: amount,
            });
        }
        *balance -= amount;
        Ok(())
    }

    fn deposit(&self, account: &AccountId, amount: Money) -> Result<()> {
        if !amount.is_positive() {
            return Err(LoanError::InvalidAmount { amount });
        }

        *self.balances.entry(account.clone()).or_default() += amount;
        Ok(())
    }
}

/// profile source backed by a fixed table
#[derive(Default)]
pub struct StaticProfileSource {
    profiles: DashMap<AccountId, CreditProfile>,
}

impl StaticProfileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, profile: CreditProfile) {
        self.profiles.insert(profile.borrower_id.clone(), profile);
    }
}

impl CreditProfileSource for StaticProfileSource {
    fn profile(&self, borrower: &AccountId) -> Result<CreditProfile> {
        self.profiles
            .get(borrower)
            .map(|p| p.value().clone())
            .ok_or_else(|| LoanError::ProfileUnavailable {
                borrower: borrower.to_string(),
                message: "no profile on record".to_string(),
            })
    }
}
