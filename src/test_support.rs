use chrono::{DateTime, Duration, TimeZone, Utc};
use hourglass_rs::{SafeTimeProvider, TimeSource};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::credit::{CreditProfile, CreditScoreEngine};
use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::events::EventLog;
use crate::interfaces::{LoanRepository, Wallet};
use crate::lifecycle::LoanManager;
use crate::loan::Loan;
use crate::overdue::{CollectionAttempt, OverdueRecord, OverdueStatus};
use crate::payments::ScheduleEntry;
use crate::status::LoanStatus;
use crate::store::{InMemoryStore, InMemoryWallet, StaticProfileSource};
use crate::types::{AccountId, LoanApplication, LoanId};

/// route engine logs to the test output; RUST_LOG selects the level
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
}

/// in-memory store whose writes can be made to fail
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub inner: InMemoryStore,
    fail_updates: AtomicBool,
    failing_loans: Mutex<HashSet<LoanId>>,
    fail_records: AtomicBool,
    fail_attempts: AtomicBool,
}

impl FlakyStore {
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_loan(&self, loan_id: LoanId) {
        self.failing_loans.lock().insert(loan_id);
    }

    /// refuse overdue record writes
    pub fn fail_records(&self, fail: bool) {
        self.fail_records.store(fail, Ordering::SeqCst);
    }

    /// refuse collection log appends
    pub fn fail_attempts(&self, fail: bool) {
        self.fail_attempts.store(fail, Ordering::SeqCst);
    }

    fn check(&self, loan_id: LoanId) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) || self.failing_loans.lock().contains(&loan_id) {
            return Err(LoanError::persistence(format!("write refused for loan {}", loan_id)));
        }
        Ok(())
    }
}

impl LoanRepository for FlakyStore {
    fn insert_loan(&self, loan: &Loan) -> Result<()> {
        self.inner.insert_loan(loan)
    }

    fn get_loan(&self, loan_id: LoanId) -> Result<Option<Loan>> {
        self.inner.get_loan(loan_id)
    }

    fn update_loan(&self, loan: &Loan) -> Result<()> {
        self.check(loan.loan_id)?;
        self.inner.update_loan(loan)
    }

    fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<Loan>> {
        self.inner.loans_by_status(status)
    }

    fn loans_by_borrower(&self, borrower: &AccountId) -> Result<Vec<Loan>> {
        self.inner.loans_by_borrower(borrower)
    }

    fn save_schedule(&self, loan_id: LoanId, entries: &[ScheduleEntry]) -> Result<()> {
        self.inner.save_schedule(loan_id, entries)
    }

    fn schedule(&self, loan_id: LoanId) -> Result<Vec<ScheduleEntry>> {
        self.inner.schedule(loan_id)
    }

    fn mark_installment_paid(&self, loan_id: LoanId, number: u32, paid_at: DateTime<Utc>, amount: Money) -> Result<()> {
        self.inner.mark_installment_paid(loan_id, number, paid_at, amount)
    }

    fn append_collection_attempt(&self, attempt: &CollectionAttempt) -> Result<()> {
        if self.fail_attempts.load(Ordering::SeqCst) {
            return Err(LoanError::persistence(format!("collection log refused for loan {}", attempt.loan_id)));
        }
        self.inner.append_collection_attempt(attempt)
    }

    fn collection_attempts(&self, loan_id: LoanId) -> Result<Vec<CollectionAttempt>> {
        self.inner.collection_attempts(loan_id)
    }

    fn overdue_record(&self, loan_id: LoanId) -> Result<Option<OverdueRecord>> {
        self.inner.overdue_record(loan_id)
    }

    fn save_overdue_record(&self, record: &OverdueRecord) -> Result<()> {
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(LoanError::persistence(format!("overdue record refused for loan {}", record.loan_id)));
        }
        self.inner.save_overdue_record(record)
    }

    fn overdue_records_by_status(&self, status: OverdueStatus) -> Result<Vec<OverdueRecord>> {
        self.inner.overdue_records_by_status(status)
    }
}

/// a loan manager wired to in-memory collaborators and a test clock
pub(crate) struct Harness {
    pub config: Arc<EngineConfig>,
    pub store: Arc<FlakyStore>,
    pub wallet: Arc<InMemoryWallet>,
    pub profiles: Arc<StaticProfileSource>,
    pub events: Arc<EventLog>,
    pub credit: Arc<CreditScoreEngine>,
    pub manager: Arc<LoanManager>,
    pub time: SafeTimeProvider,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let config = Arc::new(config);
        let store = Arc::new(FlakyStore::default());
        let wallet = Arc::new(InMemoryWallet::new());
        let profiles = Arc::new(StaticProfileSource::new());
        let events = Arc::new(EventLog::new());
        let credit = Arc::new(CreditScoreEngine::new(config.credit.clone()));

        let manager = Arc::new(LoanManager::new(
            config.clone(),
            credit.clone(),
            store.clone(),
            wallet.clone(),
            profiles.clone(),
            events.clone(),
        ));

        Self {
            config,
            store,
            wallet,
            profiles,
            events,
            credit,
            manager,
            time: SafeTimeProvider::new(TimeSource::Test(start())),
        }
    }

    /// register a borrower scoring `score` with funds to repay
    pub fn borrower(&self, id: &str, score: u32) -> AccountId {
        self.profiles.set(CreditProfile::new(id, score, score, score));
        self.funded_account(id, 100_000)
    }

    pub fn funded_account(&self, id: &str, amount: i64) -> AccountId {
        let account = AccountId::new(id);
        self.wallet.deposit(&account, Money::from_major(amount)).unwrap();
        account
    }

    /// submit, approve and disburse
    pub fn active_loan(&self, application: LoanApplication) -> Loan {
        let loan = self.manager.submit_application(application, &self.time).unwrap();
        self.manager.approve(loan.loan_id, "admin", "", &self.time).unwrap();
        self.manager.disburse(loan.loan_id, &self.time).unwrap()
    }

    pub fn advance_days(&self, days: i64) {
        self.time.test_control().unwrap().advance(Duration::days(days));
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }
}
