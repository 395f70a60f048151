//! overdue & collection processor
//!
//! A sweep walks every ACTIVE, OVERDUE and DEFAULT loan and reconciles it against the clock:
//! missed installments, penalty accrual, collection escalation, default handling and collateral
//! seizure. Loan records are only ever changed through the lifecycle manager; the processor owns
//! the overdue records and the collection log.

pub mod penalty;
pub mod record;

pub use penalty::{PenaltyCalculation, PenaltyConfig, PenaltyEngine};
pub use record::{CollectionAttempt, OverdueRecord, OverdueStatus};

use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::credit::PenaltyKind;
use crate::decimal::Money;
use crate::errors::Result;
use crate::events::Event;
use crate::lifecycle::LoanManager;
use crate::loan::Loan;
use crate::status::LoanStatus;
use crate::types::LoanId;

/// outcome of one sweep cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub loans_scanned: usize,
    pub installments_missed: u32,
    pub penalties_accrued: Money,
    pub collection_attempts: u32,
    pub defaults: u32,
    pub seizures: u32,
    pub suspensions: u32,
    pub records_closed: u32,
    /// loans whose processing failed; retried on the next cycle
    pub failures: Vec<(LoanId, String)>,
    /// shutdown was requested before every loan was processed
    pub interrupted: bool,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }
}

pub struct OverdueProcessor {
    manager: Arc<LoanManager>,
    penalties: PenaltyEngine,
}

impl OverdueProcessor {
    pub fn new(manager: Arc<LoanManager>) -> Self {
        let penalties = PenaltyEngine::new(PenaltyConfig::from_overdue(&manager.config().overdue));
        Self { manager, penalties }
    }

    pub fn manager(&self) -> &LoanManager {
        &self.manager
    }

    /// run one full sweep
    pub fn run_sweep(&self, time_provider: &SafeTimeProvider) -> SweepReport {
        self.run_sweep_until(time_provider, || false)
    }

    /// run one sweep, checking `stop` before each loan
    ///
    /// A loan whose processing started always runs to completion.
    pub fn run_sweep_until(&self, time_provider: &SafeTimeProvider, stop: impl Fn() -> bool) -> SweepReport {
        let now = time_provider.now();
        let mut report = SweepReport::default();
        let mut scanned = HashSet::new();

        for loan_id in self.sweep_candidates() {
            if stop() {
                report.interrupted = true;
                break;
            }

            report.loans_scanned += 1;
            scanned.insert(loan_id);
            if let Err(e) = self.process_loan(loan_id, time_provider, &mut report) {
                warn!(loan_id = %loan_id, error = %e, "sweep failed for loan, retrying next cycle");
                report.failures.push((loan_id, e.to_string()));
            }
        }

        if !report.interrupted {
            self.resolve_stale_records(&scanned, now, &mut report);
        }

        info!(
            scanned = report.loans_scanned,
            missed = report.installments_missed,
            penalties = %report.penalties_accrued,
            attempts = report.collection_attempts,
            defaults = report.defaults,
            seizures = report.seizures,
            failures = report.failures.len(),
            interrupted = report.interrupted,
            "overdue sweep finished"
        );
        report
    }

    /// collection log of a loan, oldest first
    pub fn collection_attempts(&self, loan_id: LoanId) -> Result<Vec<CollectionAttempt>> {
        self.manager.repository().collection_attempts(loan_id)
    }

    /// latest overdue record of a loan
    pub fn overdue_record(&self, loan_id: LoanId) -> Result<Option<OverdueRecord>> {
        self.manager.repository().overdue_record(loan_id)
    }

    fn sweep_candidates(&self) -> Vec<LoanId> {
        let repository = self.manager.repository();
        let mut ids = Vec::new();
        for status in [LoanStatus::Active, LoanStatus::Overdue, LoanStatus::Default] {
            match repository.loans_by_status(status) {
                Ok(loans) => ids.extend(loans.iter().map(|l| l.loan_id)),
                Err(e) => warn!(status = ?status, error = %e, "could not list loans for sweep"),
            }
        }
        ids
    }

    fn process_loan(&self, loan_id: LoanId, time_provider: &SafeTimeProvider, report: &mut SweepReport) -> Result<()> {
        let now = time_provider.now();

        if let Some(missed) = self.manager.record_missed_installments(loan_id, time_provider)? {
            if missed.missed > 0 {
                self.on_missed(&missed.loan, missed.missed, missed.missed_amount, now, report)?;
            }
        }

        if let Some(accrual) = self.manager.accrue_penalty(loan_id, &self.penalties, time_provider)? {
            report.penalties_accrued += accrual.amount;
            self.manager.events().publish(Event::PenaltyAccrued {
                loan_id,
                amount: accrual.amount,
                days_charged: accrual.days_charged,
                timestamp: now,
            });
        }

        let loan = self.manager.get_loan(loan_id)?;
        if loan.status == LoanStatus::Overdue {
            let record = self.collect(&loan, now, report)?;
            if let Some(reason) = self.default_reason(&loan, &record) {
                if self.manager.mark_default(loan_id, &reason, time_provider)?.is_some() {
                    report.defaults += 1;
                }
            }
        }

        let loan = self.manager.get_loan(loan_id)?;
        if loan.status == LoanStatus::Default && loan.is_secured() {
            let rate = self.manager.config().overdue.seizure_rate;
            if self.manager.seize_collateral(loan_id, rate, time_provider)?.is_some() {
                report.seizures += 1;
            }
        }

        let loan = self.manager.get_loan(loan_id)?;
        self.resolve_record(&loan, now, report)
    }

    /// credit feedback for freshly missed installments, then the overdue record
    ///
    /// The misses are already on the loan and are not found again, so the feedback must run
    /// before any fallible write. A record that failed to save is reopened from the loan by the
    /// next collection step.
    fn on_missed(&self, loan: &Loan, missed: u32, missed_amount: Money, now: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        let repository = self.manager.repository();
        let overdue = &self.manager.config().overdue;
        report.installments_missed += missed;

        let points = overdue.missed_payment_penalty * missed;
        self.manager
            .credit()
            .apply_penalty(&loan.borrower_id, PenaltyKind::MissedPayment, points);
        self.manager.events().publish(Event::LoanOverdue {
            loan_id: loan.loan_id,
            overdue_payments: loan.overdue_payments,
            missed_amount,
            overdue_amount: loan.overdue_amount(),
            timestamp: now,
        });

        if loan.overdue_payments >= overdue.suspension_threshold && self.manager.credit().suspend(&loan.borrower_id) {
            report.suspensions += 1;
            self.manager
                .credit()
                .apply_penalty(&loan.borrower_id, PenaltyKind::Suspension, overdue.suspension_penalty);
            warn!(borrower = %loan.borrower_id, overdue_payments = loan.overdue_payments, "account suspended");
            self.manager.events().publish(Event::AccountSuspended {
                borrower_id: loan.borrower_id.clone(),
                overdue_payments: loan.overdue_payments,
                timestamp: now,
            });
        }

        if loan.status == LoanStatus::Overdue {
            let record = match repository.overdue_record(loan.loan_id)? {
                Some(mut record) if record.is_active() => {
                    record.record_miss(loan, now);
                    record
                }
                _ => OverdueRecord::open(loan, now),
            };
            repository.save_overdue_record(&record)?;
        }
        Ok(())
    }

    /// make a collection attempt when one is due; returns the synced record
    fn collect(&self, loan: &Loan, now: DateTime<Utc>, report: &mut SweepReport) -> Result<OverdueRecord> {
        let repository = self.manager.repository();
        let interval = self.manager.config().overdue.collection_interval_days;

        let mut record = match repository.overdue_record(loan.loan_id)? {
            Some(record) if record.is_active() => record,
            _ => OverdueRecord::open(loan, now),
        };
        record.sync(loan);

        if record.collection_due(now, interval) {
            let attempt = record.next_attempt(loan, now);
            repository.append_collection_attempt(&attempt)?;
            report.collection_attempts += 1;
            debug!(
                loan_id = %loan.loan_id,
                attempt = attempt.attempt_number,
                method = ?attempt.method,
                successful = attempt.successful,
                "collection attempted"
            );
            self.manager.events().publish(Event::CollectionAttempted {
                loan_id: loan.loan_id,
                attempt: attempt.attempt_number,
                method: attempt.method,
                timestamp: now,
            });
        }

        repository.save_overdue_record(&record)?;
        Ok(record)
    }

    fn default_reason(&self, loan: &Loan, record: &OverdueRecord) -> Option<String> {
        let overdue = &self.manager.config().overdue;
        if loan.overdue_payments >= overdue.default_threshold {
            Some(format!("{} consecutive missed installments", loan.overdue_payments))
        } else if record.collection_attempts > overdue.max_collection_attempts {
            Some(format!("{} collection attempts without resolution", record.collection_attempts))
        } else {
            None
        }
    }

    fn resolve_record(&self, loan: &Loan, now: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        let repository = self.manager.repository();
        let mut record = match repository.overdue_record(loan.loan_id)? {
            Some(record) if matches!(record.status, OverdueStatus::Active | OverdueStatus::Escalated) => record,
            _ => return Ok(()),
        };

        match OverdueRecord::closing_status(loan) {
            Some(status) if status != record.status => {
                record.close(status, loan, now);
                repository.save_overdue_record(&record)?;
                report.records_closed += 1;
                info!(loan_id = %loan.loan_id, status = ?status, "overdue record closed");
            }
            _ => {}
        }
        Ok(())
    }

    /// close records of loans that left the sweep, e.g. paid off while overdue
    fn resolve_stale_records(&self, scanned: &HashSet<LoanId>, now: DateTime<Utc>, report: &mut SweepReport) {
        let repository = self.manager.repository();
        let mut stale = Vec::new();
        for status in [OverdueStatus::Active, OverdueStatus::Escalated] {
            match repository.overdue_records_by_status(status) {
                Ok(records) => stale.extend(
                    records
                        .into_iter()
                        .map(|r| r.loan_id)
                        .filter(|id| !scanned.contains(id)),
                ),
                Err(e) => warn!(status = ?status, error = %e, "could not list overdue records"),
            }
        }

        for loan_id in stale {
            let resolved = self
                .manager
                .get_loan(loan_id)
                .and_then(|loan| self.resolve_record(&loan, now, report));
            if let Err(e) = resolved {
                warn!(loan_id = %loan_id, error = %e, "overdue record not resolved");
                report.failures.push((loan_id, e.to_string()));
            }
        }
    }
}
