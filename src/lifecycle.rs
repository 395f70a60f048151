use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, LoanProduct};
use crate::credit::{CreditScoreEngine, PenaltyKind};
use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::events::Event;
use crate::interfaces::{CreditProfileSource, EventSink, LoanRepository, Wallet};
use crate::loan::{Loan, LoanChange};
use crate::locks::KeyedLocks;
use crate::overdue::PenaltyEngine;
use crate::payments::{allocate, AmortizationCalculator, PaymentBreakdown, ScheduleEntry};
use crate::status::LoanStatus;
use crate::types::{AccountId, Lender, LoanApplication, LoanId, PaymentMethod};

/// result of a successful payment
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    pub loan: Loan,
    pub breakdown: PaymentBreakdown,
}

/// installments found past due by a sweep
#[derive(Debug, Clone, PartialEq)]
pub struct MissedInstallments {
    pub loan: Loan,
    pub missed: u32,
    pub missed_amount: Money,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyAccrual {
    pub loan: Loan,
    pub amount: Money,
    pub days_charged: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeizureOutcome {
    pub loan: Loan,
    pub seized_value: Money,
    /// part of the seized value applied to the balance
    pub applied: Money,
    /// part returned to the borrower
    pub refunded: Money,
}

/// loan lifecycle manager
///
/// Sole writer of loan records. Every read-modify-write runs under the loan's own lock, and
/// submissions additionally serialize per borrower so the open-loan cap holds.
pub struct LoanManager {
    config: Arc<EngineConfig>,
    credit: Arc<CreditScoreEngine>,
    repository: Arc<dyn LoanRepository>,
    wallet: Arc<dyn Wallet>,
    profiles: Arc<dyn CreditProfileSource>,
    events: Arc<dyn EventSink>,
    loan_locks: KeyedLocks<LoanId>,
    borrower_locks: KeyedLocks<AccountId>,
}

impl LoanManager {
    pub fn new(
        config: Arc<EngineConfig>,
        credit: Arc<CreditScoreEngine>,
        repository: Arc<dyn LoanRepository>,
        wallet: Arc<dyn Wallet>,
        profiles: Arc<dyn CreditProfileSource>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            credit,
            repository,
            wallet,
            profiles,
            events,
            loan_locks: KeyedLocks::new(),
            borrower_locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn credit(&self) -> &CreditScoreEngine {
        &self.credit
    }

    pub fn repository(&self) -> &dyn LoanRepository {
        self.repository.as_ref()
    }

    pub fn events(&self) -> &dyn EventSink {
        self.events.as_ref()
    }

    /// submit a loan application
    pub fn submit_application(&self, application: LoanApplication, time_provider: &SafeTimeProvider) -> Result<Loan> {
        let product = self.config.product(application.loan_type)?;
        validate_application(&application, product)?;

        let borrower = application.borrower_id.clone();
        let loan = self.borrower_locks.with_lock(&borrower, || {
            if let Some(reason) = self.credit.restriction(&borrower) {
                return Err(LoanError::BorrowerRestricted {
                    borrower: borrower.to_string(),
                    reason: reason.to_string(),
                });
            }

            let limit = self.config.lending.max_active_loans;
            let active = self
                .repository
                .loans_by_borrower(&borrower)?
                .iter()
                .filter(|l| l.status.is_open())
                .count();
            if active >= limit {
                return Err(LoanError::TooManyActiveLoans {
                    borrower: borrower.to_string(),
                    active,
                    limit,
                });
            }

            let profile = self.profiles.profile(&borrower)?;
            let score = self.credit.assess(&profile);
            if !self.credit.qualifies(&score, product) {
                return Err(LoanError::IneligibleCredit {
                    score: score.score,
                    grade: score.grade,
                    reason: format!("{:?} loans require grade {:?} or better", product.loan_type, product.min_grade),
                });
            }

            let max_amount = self.credit.max_loan_amount(score.grade);
            if application.amount > max_amount {
                return Err(LoanError::IneligibleCredit {
                    score: score.score,
                    grade: score.grade,
                    reason: format!("amount {} exceeds grade limit {}", application.amount, max_amount),
                });
            }

            let rate = self.credit.interest_rate(score.grade, product);
            let loan = Loan::new(application, rate, score.score, score.grade, time_provider.now());
            self.repository.insert_loan(&loan)?;
            Ok(loan)
        })?;

        info!(
            loan_id = %loan.loan_id,
            borrower = %loan.borrower_id,
            amount = %loan.principal,
            rate = %loan.interest_rate,
            grade = ?loan.grade,
            "loan application submitted"
        );
        self.events.publish(Event::LoanSubmitted {
            loan_id: loan.loan_id,
            borrower_id: loan.borrower_id.clone(),
            loan_type: loan.loan_type,
            amount: loan.principal,
            term_months: loan.term_months,
            score: loan.credit_score,
            grade: loan.grade,
            timestamp: loan.applied_at,
        });
        Ok(loan)
    }

    pub fn approve(&self, loan_id: LoanId, approver: &str, notes: &str, time_provider: &SafeTimeProvider) -> Result<Loan> {
        let now = time_provider.now();
        let change = LoanChange::Approved {
            approver: approver.to_string(),
            notes: notes.to_string(),
        };
        let loan = self.locked(loan_id, |loan| self.commit(&loan, &change, now))?;

        info!(loan_id = %loan_id, approver, "loan approved");
        self.events.publish(Event::LoanApproved {
            loan_id,
            approver: approver.to_string(),
            timestamp: now,
        });
        Ok(loan)
    }

    pub fn reject(&self, loan_id: LoanId, approver: &str, reason: &str, time_provider: &SafeTimeProvider) -> Result<Loan> {
        let now = time_provider.now();
        let change = LoanChange::Rejected {
            approver: approver.to_string(),
            reason: reason.to_string(),
        };
        let loan = self.locked(loan_id, |loan| self.commit(&loan, &change, now))?;

        info!(loan_id = %loan_id, approver, reason, "loan rejected");
        self.events.publish(Event::LoanRejected {
            loan_id,
            approver: approver.to_string(),
            reason: reason.to_string(),
            timestamp: now,
        });
        Ok(loan)
    }

    /// withdraw an application before disbursement
    pub fn cancel(&self, loan_id: LoanId, reason: &str, time_provider: &SafeTimeProvider) -> Result<Loan> {
        let now = time_provider.now();
        let change = LoanChange::Cancelled {
            reason: reason.to_string(),
        };
        let loan = self.locked(loan_id, |loan| self.commit(&loan, &change, now))?;

        info!(loan_id = %loan_id, reason, "loan cancelled");
        self.events.publish(Event::LoanCancelled {
            loan_id,
            reason: reason.to_string(),
            timestamp: now,
        });
        Ok(loan)
    }

    /// pay out an approved loan and persist its schedule
    pub fn disburse(&self, loan_id: LoanId, time_provider: &SafeTimeProvider) -> Result<Loan> {
        let now = time_provider.now();
        let change = LoanChange::Disbursed {
            penalty_rate: self.config.overdue.daily_penalty_rate,
        };

        let loan = self.locked(loan_id, |loan| {
            let disbursed = self.change(&loan, &change, now)?;
            let schedule = self.generate_repayment_schedule(&disbursed)?;

            self.transfer_principal(&disbursed)?;
            let persisted = self
                .repository
                .save_schedule(loan_id, &schedule)
                .and_then(|_| self.repository.update_loan(&disbursed));
            if let Err(e) = persisted {
                warn!(loan_id = %loan_id, error = %e, "disbursement not persisted, reversing transfer");
                self.reverse_principal(&disbursed);
                return Err(e);
            }
            Ok(disbursed)
        })?;

        info!(
            loan_id = %loan_id,
            amount = %loan.principal,
            monthly_payment = %loan.monthly_payment,
            "loan disbursed"
        );
        self.events.publish(Event::LoanDisbursed {
            loan_id,
            amount: loan.principal,
            monthly_payment: loan.monthly_payment,
            first_payment_date: loan.next_payment_date,
            timestamp: now,
        });
        Ok(loan)
    }

    /// collect a payment and allocate it against the loan
    ///
    /// The loan record is only written after the money moved; a failed write refunds the
    /// borrower, so either everything or nothing changes.
    pub fn apply_payment(
        &self,
        loan_id: LoanId,
        amount: Money,
        method: PaymentMethod,
        time_provider: &SafeTimeProvider,
    ) -> Result<PaymentReceipt> {
        let now = time_provider.now();

        let (before, receipt) = self.locked(loan_id, |loan| {
            loan.ensure_accepts_payment()?;
            let breakdown = allocate(&loan.amounts_due(), amount)?;
            debug!(
                loan_id = %loan_id,
                penalty = %breakdown.penalty_paid,
                interest = %breakdown.total_interest(),
                principal = %breakdown.total_principal_paid(),
                written_off = %breakdown.residual_written_off,
                unapplied = %breakdown.unapplied,
                "payment allocated"
            );

            let change = LoanChange::PaymentApplied {
                breakdown: breakdown.clone(),
            };
            let updated = self.change(&loan, &change, now)?;

            let collected = breakdown.collected();
            self.collect(&loan, collected)?;
            if let Err(e) = self.repository.update_loan(&updated) {
                warn!(loan_id = %loan_id, error = %e, "payment not persisted, refunding");
                self.refund_collection(&loan, collected);
                return Err(e);
            }

            self.stamp_schedule(&loan, &updated, &breakdown, now);
            Ok((loan, PaymentReceipt { loan: updated, breakdown }))
        })?;

        let loan = &receipt.loan;
        info!(
            loan_id = %loan_id,
            amount = %receipt.breakdown.collected(),
            balance = %loan.current_balance,
            status = ?loan.status,
            "payment applied"
        );
        self.events.publish(Event::PaymentMade {
            loan_id,
            amount: receipt.breakdown.collected(),
            method,
            penalty_paid: receipt.breakdown.penalty_paid,
            interest_paid: receipt.breakdown.total_interest(),
            principal_paid: receipt.breakdown.total_principal_paid(),
            remaining_balance: loan.current_balance,
            timestamp: now,
        });

        if loan.status == LoanStatus::PaidOff {
            self.credit.apply_bonus(&loan.borrower_id, self.config.lending.paid_off_bonus);
            info!(loan_id = %loan_id, "loan paid off");
            self.events.publish(Event::LoanPaidOff {
                loan_id,
                total_interest_paid: loan.total_interest_paid,
                timestamp: now,
            });
        }
        if before.status == LoanStatus::Overdue && loan.status != LoanStatus::Overdue {
            self.lift_suspension_if_current(&loan.borrower_id, now);
        }

        Ok(receipt)
    }

    /// clear the accrued penalty and stop further accrual
    pub fn waive_penalty(&self, loan_id: LoanId, approver: &str, time_provider: &SafeTimeProvider) -> Result<Loan> {
        let now = time_provider.now();
        let change = LoanChange::PenaltyWaived {
            approver: approver.to_string(),
        };

        let (before, loan) = self.locked(loan_id, |loan| {
            let updated = self.commit(&loan, &change, now)?;
            Ok((loan, updated))
        })?;

        info!(loan_id = %loan_id, approver, amount = %before.accrued_penalty, "penalty waived");
        self.events.publish(Event::PenaltyWaived {
            loan_id,
            approver: approver.to_string(),
            amount: before.accrued_penalty,
            timestamp: now,
        });
        if before.status == LoanStatus::Overdue && loan.status == LoanStatus::Active {
            self.lift_suspension_if_current(&loan.borrower_id, now);
        }
        Ok(loan)
    }

    pub fn get_loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.repository
            .get_loan(loan_id)?
            .ok_or(LoanError::LoanNotFound { loan_id })
    }

    pub fn get_borrower_loans(&self, borrower: &AccountId) -> Result<Vec<Loan>> {
        self.repository.loans_by_borrower(borrower)
    }

    /// schedule implied by the loan's terms, starting at disbursement
    pub fn generate_repayment_schedule(&self, loan: &Loan) -> Result<Vec<ScheduleEntry>> {
        let start = loan.disbursed_at.unwrap_or(loan.applied_at);
        AmortizationCalculator::new(loan.repayment_method).calculate_schedule(
            loan.principal,
            loan.interest_rate,
            loan.term_months,
            start,
        )
    }

    /// schedule persisted at disbursement, with executed payments stamped
    pub fn repayment_schedule(&self, loan_id: LoanId) -> Result<Vec<ScheduleEntry>> {
        self.get_loan(loan_id)?;
        self.repository.schedule(loan_id)
    }

    /// close every installment whose due date has passed unpaid
    pub fn record_missed_installments(
        &self,
        loan_id: LoanId,
        time_provider: &SafeTimeProvider,
    ) -> Result<Option<MissedInstallments>> {
        let now = time_provider.now();

        self.locked(loan_id, |loan| {
            let mut current = loan.clone();
            let mut missed_amount = Money::ZERO;
            while current.has_missed_installment(now) {
                missed_amount += current.current_interest_due + current.current_principal_due;
                current = self.change(&current, &LoanChange::InstallmentMissed, now)?;
            }

            if current == loan {
                return Ok(None);
            }
            self.repository.update_loan(&current)?;

            let missed = current.installments_missed - loan.installments_missed;
            if missed > 0 {
                info!(
                    loan_id = %loan_id,
                    missed,
                    overdue_payments = current.overdue_payments,
                    overdue_amount = %current.overdue_amount(),
                    "installment missed"
                );
            }
            Ok(Some(MissedInstallments {
                loan: current,
                missed,
                missed_amount,
            }))
        })
    }

    /// accrue the penalty for days not yet charged
    pub fn accrue_penalty(
        &self,
        loan_id: LoanId,
        penalties: &PenaltyEngine,
        time_provider: &SafeTimeProvider,
    ) -> Result<Option<PenaltyAccrual>> {
        let now = time_provider.now();

        self.locked(loan_id, |loan| {
            if loan.status != LoanStatus::Overdue {
                return Ok(None);
            }

            let calculation = penalties.accrue(&loan, now.date_naive());
            let through = match calculation.through {
                Some(through) if !calculation.is_empty() => through,
                _ => return Ok(None),
            };

            let change = LoanChange::PenaltyAccrued {
                amount: calculation.penalty_amount,
                through,
            };
            let updated = self.commit(&loan, &change, now)?;
            debug!(
                loan_id = %loan_id,
                amount = %calculation.penalty_amount,
                days = calculation.days_charged,
                "penalty accrued"
            );
            Ok(Some(PenaltyAccrual {
                loan: updated,
                amount: calculation.penalty_amount,
                days_charged: calculation.days_charged,
            }))
        })
    }

    /// move an overdue loan to DEFAULT; no-op when already there
    ///
    /// A fresh default also charges the default penalty and blacklists the borrower.
    pub fn mark_default(&self, loan_id: LoanId, reason: &str, time_provider: &SafeTimeProvider) -> Result<Option<Loan>> {
        let now = time_provider.now();
        let change = LoanChange::Defaulted {
            reason: reason.to_string(),
        };

        let loan = self.locked(loan_id, |loan| {
            if loan.in_default || matches!(loan.status, LoanStatus::Default | LoanStatus::Foreclosed) {
                return Ok(None);
            }
            self.commit(&loan, &change, now).map(Some)
        })?;

        if let Some(loan) = &loan {
            warn!(loan_id = %loan_id, reason, balance = %loan.current_balance, "loan defaulted");
            self.events.publish(Event::LoanDefaulted {
                loan_id,
                reason: reason.to_string(),
                outstanding: loan.current_balance,
                timestamp: now,
            });
            self.penalize_default(loan, now);
        }
        Ok(loan)
    }

    /// seize the collateral of a defaulted loan and foreclose it
    ///
    /// No-op for unsecured loans and loans whose collateral was already seized.
    pub fn seize_collateral(
        &self,
        loan_id: LoanId,
        seizure_rate: Rate,
        time_provider: &SafeTimeProvider,
    ) -> Result<Option<SeizureOutcome>> {
        let now = time_provider.now();

        let outcome = self.locked(loan_id, |loan| {
            let collateral = match (&loan.collateral, loan.status, loan.seized_collateral_value) {
                (Some(collateral), LoanStatus::Default, None) => collateral.clone(),
                _ => return Ok(None),
            };

            let seized_value = collateral.assessed_value.apply(seizure_rate);
            let applied = seized_value.min(loan.current_balance);
            let refunded = seized_value - applied;

            let updated = self.change(&loan, &LoanChange::CollateralSeized { seized_value }, now)?;
            if refunded.is_positive() {
                self.wallet.deposit(&loan.borrower_id, refunded)?;
            }
            if let Err(e) = self.repository.update_loan(&updated) {
                if refunded.is_positive() {
                    self.compensate(self.wallet.withdraw(&loan.borrower_id, refunded), loan_id, "reclaim seizure refund");
                }
                return Err(e);
            }

            Ok(Some(SeizureOutcome {
                loan: updated,
                seized_value,
                applied,
                refunded,
            }))
        })?;

        if let Some(outcome) = &outcome {
            let deficiency = outcome.loan.deficiency.unwrap_or(Money::ZERO);
            warn!(
                loan_id = %loan_id,
                seized = %outcome.seized_value,
                applied = %outcome.applied,
                deficiency = %deficiency,
                "collateral seized, loan foreclosed"
            );
            self.events.publish(Event::CollateralSeized {
                loan_id,
                seized_value: outcome.seized_value,
                applied: outcome.applied,
                refunded: outcome.refunded,
                timestamp: now,
            });
            self.events.publish(Event::LoanForeclosed {
                loan_id,
                deficiency,
                timestamp: now,
            });
        }
        Ok(outcome)
    }

    fn locked<T>(&self, loan_id: LoanId, f: impl FnOnce(Loan) -> Result<T>) -> Result<T> {
        self.loan_locks.with_lock(&loan_id, || {
            let loan = self.get_loan(loan_id)?;
            f(loan)
        })
    }

    fn change(&self, loan: &Loan, change: &LoanChange, now: DateTime<Utc>) -> Result<Loan> {
        loan.apply(change, now).map_err(|e| {
            if matches!(e, LoanError::InvariantViolation { .. }) {
                error!(loan_id = %loan.loan_id, change = change.name(), error = %e, "loan invariant violated");
            }
            e
        })
    }

    fn commit(&self, loan: &Loan, change: &LoanChange, now: DateTime<Utc>) -> Result<Loan> {
        let updated = self.change(loan, change, now)?;
        self.repository.update_loan(&updated)?;
        Ok(updated)
    }

    fn transfer_principal(&self, loan: &Loan) -> Result<()> {
        if let Lender::Peer(lender) = &loan.lender {
            self.wallet.withdraw(lender, loan.principal)?;
        }
        if let Err(e) = self.wallet.deposit(&loan.borrower_id, loan.principal) {
            if let Lender::Peer(lender) = &loan.lender {
                self.compensate(self.wallet.deposit(lender, loan.principal), loan.loan_id, "refund lender");
            }
            return Err(e);
        }
        Ok(())
    }

    fn reverse_principal(&self, loan: &Loan) {
        self.compensate(
            self.wallet.withdraw(&loan.borrower_id, loan.principal),
            loan.loan_id,
            "reclaim principal",
        );
        if let Lender::Peer(lender) = &loan.lender {
            self.compensate(self.wallet.deposit(lender, loan.principal), loan.loan_id, "refund lender");
        }
    }

    fn collect(&self, loan: &Loan, amount: Money) -> Result<()> {
        self.wallet.withdraw(&loan.borrower_id, amount)?;
        if let Lender::Peer(lender) = &loan.lender {
            if let Err(e) = self.wallet.deposit(lender, amount) {
                self.compensate(self.wallet.deposit(&loan.borrower_id, amount), loan.loan_id, "refund borrower");
                return Err(e);
            }
        }
        Ok(())
    }

    fn refund_collection(&self, loan: &Loan, amount: Money) {
        if let Lender::Peer(lender) = &loan.lender {
            self.compensate(self.wallet.withdraw(lender, amount), loan.loan_id, "reclaim from lender");
        }
        self.compensate(self.wallet.deposit(&loan.borrower_id, amount), loan.loan_id, "refund borrower");
    }

    fn compensate(&self, result: Result<()>, loan_id: LoanId, action: &str) {
        if let Err(e) = result {
            error!(loan_id = %loan_id, action, error = %e, "compensating transfer failed");
        }
    }

    /// stamp the schedule entries settled by a payment with each installment's own amount
    fn stamp_schedule(&self, before: &Loan, after: &Loan, breakdown: &PaymentBreakdown, now: DateTime<Utc>) {
        let mut settled = Vec::new();
        if before.overdue_payments > 0 && after.overdue_payments == 0 {
            let first = before.installments_closed - before.overdue_payments + 1;
            settled.extend((first..=before.installments_closed).zip(before.overdue_installment_amounts.iter().copied()));
        }
        if breakdown.installment_completed {
            let paid = before.current_installment_amount - breakdown.residual_written_off;
            settled.push((before.installments_closed + 1, paid));
        }

        for (number, amount) in settled {
            let stamped = self.repository.mark_installment_paid(before.loan_id, number, now, amount);
            if let Err(e) = stamped {
                warn!(loan_id = %before.loan_id, installment = number, error = %e, "schedule entry not stamped");
            }
        }
    }

    fn penalize_default(&self, loan: &Loan, now: DateTime<Utc>) {
        let overdue = &self.config.overdue;

        self.credit
            .apply_penalty(&loan.borrower_id, PenaltyKind::Default, overdue.default_penalty);
        if self.credit.blacklist(&loan.borrower_id) {
            self.credit
                .apply_penalty(&loan.borrower_id, PenaltyKind::Blacklist, overdue.blacklist_penalty);
            warn!(borrower = %loan.borrower_id, loan_id = %loan.loan_id, "borrower blacklisted");
            self.events.publish(Event::BorrowerBlacklisted {
                borrower_id: loan.borrower_id.clone(),
                loan_id: loan.loan_id,
                timestamp: now,
            });
        }
    }

    /// lift a suspension once none of the borrower's loans is overdue
    fn lift_suspension_if_current(&self, borrower: &AccountId, now: DateTime<Utc>) {
        if !self.credit.is_suspended(borrower) {
            return;
        }

        match self.repository.loans_by_borrower(borrower) {
            Ok(loans) if loans.iter().all(|l| l.status != LoanStatus::Overdue) => {
                if self.credit.lift_suspension(borrower) {
                    self.events.publish(Event::SuspensionLifted {
                        borrower_id: borrower.clone(),
                        timestamp: now,
                    });
                }
            }
            Ok(_) => {}
            Err(e) => warn!(borrower = %borrower, error = %e, "suspension check failed"),
        }
    }
}

fn validate_application(application: &LoanApplication, product: &LoanProduct) -> Result<()> {
    if !application.amount.is_positive() {
        return Err(LoanError::InvalidAmount {
            amount: application.amount,
        });
    }

    if application.term_months == 0 || application.term_months > product.max_term_months {
        return Err(LoanError::InvalidTerm {
            months: application.term_months,
            max_months: product.max_term_months,
        });
    }

    match &application.collateral {
        Some(collateral) if !collateral.assessed_value.is_positive() => Err(LoanError::InsufficientCollateral {
            message: format!("{} has no assessed value", collateral.collateral_type),
        }),
        Some(collateral) if product.requires_collateral => {
            let required = application.amount.apply(product.min_collateral_coverage);
            if collateral.discounted_value() < required {
                return Err(LoanError::InsufficientCollateral {
                    message: format!(
                        "discounted value {} below required coverage {}",
                        collateral.discounted_value(),
                        required
                    ),
                });
            }
            Ok(())
        }
        None if product.requires_collateral => Err(LoanError::InsufficientCollateral {
            message: format!("{:?} loans must be secured", product.loan_type),
        }),
        _ => Ok(()),
    }
}
