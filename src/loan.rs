use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::payments::{due_date, AmountsDue, InstallmentPlan, PaymentBreakdown};
use crate::status::LoanStatus;
use crate::types::{
    AccountId, Collateral, Decision, Grade, Lender, LoanApplication, LoanId, LoanType, RepaymentMethod,
};

/// loan record
///
/// Plain data. Every mutation goes through [`Loan::apply`], which returns a new record and
/// leaves the original untouched when the change is refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    // identification
    pub loan_id: LoanId,
    pub borrower_id: AccountId,
    pub lender: Lender,
    pub loan_type: LoanType,
    pub purpose: String,

    // terms
    pub principal: Money,
    pub interest_rate: Rate,
    pub original_interest_rate: Rate,
    pub term_months: u32,
    pub repayment_method: RepaymentMethod,
    pub collateral: Option<Collateral>,
    pub credit_score: u32,
    pub grade: Grade,

    // running state
    pub current_balance: Money,
    pub monthly_payment: Money,
    pub payments_made: u32,
    pub total_payments: u32,
    pub installments_closed: u32,
    pub next_payment_date: Option<DateTime<Utc>>,
    pub current_interest_due: Money,
    pub current_principal_due: Money,
    /// full amount of the current installment when it opened
    pub current_installment_amount: Money,
    pub total_interest_paid: Money,
    pub total_principal_paid: Money,
    pub total_penalty_paid: Money,
    pub rounding_written_off: Money,
    pub last_payment_date: Option<DateTime<Utc>>,

    // delinquency
    pub overdue_payments: u32,
    pub installments_missed: u32,
    pub overdue_interest: Money,
    pub overdue_principal: Money,
    /// full amount of each installment still overdue, oldest first
    pub overdue_installment_amounts: Vec<Money>,
    pub accrued_penalty: Money,
    /// daily penalty rate
    pub penalty_rate: Rate,
    pub penalty_waived: bool,
    pub penalty_accrued_through: Option<NaiveDate>,
    /// due date of the oldest unpaid installment
    pub overdue_since: Option<DateTime<Utc>>,
    pub last_overdue_date: Option<DateTime<Utc>>,
    pub in_default: bool,
    pub default_date: Option<DateTime<Utc>>,
    pub seized_collateral_value: Option<Money>,
    pub deficiency: Option<Money>,

    // status and administration
    pub status: LoanStatus,
    pub applied_at: DateTime<Utc>,
    pub approval: Option<Decision>,
    pub rejection: Option<Decision>,
    pub cancellation: Option<Decision>,
    pub penalty_waiver: Option<Decision>,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_status_change: DateTime<Utc>,
}

/// a single state change applied to a loan
#[derive(Debug, Clone, PartialEq)]
pub enum LoanChange {
    Approved { approver: String, notes: String },
    Rejected { approver: String, reason: String },
    Cancelled { reason: String },
    Disbursed { penalty_rate: Rate },
    PaymentApplied { breakdown: PaymentBreakdown },
    InstallmentMissed,
    PenaltyAccrued { amount: Money, through: NaiveDate },
    PenaltyWaived { approver: String },
    Defaulted { reason: String },
    CollateralSeized { seized_value: Money },
}

impl LoanChange {
    pub fn name(&self) -> &'static str {
        match self {
            LoanChange::Approved { .. } => "approved",
            LoanChange::Rejected { .. } => "rejected",
            LoanChange::Cancelled { .. } => "cancelled",
            LoanChange::Disbursed { .. } => "disbursed",
            LoanChange::PaymentApplied { .. } => "payment_applied",
            LoanChange::InstallmentMissed => "installment_missed",
            LoanChange::PenaltyAccrued { .. } => "penalty_accrued",
            LoanChange::PenaltyWaived { .. } => "penalty_waived",
            LoanChange::Defaulted { .. } => "defaulted",
            LoanChange::CollateralSeized { .. } => "collateral_seized",
        }
    }
}

impl Loan {
    /// create a pending loan from an accepted application
    pub fn new(
        application: LoanApplication,
        interest_rate: Rate,
        credit_score: u32,
        grade: Grade,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            loan_id: Uuid::new_v4(),
            borrower_id: application.borrower_id,
            lender: application.lender,
            loan_type: application.loan_type,
            purpose: application.purpose,
            principal: application.amount,
            interest_rate,
            original_interest_rate: interest_rate,
            term_months: application.term_months,
            repayment_method: application.repayment_method,
            collateral: application.collateral,
            credit_score,
            grade,
            current_balance: application.amount,
            monthly_payment: Money::ZERO,
            payments_made: 0,
            total_payments: application.term_months,
            installments_closed: 0,
            next_payment_date: None,
            current_interest_due: Money::ZERO,
            current_principal_due: Money::ZERO,
            current_installment_amount: Money::ZERO,
            total_interest_paid: Money::ZERO,
            total_principal_paid: Money::ZERO,
            total_penalty_paid: Money::ZERO,
            rounding_written_off: Money::ZERO,
            last_payment_date: None,
            overdue_payments: 0,
            installments_missed: 0,
            overdue_interest: Money::ZERO,
            overdue_principal: Money::ZERO,
            overdue_installment_amounts: Vec::new(),
            accrued_penalty: Money::ZERO,
            penalty_rate: Rate::ZERO,
            penalty_waived: false,
            penalty_accrued_through: None,
            overdue_since: None,
            last_overdue_date: None,
            in_default: false,
            default_date: None,
            seized_collateral_value: None,
            deficiency: None,
            status: LoanStatus::Pending,
            applied_at,
            approval: None,
            rejection: None,
            cancellation: None,
            penalty_waiver: None,
            disbursed_at: None,
            closed_at: None,
            last_status_change: applied_at,
        }
    }

    pub fn is_secured(&self) -> bool {
        self.collateral.is_some()
    }

    /// overdue installments plus accrued penalty
    pub fn overdue_amount(&self) -> Money {
        self.overdue_interest + self.overdue_principal + self.accrued_penalty
    }

    /// installment amounts missed, penalty excluded
    pub fn overdue_installments_amount(&self) -> Money {
        self.overdue_interest + self.overdue_principal
    }

    pub fn plan(&self) -> InstallmentPlan {
        InstallmentPlan::new(self.principal, self.interest_rate, self.term_months, self.repayment_method)
    }

    /// rounding residual tolerated on the final installment
    pub fn rounding_tolerance(&self) -> Money {
        self.plan().rounding_tolerance(self.principal)
    }

    /// balances a payment would be allocated against
    pub fn amounts_due(&self) -> AmountsDue {
        AmountsDue {
            penalty: self.accrued_penalty,
            overdue_interest: self.overdue_interest,
            overdue_principal: self.overdue_principal,
            current_interest: self.current_interest_due,
            current_principal: self.current_principal_due,
            balance: self.current_balance,
            final_installment: self.next_payment_date.is_some()
                && self.installments_closed + 1 == self.total_payments,
            tolerance: self.rounding_tolerance(),
        }
    }

    /// refuse payments outside ACTIVE and OVERDUE
    pub fn ensure_accepts_payment(&self) -> Result<()> {
        self.require_repayable(LoanStatus::Active)
    }

    /// installment due date has passed without the installment being paid
    pub fn has_missed_installment(&self, now: DateTime<Utc>) -> bool {
        self.status.accepts_payment() && self.next_payment_date.map(|due| due <= now).unwrap_or(false)
    }

    /// apply a change and return the resulting record
    pub fn apply(&self, change: &LoanChange, at: DateTime<Utc>) -> Result<Loan> {
        let mut next = self.clone();

        match change {
            LoanChange::Approved { approver, notes } => {
                next.transition(LoanStatus::Approved, at)?;
                next.approval = Some(Decision {
                    by: approver.clone(),
                    note: notes.clone(),
                    at,
                });
            }
            LoanChange::Rejected { approver, reason } => {
                next.transition(LoanStatus::Rejected, at)?;
                next.rejection = Some(Decision {
                    by: approver.clone(),
                    note: reason.clone(),
                    at,
                });
            }
            LoanChange::Cancelled { reason } => {
                next.transition(LoanStatus::Cancelled, at)?;
                next.cancellation = Some(Decision {
                    by: next.borrower_id.to_string(),
                    note: reason.clone(),
                    at,
                });
            }
            LoanChange::Disbursed { penalty_rate } => {
                next.transition(LoanStatus::Active, at)?;
                next.disbursed_at = Some(at);
                next.monthly_payment = next.plan().monthly_payment;
                next.total_payments = next.term_months;
                next.penalty_rate = *penalty_rate;
                next.open_next_installment()?;
            }
            LoanChange::PaymentApplied { breakdown } => {
                next.require_repayable(LoanStatus::Active)?;
                next.apply_payment(breakdown, at)?;
            }
            LoanChange::InstallmentMissed => {
                next.require_repayable(LoanStatus::Overdue)?;
                next.close_missed_installment(at)?;
            }
            LoanChange::PenaltyAccrued { amount, through } => {
                if next.status != LoanStatus::Overdue {
                    return Err(next.refuse(LoanStatus::Overdue));
                }
                let already_accrued = next.penalty_accrued_through.map(|d| d >= *through).unwrap_or(false);
                if next.penalty_waived || already_accrued {
                    return Ok(next);
                }
                next.accrued_penalty += *amount;
                next.penalty_accrued_through = Some(*through);
            }
            LoanChange::PenaltyWaived { approver } => {
                next.require_repayable(next.status)?;
                next.accrued_penalty = Money::ZERO;
                next.penalty_waived = true;
                next.penalty_waiver = Some(Decision {
                    by: approver.clone(),
                    note: "penalty waived".to_string(),
                    at,
                });
                if next.status == LoanStatus::Overdue && next.overdue_amount().is_zero() {
                    next.transition(LoanStatus::Active, at)?;
                }
            }
            LoanChange::Defaulted { .. } => {
                next.transition(LoanStatus::Default, at)?;
                next.in_default = true;
                next.default_date = Some(at);
            }
            LoanChange::CollateralSeized { seized_value } => {
                if next.collateral.is_none() || next.seized_collateral_value.is_some() {
                    return Err(LoanError::InsufficientCollateral {
                        message: format!("loan {} has no collateral left to seize", next.loan_id),
                    });
                }
                next.transition(LoanStatus::Foreclosed, at)?;
                let applied = (*seized_value).min(next.current_balance);
                next.current_balance -= applied;
                next.seized_collateral_value = Some(*seized_value);
                next.deficiency = Some(next.current_balance);
            }
        }

        next.check_invariants()?;
        Ok(next)
    }

    fn transition(&mut self, to: LoanStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(self.refuse(to));
        }

        self.status = to;
        self.last_status_change = at;
        if to.is_terminal() {
            self.closed_at = Some(at);
        }
        Ok(())
    }

    fn refuse(&self, to: LoanStatus) -> LoanError {
        LoanError::InvalidStateTransition {
            loan_id: self.loan_id,
            from: self.status,
            to,
        }
    }

    fn require_repayable(&self, target: LoanStatus) -> Result<()> {
        if self.status.accepts_payment() {
            Ok(())
        } else {
            Err(self.refuse(target))
        }
    }

    fn apply_payment(&mut self, breakdown: &PaymentBreakdown, at: DateTime<Utc>) -> Result<()> {
        self.accrued_penalty -= breakdown.penalty_paid;
        self.overdue_interest -= breakdown.overdue_interest_paid;
        self.overdue_principal -= breakdown.overdue_principal_paid;
        self.current_interest_due -= breakdown.interest_paid;
        self.current_principal_due -= breakdown.principal_paid + breakdown.residual_written_off;
        self.current_balance -= breakdown.balance_reduction();

        self.total_penalty_paid += breakdown.penalty_paid;
        self.total_interest_paid += breakdown.total_interest();
        self.total_principal_paid += breakdown.total_principal_paid();
        self.rounding_written_off += breakdown.residual_written_off;
        self.last_payment_date = Some(at);

        if self.overdue_payments > 0 && self.overdue_installments_amount().is_zero() {
            // late installments count as paid once cleared
            self.payments_made += self.overdue_payments;
            self.overdue_payments = 0;
            self.overdue_installment_amounts.clear();
            self.overdue_since = None;
        }

        if breakdown.installment_completed {
            self.payments_made += 1;
            self.installments_closed += 1;
            self.open_next_installment()?;
        }

        if self.current_balance.is_zero() {
            self.accrued_penalty = Money::ZERO;
            self.next_payment_date = None;
            self.transition(LoanStatus::PaidOff, at)?;
        } else if self.status == LoanStatus::Overdue && self.overdue_amount().is_zero() {
            self.transition(LoanStatus::Active, at)?;
        }

        Ok(())
    }

    fn close_missed_installment(&mut self, at: DateTime<Utc>) -> Result<()> {
        let due = self.next_payment_date.ok_or_else(|| LoanError::InvariantViolation {
            loan_id: self.loan_id,
            message: "no open installment to mark as missed".to_string(),
        })?;

        if (self.current_interest_due + self.current_principal_due).is_zero() {
            // nothing was owed, the installment closes as paid
            self.payments_made += 1;
            self.installments_closed += 1;
            return self.open_next_installment();
        }

        self.overdue_interest += self.current_interest_due;
        self.overdue_principal += self.current_principal_due;
        self.overdue_installment_amounts.push(self.current_installment_amount);
        self.current_interest_due = Money::ZERO;
        self.current_principal_due = Money::ZERO;
        self.overdue_payments += 1;
        self.installments_missed += 1;
        self.installments_closed += 1;
        self.last_overdue_date = Some(at);
        if self.overdue_since.is_none() {
            self.overdue_since = Some(due);
        }

        self.open_next_installment()?;

        if self.status == LoanStatus::Active {
            self.transition(LoanStatus::Overdue, at)?;
        }
        Ok(())
    }

    /// open the installment following the last closed one
    fn open_next_installment(&mut self) -> Result<()> {
        let number = self.installments_closed + 1;
        let outstanding = self.current_balance - self.overdue_principal;

        if number > self.total_payments || !outstanding.is_positive() {
            self.next_payment_date = None;
            self.current_interest_due = Money::ZERO;
            self.current_principal_due = Money::ZERO;
            self.current_installment_amount = Money::ZERO;
            return Ok(());
        }

        let disbursed_at = self.disbursed_at.ok_or_else(|| LoanError::InvariantViolation {
            loan_id: self.loan_id,
            message: "installment opened before disbursement".to_string(),
        })?;

        let installment = self.plan().split(outstanding, number == self.total_payments);
        self.next_payment_date = Some(due_date(disbursed_at, number)?);
        self.current_interest_due = installment.interest;
        self.current_principal_due = installment.principal;
        self.current_installment_amount = installment.total();
        Ok(())
    }

    fn check_invariants(&self) -> Result<()> {
        let violation = |message: &str| {
            Err(LoanError::InvariantViolation {
                loan_id: self.loan_id,
                message: message.to_string(),
            })
        };

        if self.current_balance.is_negative() {
            return violation("negative balance");
        }
        if self.payments_made > self.total_payments || self.installments_closed > self.total_payments {
            return violation("more installments closed than scheduled");
        }
        if self.overdue_interest.is_negative()
            || self.overdue_principal.is_negative()
            || self.accrued_penalty.is_negative()
            || self.current_interest_due.is_negative()
            || self.current_principal_due.is_negative()
        {
            return violation("negative amount due");
        }
        if self.overdue_principal + self.current_principal_due > self.current_balance {
            return violation("principal due exceeds balance");
        }
        if self.status == LoanStatus::PaidOff && !self.current_balance.is_zero() {
            return violation("paid off with outstanding balance");
        }
        Ok(())
    }
}
