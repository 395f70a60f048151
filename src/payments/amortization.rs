use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::types::RepaymentMethod;

/// one row of a repayment schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub payment_number: u32,
    pub due_date: DateTime<Utc>,
    pub scheduled_payment: Money,
    pub principal_portion: Money,
    pub interest_portion: Money,
    pub remaining_balance: Money,
    pub actual_payment_date: Option<DateTime<Utc>>,
    pub actual_payment_amount: Option<Money>,
}

impl ScheduleEntry {
    pub fn is_executed(&self) -> bool {
        self.actual_payment_date.is_some()
    }
}

/// interest and principal owed for a single installment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Installment {
    pub interest: Money,
    pub principal: Money,
}

impl Installment {
    pub fn total(&self) -> Money {
        self.interest + self.principal
    }
}

/// pricing of a loan, fixed at disbursement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallmentPlan {
    pub method: RepaymentMethod,
    pub annual_rate: Rate,
    pub term_months: u32,
    /// periodic payment quoted to the borrower
    pub monthly_payment: Money,
    /// constant principal component for equal-principal loans
    pub level_principal: Money,
}

impl InstallmentPlan {
    pub fn new(principal: Money, annual_rate: Rate, term_months: u32, method: RepaymentMethod) -> Self {
        Self {
            method,
            annual_rate,
            term_months,
            monthly_payment: monthly_payment(principal, annual_rate, term_months, method),
            level_principal: principal.split(term_months),
        }
    }

    /// split the installment due on `balance`
    ///
    /// Interest is the balance times the monthly rate, rounded once. The final installment
    /// always carries whatever principal remains, so a schedule sums to the principal exactly.
    pub fn split(&self, balance: Money, is_final: bool) -> Installment {
        let interest = balance.apply(self.annual_rate.monthly_rate());

        let principal = if is_final {
            balance
        } else {
            match self.method {
                RepaymentMethod::EqualInstallment => {
                    self.monthly_payment.saturating_sub(interest).min(balance)
                }
                RepaymentMethod::EqualPrincipal => self.level_principal.min(balance),
                RepaymentMethod::Bullet => Money::ZERO,
            }
        };

        Installment { interest, principal }
    }

    /// last installment of a schedule paid exactly as planned
    pub fn final_installment(&self, principal: Money) -> Installment {
        let mut balance = principal;
        for _ in 1..self.term_months {
            balance -= self.split(balance, false).principal;
        }
        self.split(balance, true)
    }

    /// rounding residual the final installment may absorb
    ///
    /// Equal-installment schedules drift from the quoted payment by the rounding of every
    /// period, so the tolerance is that drift. Other methods allow one minor unit per installment.
    pub fn rounding_tolerance(&self, principal: Money) -> Money {
        match self.method {
            RepaymentMethod::EqualInstallment => {
                let drift = self.final_installment(principal).total() - self.monthly_payment;
                drift.abs().max(Money::MINOR_UNIT)
            }
            _ => Money::MINOR_UNIT * Decimal::from(self.term_months),
        }
    }
}

/// amortization calculator
pub struct AmortizationCalculator {
    method: RepaymentMethod,
}

impl AmortizationCalculator {
    pub fn new(method: RepaymentMethod) -> Self {
        Self { method }
    }

    /// calculate full amortization schedule
    pub fn calculate_schedule(
        &self,
        principal: Money,
        annual_rate: Rate,
        term_months: u32,
        start_date: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEntry>> {
        if term_months == 0 {
            return Err(LoanError::CalculationError {
                message: "schedule requires at least one period".to_string(),
            });
        }

        let plan = InstallmentPlan::new(principal, annual_rate, term_months, self.method);
        let mut balance = principal;
        let mut entries = Vec::with_capacity(term_months as usize);

        for number in 1..=term_months {
            let installment = plan.split(balance, number == term_months);
            balance -= installment.principal;

            entries.push(ScheduleEntry {
                payment_number: number,
                due_date: due_date(start_date, number)?,
                scheduled_payment: installment.total(),
                principal_portion: installment.principal,
                interest_portion: installment.interest,
                remaining_balance: balance,
                actual_payment_date: None,
                actual_payment_amount: None,
            });
        }

        Ok(entries)
    }
}

/// periodic payment quoted for a loan
///
/// Equal-installment uses `P·r·(1+r)^n / ((1+r)^n − 1)`, equal-principal quotes `P/n` plus the
/// average interest over the term, bullet is interest only.
pub fn monthly_payment(principal: Money, annual_rate: Rate, months: u32, method: RepaymentMethod) -> Money {
    if months == 0 {
        return principal;
    }

    let r = annual_rate.monthly_rate().as_decimal();
    let p = principal.as_decimal();
    let n = Decimal::from(months);

    match method {
        RepaymentMethod::EqualInstallment => {
            if r.is_zero() {
                return principal.split(months);
            }

            let mut compound = Decimal::ONE;
            let base = Decimal::ONE + r;
            for _ in 0..months {
                compound *= base;
            }

            Money::from_decimal(p * r * compound / (compound - Decimal::ONE))
        }
        RepaymentMethod::EqualPrincipal => {
            let average_interest = p * r * (n + Decimal::ONE) / (Decimal::TWO * n);
            Money::from_decimal(p / n + average_interest)
        }
        RepaymentMethod::Bullet => Money::from_decimal(p * r),
    }
}

/// due date of the n-th installment
pub fn due_date(start: DateTime<Utc>, installment: u32) -> Result<DateTime<Utc>> {
    start
        .checked_add_months(Months::new(installment))
        .ok_or_else(|| LoanError::CalculationError {
            message: format!("due date of installment {} out of range", installment),
        })
}
