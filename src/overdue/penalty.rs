use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::OverdueConfig;
use crate::decimal::{Money, Rate};
use crate::loan::Loan;

/// penalty configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// days after the due date before penalties apply
    pub grace_period_days: u32,
    /// floor of every non-empty accrual
    pub minimum_fee: Money,
}

impl PenaltyConfig {
    pub fn from_overdue(config: &OverdueConfig) -> Self {
        Self {
            grace_period_days: config.grace_period_days,
            minimum_fee: config.minimum_collection_fee,
        }
    }
}

/// engine for calculating penalty interest on overdue installments
pub struct PenaltyEngine {
    pub config: PenaltyConfig,
}

impl PenaltyEngine {
    pub fn new(config: PenaltyConfig) -> Self {
        Self { config }
    }

    /// total penalty for `days_overdue` days on `overdue_amount`
    pub fn calculate_penalty(&self, overdue_amount: Money, daily_rate: Rate, days_overdue: u32) -> PenaltyCalculation {
        if days_overdue <= self.config.grace_period_days {
            return PenaltyCalculation::none(overdue_amount, daily_rate, true);
        }

        let days_charged = days_overdue - self.config.grace_period_days;
        self.charge(overdue_amount, daily_rate, days_charged)
    }

    /// penalty for the chargeable days not yet accrued on `loan`, up to and including `today`
    ///
    /// Days before the end of the grace period and days up to `penalty_accrued_through`
    /// are never charged, so calling this twice for the same day yields nothing the second time.
    pub fn accrue(&self, loan: &Loan, today: NaiveDate) -> PenaltyCalculation {
        let base = loan.overdue_installments_amount();
        let rate = loan.penalty_rate;

        let since = match loan.overdue_since {
            Some(since) if !loan.penalty_waived && base.is_positive() => since.date_naive(),
            _ => return PenaltyCalculation::none(base, rate, false),
        };

        let grace_end = since + chrono::Duration::days(self.config.grace_period_days as i64);
        let charged_until = match loan.penalty_accrued_through {
            Some(through) if through > grace_end => through,
            _ => grace_end,
        };

        let new_days = (today - charged_until).num_days();
        if new_days <= 0 {
            return PenaltyCalculation::none(base, rate, today <= grace_end);
        }

        let mut calculation = self.charge(base, rate, new_days as u32);
        calculation.through = Some(today);
        calculation
    }

    fn charge(&self, base: Money, daily_rate: Rate, days_charged: u32) -> PenaltyCalculation {
        let penalty = base.as_decimal() * daily_rate.as_decimal() * Decimal::from(days_charged);
        let penalty_amount = Money::from_decimal(penalty).max(self.config.minimum_fee);

        PenaltyCalculation {
            penalty_amount,
            daily_rate,
            days_charged,
            overdue_base: base,
            grace_applied: false,
            through: None,
        }
    }
}

/// penalty calculation result
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyCalculation {
    pub penalty_amount: Money,
    pub daily_rate: Rate,
    pub days_charged: u32,
    pub overdue_base: Money,
    pub grace_applied: bool,
    /// last day covered by an incremental accrual
    pub through: Option<NaiveDate>,
}

impl PenaltyCalculation {
    fn none(base: Money, daily_rate: Rate, grace_applied: bool) -> Self {
        Self {
            penalty_amount: Money::ZERO,
            daily_rate,
            days_charged: 0,
            overdue_base: base,
            grace_applied,
            through: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.penalty_amount.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loan::LoanChange;
    use crate::types::{Grade, LoanApplication, LoanType};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn engine() -> PenaltyEngine {
        PenaltyEngine::new(PenaltyConfig::from_overdue(&OverdueConfig::default()))
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    /// 10000 over 12 months with the first installment missed
    fn overdue_loan() -> Loan {
        let application = LoanApplication::new("alice", LoanType::Personal, Money::from_major(10_000), 12);
        let loan = Loan::new(application, Rate::from_percentage(8), 720, Grade::AA, start())
            .apply(&LoanChange::Approved { approver: "admin".into(), notes: String::new() }, start())
            .unwrap()
            .apply(&LoanChange::Disbursed { penalty_rate: Rate::from_bps(5) }, start())
            .unwrap();
        let due = loan.next_payment_date.unwrap();
        loan.apply(&LoanChange::InstallmentMissed, due).unwrap()
    }

    fn day(loan: &Loan, offset: i64) -> NaiveDate {
        (loan.overdue_since.unwrap() + Duration::days(offset)).date_naive()
    }

    #[test]
    fn test_basic_penalty() {
        let result = engine().calculate_penalty(Money::from_major(10_000), Rate::from_bps(5), 13);

        assert_eq!(result.days_charged, 10);
        assert_eq!(result.penalty_amount, Money::from_major(50));
        assert!(!result.grace_applied);
    }

    #[test]
    fn test_grace_period() {
        let result = engine().calculate_penalty(Money::from_major(10_000), Rate::from_bps(5), 3);
        assert!(result.grace_applied);
        assert!(result.is_empty());
    }

    #[test]
    fn test_minimum_fee_floor() {
        // 100 * 0.0005 * 2 = 0.10
        let result = engine().calculate_penalty(Money::from_major(100), Rate::from_bps(5), 5);
        assert_eq!(result.penalty_amount, Money::ONE);
    }

    #[test]
    fn test_incremental_accrual_skips_grace() {
        let loan = overdue_loan();
        let engine = engine();

        assert!(engine.accrue(&loan, day(&loan, 2)).grace_applied);
        assert!(engine.accrue(&loan, day(&loan, 3)).is_empty());

        // 869.88 * 0.0005 * 7 = 3.04
        let result = engine.accrue(&loan, day(&loan, 10));
        assert_eq!(result.days_charged, 7);
        assert_eq!(result.penalty_amount, Money::from_str_exact("3.04").unwrap());
        assert_eq!(result.through, Some(day(&loan, 10)));
    }

    #[test]
    fn test_accrual_never_charges_a_day_twice() {
        let engine = engine();
        let loan = overdue_loan();
        let first = engine.accrue(&loan, day(&loan, 10));

        let accrued = loan
            .apply(
                &LoanChange::PenaltyAccrued { amount: first.penalty_amount, through: day(&loan, 10) },
                start(),
            )
            .unwrap();

        assert!(engine.accrue(&accrued, day(&accrued, 10)).is_empty());

        let next = engine.accrue(&accrued, day(&accrued, 11));
        assert_eq!(next.days_charged, 1);
        assert_eq!(next.penalty_amount, Money::ONE);
    }

    #[test]
    fn test_waived_loan_accrues_nothing() {
        let loan = overdue_loan()
            .apply(&LoanChange::PenaltyWaived { approver: "admin".into() }, start())
            .unwrap();
        assert!(engine().accrue(&loan, day(&loan, 30)).is_empty());
    }
}
