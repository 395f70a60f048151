use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::types::{Grade, LoanType};

/// engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub lending: LendingConfig,
    pub credit: CreditConfig,
    pub overdue: OverdueConfig,
    pub scheduler: SchedulerConfig,
    pub products: Vec<LoanProduct>,
}

/// limits applied by the lifecycle manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LendingConfig {
    /// open loans (pending, approved, active, overdue) allowed per borrower
    pub max_active_loans: usize,
    /// score points granted when a loan is paid off
    pub paid_off_bonus: u32,
}

/// score model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditConfig {
    pub min_score: u32,
    pub max_score: u32,
    pub income_weight: Decimal,
    pub stability_weight: Decimal,
    pub debt_weight: Decimal,
    /// grade bands, best first
    pub grades: Vec<GradeBand>,
}

/// score band mapped to a grade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeBand {
    pub grade: Grade,
    pub min_score: u32,
    pub max_loan_amount: Money,
    pub base_rate: Rate,
}

/// delinquency handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverdueConfig {
    pub daily_penalty_rate: Rate,
    pub grace_period_days: u32,
    pub minimum_collection_fee: Money,
    /// score points removed per missed installment
    pub missed_payment_penalty: u32,
    /// consecutive misses before the borrower is suspended
    pub suspension_threshold: u32,
    pub suspension_penalty: u32,
    /// consecutive misses before the loan defaults
    pub default_threshold: u32,
    pub collection_interval_days: u32,
    pub max_collection_attempts: u32,
    pub default_penalty: u32,
    pub blacklist_penalty: u32,
    /// share of the assessed collateral value realised on seizure
    pub seizure_rate: Rate,
}

/// background sweep timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub sweep_interval_secs: u64,
}

/// per loan type terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanProduct {
    pub loan_type: LoanType,
    pub max_term_months: u32,
    pub requires_collateral: bool,
    /// discounted collateral value over requested amount
    pub min_collateral_coverage: Rate,
    pub min_grade: Grade,
    /// added to the grade's base rate
    pub rate_premium: Rate,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lending: LendingConfig {
                max_active_loans: 3,
                paid_off_bonus: 20,
            },
            credit: CreditConfig::default(),
            overdue: OverdueConfig::default(),
            scheduler: SchedulerConfig {
                enabled: true,
                sweep_interval_secs: 24 * 60 * 60,
            },
            products: LoanProduct::defaults(),
        }
    }
}

impl Default for CreditConfig {
    fn default() -> Self {
        let band = |grade, min_score, max_loan: i64, rate: Decimal| GradeBand {
            grade,
            min_score,
            max_loan_amount: Money::from_major(max_loan),
            base_rate: Rate::from_decimal(rate),
        };

        Self {
            min_score: 300,
            max_score: 999,
            income_weight: dec!(0.30),
            stability_weight: dec!(0.40),
            debt_weight: dec!(0.30),
            grades: vec![
                band(Grade::SSS, 850, 1_000_000, dec!(0.03)),
                band(Grade::SS, 800, 500_000, dec!(0.04)),
                band(Grade::S, 750, 250_000, dec!(0.05)),
                band(Grade::AA, 700, 100_000, dec!(0.065)),
                band(Grade::A, 650, 50_000, dec!(0.08)),
                band(Grade::BB, 600, 20_000, dec!(0.10)),
                band(Grade::B, 550, 10_000, dec!(0.125)),
                band(Grade::C, 300, 0, dec!(0.18)),
            ],
        }
    }
}

impl Default for OverdueConfig {
    fn default() -> Self {
        Self {
            daily_penalty_rate: Rate::from_bps(5),
            grace_period_days: 3,
            minimum_collection_fee: Money::ONE,
            missed_payment_penalty: 10,
            suspension_threshold: 3,
            suspension_penalty: 25,
            default_threshold: 6,
            collection_interval_days: 1,
            max_collection_attempts: 12,
            default_penalty: 50,
            blacklist_penalty: 100,
            seizure_rate: Rate::from_percentage(80),
        }
    }
}

impl LoanProduct {
    /// reference product table
    pub fn defaults() -> Vec<LoanProduct> {
        vec![
            LoanProduct {
                loan_type: LoanType::Personal,
                max_term_months: 60,
                requires_collateral: false,
                min_collateral_coverage: Rate::ZERO,
                min_grade: Grade::B,
                rate_premium: Rate::ZERO,
            },
            LoanProduct {
                loan_type: LoanType::Business,
                max_term_months: 120,
                requires_collateral: false,
                min_collateral_coverage: Rate::ZERO,
                min_grade: Grade::A,
                rate_premium: Rate::from_bps(100),
            },
            LoanProduct {
                loan_type: LoanType::Mortgage,
                max_term_months: 360,
                requires_collateral: true,
                min_collateral_coverage: Rate::from_percentage(50),
                min_grade: Grade::BB,
                rate_premium: Rate::ZERO,
            },
            LoanProduct {
                loan_type: LoanType::Emergency,
                max_term_months: 6,
                requires_collateral: false,
                min_collateral_coverage: Rate::ZERO,
                min_grade: Grade::B,
                rate_premium: Rate::from_bps(200),
            },
        ]
    }
}

impl EngineConfig {
    /// parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json).map_err(|e| LoanError::InvalidConfiguration {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LoanError::InvalidConfiguration {
            message: e.to_string(),
        })
    }

    pub fn product(&self, loan_type: LoanType) -> Result<&LoanProduct> {
        self.products
            .iter()
            .find(|p| p.loan_type == loan_type)
            .ok_or(LoanError::UnknownLoanType { loan_type })
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(LoanError::InvalidConfiguration {
                message: message.to_string(),
            })
        };

        let credit = &self.credit;
        if credit.min_score >= credit.max_score {
            return invalid("min_score must be below max_score");
        }
        if credit.income_weight + credit.stability_weight + credit.debt_weight != Decimal::ONE {
            return invalid("score weights must sum to 1");
        }
        if credit.grades.is_empty() {
            return invalid("no grade bands configured");
        }
        if credit.grades.windows(2).any(|w| w[0].min_score <= w[1].min_score) {
            return invalid("grade bands must be ordered by descending min_score");
        }
        if credit.grades.iter().all(|b| b.min_score > credit.min_score) {
            return invalid("grade bands do not cover min_score");
        }

        let overdue = &self.overdue;
        if overdue.suspension_threshold == 0 {
            return invalid("suspension_threshold must be positive");
        }
        if overdue.default_threshold <= overdue.suspension_threshold {
            return invalid("default_threshold must be above suspension_threshold");
        }
        if overdue.seizure_rate.is_zero() || overdue.seizure_rate > Rate::ONE {
            return invalid("seizure_rate must be in (0, 1]");
        }
        if overdue.collection_interval_days == 0 {
            return invalid("collection_interval_days must be positive");
        }

        if self.lending.max_active_loans == 0 {
            return invalid("max_active_loans must be positive");
        }
        if self.scheduler.sweep_interval_secs == 0 {
            return invalid("sweep_interval_secs must be positive");
        }

        if self.products.is_empty() {
            return invalid("no loan products configured");
        }
        let mut seen = HashSet::new();
        for product in &self.products {
            if !seen.insert(product.loan_type) {
                return invalid("duplicate loan product");
            }
            if product.max_term_months == 0 {
                return invalid("product max_term_months must be positive");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.overdue.daily_penalty_rate.as_decimal(), dec!(0.0005));
        assert_eq!(config.product(LoanType::Mortgage).unwrap().max_term_months, 360);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EngineConfig::default();
        let json = config.to_json().unwrap();
        let parsed = EngineConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_malformed_json_rejected() {
        let result = EngineConfig::from_json("{ \"lending\": 3 }");
        assert!(matches!(result, Err(LoanError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_inconsistent_thresholds_rejected() {
        let mut config = EngineConfig::default();
        config.overdue.default_threshold = 2;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.overdue.seizure_rate = Rate::from_percentage(120);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.credit.debt_weight = dec!(0.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_product_rejected() {
        let mut config = EngineConfig::default();
        let personal = config.products[0].clone();
        config.products.push(personal);
        assert!(matches!(config.validate(), Err(LoanError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_missing_product() {
        let mut config = EngineConfig::default();
        config.products.retain(|p| p.loan_type != LoanType::Emergency);
        assert!(matches!(
            config.product(LoanType::Emergency),
            Err(LoanError::UnknownLoanType { .. })
        ));
    }
}
