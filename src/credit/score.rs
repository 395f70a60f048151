use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::config::{CreditConfig, GradeBand};
use crate::types::{AccountId, Grade};

/// raw inputs supplied by the profile source
///
/// Each sub-score is already normalized to the configured score range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditProfile {
    pub borrower_id: AccountId,
    pub income: u32,
    pub stability: u32,
    pub debt: u32,
}

impl CreditProfile {
    pub fn new(borrower_id: impl Into<String>, income: u32, stability: u32, debt: u32) -> Self {
        Self {
            borrower_id: AccountId::new(borrower_id),
            income,
            stability,
            debt,
        }
    }
}

/// sub-scores after clamping, kept with the score for audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub income: u32,
    pub stability: u32,
    pub debt: u32,
}

/// computed score; every recomputation produces a new value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditScore {
    pub borrower_id: AccountId,
    pub score: u32,
    pub grade: Grade,
    /// score from the profile alone, before adjustments
    pub base_score: u32,
    pub adjustment: i64,
    pub factors: RiskFactors,
}

/// weighted linear model over the profile sub-scores
#[derive(Debug, Clone)]
pub struct ScoreModel {
    config: CreditConfig,
}

impl ScoreModel {
    pub fn new(config: CreditConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CreditConfig {
        &self.config
    }

    pub fn clamp(&self, score: i64) -> u32 {
        let clamped = score.clamp(self.config.min_score as i64, self.config.max_score as i64);
        clamped as u32
    }

    /// weighted score of a profile, rounded half away from zero
    pub fn base_score(&self, profile: &CreditProfile) -> (u32, RiskFactors) {
        let factors = RiskFactors {
            income: self.clamp(profile.income as i64),
            stability: self.clamp(profile.stability as i64),
            debt: self.clamp(profile.debt as i64),
        };

        let weighted = self.config.income_weight * Decimal::from(factors.income)
            + self.config.stability_weight * Decimal::from(factors.stability)
            + self.config.debt_weight * Decimal::from(factors.debt);
        let rounded = weighted
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .unwrap_or(self.config.min_score as i64);

        (self.clamp(rounded), factors)
    }

    /// score after applying an adjustment
    pub fn score(&self, profile: &CreditProfile, adjustment: i64) -> CreditScore {
        let (base_score, factors) = self.base_score(profile);
        let score = self.clamp(base_score as i64 + adjustment);

        CreditScore {
            borrower_id: profile.borrower_id.clone(),
            score,
            grade: self.grade_for(score),
            base_score,
            adjustment,
            factors,
        }
    }

    pub fn grade_for(&self, score: u32) -> Grade {
        self.config
            .grades
            .iter()
            .find(|band| score >= band.min_score)
            .or_else(|| self.config.grades.last())
            .map(|band| band.grade)
            .unwrap_or(Grade::C)
    }

    pub fn band(&self, grade: Grade) -> Option<&GradeBand> {
        self.config.grades.iter().find(|band| band.grade == grade)
    }

    /// highest score of the worst grade
    pub fn worst_grade_ceiling(&self) -> u32 {
        let bands = &self.config.grades;
        match bands.len() {
            0 => self.config.min_score,
            1 => self.config.max_score,
            n => bands[n - 2].min_score.saturating_sub(1),
        }
    }
}
