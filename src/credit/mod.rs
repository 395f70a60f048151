pub mod score;

pub use score::{CreditProfile, CreditScore, RiskFactors, ScoreModel};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{CreditConfig, LoanProduct};
use crate::decimal::{Money, Rate};
use crate::types::{AccountId, Grade};

/// reason a score adjustment was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PenaltyKind {
    MissedPayment,
    Suspension,
    Default,
    Blacklist,
}

/// borrower state kept between score computations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BorrowerStanding {
    pub adjustment: i64,
    pub suspended: bool,
    pub blacklisted: bool,
    pub last_score: Option<CreditScore>,
}

/// credit score engine
///
/// Scores are recomputed from the profile on every assessment. Penalties and bonuses live
/// in a per-borrower adjustment that is added on top and clamped to the score range.
pub struct CreditScoreEngine {
    model: ScoreModel,
    standings: DashMap<AccountId, BorrowerStanding>,
}

impl CreditScoreEngine {
    pub fn new(config: CreditConfig) -> Self {
        Self {
            model: ScoreModel::new(config),
            standings: DashMap::new(),
        }
    }

    pub fn model(&self) -> &ScoreModel {
        &self.model
    }

    /// score of a profile ignoring borrower standing
    pub fn compute_score(&self, profile: &CreditProfile) -> CreditScore {
        self.model.score(profile, 0)
    }

    /// score of a profile with the borrower's adjustments applied
    pub fn assess(&self, profile: &CreditProfile) -> CreditScore {
        let mut standing = self.standings.entry(profile.borrower_id.clone()).or_default();
        let mut score = self.model.score(profile, standing.adjustment);

        if standing.blacklisted {
            score.score = score.score.min(self.model.worst_grade_ceiling());
            score.grade = self.model.grade_for(score.score);
        }

        debug!(
            borrower = %profile.borrower_id,
            score = score.score,
            grade = ?score.grade,
            adjustment = standing.adjustment,
            "credit assessed"
        );

        standing.last_score = Some(score.clone());
        score
    }

    pub fn current_score(&self, borrower: &AccountId) -> Option<CreditScore> {
        self.standings.get(borrower).and_then(|s| s.last_score.clone())
    }

    pub fn standing(&self, borrower: &AccountId) -> BorrowerStanding {
        self.standings.get(borrower).map(|s| s.clone()).unwrap_or_default()
    }

    pub fn qualifies(&self, score: &CreditScore, product: &LoanProduct) -> bool {
        score.grade >= product.min_grade && self.max_loan_amount(score.grade).is_positive()
    }

    pub fn max_loan_amount(&self, grade: Grade) -> Money {
        self.model.band(grade).map(|b| b.max_loan_amount).unwrap_or(Money::ZERO)
    }

    /// grade base rate plus the product premium
    pub fn interest_rate(&self, grade: Grade, product: &LoanProduct) -> Rate {
        let base = self.model.band(grade).map(|b| b.base_rate).unwrap_or(Rate::ZERO);
        base + product.rate_premium
    }

    /// lower the borrower's score; returns the new adjustment
    pub fn apply_penalty(&self, borrower: &AccountId, kind: PenaltyKind, points: u32) -> i64 {
        let adjustment = self.adjust(borrower, -(points as i64));
        info!(borrower = %borrower, kind = ?kind, points, adjustment, "credit penalty applied");
        adjustment
    }

    pub fn apply_bonus(&self, borrower: &AccountId, points: u32) -> i64 {
        let adjustment = self.adjust(borrower, points as i64);
        info!(borrower = %borrower, points, adjustment, "credit bonus applied");
        adjustment
    }

    fn adjust(&self, borrower: &AccountId, delta: i64) -> i64 {
        let config = self.model.config();
        let range = (config.max_score - config.min_score) as i64;

        let mut standing = self.standings.entry(borrower.clone()).or_default();
        standing.adjustment = (standing.adjustment + delta).clamp(-range, range);

        let adjustment = standing.adjustment;
        let blacklisted = standing.blacklisted;
        let ceiling = self.model.worst_grade_ceiling();
        if let Some(score) = standing.last_score.as_mut() {
            let mut value = self.model.clamp(score.base_score as i64 + adjustment);
            if blacklisted {
                value = value.min(ceiling);
            }
            score.score = value;
            score.adjustment = adjustment;
            score.grade = self.model.grade_for(value);
        }
        adjustment
    }

    /// returns true when the borrower was not already suspended
    pub fn suspend(&self, borrower: &AccountId) -> bool {
        let mut standing = self.standings.entry(borrower.clone()).or_default();
        let newly = !standing.suspended;
        standing.suspended = true;
        newly
    }

    pub fn lift_suspension(&self, borrower: &AccountId) -> bool {
        match self.standings.get_mut(borrower) {
            Some(mut standing) if standing.suspended => {
                standing.suspended = false;
                info!(borrower = %borrower, "suspension lifted");
                true
            }
            _ => false,
        }
    }

    /// returns true when the borrower was not already blacklisted
    pub fn blacklist(&self, borrower: &AccountId) -> bool {
        let newly = {
            let mut standing = self.standings.entry(borrower.clone()).or_default();
            let newly = !standing.blacklisted;
            standing.blacklisted = true;
            newly
        };
        // re-clamp the cached score
        self.adjust(borrower, 0);
        newly
    }

    pub fn is_suspended(&self, borrower: &AccountId) -> bool {
        self.standings.get(borrower).map(|s| s.suspended).unwrap_or(false)
    }

    pub fn is_blacklisted(&self, borrower: &AccountId) -> bool {
        self.standings.get(borrower).map(|s| s.blacklisted).unwrap_or(false)
    }

    /// reason the borrower may not take new loans
    pub fn restriction(&self, borrower: &AccountId) -> Option<&'static str> {
        let standing = self.standings.get(borrower)?;
        if standing.blacklisted {
            Some("blacklisted")
        } else if standing.suspended {
            Some("suspended")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::LoanType;

    fn engine() -> CreditScoreEngine {
        CreditScoreEngine::new(CreditConfig::default())
    }

    fn product(loan_type: LoanType) -> LoanProduct {
        EngineConfig::default().product(loan_type).unwrap().clone()
    }

    #[test]
    fn test_assess_applies_adjustment() {
        let engine = engine();
        let profile = CreditProfile::new("alice", 700, 700, 700);
        let borrower = profile.borrower_id.clone();

        assert_eq!(engine.assess(&profile).score, 700);
        engine.apply_penalty(&borrower, PenaltyKind::MissedPayment, 10);
        assert_eq!(engine.current_score(&borrower).unwrap().score, 690);
        assert_eq!(engine.assess(&profile).score, 690);
        assert_eq!(engine.assess(&profile).grade, Grade::A);

        engine.apply_bonus(&borrower, 20);
        assert_eq!(engine.assess(&profile).score, 710);
    }

    #[test]
    fn test_compute_score_ignores_standing() {
        let engine = engine();
        let profile = CreditProfile::new("alice", 700, 700, 700);
        engine.apply_penalty(&profile.borrower_id, PenaltyKind::Default, 50);
        assert_eq!(engine.compute_score(&profile).score, 700);
    }

    #[test]
    fn test_penalties_clamp_at_min_score() {
        let engine = engine();
        let profile = CreditProfile::new("bob", 400, 400, 400);
        for _ in 0..20 {
            engine.apply_penalty(&profile.borrower_id, PenaltyKind::Default, 50);
        }
        assert_eq!(engine.assess(&profile).score, 300);

        engine.apply_bonus(&profile.borrower_id, 20);
        assert_eq!(engine.assess(&profile).score, 300);
    }

    #[test]
    fn test_blacklist_caps_to_worst_grade() {
        let engine = engine();
        let profile = CreditProfile::new("carol", 950, 950, 950);
        assert!(engine.blacklist(&profile.borrower_id));
        assert!(!engine.blacklist(&profile.borrower_id));

        let score = engine.assess(&profile);
        assert_eq!(score.score, 549);
        assert_eq!(score.grade, Grade::C);
        assert_eq!(engine.restriction(&profile.borrower_id), Some("blacklisted"));
    }

    #[test]
    fn test_suspension_round_trip() {
        let engine = engine();
        let borrower = AccountId::new("dave");
        assert_eq!(engine.restriction(&borrower), None);

        assert!(engine.suspend(&borrower));
        assert!(!engine.suspend(&borrower));
        assert!(engine.is_suspended(&borrower));
        assert_eq!(engine.restriction(&borrower), Some("suspended"));

        assert!(engine.lift_suspension(&borrower));
        assert!(!engine.lift_suspension(&borrower));
        assert!(!engine.is_suspended(&borrower));
    }

    #[test]
    fn test_qualification_and_pricing() {
        let engine = engine();
        let good = engine.compute_score(&CreditProfile::new("a", 720, 720, 720));
        let poor = engine.compute_score(&CreditProfile::new("b", 500, 500, 500));

        assert!(engine.qualifies(&good, &product(LoanType::Business)));
        assert!(!engine.qualifies(&poor, &product(LoanType::Personal)));

        assert_eq!(engine.interest_rate(Grade::A, &product(LoanType::Personal)), Rate::from_percentage(8));
        assert_eq!(engine.interest_rate(Grade::A, &product(LoanType::Business)), Rate::from_percentage(9));
        assert_eq!(engine.max_loan_amount(Grade::AA), Money::from_major(100_000));
        assert_eq!(engine.max_loan_amount(Grade::C), Money::ZERO);
    }
}
