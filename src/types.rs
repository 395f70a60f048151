use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::{Money, Rate};

/// unique identifier for a loan
pub type LoanId = Uuid;

/// wallet account of a participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        AccountId(s.to_string())
    }
}

/// who funds the loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lender {
    /// the platform itself
    System,
    /// another participant
    Peer(AccountId),
}

/// loan products
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanType {
    Personal,
    Business,
    Mortgage,
    Emergency,
}

/// repayment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepaymentMethod {
    /// equal payment amounts throughout term
    EqualInstallment,
    /// constant principal, declining interest
    EqualPrincipal,
    /// interest only, principal at maturity
    Bullet,
}

/// how a payment reached the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Manual,
    AutoDebit,
}

/// credit grades, worst first so that `Ord` ranks them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    C,
    B,
    BB,
    A,
    AA,
    S,
    SS,
    SSS,
}

/// collateral pledged against a secured loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collateral {
    pub collateral_type: String,
    pub assessed_value: Money,
    /// valuation haircut applied when checking coverage
    pub discount_rate: Rate,
}

impl Collateral {
    pub fn new(collateral_type: impl Into<String>, assessed_value: Money, discount_rate: Rate) -> Self {
        Self {
            collateral_type: collateral_type.into(),
            assessed_value,
            discount_rate,
        }
    }

    /// assessed value after the valuation discount
    pub fn discounted_value(&self) -> Money {
        let retained = (Rate::ONE.as_decimal() - self.discount_rate.as_decimal()).max(Decimal::ZERO);
        self.assessed_value.apply(Rate::from_decimal(retained))
    }
}

/// escalating collection methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CollectionMethod {
    /// lightweight notice
    Reminder,
    /// stronger notice
    Warning,
    /// direct contact by staff
    DirectContact,
    /// final system notice before default
    FinalNotice,
}

impl CollectionMethod {
    /// method for the n-th attempt (1-based)
    pub fn for_attempt(attempt: u32) -> Self {
        match attempt {
            0..=2 => CollectionMethod::Reminder,
            3 => CollectionMethod::Warning,
            4 => CollectionMethod::DirectContact,
            _ => CollectionMethod::FinalNotice,
        }
    }
}

/// application request passed to the lifecycle manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub borrower_id: AccountId,
    pub lender: Lender,
    pub loan_type: LoanType,
    pub amount: Money,
    pub term_months: u32,
    pub repayment_method: RepaymentMethod,
    pub purpose: String,
    pub collateral: Option<Collateral>,
}

impl LoanApplication {
    pub fn new(borrower_id: impl Into<String>, loan_type: LoanType, amount: Money, term_months: u32) -> Self {
        Self {
            borrower_id: AccountId::new(borrower_id),
            lender: Lender::System,
            loan_type,
            amount,
            term_months,
            repayment_method: RepaymentMethod::EqualInstallment,
            purpose: String::new(),
            collateral: None,
        }
    }

    pub fn lender(mut self, lender: Lender) -> Self {
        self.lender = lender;
        self
    }

    pub fn repayment_method(mut self, method: RepaymentMethod) -> Self {
        self.repayment_method = method;
        self
    }

    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn collateral(mut self, collateral: Collateral) -> Self {
        self.collateral = Some(collateral);
        self
    }
}

/// audit stamp for administrative decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub by: String,
    pub note: String,
    pub at: DateTime<Utc>,
}
