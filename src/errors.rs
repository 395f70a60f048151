use thiserror::Error;

use crate::decimal::Money;
use crate::status::LoanStatus;
use crate::types::{Grade, LoanId, LoanType};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoanError {
    #[error("invalid amount: {amount}")]
    InvalidAmount {
        amount: Money,
    },

    #[error("invalid term: {months} months (maximum {max_months})")]
    InvalidTerm {
        months: u32,
        max_months: u32,
    },

    #[error("insufficient collateral: {message}")]
    InsufficientCollateral {
        message: String,
    },

    #[error("credit grade {grade:?} (score {score}) does not qualify: {reason}")]
    IneligibleCredit {
        score: u32,
        grade: Grade,
        reason: String,
    },

    #[error("borrower {borrower} already has {active} active loans (limit {limit})")]
    TooManyActiveLoans {
        borrower: String,
        active: usize,
        limit: usize,
    },

    #[error("borrower {borrower} is restricted: {reason}")]
    BorrowerRestricted {
        borrower: String,
        reason: String,
    },

    #[error("payment {provided} exceeds payoff amount {payoff}")]
    PaymentExceedsBalance {
        payoff: Money,
        provided: Money,
    },

    #[error("no product configured for loan type {loan_type:?}")]
    UnknownLoanType {
        loan_type: LoanType,
    },

    #[error("loan {loan_id}: invalid state transition {from:?} -> {to:?}")]
    InvalidStateTransition {
        loan_id: LoanId,
        from: LoanStatus,
        to: LoanStatus,
    },

    #[error("loan not found: {loan_id}")]
    LoanNotFound {
        loan_id: LoanId,
    },

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Money,
        requested: Money,
    },

    #[error("wallet unavailable: {message}")]
    WalletUnavailable {
        message: String,
    },

    #[error("persistence failure: {message}")]
    Persistence {
        message: String,
    },

    #[error("credit profile unavailable for {borrower}: {message}")]
    ProfileUnavailable {
        borrower: String,
        message: String,
    },

    #[error("invariant violated on loan {loan_id}: {message}")]
    InvariantViolation {
        loan_id: LoanId,
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("calculation error: {message}")]
    CalculationError {
        message: String,
    },
}

impl LoanError {
    /// rejected before any state was touched because of bad input
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LoanError::InvalidAmount { .. }
                | LoanError::InvalidTerm { .. }
                | LoanError::InsufficientCollateral { .. }
                | LoanError::IneligibleCredit { .. }
                | LoanError::TooManyActiveLoans { .. }
                | LoanError::BorrowerRestricted { .. }
                | LoanError::PaymentExceedsBalance { .. }
                | LoanError::UnknownLoanType { .. }
        )
    }

    /// an external collaborator failed; the operation may succeed on retry
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            LoanError::WalletUnavailable { .. }
                | LoanError::Persistence { .. }
                | LoanError::ProfileUnavailable { .. }
        )
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        LoanError::Persistence {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LoanError>;
