use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LoanError, Result};

/// balances a payment is allocated against, in allocation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AmountsDue {
    pub penalty: Money,
    pub overdue_interest: Money,
    pub overdue_principal: Money,
    pub current_interest: Money,
    pub current_principal: Money,
    /// total outstanding principal, overdue principal included
    pub balance: Money,
    /// the current installment is the last scheduled one
    pub final_installment: bool,
    /// rounding residual that may be absorbed on the final installment
    pub tolerance: Money,
}

impl AmountsDue {
    /// amount that settles the loan in full today
    pub fn payoff(&self) -> Money {
        self.penalty + self.overdue_interest + self.current_interest + self.balance
    }

    pub fn overdue_total(&self) -> Money {
        self.penalty + self.overdue_interest + self.overdue_principal
    }
}

/// how a payment was split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PaymentBreakdown {
    pub requested: Money,
    pub penalty_paid: Money,
    pub overdue_interest_paid: Money,
    pub overdue_principal_paid: Money,
    pub interest_paid: Money,
    pub principal_paid: Money,
    /// paid beyond the scheduled principal, reduces the balance early
    pub extra_principal: Money,
    /// final-installment rounding residual forgiven
    pub residual_written_off: Money,
    /// part of the request that was not collected
    pub unapplied: Money,
    pub installment_completed: bool,
}

impl PaymentBreakdown {
    /// amount actually taken from the borrower
    pub fn collected(&self) -> Money {
        self.requested - self.unapplied
    }

    pub fn total_interest(&self) -> Money {
        self.overdue_interest_paid + self.interest_paid
    }

    /// principal removed from the balance, written-off residual included
    pub fn balance_reduction(&self) -> Money {
        self.overdue_principal_paid + self.principal_paid + self.extra_principal + self.residual_written_off
    }

    pub fn total_principal_paid(&self) -> Money {
        self.overdue_principal_paid + self.principal_paid + self.extra_principal
    }
}

#[derive(Debug, Clone, Copy)]
enum PaymentComponent {
    Penalty,
    OverdueInterest,
    OverduePrincipal,
    CurrentInterest,
    CurrentPrincipal,
}

const ALLOCATION_ORDER: [PaymentComponent; 5] = [
    PaymentComponent::Penalty,
    PaymentComponent::OverdueInterest,
    PaymentComponent::OverduePrincipal,
    PaymentComponent::CurrentInterest,
    PaymentComponent::CurrentPrincipal,
];

/// allocate a payment in the fixed order: penalty, overdue installments, current interest,
/// current principal, then early principal paydown
pub fn allocate(due: &AmountsDue, amount: Money) -> Result<PaymentBreakdown> {
    if !amount.is_positive() {
        return Err(LoanError::InvalidAmount { amount });
    }

    let payoff = due.payoff();
    if amount > payoff + due.tolerance {
        return Err(LoanError::PaymentExceedsBalance {
            payoff,
            provided: amount,
        });
    }

    let applied = amount.min(payoff);
    let mut breakdown = PaymentBreakdown {
        requested: amount,
        unapplied: amount - applied,
        ..PaymentBreakdown::default()
    };

    let mut remaining = applied;
    for component in ALLOCATION_ORDER {
        remaining = apply_to_component(component, remaining, due, &mut breakdown);
    }

    let current_total = due.current_interest + due.current_principal;
    let principal_left = due.current_principal - breakdown.principal_paid;
    let overdue_cleared = breakdown.penalty_paid + breakdown.overdue_interest_paid + breakdown.overdue_principal_paid
        == due.overdue_total();

    if due.final_installment
        && overdue_cleared
        && breakdown.interest_paid == due.current_interest
        && principal_left.is_positive()
        && principal_left <= due.tolerance
    {
        breakdown.residual_written_off = principal_left;
    }

    breakdown.installment_completed = current_total.is_positive()
        && breakdown.interest_paid == due.current_interest
        && breakdown.principal_paid + breakdown.residual_written_off == due.current_principal;
    breakdown.extra_principal = remaining;

    Ok(breakdown)
}

fn apply_to_component(
    component: PaymentComponent,
    available: Money,
    due: &AmountsDue,
    breakdown: &mut PaymentBreakdown,
) -> Money {
    let (balance, applied_field) = match component {
        PaymentComponent::Penalty => (due.penalty, &mut breakdown.penalty_paid),
        PaymentComponent::OverdueInterest => (due.overdue_interest, &mut breakdown.overdue_interest_paid),
        PaymentComponent::OverduePrincipal => (due.overdue_principal, &mut breakdown.overdue_principal_paid),
        PaymentComponent::CurrentInterest => (due.current_interest, &mut breakdown.interest_paid),
        PaymentComponent::CurrentPrincipal => (due.current_principal, &mut breakdown.principal_paid),
    };

    let payment = available.min(balance);
    *applied_field = payment;

    available - payment
}
