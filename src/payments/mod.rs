pub mod allocation;
pub mod amortization;

pub use allocation::{allocate, AmountsDue, PaymentBreakdown};
pub use amortization::{
    due_date, monthly_payment, AmortizationCalculator, Installment, InstallmentPlan, ScheduleEntry,
};
