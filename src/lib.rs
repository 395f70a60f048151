pub mod config;
pub mod credit;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod interfaces;
pub mod lifecycle;
pub mod loan;
pub mod locks;
pub mod overdue;
pub mod payments;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// re-export key types
pub use config::{CreditConfig, EngineConfig, GradeBand, LendingConfig, LoanProduct, OverdueConfig, SchedulerConfig};
pub use credit::{BorrowerStanding, CreditProfile, CreditScore, CreditScoreEngine, PenaltyKind, ScoreModel};
pub use decimal::{Money, Rate};
pub use errors::{LoanError, Result};
pub use events::{Event, EventLog};
pub use interfaces::{CreditProfileSource, EventSink, LoanRepository, Wallet};
pub use lifecycle::{LoanManager, MissedInstallments, PaymentReceipt, PenaltyAccrual, SeizureOutcome};
pub use loan::{Loan, LoanChange};
pub use locks::KeyedLocks;
pub use overdue::{
    CollectionAttempt, OverdueProcessor, OverdueRecord, OverdueStatus, PenaltyCalculation, PenaltyConfig,
    PenaltyEngine, SweepReport,
};
pub use payments::{
    allocate, due_date, monthly_payment, AmortizationCalculator, AmountsDue, Installment, InstallmentPlan,
    PaymentBreakdown, ScheduleEntry,
};
pub use scheduler::{system_clock, ClockFactory, IntervalTicker, SchedulerHandle, SweepScheduler, Ticker};
pub use status::LoanStatus;
pub use store::{InMemoryStore, InMemoryWallet, StaticProfileSource};
pub use types::{
    AccountId, Collateral, CollectionMethod, Decision, Grade, Lender, LoanApplication, LoanId, LoanType,
    PaymentMethod, RepaymentMethod,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
