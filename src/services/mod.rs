pub mod ledger;
pub mod plans;

pub use ledger::LedgerService;
pub use plans::PlanService;
