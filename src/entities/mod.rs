pub mod layaway_payment;
pub mod layaway_plan;

pub use layaway_payment::{PaymentMethod, PaymentStatus};
pub use layaway_plan::{Cadence, PlanStatus};
