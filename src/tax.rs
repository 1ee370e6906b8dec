use async_trait::async_trait;

use crate::errors::ServiceError;

/// Sales tax collaborator. Pure function of amount and jurisdiction;
/// failures are `TaxServiceError` and are never retried here — plan
/// creation propagates them to the caller.
#[async_trait]
pub trait SalesTaxCalculator: Send + Sync {
    /// Computes tax on `amount_minor` (minor currency units) for the
    /// customer's jurisdiction, returning the tax in minor units.
    async fn compute(&self, amount_minor: i64, jurisdiction: &str) -> Result<i64, ServiceError>;
}

/// US state sales tax rates in basis points (2024 general state rates;
/// local surcharges are out of scope).
const US_STATE_RATES_BP: &[(&str, i64)] = &[
    ("AL", 400),
    ("AK", 0),
    ("AZ", 560),
    ("AR", 650),
    ("CA", 725),
    ("CO", 290),
    ("CT", 635),
    ("DE", 0),
    ("FL", 600),
    ("GA", 400),
    ("HI", 400),
    ("ID", 600),
    ("IL", 625),
    ("IN", 700),
    ("IA", 600),
    ("KS", 650),
    ("KY", 600),
    ("LA", 445),
    ("ME", 550),
    ("MD", 600),
    ("MA", 625),
    ("MI", 600),
    ("MN", 687),
    ("MS", 700),
    ("MO", 422),
    ("MT", 0),
    ("NE", 550),
    ("NV", 685),
    ("NH", 0),
    ("NJ", 662),
    ("NM", 512),
    ("NY", 400),
    ("NC", 475),
    ("ND", 500),
    ("OH", 575),
    ("OK", 450),
    ("OR", 0),
    ("PA", 600),
    ("RI", 700),
    ("SC", 600),
    ("SD", 420),
    ("TN", 700),
    ("TX", 625),
    ("UT", 610),
    ("VT", 600),
    ("VA", 530),
    ("WA", 650),
    ("WV", 600),
    ("WI", 500),
    ("WY", 400),
    ("DC", 600),
    ("PR", 1150),
    ("GU", 400),
    ("VI", 500),
];

/// Rate-table implementation keyed by two-letter state code.
pub struct StateRateTaxCalculator;

impl StateRateTaxCalculator {
    fn rate_bp(jurisdiction: &str) -> Option<i64> {
        let code = jurisdiction.trim().to_ascii_uppercase();
        US_STATE_RATES_BP
            .iter()
            .find(|(state, _)| *state == code)
            .map(|(_, bp)| *bp)
    }
}

#[async_trait]
impl SalesTaxCalculator for StateRateTaxCalculator {
    async fn compute(&self, amount_minor: i64, jurisdiction: &str) -> Result<i64, ServiceError> {
        let bp = Self::rate_bp(jurisdiction).ok_or_else(|| {
            ServiceError::TaxServiceError(format!("unknown jurisdiction '{}'", jurisdiction))
        })?;
        // Round to the nearest minor unit; widen to avoid overflow on
        // large amounts.
        let tax = (amount_minor as i128 * bp as i128 + 5_000) / 10_000;
        Ok(tax as i64)
    }
}
