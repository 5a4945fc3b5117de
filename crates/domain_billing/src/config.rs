//! Ledger configuration

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{ClinicTimezone, Currency};

/// Tunable policy for one clinic's ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Currency the clinic bills in
    pub currency: Currency,
    /// Timezone used to resolve "today" and reconciliation day bounds
    pub timezone: ClinicTimezone,
    /// How far `paid_amount` may exceed `total_amount` before a payment
    /// is rejected. Zero by default: overpayment is refused unless the
    /// caller passes the explicit allow-overpayment flag.
    pub overpayment_tolerance: Decimal,
    /// Retry budget for version-conflicted writes
    pub write_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            currency: Currency::INR,
            timezone: ClinicTimezone::new(chrono_tz::Asia::Kolkata),
            overpayment_tolerance: Decimal::ZERO,
            write_retries: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rejects_overpayment() {
        let config = LedgerConfig::default();
        assert!(config.overpayment_tolerance.is_zero());
        assert!(config.write_retries > 0);
    }
}
