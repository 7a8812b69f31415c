//! Interest and fee rate math
//!
//! All rates use 10^6 precision: 30_000 = 3%.
//!
//! Canonical fee order (applies everywhere): fees are subtracted LAST,
//! after interest accrual. `total_repayment = principal + interest - fee`,
//! `net_amount = amount - fee`.

use crate::core_types::{Credits, RateScaled};

/// Rate precision (10^6 = 1,000,000)
pub const RATE_PRECISION: u64 = 1_000_000;

/// Default cash-out fee rate (20_000 = 2%)
pub const DEFAULT_CASH_OUT_FEE_RATE: RateScaled = 20_000;

/// Default loan processing fee rate (0 = fee-free)
pub const DEFAULT_LOAN_FEE_RATE: RateScaled = 0;

/// Scale an amount by a 10^6-precision rate, flooring to whole units.
///
/// Uses u128 intermediate to prevent overflow. Unlike trading fees there
/// is no minimum-of-1 bump: 1000 * 3% must be exactly 30, and amounts too
/// small to accrue a whole unit accrue nothing.
///
/// # Example
/// ```
/// use austral_ledger::fees::scale_by_rate;
/// // 1000 ₳ * 3% = 30 ₳
/// assert_eq!(scale_by_rate(1000, 30_000), 30);
/// ```
#[inline]
pub fn scale_by_rate(amount: Credits, rate: RateScaled) -> Credits {
    ((amount as u128 * rate as u128) / RATE_PRECISION as u128) as u64
}
