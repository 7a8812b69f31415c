//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// User ID - globally unique, immutable after assignment.
///
/// Issued by the external identity provider; the ledger core trusts it
/// as given and uses it as the primary key for wallet ownership.
pub type UserId = u64;

/// Credit amount in whole ₳ units.
///
/// # Constraints:
/// - **Whole units only**: No fractional credit exists anywhere in the
///   system; API-boundary amounts are floored before they reach the core.
/// - **Non-negative**: Balances are `u64`; signed deltas appear only in
///   audit entries as [`SignedCredits`].
pub type Credits = u64;

/// Signed credit delta for audit entries (negative = debit).
pub type SignedCredits = i64;

/// Interest/fee rate in 10^6 precision: 30_000 = 3%.
pub type RateScaled = u64;

/// Reserved account that custodies escrowed loan principal.
///
/// Real members are issued ids starting at 1 by the identity provider;
/// id 0 never belongs to a member.
pub const ESCROW_USER: UserId = 0;
