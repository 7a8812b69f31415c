//! Request-scoped caller context
//!
//! Identity arrives from the external session provider and is carried
//! explicitly into every ledger call; nothing reads caller identity from
//! ambient globals.

use crate::core_types::UserId;
use crate::error::LedgerError;

/// Who is calling, and with what capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl RequestContext {
    /// Context for an ordinary member
    pub fn member(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    /// Context for an admin reviewer
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }

    /// Guard for admin-only transitions
    pub fn require_admin(&self) -> Result<(), LedgerError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized)
        }
    }
}
