//! Refresh token ledger.
//!
//! The ledger is the only shared mutable state in Warden. It records every
//! refresh token ever issued so that rotation can be single-use and
//! revocation can be enforced without trusting the token alone.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryRefreshTokenLedger;
pub use postgres::PostgresRefreshTokenLedger;
pub use r#trait::{LedgerError, RefreshTokenLedger, RefreshTokenRecord};
