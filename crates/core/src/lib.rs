//! `warden-core`: identifiers and time shared by every Warden crate.
//!
//! This crate carries no I/O and no token logic.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{RecordId, TokenId, UserId};
