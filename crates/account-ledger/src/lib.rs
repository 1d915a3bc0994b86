//! Account ledger - append-only record of enrollment attempts.
//!
//! Every finalized attempt becomes exactly one [`LedgerEntry`]. Entries are
//! immutable once written; successful entries carry the [`Credential`] the
//! attempt produced.

mod error;
mod store;
mod types;

pub use error::LedgerError;
pub use store::Ledger;
pub use types::*;
