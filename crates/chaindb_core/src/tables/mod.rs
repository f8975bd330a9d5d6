//! Table collaborators.
//!
//! Three specialized tables back the store: blocks/headers, transactions,
//! and addresses. Each owns its files, exposes
//! `create`/`open`/`commit`/`flush`/`close` plus its domain primitives,
//! and is individually crash-safe. The facade sequences their mutations
//! and commits under the write barrier.

mod address;
mod block;
mod encoding;
mod transaction;

pub use address::AddressTable;
pub use block::{BlockResult, BlockTable};
pub use transaction::{TransactionTable, TxState};
