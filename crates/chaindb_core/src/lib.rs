//! # chaindb core
//!
//! A crash-consistent chain store composing three on-disk tables
//! (blocks/headers, transactions, addresses) behind a single transactional
//! facade with a two-index (candidate vs confirmed) chain model and
//! reorganization.
//!
//! This crate provides:
//! - The [`ChainDatabase`] facade: serialized writes, the begin/end write
//!   barrier, and the reorganization engine
//! - The table collaborators in [`tables`]
//! - Directory and flush locking in [`lock`]
//! - Reader access to published table images in [`memory`]
//!
//! Writers are serialized by a process-local mutex; readers bypass it and
//! go through scoped accessors instead. When per-write flushing is
//! enabled, a persistent flush-lock sentinel brackets every write so that
//! a crash mid-write quarantines the store instead of silently reopening
//! a corrupted image.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod database;
mod error;
mod lock;
mod settings;

pub mod memory;
pub mod primitives;
pub mod tables;
pub mod verify;

pub use database::{ChainDatabase, StoreBackends};
pub use error::{ChainError, ChainResult};
pub use lock::{ExclusiveLock, FlushLock};
pub use settings::Settings;
