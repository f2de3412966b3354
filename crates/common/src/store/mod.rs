//! Identity and membership store
//!
//! A single binary file holds the local keypair followed by an append-only
//! table of admitted peers. [`KeyFile`] knows the layout; [`MembershipStore`]
//! is the serialized front door every connection task goes through.

mod actor;
mod error;
mod file;

pub use actor::{AdmitOutcome, MembershipStore};
pub use error::{Result, StorageError};
pub use file::{KeyFile, MembershipRecord, HEADER_SIZE, RECORD_SIZE};
