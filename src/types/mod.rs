//! Shared data types: metadata records, the inbound envelope and the
//! indexer contract.

pub mod models;
pub mod payload;
pub mod traits;
