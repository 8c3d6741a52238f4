//! Accounts lookups and the block list.

pub mod routes;
pub mod store;
