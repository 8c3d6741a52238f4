//! Friend requests and the contact list they maintain.

pub mod routes;
pub mod store;
