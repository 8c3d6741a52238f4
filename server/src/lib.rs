//! Parley messaging server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod config;
pub mod conversations;
pub mod db;
pub mod error;
pub mod friends;
pub mod messages;
pub mod push;
pub mod routes;
pub mod state;
pub mod users;
pub mod ws;
