// Library crate for integration tests.
// main.rs has its own mod declarations; this re-exports all modules.

pub mod activity;
pub mod audit;
pub mod config;
pub mod error;
pub mod registry;
pub mod routes;
pub mod server;
pub mod state;
