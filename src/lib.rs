// ABOUTME: Library root for marionette - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod action_log;
pub mod auth;
pub mod cli;
pub mod error;
pub mod inventory;
pub mod orchestrator;
pub mod output;
pub mod state;
pub mod templates;
pub mod transport;
