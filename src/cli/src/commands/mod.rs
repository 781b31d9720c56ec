//! CLI subcommands.

pub mod account;
pub mod health;
pub mod notify;
pub mod state;
