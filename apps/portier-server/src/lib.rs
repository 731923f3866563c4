//! Portier server: account flows, task workers and the operator CLI.

pub mod config;
pub mod email;
pub mod handlers;
pub mod hygiene;
pub mod metrics;
pub mod server;
pub mod sessions;
pub mod startup;
pub mod tasks;
pub mod tokens;

#[cfg(test)]
mod tests;
