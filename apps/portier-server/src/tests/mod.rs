//! Server unit and integration tests.
//!
//! Tests are organized into modules by feature area:
//! - `common` - Shared test helpers and utilities
//! - `registration` - Register, confirm, duplicate detection, atomicity
//! - `account_changes` - Email change, password reset and change
//! - `sessions` - Login, per-request authentication, logout decoration
//! - `notifications` - Email task handling and delivery through the consumer
//! - `settings` - Language preference and profile lookup

pub mod common;

mod registration;
