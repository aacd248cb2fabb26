//! Gatehouse - credential and session lifecycle service
//!
//! Registers users, verifies passwords, issues and rotates short-lived access
//! tokens and single-use refresh tokens, and keeps revocable session records
//! plus an audit trail of login attempts.

pub mod core;
