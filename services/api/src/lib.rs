//! services/api/src/lib.rs
//!
//! The study session service: Postgres, backend and filesystem adapters for the
//! core ports, plus the REST and WebSocket surface built on top of them.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
