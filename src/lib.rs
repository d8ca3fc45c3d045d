//! Offline-first cache and session resumption engine for a workout companion
//! app.
//!
//! Two independent concerns live here:
//! - [`cache`]: intercepts outbound HTTP requests and serves/populates a
//!   partitioned response cache so the app keeps working without a network.
//! - [`session`]: persists in-progress workout state across two local tiers
//!   and reconciles it with the remote session ledger when the user re-enters
//!   a workout.

pub mod cache;
pub mod config;
pub mod session;
