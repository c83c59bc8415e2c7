//! # Altegio Booking Bot
//!
//! A booking bot for the Altegio salon-scheduling platform. Users walk
//! through a service → staff → slot → confirm conversation; the bot keeps
//! the flow in a durable state machine and commits the booking against the
//! Altegio API exactly once, even under retried webhooks and flaky networks.
//!
//! ## Features
//! - Durable per-user booking conversation state machine
//! - Idempotent commits keyed by attempt tokens
//! - Short-lived availability cache with stale fallback
//! - Session expiry and commit-retry sweeps
//! - Persistent storage with SQLite

/// Remote Altegio API client and retry policy
pub mod altegio;
/// Intent dispatcher, booking state machine, and intent/outcome types
pub mod booking;
/// Inbound webhook transport
pub mod bot;
/// Short-lived availability slot cache
pub mod cache;
/// Configuration management and environment variables
pub mod config;
/// Database models, connections, and migrations
pub mod database;
/// Error taxonomy shared across the crate
pub mod errors;
/// Background services: health endpoints and the expiry/retry sweep
pub mod services;
/// Durable store interface consumed by the booking core
pub mod store;
/// Utility functions for datetime formatting
pub mod utils;
