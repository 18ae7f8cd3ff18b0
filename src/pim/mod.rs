//! Azure Privileged Identity Management (PIM) integration.
//!
//! This module provides functionality for:
//! - Listing enabled subscriptions by display name
//! - Listing role eligibility schedules for a subscription
//! - Self-activating an eligible role with a justification

pub mod client;
pub mod models;
pub mod pager;
pub mod session;

pub use session::Session;
