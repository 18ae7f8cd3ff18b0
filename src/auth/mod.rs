//! Azure identity.
//!
//! Provides the ambient credential chain (environment service principal,
//! Azure CLI login, managed identity) and a Microsoft Graph client for
//! looking up the signed-in principal.

pub mod azure_cli;
pub mod credential;
pub mod environment;
pub mod graph;
pub mod managed_identity;

pub use credential::{ChainedCredential, TokenCredential};
pub use graph::GraphClient;
