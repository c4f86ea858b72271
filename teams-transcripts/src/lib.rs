//! Microsoft Teams transcript trigger for the Nexus host.
//!
//! Manages Graph change-notification subscriptions for meeting transcripts:
//! creating and verifying them when a trigger is activated, renewing them on
//! lifecycle notifications, tearing them down on deactivation, and turning
//! every change notification into its own host event.

pub mod config;
pub mod controller;
pub mod error;
pub mod graph;
pub mod http_server;
pub mod logging;
pub mod notification;
pub mod store;
pub mod subscription;
pub mod transcripts;
pub mod trigger;
pub mod types;
pub mod verification;

pub use error::{GraphError, TeamsError, TeamsResult};
