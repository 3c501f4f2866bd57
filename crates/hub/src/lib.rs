//! meshgate hub engine
//!
//! Allocates overlay addresses, manages peer records and keys, and renders
//! the WireGuard configuration of the hub and of each peer.

pub mod allocator;
pub mod bootstrap;
pub mod config;
pub mod render;
pub mod service;

pub use config::HubConfig;
pub use render::{ClientConfigOptions, HubConfigOptions};
pub use service::{Mutation, PeerService};
