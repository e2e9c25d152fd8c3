//! Kong Admin API source managers
//!
//! Implements the `konsync-core` traits over HTTP for a self-hosted Gateway
//! (`Kong-Admin-Token`) and a Konnect control plane (bearer token).

pub mod client;
pub mod endpoints;
pub mod manager;
pub mod paths;
pub mod planes;

pub use client::{AdminClient, AuthStyle};
pub use endpoints::{HttpCredentialManager, HttpDeclarativeEndpoint};
pub use manager::HttpEntityManager;
pub use paths::AdminResource;
pub use planes::{gateway_plane, konnect_base_url, konnect_plane, query_service};
