// API module
//
// This module exposes the ledger over HTTP

pub mod handlers;
pub mod routes;
pub mod schema;

// Re-export main components for easier access
pub use routes::configure_routes;
