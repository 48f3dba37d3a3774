pub mod admin;
pub mod serve;

// Re-export command functions for convenience
pub use admin::{init_db, refresh, status};
pub use serve::{coordinator_server, ServeParams};
