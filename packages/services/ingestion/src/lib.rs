pub mod bus;
pub mod cli;
pub mod clients;
pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod worker;

// Convenient re-exports for tests and external callers
pub use bus::*;
pub use clients::*;
pub use config::*;
pub use models::*;
pub use router::*;
pub use worker::*;
