pub mod affinity;
pub mod clients;
pub mod config;
pub mod models;
pub mod moments;

// Convenient re-exports for tests and external callers
pub use affinity::*;
pub use clients::*;
pub use config::*;
pub use models::*;
pub use moments::*;
