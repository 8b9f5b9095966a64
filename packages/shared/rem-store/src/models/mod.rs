pub mod embedding;
pub mod kv;
pub mod moment;
pub mod resource;
pub mod run;
pub mod tenant;

pub use embedding::*;
pub use kv::*;
pub use moment::*;
pub use resource::*;
pub use run::*;
pub use tenant::*;
