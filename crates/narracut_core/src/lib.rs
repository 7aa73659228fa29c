//! Tool-free core of the narration engine: time types, the script data model,
//! interval algebra and the timeline resolver.

pub mod captions;
pub mod config;
pub mod error;
pub mod intervals;
pub mod script;
pub mod timeline;
pub mod types;

pub use config::EngineConfig;
pub use error::{CoreError, Result};
pub use script::{GeneratedScript, ScriptDocument};
pub use types::*;
