//! Conflict copy naming and resolution application.
//!
//! Detection itself lives in the planner (a path with both local and remote
//! changes since the baseline becomes an `ActionType::Conflict`); this crate
//! only decides the resolution strategy and carries it out.

pub mod error;
pub mod namer;
pub mod policy;
pub mod resolver;

pub use error::ConflictError;
pub use namer::ConflictNamer;
pub use policy::parse_strategy;
pub use resolver::ConflictResolver;
