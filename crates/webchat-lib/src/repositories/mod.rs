// Repository layer for database access

pub mod session_repo;

pub use session_repo::{MemorySessionStorage, SessionRepository, SessionSnapshot, SessionStorage};
