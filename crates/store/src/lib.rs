//! Persistence backends for TrailVerse.
//!
//! Both backends implement [`SessionStore`] (anonymous chat sessions) and
//! [`UserStore`] (token counters on authenticated accounts).
//!
//! [`SessionStore`]: trailverse_core::SessionStore
//! [`UserStore`]: trailverse_core::UserStore

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
