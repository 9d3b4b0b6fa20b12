//! # TrailVerse Core
//!
//! Domain types, traits, and error definitions for the TrailVerse AI chat
//! relay. This crate has **no framework dependencies**: it defines the
//! domain model the other crates implement against.
//!
//! Every stateful collaborator (LLM providers, the session store, the user
//! token ledger) is a trait here. Implementations live in their own crates,
//! so tests can swap in fakes and the dependency graph points inward.

pub mod account;
pub mod error;
pub mod facts;
pub mod message;
pub mod provider;
pub mod session;

// Re-export key types at crate root for ergonomics
pub use account::{TokenUsage, UserAccount, UserRole, UserStore};
pub use error::{FactsError, ProviderError, StoreError};
pub use facts::{FactsBundle, FactsQuery};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderKind, ProviderRequest, ProviderResponse, Usage};
pub use session::{AnonymousSession, SessionMessage, SessionSeed, SessionStore, UserAppend};
