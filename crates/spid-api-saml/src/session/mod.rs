//! Browser session storage and assertion replay protection

pub mod replay_cache;
pub mod store;
pub mod types;

pub use replay_cache::{
    ConsumedAssertion, InMemoryReplayCache, PostgresReplayCache, ReplayCache, ReplayCacheError,
};
pub use store::{InMemorySessionStore, PostgresSessionStore, SessionStore};
pub use types::{
    AuthenticatedSession, AuthenticationRequestContext, BrowserSession, SessionError,
    PENDING_LOGIN_TTL_SECONDS,
};
