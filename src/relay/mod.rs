// Relay module - memories transfer pipeline

pub mod classifier;
pub mod controller;
pub mod engine;
pub mod errors;
pub mod extractor;
pub mod models;
pub mod retry;
pub mod session;
pub mod traits;

#[cfg(test)]
pub mod testutil;

pub use controller::RunController;
pub use engine::{HttpFetcher, TransferEngine};
pub use errors::{FetchError, RelayError, SessionError, TransportError};
pub use models::{
    KindTally, LocalPayload, MediaKind, RelayConfig, RunStatistics, WorkItem,
};
pub use retry::{with_retry, CancelToken, RetryOutcome};
pub use session::{RunPhase, RunSession, SessionStore};
pub use traits::{ChatRef, ChatTransport, MediaFetcher, MessageRef};
