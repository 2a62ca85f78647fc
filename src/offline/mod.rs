//! Offline resilience
//!
//! Failed mutating requests are queued durably and replayed in order once
//! the connection comes back.

pub mod queue;
pub mod sync;
pub mod transport;

pub use queue::{is_replayable, OfflineOperation, OfflineOperationQueue, RequestDescriptor};
pub use sync::{SyncCoordinator, SyncReport};
pub use transport::{HttpTransport, NetworkTransport};
