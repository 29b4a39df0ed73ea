//! depthlink-transport-client
//!
//! Sender-side transport for pushing sensor payloads to a DepthLink
//! collector over one persistent TCP connection.
//!
//! # Architecture
//!
//! ```text
//! producer ──► PayloadQueue ──► Dispatcher ──► Chunker ──► wire::encode ──► Session (TCP)
//!                                  │ ready?
//!                                  ▼
//!                          ConnectionManager ── connect / disconnect ──► Transport
//!                           (state, ReadyFlag,                 └── SessionEvent channel
//!                            endpoint store)                        (responses, close)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use depthlink_core::{Endpoint, LinkConfig};
//! use depthlink_transport_client::{ConnectionManager, Dispatcher, JsonFileStore, TcpTransport};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LinkConfig::default();
//! let (transport, _events) = TcpTransport::new();
//! let store = JsonFileStore::at("endpoint.json");
//! let link = ConnectionManager::new(Arc::new(transport), Arc::new(store), &config);
//!
//! let outcome = link.update_connection(Endpoint::new("10.0.0.5", 9000)?).await;
//! if outcome.is_success() {
//!     let dispatcher = Dispatcher::new(link.clone(), &config)?;
//!     dispatcher.send_metadata("calibration", "fx,fy,cx,cy\n1,1,0,0\n").await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod link;
pub mod queue;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod mock;

pub use dispatcher::{with_extension, DispatchOutcome, Dispatcher};
pub use link::{ConnectFailure, ConnectOutcome, ConnectionManager};
pub use queue::{PayloadQueue, PayloadSender, QueueStats, SubmitError};
pub use session::{Session, SessionEvent, TcpSession, TcpTransport, Transport};
pub use store::{EndpointStore, JsonFileStore, MemoryStore};
