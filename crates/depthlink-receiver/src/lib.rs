//! depthlink-receiver
//!
//! Collector side of the DepthLink transport. Accepts sender connections,
//! decodes frames, reassembles chunked payloads and files them into event
//! folders.

pub mod assembler;
pub mod config;
pub mod server;
pub mod sink;

pub use assembler::{FileAssembler, ReceivedFile};
pub use config::ReceiverConfig;
pub use server::Receiver;
pub use sink::{event_for, FileSink};
