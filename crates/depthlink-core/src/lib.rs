//! Shared building blocks for the DepthLink sender and receiver.
//!
//! Everything in this crate is synchronous and free of I/O: the wire codec,
//! the chunker, the producer-side encoders and the naming helpers can be used
//! from any runtime (or none).

pub mod chunker;
pub mod config;
pub mod errors;
pub mod naming;
pub mod sensor;
pub mod types;
pub mod wire;

pub use chunker::{Chunk, Chunker, Payload, DEFAULT_CHUNK_SIZE};
pub use config::LinkConfig;
pub use errors::{ConfigError, EncodeError, TransportError, WireError};
pub use types::*;
pub use wire::{DecodedFrame, Frame, FrameDecoder};
