//! Streaming HTTP fetch + incremental NDJSON transcoding pipeline.
//!
//! This crate implements the three leaf subsystems of httpvtab: a
//! single-producer/single-consumer [`byte_queue::ByteQueue`], a push-style
//! [`json_transcoder::JsonTranscoder`] that turns arriving response bytes
//! into one NDJSON line per completed top-level JSON object, and the
//! [`fetch_worker::FetchWorker`] that drives a non-blocking HTTP/1.1 request
//! across both of them. None of this crate knows about SQL; the `httpvtab`
//! crate wires it to `rusqlite`'s virtual-table ABI.

pub mod byte_queue;
pub mod error;
pub mod fetch_worker;
pub mod http_framer;
pub mod json_lexer;
pub mod json_transcoder;
pub mod ndjson_stream;

pub use byte_queue::ByteQueue;
pub use error::{Error, Result};
pub use fetch_worker::{FetchConfig, FetchHandle, FetchWorker};
pub use http_framer::HttpFramer;
pub use json_transcoder::JsonTranscoder;
pub use ndjson_stream::NdjsonStream;
