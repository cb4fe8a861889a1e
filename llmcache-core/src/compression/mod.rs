//! Payload compression for stored responses.

pub mod compressor;

pub use compressor::{CompressionCodec, CompressionConfig, Compressor};
