//! HTTP/2 transports: frame codecs, HPACK and the two client flavours.

pub mod custom;
pub mod frame;
pub mod hpack;
pub mod huffman;
pub mod standard;

pub use custom::CustomH2;
