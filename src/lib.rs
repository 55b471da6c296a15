//! Batch media conversion: aspect-preserving image and video resizing,
//! image format conversion and Base64 payload decoding.

pub mod config;
pub mod constants;
pub mod conversion;
pub mod decode;
pub mod events;
pub mod geometry;
pub mod handles;
pub mod media;
pub mod probe;
pub mod services;
pub mod state;
