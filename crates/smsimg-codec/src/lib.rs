//! smsimg-codec: everything between raw image bytes and SMS-sized text fragments
//!
//! # Overview
//! - `compress`: iterative width/quality search for a JPEG under a byte budget
//! - `payload`: the base64 text form of the compressed image
//! - `fragment`: fixed-size splitting, `index/total#text` framing, and rejoining

pub mod compress;
pub mod fragment;
pub mod payload;

// Convenience re-exports for the most common operations
pub use compress::{compress_file, compress_image, compress_to_budget, Attempt, Compressed};
pub use fragment::{join_fragments, split_payload, FrameError, Fragment, Joined};
pub use payload::EncodedPayload;
