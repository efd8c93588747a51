//! Vendor opcode framing and text payload encoding/decoding for the mesh application.
//!
//! Messages exchanged with the mesh host carry no framing of their own: the
//! host's send primitive frames them. This crate only deals with the
//! application-level layout.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | opcode (3B, BE)      | vendor or standard opcode  |
//! +----------------------+----------------------------+
//! | payload              | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```
//!
//! Text payloads are ASCII followed by a single `0x00` byte.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;

// Re-export main types
pub use codec::{
    decode, decode_text, encode, encode_text, Opcode, MAX_OPCODE, OPCODE_LEN, TEXT_TERMINATOR,
};
pub use error::WireError;
