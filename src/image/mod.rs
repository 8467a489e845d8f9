//! Image collaborators: the PGM codec and the threshold transform

pub mod pgm;
pub mod threshold;

pub use pgm::{decode_pgm, decode_pgm_bytes, encode_pgm, write_pgm, PgmFormat};
pub use threshold::{binarize, validate_threshold};
