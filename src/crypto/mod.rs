//! Encryption-at-rest: per-object key derivation and the chunked
//! authenticated stream cipher objects are stored under.
//!
//! Nothing in this module persists key material. A content key exists for
//! the duration of one upload or download and is zeroized when dropped.

pub mod derive;
pub mod stream;
