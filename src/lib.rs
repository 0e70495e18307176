//! osmium — a small file host that stores every upload encrypted at rest.
//!
//! Each upload gets a random identifier and a random secret; the secret is
//! handed back to the uploader inside the retrieval link and never stored.
//! The server derives the actual data key from that secret on every request,
//! so a copy of the disk alone reveals nothing.

pub mod config;
pub mod crypto;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod limiter;
pub mod response;
pub mod routes;
pub mod state;
pub mod storage;
pub mod zerowidth;
