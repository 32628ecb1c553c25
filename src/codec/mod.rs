//! Standalone codec collaborators — base64, hex, md5/sha1 digests, gzip.
//! Exercised by their own unit tests only; the HTTP core never calls into
//! them directly, treating them as independent, specified-interface
//! collaborators.

pub mod base64;
pub mod digest;
pub mod gzip;
pub mod hex;
