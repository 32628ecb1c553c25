//! `Md5`/`Sha1` hexdigest wrappers over the `md-5`/`sha1` crates.

use md5::{Digest as _, Md5};
use sha1::Sha1;

pub fn md5_hexdigest(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    crate::codec::hex::hexlify(&hasher.finalize())
}

pub fn sha1_hexdigest(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    crate::codec::hex::hexlify(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_matches_known_vector() {
        assert_eq!(md5_hexdigest(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn sha1_matches_known_vector() {
        assert_eq!(sha1_hexdigest(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }
}
