//! Thin wrapper over the `base64` crate, narrowed to `encode`/`decode`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn decode(data: &str) -> Result<Vec<u8>, String> {
    STANDARD.decode(data).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_an_inverse() {
        let samples: &[&[u8]] = &[b"", b"f", b"fo", b"foo", b"foob", b"fooba", b"foobar"];
        for sample in samples {
            assert_eq!(decode(&encode(sample)).unwrap(), *sample);
        }
    }
}
