//! Thin wrapper over the `hex` crate: `hexlify`/`unhexlify`.

pub fn hexlify(data: &[u8]) -> String {
    hex::encode(data)
}

pub fn unhexlify(data: &str) -> Result<Vec<u8>, String> {
    hex::decode(data).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_an_inverse() {
        let samples: &[&[u8]] = &[b"", b"\x00\x01\xff", b"hello world"];
        for sample in samples {
            assert_eq!(unhexlify(&hexlify(sample)).unwrap(), *sample);
        }
    }

    #[test]
    fn rejects_odd_length_input() {
        assert!(unhexlify("abc").is_err());
    }
}
