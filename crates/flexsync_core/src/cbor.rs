//! CBOR helpers shared by the database and the sync engine.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value as CBOR.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a CBOR value.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_input_is_codec_error() {
        let bytes = to_cbor(&vec!["a".to_string(), "b".to_string()]).unwrap();
        let result: CoreResult<Vec<String>> = from_cbor(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(CoreError::Codec { .. })));
    }
}
