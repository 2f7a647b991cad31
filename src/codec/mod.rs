//! Codec module - serialization for the RPC envelope and call bodies.
//!
//! The codec is a marker struct with static methods rather than a trait
//! object: call sites bind at compile time and there is nothing to box.
//! Every envelope encode/decode in the crate routes through [`JsonCodec`],
//! so swapping the wire serialization is a one-module change.
//!
//! # Example
//!
//! ```
//! use sockwire::codec::JsonCodec;
//!
//! let encoded = JsonCodec::encode(&("sum", 2, 3)).unwrap();
//! let decoded: (String, i32, i32) = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, ("sum".to_string(), 2, 3));
//! ```

use crate::error::Result;

/// JSON codec for the packet envelope and typed call bodies.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TestStruct {
            id: 42,
            name: "test".to_string(),
            active: true,
        };

        let encoded = JsonCodec::encode(&original).unwrap();
        let decoded: TestStruct = JsonCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encode_decode_primitives() {
        let s = "hello world";
        let encoded = JsonCodec::encode(&s).unwrap();
        let decoded: String = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, s);

        let n: i64 = 12345;
        let encoded = JsonCodec::encode(&n).unwrap();
        let decoded: i64 = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, n);
    }

    #[test]
    fn test_encode_decode_collections() {
        let vec = vec![1, 2, 3, 4, 5];
        let encoded = JsonCodec::encode(&vec).unwrap();
        let decoded: Vec<i32> = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, vec);
    }

    #[test]
    fn test_encode_decode_option() {
        let some_val: Option<i32> = Some(42);
        let encoded = JsonCodec::encode(&some_val).unwrap();
        let decoded: Option<i32> = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, some_val);

        let none_val: Option<i32> = None;
        let encoded = JsonCodec::encode(&none_val).unwrap();
        assert_eq!(encoded, b"null");
        let decoded: Option<i32> = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, none_val);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let invalid = b"{not json";
        let result: Result<TestStruct> = JsonCodec::decode(invalid);
        assert!(result.is_err());
    }
}
