use serde::Serialize;
use serde::de::DeserializeOwned;
use crate::core::error::Result;

/// Record serialization applied before compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Self-describing text; tolerant of added fields
    #[default]
    Json,
    /// Compact binary; field order must match the type exactly
    Bincode,
}

impl Format {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Format::Json => Ok(serde_json::to_vec(value)?),
            Format::Bincode => Ok(bincode::serialize(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Format::Json => Ok(serde_json::from_slice(data)?),
            Format::Bincode => Ok(bincode::deserialize(data)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        tags: Vec<String>,
    }

    #[test]
    fn test_both_formats_round_trip() {
        let sample = Sample { name: "a".into(), tags: vec!["x".into()] };
        for format in [Format::Json, Format::Bincode] {
            let bytes = format.encode(&sample).unwrap();
            let back: Sample = format.decode(&bytes).unwrap();
            assert_eq!(back, sample);
        }
    }

    #[test]
    fn test_decode_garbage_is_serialization_error() {
        let err = Format::Json.decode::<Sample>(b"not json").unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::Serialization);
    }
}
