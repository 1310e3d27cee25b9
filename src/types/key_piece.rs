//! 128-bit aggregation key pieces, serialized as `0x`-prefixed hex

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPiece(pub u128);

impl KeyPiece {
    pub fn to_hex(self) -> String {
        format!("0x{}", hex::encode(self.0.to_be_bytes()))
    }

    /// Accepts `0x`-prefixed or bare hex of up to 32 digits.
    pub fn from_hex(input: &str) -> Option<Self> {
        let digits = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .unwrap_or(input);
        if digits.is_empty() || digits.len() > 32 {
            return None;
        }
        let padded = format!("{:0>32}", digits);
        let bytes: [u8; 16] = hex::decode(padded).ok()?.try_into().ok()?;
        Some(Self(u128::from_be_bytes(bytes)))
    }
}

impl fmt::Display for KeyPiece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<u128> for KeyPiece {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl Serialize for KeyPiece {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for KeyPiece {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        KeyPiece::from_hex(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid key piece: {}", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_format() {
        assert_eq!(KeyPiece(0x159).to_hex(), "0x00000000000000000000000000000159");
        assert_eq!(KeyPiece::from_hex("0x159"), Some(KeyPiece(0x159)));
        assert_eq!(KeyPiece::from_hex("ff"), Some(KeyPiece(0xff)));
        assert_eq!(KeyPiece::from_hex(&KeyPiece(u128::MAX).to_hex()), Some(KeyPiece(u128::MAX)));
    }

    #[test]
    fn test_rejects_bad_hex() {
        assert_eq!(KeyPiece::from_hex("0x"), None);
        assert_eq!(KeyPiece::from_hex("0xzz"), None);
        assert_eq!(KeyPiece::from_hex(&"1".repeat(33)), None);
    }

    #[test]
    fn test_json_is_a_string() {
        let json = serde_json::to_string(&KeyPiece(1)).unwrap();
        assert_eq!(json, r#""0x00000000000000000000000000000001""#);
        assert!(serde_json::from_str::<KeyPiece>(r#""nope""#).is_err());
    }
}
