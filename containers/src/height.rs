use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Block height. Encoded as a decimal string on the wire, the way the
/// chain's JSON APIs encode all 64-bit integers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Height(pub u64);

impl Height {
    /// Height of the block immediately before this one.
    ///
    /// Saturates at zero so the first block of a chain does not wrap.
    pub fn prev(self) -> Height {
        Height(self.0.saturating_sub(1))
    }

    /// Height of the block immediately after this one.
    pub fn next(self) -> Height {
        Height(self.0 + 1)
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for Height {
    fn from(value: u64) -> Self {
        Height(value)
    }
}

impl Serialize for Height {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Height {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::serde_helpers::string_u64::deserialize(deserializer).map(Height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_as_string() {
        let h = Height(42);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, "\"42\"");
        assert_eq!(serde_json::from_str::<Height>(&json).unwrap(), h);
    }

    #[test]
    fn accepts_bare_numbers() {
        assert_eq!(serde_json::from_str::<Height>("42").unwrap(), Height(42));
    }

    #[test]
    fn prev_saturates_at_zero() {
        assert_eq!(Height(0).prev(), Height(0));
        assert_eq!(Height(10).prev(), Height(9));
    }
}
