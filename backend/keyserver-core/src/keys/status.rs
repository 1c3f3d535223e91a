use std::fmt;

/// What is currently known about a key. Always derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyStatus {
    /// No seed attached and the key chain does not hold the key.
    Unknown,
    /// A seed is attached but the key has not been resolved.
    Seeded,
    /// The key chain holds the key and it may be served.
    Published,
    /// The key chain holds the key but the operator has hidden it.
    Hidden,
}

impl KeyStatus {
    pub fn as_wire(self) -> u32 {
        match self {
            KeyStatus::Unknown => 0,
            KeyStatus::Seeded => 1,
            KeyStatus::Published => 2,
            KeyStatus::Hidden => 3,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(KeyStatus::Unknown),
            1 => Some(KeyStatus::Seeded),
            2 => Some(KeyStatus::Published),
            3 => Some(KeyStatus::Hidden),
            _ => None,
        }
    }

    /// True when the key chain holds the key, whether or not it is visible.
    pub fn is_resolved(self) -> bool {
        matches!(self, KeyStatus::Published | KeyStatus::Hidden)
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyStatus::Unknown => "unknown",
            KeyStatus::Seeded => "seeded",
            KeyStatus::Published => "published",
            KeyStatus::Hidden => "hidden",
        };
        f.write_str(name)
    }
}
