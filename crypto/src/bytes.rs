//! Fixed-width byte newtypes that travel as lowercase hex.

/// Implements hex `Display`/`Debug`/`FromStr`, serde and the usual byte
/// accessors for a `struct $name([u8; $len])` newtype.
macro_rules! impl_hex_bytes {
    ($name:ident, $len:expr) => {
        impl $name {
            /// Wrap raw bytes.
            pub const fn new_from_array(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Copy out the raw bytes.
            pub const fn to_bytes(&self) -> [u8; $len] {
                self.0
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Abbreviated hex form for log lines.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..6])
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self([0u8; $len])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl std::str::FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(s, &mut bytes)?;
                Ok(Self(bytes))
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let encoded = <String as serde::Deserialize>::deserialize(deserializer)?;
                encoded.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use impl_hex_bytes;
