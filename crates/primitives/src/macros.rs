/// Generates the common surface for a 32-byte identifier newtype: byte
/// accessors, zero checks, hex `Display`/`Debug`, and `FromStr`.
#[macro_export]
macro_rules! impl_buf32_wrapper {
    ($target:ty) => {
        impl $target {
            /// All-zero value.
            pub const fn zero() -> Self {
                Self([0u8; 32])
            }

            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }
        }

        impl From<[u8; 32]> for $target {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl From<$target> for [u8; 32] {
            fn from(value: $target) -> [u8; 32] {
                value.0
            }
        }

        impl std::fmt::Display for $target {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&hex::encode_upper(self.0))
            }
        }

        impl std::fmt::Debug for $target {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($target), "({})"), self)
            }
        }

        impl std::str::FromStr for $target {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes)?;
                Ok(Self(bytes))
            }
        }
    };
}
