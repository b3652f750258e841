//! Macro for implementing Display and FromStr for status enums
//!
//! Status columns are stored as lowercase text; this macro keeps the text
//! mapping for an enum in one place.
//!
//! # Example
//!
//! ```rust
//! use qrgen_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum DeliveryStatus {
//!     Pending,
//!     Delivered,
//! }
//!
//! impl_domain_status_conversions!(DeliveryStatus {
//!     Pending => "pending",
//!     Delivered => "delivered",
//! });
//! ```

/// Implements `Display`, `FromStr` and an `as_str` accessor for status enums
///
/// - `Display`/`as_str` produce the stored string
/// - `FromStr` is case-insensitive and names the enum in its error
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:literal),+ $(,)? }) => {
        impl $enum_name {
            /// Stored string representation
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl ::std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
