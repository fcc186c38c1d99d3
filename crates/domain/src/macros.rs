//! Macro for implementing Display and FromStr for label enums
//!
//! Command kinds and similar enums travel as snake_case labels in config
//! files, log fields and error messages. The macro keeps both directions of
//! that mapping in one table.
//!
//! # Example
//!
//! ```rust
//! use livlink_domain::impl_label_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Connectivity {
//!     Online,
//!     Offline,
//! }
//!
//! impl_label_conversions!(Connectivity {
//!     Online => "online",
//!     Offline => "offline",
//! });
//!
//! assert_eq!(Connectivity::Online.to_string(), "online");
//! assert_eq!("OFFLINE".parse::<Connectivity>().unwrap(), Connectivity::Offline);
//! ```

/// Implements Display and FromStr for a label enum
///
/// Parsing is case-insensitive. Unknown labels yield
/// [`LivError::Validation`](crate::LivError::Validation) naming the enum.
#[macro_export]
macro_rules! impl_label_conversions {
    ($enum_name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $enum_name {
            /// Stable snake_case label
            pub fn as_label(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_label())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = $crate::LivError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($label => Ok(Self::$variant),)+
                    other => Err($crate::LivError::validation(
                        stringify!($enum_name),
                        format!("unknown label '{other}'"),
                    )),
                }
            }
        }
    };
}
