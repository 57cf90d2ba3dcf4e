//! Opaque identifiers assigned by the external attachment platform.
//!
//! The platform hands out decimal snowflake strings. We never do arithmetic
//! on them, so they stay opaque newtypes rather than integers.

use serde::{Deserialize, Serialize};

/// Macro to generate opaque platform ID wrappers.
macro_rules! platform_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wraps a raw platform identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

platform_id!(ChannelId, "Platform channel hosting attachment messages.");
platform_id!(MessageId, "Platform message carrying one or more attachments.");
platform_id!(AttachmentId, "Platform attachment; globally unique.");
