//! NewType wrappers for the opaque strings that flow through authentication.
//!
//! Session tokens, OAuth state values and PKCE verifiers are all random
//! URL-safe strings; keeping them as distinct types stops one from being
//! stored or compared where another is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Whether the value is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Secret-bearing wrappers print only a short prefix so they never end up in logs whole.
macro_rules! redacted_debug {
    ($($name:ident),+) => {
        $(
            impl fmt::Debug for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}({}…)", stringify!($name), prefix(&self.0))
                }
            }
        )+
    };
}

fn prefix(value: &str) -> &str {
    let end = value
        .char_indices()
        .nth(6)
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    &value[..end]
}

newtype_string!(
    /// Opaque session token carried in the `session` cookie.
    ///
    /// 32 bytes of OS randomness, base64url encoded. Possession of the token
    /// is the whole credential: the server keeps nothing else about it
    /// beyond the authenticated flag.
    SessionToken
);

newtype_string!(
    /// CSRF state value round-tripped through the identity provider.
    StateToken
);

newtype_string!(
    /// RFC 7636 code verifier bound to a single authorization request.
    PkceVerifier
);

newtype_string!(
    /// Login name of the configured principal, or a name asserted by the
    /// identity provider.
    Username
);

redacted_debug!(SessionToken, StateToken, PkceVerifier);

impl StateToken {
    /// Short prefix suitable for log lines.
    pub fn log_prefix(&self) -> &str {
        prefix(&self.0)
    }
}

impl fmt::Debug for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Username").field(&self.0).finish()
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
