//! Credential headers.
//!
//! Tokens are obtained elsewhere; this only turns them into headers.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `Authorization: Basic base64(<username>:<password>)`
    Basic { username: String, password: String },
    /// `PRIVATE-TOKEN: <token>`
    PrivateToken(String),
}

impl Credentials {
    pub fn header(&self) -> (String, String) {
        match self {
            Credentials::Bearer(token) => ("Authorization".to_string(), format!("Bearer {token}")),
            Credentials::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                ("Authorization".to_string(), format!("Basic {encoded}"))
            }
            Credentials::PrivateToken(token) => ("PRIVATE-TOKEN".to_string(), token.clone()),
        }
    }
}

// Keeps secrets out of `{:?}` output.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Bearer(_) => f.write_str("Bearer(***)"),
            Credentials::Basic { username, .. } => {
                write!(f, "Basic {{ username: {username:?}, password: *** }}")
            }
            Credentials::PrivateToken(_) => f.write_str("PrivateToken(***)"),
        }
    }
}
