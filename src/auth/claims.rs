use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT payload carried by session tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,   // user ID
    pub iat: i64,    // issued at (unix seconds)
    pub exp: i64,    // expires at (unix seconds)
    pub iss: String, // issuer
}
