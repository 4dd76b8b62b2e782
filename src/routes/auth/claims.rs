use serde::{Deserialize, Serialize};

/// Access-token claims issued by Supabase Auth. `sub` is the tenant id.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: usize, // expiration (as UNIX timestamp)
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    // Supabase role ("authenticated"), not the tenant's admin role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}
