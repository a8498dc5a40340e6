use serde::{Deserialize, Serialize};

// ========== USER ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub user_id: String, // Us0000001a
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub photo_url: String,
    pub registered_at: String,
    /// Empty when the user is not attached to a community yet.
    #[serde(default)]
    pub community_id: String,
    pub is_admin: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistrationRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub community_id: String,
    #[serde(default)]
    pub is_admin: bool,
}

// ========== COMMUNITY ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Community {
    pub community_id: String, // Cs0000001a
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub image_url: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommunityRequest {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub image_url: String,
}

// ========== ACCOUNT LINK ==========
/// Maps an auth-service account to the user record created for it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AccountLink {
    pub user_id: String,
    pub email: String,
}

// ========== SESSION ==========
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i32,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
