use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::role::Role;

#[derive(Deserialize, ToSchema)]
pub struct LoginReqDto {
    #[schema(example = "admin")]
    pub username: String,
    #[schema(example = "admin123")]
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateUserReq {
    #[schema(example = "alice")]
    pub username: String,
    #[schema(example = "secret1")]
    pub password: String,
    /// Defaults to the username when absent or blank
    #[schema(example = "Alice")]
    pub display_name: Option<String>,
    pub role: Role,
}

#[derive(Deserialize, ToSchema)]
pub struct ResetPasswordReq {
    #[schema(example = "newsecret")]
    pub password: String,
}

/// Identity carried by a signed token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub user_id: u64,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}
