use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};

use crate::{model::role::Role, models::Claims};

fn now() -> i64 {
    Utc::now().timestamp()
}

pub fn generate_token(
    user_id: u64,
    username: String,
    role: Role,
    secret: &str,
    ttl: i64,
) -> Result<String, Error> {
    let claims = Claims {
        user_id,
        username,
        role,
        exp: (now() + ttl).max(0) as usize,
    };

    encode_claims(&claims, secret)
}

pub fn encode_claims(claims: &Claims, secret: &str) -> Result<String, Error> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Signature and expiry only; there is no revocation list.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}
