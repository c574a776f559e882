pub mod auth;
pub mod csrf;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod password;
