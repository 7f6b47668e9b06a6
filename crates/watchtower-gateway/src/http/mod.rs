pub mod admin;
pub mod auth;
pub mod chat;
pub mod error;
pub mod sessions;
pub mod status;
