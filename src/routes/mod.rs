pub mod admin;
pub mod auth;
pub mod keyword;
pub mod plan;
pub mod subscription;
pub mod user;
pub mod webhook;
