#![warn(clippy::unwrap_used)]

pub mod admin_rest;
pub mod auth;
pub mod billing_rest;
pub mod error;
pub mod models;
pub mod portal_rest;
pub mod rest;
pub mod server;
pub mod support_rest;
pub mod swagger;

pub use rest::AppState;
pub use server::{build_router, ApiServer};
pub use swagger::ApiDoc;
