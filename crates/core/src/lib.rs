pub mod config;
pub mod error;
pub mod types;
pub mod validation;

pub use config::AppConfig;
pub use error::{SaasError, SaasResult};
