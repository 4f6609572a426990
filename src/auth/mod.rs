//! Authentication and session engine.
//!
//! [`service::AuthService`] orchestrates the flows; everything it needs
//! arrives by injection: an [`store::AuthStore`], a
//! [`rate_limit::FixedWindowLimiter`], and an email sender.

pub mod config;
pub mod error;
pub mod password;
pub mod rate_limit;
pub mod service;
pub mod store;
pub mod tokens;
pub mod types;
pub(crate) mod utils;

pub use config::AuthConfig;
pub use error::{AuthFlowError, ErrorKind};
pub use service::AuthService;
