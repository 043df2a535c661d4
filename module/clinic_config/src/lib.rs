//! Layered configuration loading for the clinic core
//!
//! Implements a 5-layer precedence system (environment variables > project
//! config > user config > workspace defaults > crate defaults) for ad hoc
//! per-module settings via [`ConfigLoader`], plus a concrete, eagerly
//! validated [`AppConfig`] for the handful of settings every service binary
//! needs at startup (database, JWT, payment providers, rate limits).
//!
//! # Examples
//!
//! ```ignore
//! use clinic_config::{AppConfig, ConfigLoader};
//!
//! let app_config = AppConfig::from_env()?;
//!
//! let loader = ConfigLoader::new("clinic_billing")?;
//! let retry_max_attempts: u32 = loader.get("retry.max_attempts")?;
//! ```

pub mod app_config;
pub mod error;
pub mod layer;
pub mod loader;

pub use app_config::{ AppConfig, AppEnv, RateLimitParams, StripeConfig, WompiConfig };
pub use error::{ ConfigError, Result };
pub use layer::{ ConfigLayer, ConfigValue, EnvLayer, FileLayer, LayersBuilder };
pub use loader::ConfigLoader;
