pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod notification;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod store;
pub mod todo;

pub use config::Config;
pub use error::{Result, StoreError, TurnstileError};
pub use rate_limiter::{Decision, RateLimiter};
pub use server::create_app;
pub use store::{CounterStore, KeyTtl};
