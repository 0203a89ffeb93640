mod client;
mod config;
mod errors;

pub mod refresh;
pub mod telemetry;
pub mod token;

pub use client::{AuthClient, AuthClientBuilder};
pub use config::Config;
pub use errors::Error;
