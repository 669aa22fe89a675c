//! Core contracts for keeper: operation contexts, passphrase agents, the
//! crypto backend trait, recipient sets, and store topology config.
//! Kept free of concrete crypto so every other crate can depend on it.

pub mod agent;
pub mod config;
pub mod context;
pub mod crypto;
pub mod recipients;
