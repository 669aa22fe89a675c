//! Concrete crypto backends for keeper stores.
//! `xc` is the built-in passphrase-protected scheme; `plain` and `agecli`
//! cover debugging and delegation to the external `age` tool.

pub mod agecli;
pub mod agent;
pub mod plain;
pub mod xc;

use keeper_core::crypto::{BackendParams, CryptoBackend, CryptoError, CryptoRegistry};

/// Registry with every backend this crate ships; `xc` is the default.
pub fn default_registry() -> CryptoRegistry {
    let mut registry = CryptoRegistry::new(xc::NAME);
    registry
        .register(xc::NAME, |params: &BackendParams| {
            let backend =
                xc::XcBackend::new(params.store_root.clone(), params.agent.clone(), &params.locations)?;
            Ok(Box::new(backend) as Box<dyn CryptoBackend>)
        })
        .register(plain::NAME, |_params: &BackendParams| {
            Ok(Box::new(plain::PlainBackend::new()) as Box<dyn CryptoBackend>)
        })
        .register(agecli::NAME, |params: &BackendParams| {
            let backend = agecli::AgeCliBackend::new(&params.store_root, &params.locations);
            Ok::<_, CryptoError>(Box::new(backend) as Box<dyn CryptoBackend>)
        });
    registry
}
