//! Extensions setup for host applications.
//!
//! Hosts call [`setup_extensions`] once at startup so every run shares one
//! HTTP connection pool, and [`setup_extensions_with_variables`] when
//! `{{.VAR}}` placeholders should resolve from host-provided values as well
//! as the process environment.
//!
//! # Example
//!
//! ```ignore
//! let mut extensions = bento_engine::ExecutorExtensions::new();
//! bento_nodes::setup_extensions(&mut extensions);
//! let orchestrator = Orchestrator::new(registry).with_extensions(extensions);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bento_engine::{extension_keys, ExecutorExtensions};

/// Connect timeout for the shared HTTP client
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Install the shared `reqwest::Client`.
///
/// Falls back to a default client if the configured one cannot be built.
pub fn setup_extensions(extensions: &mut ExecutorExtensions) {
    let client = match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .user_agent(concat!("bento/", env!("CARGO_PKG_VERSION")))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            log::warn!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        }
    };
    extensions.set(extension_keys::HTTP_CLIENT, client);
}

/// Install the HTTP client plus host variables for placeholder resolution.
///
/// Variables are also consulted by preflight, so placeholders they satisfy
/// are not reported as missing environment variables.
pub fn setup_extensions_with_variables(
    extensions: &mut ExecutorExtensions,
    variables: HashMap<String, String>,
) {
    setup_extensions(extensions);
    log::info!("Installed {} host variable(s)", variables.len());
    extensions.set(extension_keys::VARIABLES, Arc::new(variables));
}
