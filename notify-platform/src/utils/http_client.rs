//! Outbound HTTP for the Bot API transports.

use std::sync::Once;
use std::time::Duration;

use tracing::debug;

static RUSTLS_PROVIDER: Once = Once::new();

/// Select aws-lc-rs as the process-wide rustls backend, once.
pub fn install_rustls_provider() {
    RUSTLS_PROVIDER.call_once(|| {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls provider was already selected elsewhere");
        }
    });
}

/// Client shared by the Telegram and WhatsApp transports. Every request is
/// bounded by `request_timeout`, which must be non-zero.
pub fn build_client(request_timeout: Duration) -> crate::Result<reqwest::Client> {
    if request_timeout.is_zero() {
        return Err(crate::Error::config("http client timeout must be non-zero"));
    }
    install_rustls_provider();

    reqwest::Client::builder()
        .user_agent(concat!("notify-platform/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(4)
        .timeout(request_timeout)
        .build()
        .map_err(|e| crate::Error::config(format!("http client: {e}")))
}
