//! TLS connector construction.

use crate::config::TransportSecurity;
use crate::error::HttpError;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use std::sync::Arc;

/// Get the crypto provider for TLS connections.
///
/// Uses a globally installed default provider when the host application set
/// one, otherwise an aws-lc-rs provider that is not installed globally.
pub fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Build the HTTPS connector with webpki roots.
///
/// Plain `http://` is only accepted by the connector when the transport
/// allows insecure HTTP; ALPN advertises both h2 and http/1.1.
///
/// # Errors
///
/// Returns `HttpError::Tls` if the crypto provider cannot be configured.
pub fn build_https_connector(
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(crypto_provider())
        .map_err(|e| HttpError::Tls(Box::new(e)))?;

    let connector = if transport == TransportSecurity::AllowInsecureHttp {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
