//! Request headers for JSON-RPC endpoints, including optional HTTP basic
//! credentials for self-hosted nodes.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use jsonrpsee::http_client::{HeaderMap, HeaderValue};

/// Basic credentials attached to every request sent to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCredentials {
    pub user: String,
    pub password: String,
}

pub(crate) fn build_rpc_headers(credentials: Option<&RpcCredentials>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(credentials) = credentials {
        let encoded = BASE64_STANDARD.encode(format!(
            "{}:{}",
            credentials.user, credentials.password
        ));
        let value = HeaderValue::from_str(&format!("Basic {encoded}"))
            .context("failed to build Authorization header")?;
        headers.insert("Authorization", value);
    }
    Ok(headers)
}
