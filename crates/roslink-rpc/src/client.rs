//! XML-RPC client over HTTP.

use roslink_types::RosError;

use crate::value::{RpcValue, decode_response, encode_request};

/// Thin client wrapper around a shared [`reqwest::Client`]. Cheap to clone;
/// clones share the connection pool.
#[derive(Debug, Clone, Default)]
pub struct RpcClient {
    http: reqwest::Client,
}

impl RpcClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue `method(params)` against the XML-RPC endpoint at `url` and
    /// return the single response value. Transport and document failures
    /// map to [`RosError::Rpc`]; declared faults to [`RosError::RpcFault`].
    pub async fn call(
        &self,
        url: &str,
        method: &str,
        params: &[RpcValue],
    ) -> Result<RpcValue, RosError> {
        let body = encode_request(method, params);
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| RosError::Rpc(format!("{method} to {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RosError::Rpc(format!(
                "{method} to {url}: http status {status}"
            )));
        }
        let text = response
            .text()
            .await
            .map_err(|e| RosError::Rpc(format!("{method} to {url}: {e}")))?;
        decode_response(&text)
    }
}
