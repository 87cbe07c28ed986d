// Signage backend HTTP client
//
// Wraps `reqwest::Client` with URL construction, `{success, error}`
// envelope unwrapping, and status-code mapping. All endpoint groups
// (auth, status, commands) are implemented as inherent methods via
// separate files to keep this module focused on transport mechanics.

use secrecy::SecretString;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::Ack;
use crate::transport::TransportConfig;

/// Raw HTTP client for the signage backend.
///
/// Handles the `{ success, error?, ... }` envelope: every response is
/// checked for `success: false` before the payload is deserialized, so
/// callers only ever see unwrapped data or a typed error.
pub struct SignageClient {
    http: reqwest::Client,
    base_url: Url,
}

impl SignageClient {
    /// Create a new client from a [`TransportConfig`].
    ///
    /// The `base_url` should be the backend root (e.g.
    /// `https://signage.example.com`). If an API key is provided it is
    /// attached to every request.
    pub fn new(
        base_url: Url,
        api_key: Option<&SecretString>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client(api_key)?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    ///
    /// Useful in tests where the mock server's URL and a plain client
    /// are all that is needed.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
        })
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL for an API path: `{base}/api/v1/{path}`
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/api/v1/{path}"))?)
    }

    /// Build the push subscription URL for a device, swapping the
    /// scheme to `ws`/`wss`.
    pub fn push_url(&self, device_id: &str) -> Result<Url, Error> {
        let mut url = self.api_url(&format!("devices/{device_id}/commands/subscribe"))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::PushConnect("cannot derive ws scheme from base URL".into()))?;
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a POST request and unwrap the acknowledgement envelope.
    ///
    /// `T` is deserialized from the same body once `success` is
    /// confirmed, so payload fields sit next to the envelope fields.
    pub(crate) async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        self.parse_envelope(resp).await
    }

    /// Parse the `{success, error?}` envelope, returning the typed
    /// payload on success or a typed error otherwise.
    async fn parse_envelope<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            let body = resp.text().await.unwrap_or_default();
            let message = extract_error(&body)
                .unwrap_or_else(|| "request rejected by backend".into());
            return Err(Error::Authentication { message });
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                message: body[..body.len().min(200)].to_owned(),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;

        let ack: Ack = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.clone(),
        })?;

        if !ack.success {
            return Err(Error::Backend {
                message: ack.error.unwrap_or_else(|| "unspecified backend error".into()),
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            let preview = &body[..body.len().min(200)];
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }
}

/// Best-effort extraction of the `error` field from a raw body.
fn extract_error(body: &str) -> Option<String> {
    serde_json::from_str::<Ack>(body).ok()?.error
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SignageClient {
        SignageClient::from_reqwest("https://backend.example", reqwest::Client::new())
            .expect("valid url")
    }

    #[test]
    fn api_url_joins_path() {
        let url = client().api_url("auth/login").expect("valid path");
        assert_eq!(url.as_str(), "https://backend.example/api/v1/auth/login");
    }

    #[test]
    fn push_url_swaps_scheme() {
        let url = client().push_url("dev-1").expect("valid path");
        assert_eq!(
            url.as_str(),
            "wss://backend.example/api/v1/devices/dev-1/commands/subscribe"
        );
    }
}
