// Authentication endpoints
//
// Direct login, pairing-code generation/polling, and backend-side
// auth invalidation on logout.

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;

use crate::client::SignageClient;
use crate::error::Error;
use crate::models::{Ack, PairingCodeGrant, PairingPoll};

impl SignageClient {
    /// Log a device in with explicit credentials.
    ///
    /// `POST /api/v1/auth/login`
    ///
    /// A backend rejection surfaces as [`Error::Authentication`] with
    /// the backend's error string verbatim.
    pub async fn login(
        &self,
        device_id: &str,
        username: &str,
        password: &SecretString,
        screen_name: &str,
    ) -> Result<(), Error> {
        let url = self.api_url("auth/login")?;
        debug!(device_id, username, "logging in");

        let body = json!({
            "deviceId": device_id,
            "username": username,
            "password": password.expose_secret(),
            "screenName": screen_name,
        });

        match self.post::<Ack>(url, &body).await {
            Ok(_) => Ok(()),
            // The login envelope's `success: false` is a credential
            // rejection, not a generic backend fault.
            Err(Error::Backend { message }) => Err(Error::Authentication { message }),
            Err(e) => Err(e),
        }
    }

    /// Request a device-bound pairing code.
    ///
    /// `POST /api/v1/pairing/generate`
    ///
    /// Generating a new code invalidates any previous outstanding code
    /// for this device server-side.
    pub async fn generate_pairing_code(
        &self,
        device_id: &str,
        device_info: Option<&str>,
    ) -> Result<PairingCodeGrant, Error> {
        let url = self.api_url("pairing/generate")?;
        debug!(device_id, "generating pairing code");

        let body = json!({
            "deviceId": device_id,
            "deviceInfo": device_info,
        });

        self.post(url, &body).await
    }

    /// Ask whether this device's outstanding pairing code has been
    /// claimed by a companion client.
    ///
    /// `POST /api/v1/pairing/poll`
    pub async fn poll_pairing(&self, device_id: &str) -> Result<PairingPoll, Error> {
        let url = self.api_url("pairing/poll")?;
        let body = json!({ "deviceId": device_id });
        self.post(url, &body).await
    }

    /// Invalidate this device's authentication backend-side.
    ///
    /// `POST /api/v1/auth/clear`
    ///
    /// Single attempt; the caller owns the logout-time retry policy.
    pub async fn clear_device_auth(&self, device_id: &str) -> Result<(), Error> {
        let url = self.api_url("auth/clear")?;
        debug!(device_id, "clearing device auth");
        let _: Ack = self.post(url, &json!({ "deviceId": device_id })).await?;
        Ok(())
    }
}
