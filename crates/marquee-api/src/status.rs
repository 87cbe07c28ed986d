// Device status endpoint
//
// Heartbeat pushes while the device is the active foreground session,
// plus the final best-effort offline push during logout.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;

use crate::client::SignageClient;
use crate::error::Error;
use crate::models::{Ack, DeviceStatus};

impl SignageClient {
    /// Report this device's online/offline status.
    ///
    /// `POST /api/v1/devices/status`
    ///
    /// The backend authenticates the push with the session credentials,
    /// so all four identity fields travel with it.
    #[allow(clippy::too_many_arguments)]
    pub async fn push_status(
        &self,
        device_id: &str,
        screen_name: &str,
        username: &str,
        password: &SecretString,
        status: DeviceStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<(), Error> {
        let url = self.api_url("devices/status")?;
        debug!(device_id, %status, "pushing device status");

        let body = json!({
            "deviceId": device_id,
            "screenName": screen_name,
            "username": username,
            "password": password.expose_secret(),
            "status": status.to_string(),
            "timestamp": timestamp,
        });

        let _: Ack = self.post(url, &body).await?;
        Ok(())
    }
}
