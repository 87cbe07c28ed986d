// Command delivery endpoints
//
// Polling fallback for command delivery and execution-status reporting.

use serde_json::json;
use tracing::debug;

use crate::client::SignageClient;
use crate::error::Error;
use crate::models::{Ack, Command, CommandBatch, CommandStatus};

impl SignageClient {
    /// Fetch commands currently pending for this device.
    ///
    /// `POST /api/v1/commands/poll`
    ///
    /// The backend may return commands in any status; filtering to
    /// `pending` is the dispatcher's job (stale poll results are safe
    /// to reprocess).
    pub async fn poll_commands(&self, device_id: &str) -> Result<Vec<Command>, Error> {
        let url = self.api_url("commands/poll")?;
        let batch: CommandBatch = self.post(url, &json!({ "deviceId": device_id })).await?;
        Ok(batch.commands)
    }

    /// Report a command's execution status back to the backend.
    ///
    /// `POST /api/v1/commands/ack`
    pub async fn ack_command(
        &self,
        command_id: &str,
        status: CommandStatus,
        error_message: Option<&str>,
    ) -> Result<(), Error> {
        let url = self.api_url("commands/ack")?;
        debug!(command_id, %status, "acking command");

        let body = json!({
            "commandId": command_id,
            "status": status.to_string(),
            "errorMessage": error_message,
        });

        let _: Ack = self.post(url, &body).await?;
        Ok(())
    }
}
