use discord_rich_presence::{DiscordIpc, DiscordIpcClient, activity};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{PresenceError, PresenceLink, PresenceStatus};

/// Discord Rich Presence over the local Discord IPC socket.
pub struct DiscordLink {
    client: DiscordIpcClient,
    started: i64,
}

fn get_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl PresenceLink for DiscordLink {
    fn open(app_id: &str) -> Result<Self, PresenceError> {
        if app_id.is_empty() {
            return Err(PresenceError::Login("no Discord application id".to_string()));
        }

        let mut client = DiscordIpcClient::new(app_id);
        client.connect().map_err(|e| {
            tracing::debug!(error = %e, "discord: failed to connect (Discord may not be running)");
            PresenceError::Login(e.to_string())
        })?;
        tracing::info!("discord: connected to Discord IPC");

        Ok(Self {
            client,
            started: get_timestamp(),
        })
    }

    fn publish(&mut self, status: &PresenceStatus) -> Result<(), PresenceError> {
        tracing::debug!(state = %status.state, "discord: setting activity");

        let activity = activity::Activity::new()
            .details(&status.details)
            .state(&status.state)
            .timestamps(activity::Timestamps::new().start(self.started))
            .assets(
                activity::Assets::new()
                    .large_image(&status.large_image)
                    .large_text(&status.large_text)
                    .small_image(&status.small_image),
            );

        self.client
            .set_activity(activity)
            .map_err(|e| PresenceError::Publish(e.to_string()))
    }

    fn clear(&mut self) -> Result<(), PresenceError> {
        tracing::debug!("discord: clearing activity");
        self.client
            .clear_activity()
            .map_err(|e| PresenceError::Publish(e.to_string()))
    }

    fn close(mut self) {
        let _ = self.client.close();
    }
}
