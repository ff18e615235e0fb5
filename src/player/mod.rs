pub mod ipc;

pub use ipc::{ChannelAddress, ChannelClient, CommandError, Connector, IpcConnector, RetryPolicy};

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::PlayerConfig;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("'{0}' not found in PATH. Is the player installed?")]
    NotInstalled(String),
    #[error("failed to launch player '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("player control channel not ready after {attempts} attempts")]
    ChannelNotReady { attempts: u32 },
}

/// Lifecycle of one player process as seen through its control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Launching,
    AwaitingChannel,
    Ready,
    Active,
    Paused,
    Terminated,
    Failed,
}

impl SessionState {
    pub fn allows(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (NotStarted, Launching)
                | (Launching, AwaitingChannel)
                | (Launching, Failed)
                | (AwaitingChannel, Ready)
                | (AwaitingChannel, Failed)
                | (Ready, Active)
                | (Ready, Paused)
                | (Active, Paused)
                | (Paused, Active)
                | (Ready | Active | Paused, Terminated)
        ) || (self == next && matches!(self, Active | Paused))
    }
}

/// What to play.
#[derive(Debug, Clone)]
pub struct MediaRequest {
    pub url: String,
    pub subtitle_url: Option<String>,
    pub title: String,
}

/// Full argument list for one launch. Subtitles only when non-empty.
pub fn player_args(
    config: &PlayerConfig,
    media: &MediaRequest,
    address: &ChannelAddress,
) -> Vec<String> {
    let mut args = vec![
        "--fullscreen".to_string(),
        format!("--user-agent={}", config.user_agent),
        format!("--referrer={}", config.referrer),
        "--save-position-on-quit".to_string(),
        format!("--title={}", media.title),
        format!("--force-media-title={}", media.title),
        "--idle=once".to_string(),
        "--really-quiet".to_string(),
        "--no-terminal".to_string(),
        format!("--input-ipc-server={}", address),
    ];
    args.extend(config.args.iter().cloned());

    if let Some(sub) = media.subtitle_url.as_deref().filter(|s| !s.is_empty()) {
        args.push("--sub-file".to_string());
        args.push(sub.to_string());
    }

    args.push(media.url.clone());
    args
}

/// Launches players and hands back a session once the channel answers.
pub struct Player<C: Connector = IpcConnector> {
    config: PlayerConfig,
    connector: C,
    readiness: RetryPolicy,
}

impl Player<IpcConnector> {
    pub fn new(config: PlayerConfig) -> Self {
        Self::with_connector(config, IpcConnector)
    }
}

impl<C: Connector> Player<C> {
    pub const READINESS: RetryPolicy = RetryPolicy {
        attempts: 25,
        delay: Duration::from_millis(300),
    };

    pub fn with_connector(config: PlayerConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            readiness: Self::READINESS,
        }
    }

    pub fn with_readiness(mut self, readiness: RetryPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn command(&self) -> &str {
        &self.config.command
    }

    /// Starts the player and waits for its control channel.
    ///
    /// On `ChannelNotReady` the process is left running; only the handle is
    /// dropped.
    pub async fn launch(&self, media: &MediaRequest) -> Result<PlaybackSession<C>, PlayerError> {
        let mut state = SessionState::NotStarted;
        let mut advance = |next: SessionState| {
            debug_assert!(state.allows(next), "{state:?} -> {next:?}");
            debug!(from = ?state, to = ?next, "player session");
            state = next;
        };

        advance(SessionState::Launching);
        let command = &self.config.command;
        if let Err(e) = which::which(command) {
            debug!(command = %command, error = %e, "player lookup failed");
            advance(SessionState::Failed);
            return Err(PlayerError::NotInstalled(command.clone()));
        }

        let address = ChannelAddress::unique();
        let args = player_args(&self.config, media, &address);
        info!(command = %command, title = %media.title, address = %address, "launching player");

        let child = Command::new(command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| PlayerError::Spawn {
                command: command.clone(),
                source,
            });
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                advance(SessionState::Failed);
                return Err(e);
            }
        };
        advance(SessionState::AwaitingChannel);

        let client = ChannelClient::new(self.connector.clone(), address);
        for attempt in 1..=self.readiness.attempts {
            sleep(self.readiness.delay).await;
            match client.probe().await {
                Ok(()) => {
                    advance(SessionState::Ready);
                    info!(attempt, "player control channel ready");
                    return Ok(PlaybackSession {
                        child,
                        client,
                        state: SessionState::Ready,
                    });
                }
                Err(e) => debug!(attempt, error = %e, "control channel not ready"),
            }
        }

        advance(SessionState::Failed);
        warn!(
            pid = child.id(),
            attempts = self.readiness.attempts,
            "player started but control channel never came up"
        );
        Err(PlayerError::ChannelNotReady {
            attempts: self.readiness.attempts,
        })
    }
}

/// A running player with a ready control channel.
pub struct PlaybackSession<C: Connector = IpcConnector> {
    child: Child,
    client: ChannelClient<C>,
    state: SessionState,
}

impl<C: Connector> PlaybackSession<C> {
    pub fn client(&self) -> &ChannelClient<C> {
        &self.client
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "player session");
        }
        self.state = next;
    }

    /// Moves between Active and Paused as the player reports its pause flag.
    pub fn follow_pause(&mut self, paused: bool) {
        let next = if paused {
            SessionState::Paused
        } else {
            SessionState::Active
        };
        if self.state.allows(next) {
            self.set_state(next);
        }
    }

    /// Blocks until the player exits.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await;
        self.set_state(SessionState::Terminated);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::ipc::testing::{FakeConnector, Script};
    use super::*;

    fn media(subtitle: Option<&str>) -> MediaRequest {
        MediaRequest {
            url: "https://cdn.example/ep1.mp4".to_string(),
            subtitle_url: subtitle.map(str::to_string),
            title: "Frieren - Episode 1".to_string(),
        }
    }

    fn fast_readiness() -> RetryPolicy {
        RetryPolicy {
            attempts: 4,
            delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_player_args() {
        let config = PlayerConfig {
            args: vec!["--volume=40".to_string()],
            ..PlayerConfig::default()
        };
        let address = ChannelAddress::new("/tmp/anistream-mpv-1-0.sock");
        let args = player_args(&config, &media(Some("https://cdn.example/tr.vtt")), &address);

        assert_eq!(args[0], "--fullscreen");
        assert!(args.contains(&"--referrer=https://yeshi.eu.org/".to_string()));
        assert!(args.contains(&"--save-position-on-quit".to_string()));
        assert!(args.contains(&"--force-media-title=Frieren - Episode 1".to_string()));
        assert!(args.contains(&"--input-ipc-server=/tmp/anistream-mpv-1-0.sock".to_string()));
        assert!(args.contains(&"--volume=40".to_string()));

        let n = args.len();
        assert_eq!(args[n - 3], "--sub-file");
        assert_eq!(args[n - 2], "https://cdn.example/tr.vtt");
        assert_eq!(args[n - 1], "https://cdn.example/ep1.mp4");
    }

    #[test]
    fn test_empty_subtitle_is_skipped() {
        let address = ChannelAddress::new("/tmp/x.sock");
        let args = player_args(&PlayerConfig::default(), &media(Some("")), &address);
        assert!(!args.iter().any(|a| a == "--sub-file"));
        let args = player_args(&PlayerConfig::default(), &media(None), &address);
        assert!(!args.iter().any(|a| a == "--sub-file"));
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(NotStarted.allows(Launching));
        assert!(AwaitingChannel.allows(Failed));
        assert!(Active.allows(Paused));
        assert!(Paused.allows(Active));
        assert!(Paused.allows(Terminated));
        assert!(!Ready.allows(Failed));
        assert!(!Terminated.allows(Active));
        assert!(!NotStarted.allows(Ready));
    }

    #[tokio::test]
    async fn test_missing_player() {
        let config = PlayerConfig {
            command: "anistream-no-such-player-binary".to_string(),
            ..PlayerConfig::default()
        };
        let connector = FakeConnector::refusing();
        let player = Player::with_connector(config, connector.clone());

        let err = player.launch(&media(None)).await.err().unwrap();
        assert!(matches!(err, PlayerError::NotInstalled(cmd) if cmd == "anistream-no-such-player-binary"));
        assert_eq!(connector.connect_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_channel_never_ready() {
        let config = PlayerConfig {
            command: "true".to_string(),
            ..PlayerConfig::default()
        };
        let connector = FakeConnector::refusing();
        let player =
            Player::with_connector(config, connector.clone()).with_readiness(fast_readiness());

        let err = player.launch(&media(None)).await.err().unwrap();
        assert!(matches!(err, PlayerError::ChannelNotReady { attempts: 4 }));
        assert_eq!(connector.connect_count(), 4);

        sleep(Duration::from_millis(30)).await;
        assert_eq!(connector.connect_count(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ready_after_retries() {
        let config = PlayerConfig {
            command: "true".to_string(),
            ..PlayerConfig::default()
        };
        let connector = FakeConnector::new([
            Script::Refuse(std::io::ErrorKind::NotFound),
            Script::Refuse(std::io::ErrorKind::ConnectionRefused),
            Script::HangUp,
        ]);
        let player =
            Player::with_connector(config, connector.clone()).with_readiness(fast_readiness());

        let mut session = player.launch(&media(None)).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(connector.connect_count(), 3);

        session.wait().await.unwrap();
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_follow_pause() {
        let config = PlayerConfig {
            command: "true".to_string(),
            ..PlayerConfig::default()
        };
        let player = Player::with_connector(config, FakeConnector::new([Script::HangUp]))
            .with_readiness(fast_readiness());
        let mut session = player.launch(&media(None)).await.unwrap();

        session.follow_pause(true);
        assert_eq!(session.state(), SessionState::Paused);
        session.follow_pause(false);
        assert_eq!(session.state(), SessionState::Active);

        session.wait().await.unwrap();
        session.follow_pause(true);
        assert_eq!(session.state(), SessionState::Terminated);
    }
}
