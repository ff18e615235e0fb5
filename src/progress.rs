use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::player::{ChannelClient, CommandError, Connector};
use crate::presence::{PresenceStatus, SharedPresence, lock_presence};
use crate::sources::SourceKind;

pub const TICK: Duration = Duration::from_secs(5);

/// Asset key the presence app falls back to when a title has no poster.
const DEFAULT_IMAGE: &str = "anistream";

/// `MM:SS`, or `HH:MM:SS` from one hour on. Rounds to the nearest second.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

pub fn format_progress(position: f64, duration: f64) -> String {
    format!("{} / {}", format_time(position), format_time(duration))
}

/// One successful read of the player's state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub position: f64,
    pub duration: f64,
    pub paused: bool,
    /// 0.0 when the player didn't say
    pub speed: f64,
}

/// What is on screen, for presence.
#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub title: String,
    pub episode: Option<String>,
    pub poster_url: Option<String>,
    pub source: SourceKind,
}

impl NowPlaying {
    pub fn status_line(&self, observation: &Observation) -> String {
        let progress = format_progress(observation.position, observation.duration);
        let mut line = match &self.episode {
            Some(episode) => format!("{episode} ({progress})"),
            None => progress,
        };
        if observation.paused {
            line.push_str(" (Paused)");
        }
        if observation.speed > 0.0 && (observation.speed - 1.0).abs() > f64::EPSILON {
            line.push_str(&format!(" [{}x]", observation.speed));
        }
        line
    }

    pub fn status(&self, observation: &Observation) -> PresenceStatus {
        PresenceStatus {
            details: format!("Watching {}", self.title),
            state: self.status_line(observation),
            large_image: self
                .poster_url
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            large_text: self.title.clone(),
            small_image: self.source.name().to_string(),
        }
    }
}

/// Reads pause, duration and position, in that order.
///
/// `Ok(None)` while the player can't say how long the file is or where it
/// is in it, e.g. before the first frame or while tearing down.
pub async fn observe<C: Connector>(
    client: &ChannelClient<C>,
) -> Result<Option<Observation>, CommandError> {
    let paused = client.paused().await?;
    let Some(duration) = client.known_number("duration").await?.filter(|d| *d > 0.0) else {
        return Ok(None);
    };
    let Some(position) = client.known_number("time-pos").await?.filter(|p| *p >= 0.0) else {
        return Ok(None);
    };
    let speed = client.speed().await.unwrap_or(0.0);
    Ok(Some(Observation {
        position,
        duration,
        paused,
        speed,
    }))
}

/// Polls one playback session and forwards its status to presence.
///
/// There is no stop signal: the loop ends at the first tick that finds the
/// player gone, and the task resolves to the last thing it saw.
pub struct ProgressReporter<C: Connector> {
    client: ChannelClient<C>,
    presence: SharedPresence,
    now_playing: NowPlaying,
    period: Duration,
    latest: watch::Sender<Option<Observation>>,
}

impl<C: Connector> ProgressReporter<C> {
    pub fn new(client: ChannelClient<C>, presence: SharedPresence, now_playing: NowPlaying) -> Self {
        Self {
            client,
            presence,
            now_playing,
            period: TICK,
            latest: watch::Sender::new(None),
        }
    }

    /// Follows the most recent observation without waiting for the task.
    pub fn subscribe(&self) -> watch::Receiver<Option<Observation>> {
        self.latest.subscribe()
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn spawn(self) -> JoinHandle<Option<Observation>> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> Option<Observation> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = None;

        loop {
            ticker.tick().await;

            if !self.client.is_running().await {
                info!(title = %self.now_playing.title, "player gone, stopping progress reporter");
                break;
            }

            let observation = match observe(&self.client).await {
                Ok(Some(observation)) => observation,
                Ok(None) => {
                    debug!("playback position unknown, skipping progress tick");
                    continue;
                }
                Err(e) => {
                    debug!(error = %e, "skipping progress tick");
                    continue;
                }
            };
            last = Some(observation);
            self.latest.send_replace(last);

            let status = self.now_playing.status(&observation);
            if let Err(e) = lock_presence(&self.presence).update(&status) {
                warn!(error = %e, "presence update failed");
            }
        }

        if let Err(e) = lock_presence(&self.presence).clear() {
            debug!(error = %e, "failed to clear presence");
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::ipc::testing::{FakeConnector, Script, client};
    use crate::presence::{Presence, PresenceError, UpdateOutcome};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        updates: Arc<Mutex<Vec<PresenceStatus>>>,
        clears: Arc<Mutex<usize>>,
        fail: bool,
    }

    impl Presence for Recorder {
        fn update(&mut self, status: &PresenceStatus) -> Result<UpdateOutcome, PresenceError> {
            self.updates.lock().unwrap().push(status.clone());
            if self.fail {
                Err(PresenceError::Publish("offline".to_string()))
            } else {
                Ok(UpdateOutcome::Published)
            }
        }

        fn clear(&mut self) -> Result<(), PresenceError> {
            *self.clears.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn now_playing() -> NowPlaying {
        NowPlaying {
            title: "Frieren".to_string(),
            episode: Some("Episode 3".to_string()),
            poster_url: None,
            source: SourceKind::Animecix,
        }
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "00:00");
        assert_eq!(format_time(59.4), "00:59");
        assert_eq!(format_time(59.6), "01:00");
        assert_eq!(format_time(1200.0), "20:00");
        assert_eq!(format_time(3725.2), "01:02:05");
        assert_eq!(format_time(-3.0), "00:00");
        assert_eq!(format_time(f64::NAN), "00:00");
    }

    #[test]
    fn test_status_line() {
        let np = now_playing();
        let mut obs = Observation {
            position: 300.0,
            duration: 1200.0,
            paused: false,
            speed: 1.0,
        };
        assert_eq!(np.status_line(&obs), "Episode 3 (05:00 / 20:00)");

        obs.paused = true;
        obs.speed = 1.5;
        assert_eq!(np.status_line(&obs), "Episode 3 (05:00 / 20:00) (Paused) [1.5x]");

        let status = np.status(&obs);
        assert_eq!(status.details, "Watching Frieren");
        assert_eq!(status.large_image, "anistream");
        assert_eq!(status.small_image, "animecix");
    }

    #[tokio::test]
    async fn test_duration_then_position_formats() {
        let connector = FakeConnector::new([
            Script::Reply(r#"{"data":1200.0,"error":"success"}"#.to_string()),
            Script::Reply(r#"{"data":300.0,"error":"success"}"#.to_string()),
        ]);
        let c = client(connector);

        let duration = c.duration().await.unwrap();
        let position = c.time_pos().await.unwrap();
        assert_eq!(format_progress(position, duration), "05:00 / 20:00");
    }

    #[tokio::test]
    async fn test_reporter_stops_when_player_exits() {
        let connector = FakeConnector::new(
            std::iter::repeat_n(
                Script::Reply(r#"{"data":42.0,"error":"success"}"#.to_string()),
                10,
            )
            .chain([Script::Refuse(std::io::ErrorKind::ConnectionRefused)]),
        );
        let recorder = Recorder::default();
        let updates = recorder.updates.clone();
        let clears = recorder.clears.clone();
        let presence: SharedPresence = Arc::new(Mutex::new(Box::new(recorder)));

        let reporter = ProgressReporter::new(client(connector.clone()), presence, now_playing())
            .with_period(Duration::from_millis(20));
        let latest = reporter.subscribe();
        let handle = reporter.spawn();

        let last = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reporter did not stop")
            .unwrap();

        // two full ticks of five reads each, then the liveness probe fails
        assert_eq!(updates.lock().unwrap().len(), 2);
        assert_eq!(*clears.lock().unwrap(), 1);
        assert_eq!(last.map(|o| o.position), Some(42.0));
        assert_eq!(*latest.borrow(), last);

        let connects = connector.connect_count();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(connector.connect_count(), connects);
    }

    #[tokio::test]
    async fn test_presence_failure_keeps_polling() {
        let connector = FakeConnector::new(
            std::iter::repeat_n(
                Script::Reply(r#"{"data":10.0,"error":"success"}"#.to_string()),
                15,
            )
            .chain([Script::Refuse(std::io::ErrorKind::NotFound)]),
        );
        let recorder = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let updates = recorder.updates.clone();
        let presence: SharedPresence = Arc::new(Mutex::new(Box::new(recorder)));

        let handle = ProgressReporter::new(client(connector), presence, now_playing())
            .with_period(Duration::from_millis(10))
            .spawn();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reporter did not stop")
            .unwrap();

        assert_eq!(updates.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_position_is_not_reported() {
        // liveness ok, not paused, then nothing is known yet
        let connector = FakeConnector::new([
            Script::Reply(r#"{"data":4242,"error":"success"}"#.to_string()),
            Script::Reply(r#"{"data":false,"error":"success"}"#.to_string()),
            Script::Reply(r#"{"data":1440.0,"error":"success"}"#.to_string()),
            Script::Reply(r#"{"error":"property unavailable"}"#.to_string()),
            Script::Refuse(std::io::ErrorKind::ConnectionRefused),
        ]);
        let recorder = Recorder::default();
        let updates = recorder.updates.clone();
        let presence: SharedPresence = Arc::new(Mutex::new(Box::new(recorder)));

        let reporter = ProgressReporter::new(client(connector), presence, now_playing())
            .with_period(Duration::from_millis(10));
        let latest = reporter.subscribe();
        let last = reporter.run().await;

        assert!(last.is_none());
        assert!(latest.borrow().is_none());
        assert!(updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_duration_is_not_reported() {
        let connector = FakeConnector::new([
            Script::Reply(r#"{"data":false,"error":"success"}"#.to_string()),
            Script::Reply(r#"{"error":"property unavailable"}"#.to_string()),
        ]);
        let observed = observe(&client(connector.clone())).await.unwrap();
        assert!(observed.is_none());
        // no time-pos read once the duration is unknown
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_read_skips_tick() {
        // liveness ok, then pause read hits a hang-up on every retry
        let connector = FakeConnector::new([
            Script::Reply(r#"{"data":1,"error":"success"}"#.to_string()),
            Script::HangUp,
            Script::HangUp,
            Script::HangUp,
            Script::Refuse(std::io::ErrorKind::ConnectionRefused),
        ]);
        let recorder = Recorder::default();
        let updates = recorder.updates.clone();
        let presence: SharedPresence = Arc::new(Mutex::new(Box::new(recorder)));

        let last = ProgressReporter::new(client(connector), presence, now_playing())
            .with_period(Duration::from_millis(10))
            .run()
            .await;

        assert!(last.is_none());
        assert!(updates.lock().unwrap().is_empty());
    }
}
