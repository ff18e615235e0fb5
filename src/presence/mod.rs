pub mod discord;

pub use discord::DiscordLink;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("presence login failed: {0}")]
    Login(String),
    #[error("presence update failed: {0}")]
    Publish(String),
}

/// Everything a "now watching" card shows.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceStatus {
    pub details: String,
    pub state: String,
    pub large_image: String,
    pub large_text: String,
    pub small_image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Published,
    /// Published after the session was dropped and logged in again.
    Relogged,
    Disabled,
}

pub trait Presence {
    fn update(&mut self, status: &PresenceStatus) -> Result<UpdateOutcome, PresenceError>;
    fn clear(&mut self) -> Result<(), PresenceError>;
}

pub type SharedPresence = Arc<Mutex<Box<dyn Presence + Send>>>;

pub fn shared(presence: impl Presence + Send + 'static) -> SharedPresence {
    Arc::new(Mutex::new(Box::new(presence)))
}

pub fn lock_presence(presence: &SharedPresence) -> MutexGuard<'_, Box<dyn Presence + Send>> {
    presence.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A logged-in connection to a presence service.
pub trait PresenceLink: Sized {
    fn open(app_id: &str) -> Result<Self, PresenceError>;
    fn publish(&mut self, status: &PresenceStatus) -> Result<(), PresenceError>;
    fn clear(&mut self) -> Result<(), PresenceError>;
    fn close(self);
}

/// Presence backed by a link that is opened lazily and replaced after a failure.
///
/// A failed publish drops the link, opens a new one, and tries once more.
pub struct RichPresence<L: PresenceLink> {
    app_id: String,
    session: Option<L>,
}

impl<L: PresenceLink> RichPresence<L> {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            session: None,
        }
    }

    fn login(&self) -> Result<L, PresenceError> {
        let link = L::open(&self.app_id)?;
        info!("presence: logged in");
        Ok(link)
    }
}

impl<L: PresenceLink> Presence for RichPresence<L> {
    fn update(&mut self, status: &PresenceStatus) -> Result<UpdateOutcome, PresenceError> {
        let (mut link, fresh) = match self.session.take() {
            Some(link) => (link, false),
            None => (self.login()?, true),
        };

        match link.publish(status) {
            Ok(()) => {
                self.session = Some(link);
                return Ok(UpdateOutcome::Published);
            }
            Err(e) if fresh => return Err(e),
            Err(e) => {
                warn!(error = %e, "presence: update failed, logging in again");
                link.close();
            }
        }

        let mut link = self.login()?;
        link.publish(status)?;
        self.session = Some(link);
        Ok(UpdateOutcome::Relogged)
    }

    fn clear(&mut self) -> Result<(), PresenceError> {
        match self.session.as_mut() {
            Some(link) => link.clear(),
            None => Ok(()),
        }
    }
}

impl<L: PresenceLink> Drop for RichPresence<L> {
    fn drop(&mut self) {
        if let Some(link) = self.session.take() {
            link.close();
            debug!("presence: disconnected");
        }
    }
}

/// Used when presence is turned off.
#[derive(Debug, Default)]
pub struct NoPresence;

impl Presence for NoPresence {
    fn update(&mut self, _status: &PresenceStatus) -> Result<UpdateOutcome, PresenceError> {
        Ok(UpdateOutcome::Disabled)
    }

    fn clear(&mut self) -> Result<(), PresenceError> {
        Ok(())
    }
}
