//! Menu-driven browsing: source, search, title, episode, play.
//!
//! Screens and their transitions are plain data. [`transition`] decides where a
//! choice leads; [`Navigator`] only gathers choices and does the work behind
//! them. Backing out of a menu never ends the program; only a confirmed exit does.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::download::{Downloader, episode_path};
use crate::history::WatchHistory;
use crate::menu::Menu;
use crate::models::{ContentType, NavigationState, Title};
use crate::player::{Connector, MediaRequest, Player};
use crate::presence::{SharedPresence, lock_presence};
use crate::progress::{NowPlaying, ProgressReporter, TICK, format_time};
use crate::resolver::{self, ResolveError};
use crate::sources::Source;

#[derive(Error, Debug)]
pub enum NavError {
    #[error("terminal error: {0}")]
    Io(#[from] io::Error),
}

/// Screens a confirmation can return to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    SourceSelect,
    Search,
    TitleSelect,
    EpisodeBrowse,
    Recovery,
}

impl From<Origin> for Screen {
    fn from(origin: Origin) -> Self {
        match origin {
            Origin::SourceSelect => Screen::SourceSelect,
            Origin::Search => Screen::Search,
            Origin::TitleSelect => Screen::TitleSelect,
            Origin::EpisodeBrowse => Screen::EpisodeBrowse,
            Origin::Recovery => Screen::Recovery,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    SourceSelect,
    Search,
    TitleSelect,
    EpisodeBrowse,
    ConfirmSwitch { back: Origin },
    ConfirmExit { back: Origin },
    Recovery,
    Exit,
}

impl Screen {
    fn origin(self) -> Option<Origin> {
        match self {
            Screen::SourceSelect => Some(Origin::SourceSelect),
            Screen::Search => Some(Origin::Search),
            Screen::TitleSelect => Some(Origin::TitleSelect),
            Screen::EpisodeBrowse => Some(Origin::EpisodeBrowse),
            Screen::Recovery => Some(Origin::Recovery),
            _ => None,
        }
    }
}

/// What the user did on a screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Cancelled,
    SourcePicked,
    QuerySubmitted,
    NoResults,
    TitlePicked,
    /// An action that keeps the user on the same screen
    Handled,
    NewSearch,
    ChangeSource,
    ExitRequested,
    Confirmed(bool),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Stay,
    Go(Screen),
    Exit,
}

/// Where `choice` on `screen` leads.
pub fn transition(screen: Screen, choice: Choice) -> Step {
    use Choice::*;

    let confirm_switch = |s: Screen| {
        s.origin()
            .map(|back| Step::Go(Screen::ConfirmSwitch { back }))
            .unwrap_or(Step::Stay)
    };
    let confirm_exit = |s: Screen| {
        s.origin()
            .map(|back| Step::Go(Screen::ConfirmExit { back }))
            .unwrap_or(Step::Stay)
    };

    match (screen, choice) {
        (Screen::Exit, _) => Step::Exit,

        (Screen::ConfirmExit { .. }, Confirmed(true)) => Step::Exit,
        (Screen::ConfirmExit { back }, Confirmed(false) | Cancelled) => Step::Go(back.into()),
        (Screen::ConfirmSwitch { .. }, Confirmed(true)) => Step::Go(Screen::SourceSelect),
        (Screen::ConfirmSwitch { back }, Confirmed(false) | Cancelled) => Step::Go(back.into()),
        (Screen::ConfirmExit { .. } | Screen::ConfirmSwitch { .. }, _) => Step::Stay,

        (s, ExitRequested) => confirm_exit(s),
        (Screen::SourceSelect, ChangeSource) => Step::Stay,
        (s, ChangeSource) => confirm_switch(s),
        (Screen::Recovery, Failed) => Step::Stay,
        (_, Failed) => Step::Go(Screen::Recovery),

        (Screen::SourceSelect, SourcePicked) => Step::Go(Screen::Search),
        (Screen::SourceSelect, _) => Step::Stay,

        (Screen::Search, QuerySubmitted) => Step::Go(Screen::TitleSelect),
        (Screen::Search, Cancelled) => Step::Go(Screen::SourceSelect),
        (Screen::Search, _) => Step::Stay,

        (Screen::TitleSelect, TitlePicked) => Step::Go(Screen::EpisodeBrowse),
        (Screen::TitleSelect, Cancelled | NewSearch) => Step::Go(Screen::Search),
        (Screen::TitleSelect, _) => Step::Stay,

        (Screen::EpisodeBrowse, Cancelled) => Step::Go(Screen::TitleSelect),
        (Screen::EpisodeBrowse, NewSearch) => Step::Go(Screen::Search),
        (Screen::EpisodeBrowse, _) => Step::Stay,

        (Screen::Recovery, NewSearch | Cancelled) => Step::Go(Screen::Search),
        (Screen::Recovery, _) => Step::Stay,
    }
}

/// Entries of the episode menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseAction {
    Play,
    Next,
    Previous,
    PickEpisode,
    PickResolution,
    PickFansub,
    Download,
    NewSearch,
    ChangeSource,
    Exit,
}

impl BrowseAction {
    pub fn label(self) -> &'static str {
        match self {
            BrowseAction::Play => "Play",
            BrowseAction::Next => "Next episode",
            BrowseAction::Previous => "Previous episode",
            BrowseAction::PickEpisode => "Pick episode",
            BrowseAction::PickResolution => "Pick resolution",
            BrowseAction::PickFansub => "Pick fansub",
            BrowseAction::Download => "Download episodes",
            BrowseAction::NewSearch => "New search",
            BrowseAction::ChangeSource => "Change source",
            BrowseAction::Exit => "Exit",
        }
    }
}

/// Menu entries for a title. Movies only play; fansubs only where the source has them.
pub fn browse_actions(is_movie: bool, slug_based: bool) -> Vec<BrowseAction> {
    use BrowseAction::*;
    let mut actions = vec![Play];
    if !is_movie {
        actions.extend([Next, Previous, PickEpisode]);
    }
    actions.push(PickResolution);
    if !is_movie && slug_based {
        actions.push(PickFansub);
    }
    if !is_movie {
        actions.push(Download);
    }
    actions.extend([NewSearch, ChangeSource, Exit]);
    actions
}

/// How long past one tick the reporter gets to notice the player is gone.
const REPORTER_GRACE: Duration = Duration::from_secs(2);

const RECOVERY_ITEMS: [&str; 3] = ["Try another title", "Change source", "Exit"];

/// Drives the screens for one terminal session.
pub struct Navigator<S: Source, M: Menu, C: Connector> {
    sources: Vec<S>,
    menu: M,
    player: Player<C>,
    presence: SharedPresence,
    history: WatchHistory,
    downloader: Downloader,
    download_dir: std::path::PathBuf,
    current: usize,
    titles: Vec<Title>,
    nav: Option<NavigationState>,
    last_error: Option<String>,
    progress_period: Duration,
}

impl<S: Source, M: Menu, C: Connector> Navigator<S, M, C> {
    pub fn new(
        sources: Vec<S>,
        menu: M,
        player: Player<C>,
        presence: SharedPresence,
        history: WatchHistory,
        downloader: Downloader,
        download_dir: std::path::PathBuf,
    ) -> Self {
        Self {
            sources,
            menu,
            player,
            presence,
            history,
            downloader,
            download_dir,
            current: 0,
            titles: Vec::new(),
            nav: None,
            last_error: None,
            progress_period: TICK,
        }
    }

    pub fn with_progress_period(mut self, period: Duration) -> Self {
        self.progress_period = period;
        self
    }

    pub fn state(&self) -> Option<&NavigationState> {
        self.nav.as_ref()
    }

    pub fn menu(&self) -> &M {
        &self.menu
    }

    fn source(&self) -> &S {
        &self.sources[self.current]
    }

    pub async fn run(&mut self) -> Result<(), NavError> {
        self.run_from(Screen::SourceSelect).await
    }

    pub async fn run_from(&mut self, mut screen: Screen) -> Result<(), NavError> {
        loop {
            let choice = match screen {
                Screen::SourceSelect => self.source_select()?,
                Screen::Search => self.search().await?,
                Screen::TitleSelect => self.title_select().await?,
                Screen::EpisodeBrowse => self.episode_browse().await?,
                Screen::ConfirmSwitch { .. } => {
                    self.confirm("Switch source? The current selection will be lost.")?
                }
                Screen::ConfirmExit { .. } => self.confirm("Exit anistream?")?,
                Screen::Recovery => self.recovery()?,
                Screen::Exit => return Ok(()),
            };

            match transition(screen, choice) {
                Step::Stay => {}
                Step::Go(next) => {
                    debug!(from = ?screen, to = ?next, ?choice, "screen change");
                    if matches!(next, Screen::Search | Screen::SourceSelect | Screen::TitleSelect) {
                        self.nav = None;
                    }
                    screen = next;
                }
                Step::Exit => {
                    info!("exit confirmed");
                    return Ok(());
                }
            }
        }
    }

    fn source_select(&mut self) -> Result<Choice, NavError> {
        let mut items: Vec<String> = self
            .sources
            .iter()
            .map(|s| s.kind().name().to_string())
            .collect();
        items.push("Exit".to_string());

        Ok(match self.menu.select_one("Select source", &items)? {
            None => Choice::Cancelled,
            Some(i) if i >= self.sources.len() => Choice::ExitRequested,
            Some(i) => {
                self.current = i;
                info!(source = %self.source().kind(), "source selected");
                Choice::SourcePicked
            }
        })
    }

    async fn search(&mut self) -> Result<Choice, NavError> {
        let label = format!("Search anime ({})", self.source().kind());
        let Some(query) = self.menu.prompt(&label)? else {
            return Ok(Choice::Cancelled);
        };
        let query = query.trim().to_string();
        if query.is_empty() {
            self.menu.notify("Type something to search for.")?;
            return Ok(Choice::NoResults);
        }

        self.menu.show_status(&format!("Searching for \"{query}\"..."))?;
        match self.source().search(&query).await {
            Ok(titles) if titles.is_empty() => {
                self.menu.notify(&format!("No results for \"{query}\"."))?;
                Ok(Choice::NoResults)
            }
            Ok(titles) => {
                info!(query = %query, results = titles.len(), "search complete");
                self.titles = titles;
                Ok(Choice::QuerySubmitted)
            }
            Err(e) => {
                warn!(query = %query, error = %e, "search failed");
                self.last_error = Some(format!("Search failed: {e}"));
                Ok(Choice::Failed)
            }
        }
    }

    async fn title_select(&mut self) -> Result<Choice, NavError> {
        let items: Vec<String> = self
            .titles
            .iter()
            .map(|t| match t.content_type {
                ContentType::Movie => format!("{} (movie)", t.name),
                ContentType::Series => t.name.clone(),
            })
            .collect();
        let Some(index) = self.menu.select_one("Select anime", &items)? else {
            return Ok(Choice::Cancelled);
        };
        let mut title = self.titles[index].clone();

        self.menu.show_status(&format!("Loading {}...", title.name))?;
        let season = match self.source().seasons(&title.reference).await {
            Ok(season) => season,
            Err(e) => {
                self.last_error = Some(format!("Could not load seasons: {e}"));
                return Ok(Choice::Failed);
            }
        };
        if season.is_movie {
            title.content_type = ContentType::Movie;
        }

        let episodes = if title.is_movie() {
            Vec::new()
        } else {
            match self.source().episodes(&title.reference).await {
                Ok(episodes) if episodes.is_empty() => {
                    self.menu.notify(&format!("{} has no episodes.", title.name))?;
                    return Ok(Choice::NoResults);
                }
                Ok(episodes) => episodes,
                Err(e) => {
                    self.last_error = Some(format!("Could not load episodes: {e}"));
                    return Ok(Choice::Failed);
                }
            }
        };

        let kind = self.source().kind();
        let mut nav = NavigationState::new(kind, title, episodes);
        let key = WatchHistory::make_key(kind, &nav.title.reference);
        if let Some(entry) = self.history.get(&key)
            && nav.select_episode(entry.episode_index)
        {
            debug!(episode = entry.episode_index, "resuming from history");
        }
        info!(title = %nav.title.name, episodes = nav.episodes.len(), "title selected");
        self.nav = Some(nav);
        Ok(Choice::TitlePicked)
    }

    async fn episode_browse(&mut self) -> Result<Choice, NavError> {
        let Some(nav) = self.nav.as_ref() else {
            return Ok(Choice::Cancelled);
        };
        let actions = browse_actions(nav.is_movie(), nav.source.is_slug_based());
        let items: Vec<String> = actions.iter().map(|a| a.label().to_string()).collect();
        let label = match nav.current_episode() {
            Some(episode) if !nav.is_movie() => format!("{} - {}", nav.title.name, episode.title),
            _ => nav.title.name.clone(),
        };

        let Some(index) = self.menu.select_one(&label, &items)? else {
            return Ok(Choice::Cancelled);
        };

        match actions[index] {
            BrowseAction::Play => self.play().await?,
            BrowseAction::Next => {
                if !self.nav_mut().is_some_and(NavigationState::next_episode) {
                    self.menu.notify("Already at the last episode.")?;
                }
            }
            BrowseAction::Previous => {
                if !self.nav_mut().is_some_and(NavigationState::previous_episode) {
                    self.menu.notify("Already at the first episode.")?;
                }
            }
            BrowseAction::PickEpisode => self.pick_episode()?,
            BrowseAction::PickResolution => self.pick_resolution().await?,
            BrowseAction::PickFansub => self.pick_fansub().await?,
            BrowseAction::Download => self.download().await?,
            BrowseAction::NewSearch => return Ok(Choice::NewSearch),
            BrowseAction::ChangeSource => return Ok(Choice::ChangeSource),
            BrowseAction::Exit => return Ok(Choice::ExitRequested),
        }
        Ok(Choice::Handled)
    }

    fn nav_mut(&mut self) -> Option<&mut NavigationState> {
        self.nav.as_mut()
    }

    fn confirm(&mut self, question: &str) -> Result<Choice, NavError> {
        let items = ["Yes".to_string(), "No".to_string()];
        Ok(match self.menu.select_one(question, &items)? {
            Some(0) => Choice::Confirmed(true),
            Some(_) => Choice::Confirmed(false),
            None => Choice::Cancelled,
        })
    }

    fn recovery(&mut self) -> Result<Choice, NavError> {
        let label = self
            .last_error
            .take()
            .unwrap_or_else(|| "Something went wrong.".to_string());
        let items: Vec<String> = RECOVERY_ITEMS.iter().map(|s| s.to_string()).collect();
        Ok(match self.menu.select_one(&label, &items)? {
            Some(0) => Choice::NewSearch,
            Some(1) => Choice::ChangeSource,
            Some(_) => Choice::ExitRequested,
            None => Choice::Cancelled,
        })
    }

    fn pick_episode(&mut self) -> Result<(), NavError> {
        let Some(nav) = self.nav.as_ref() else {
            return Ok(());
        };
        let items: Vec<String> = nav.episodes.iter().map(|e| e.title.clone()).collect();
        if let Some(index) = self.menu.select_one("Select episode", &items)?
            && let Some(nav) = self.nav.as_mut()
        {
            nav.select_episode(index);
        }
        Ok(())
    }

    async fn pick_resolution(&mut self) -> Result<(), NavError> {
        let Some(nav) = self.nav.as_ref() else {
            return Ok(());
        };
        self.menu.show_status("Fetching available resolutions...")?;
        let streams = match resolver::resolve(&self.sources[self.current], nav).await {
            Ok(streams) => streams,
            Err(e) => {
                self.menu.notify(&resolve_message(&e))?;
                return Ok(());
            }
        };

        let labels = streams.labels();
        if let Some(index) = self.menu.select_one("Select resolution", &labels)?
            && let Some(nav) = self.nav.as_mut()
        {
            nav.set_resolution(index, &labels[index]);
            info!(resolution = %labels[index], "resolution selected");
        }
        Ok(())
    }

    async fn pick_fansub(&mut self) -> Result<(), NavError> {
        let Some(nav) = self.nav.as_ref() else {
            return Ok(());
        };
        let Some(episode) = nav.current_episode() else {
            return Ok(());
        };

        self.menu.show_status("Fetching fansubs...")?;
        let fansubs = match self.sources[self.current]
            .fansubs(&nav.title.reference, episode)
            .await
        {
            Ok(fansubs) => fansubs,
            Err(e) => {
                self.menu.notify(&format!("Could not load fansubs: {e}"))?;
                return Ok(());
            }
        };

        let names: Vec<String> = fansubs.iter().map(|f| f.name.clone()).collect();
        if let Some(index) = self.menu.select_one("Select fansub", &names)?
            && let Some(nav) = self.nav.as_mut()
        {
            nav.fansub_index = index;
            info!(fansub = %names[index], "fansub selected");
        }
        Ok(())
    }

    async fn play(&mut self) -> Result<(), NavError> {
        let Some(nav) = self.nav.as_mut() else {
            return Ok(());
        };

        self.menu.show_status("Resolving streams...")?;
        let streams = match resolver::resolve(&self.sources[self.current], nav).await {
            Ok(streams) => streams,
            Err(e) => {
                warn!(error = %e, "stream resolution failed");
                self.menu.notify(&resolve_message(&e))?;
                return Ok(());
            }
        };
        nav.clamp_resolution(streams.entries.len());
        let entry = &streams.entries[nav.resolution_index];

        let episode = nav
            .current_episode()
            .filter(|_| !nav.is_movie())
            .map(|e| e.title.clone());
        let media_title = match &episode {
            Some(episode) => format!("{} - {}", nav.title.name, episode),
            None => nav.title.name.clone(),
        };
        let media = MediaRequest {
            url: entry.url.clone(),
            subtitle_url: streams.subtitle_url.clone(),
            title: media_title,
        };
        let key = WatchHistory::make_key(nav.source, &nav.title.reference);
        let episode_index = nav.episode_index;
        let now_playing = NowPlaying {
            title: nav.title.name.clone(),
            episode: episode.clone(),
            poster_url: nav.title.poster_url.clone(),
            source: nav.source,
        };
        let title_name = nav.title.name.clone();
        info!(title = %media.title, quality = %entry.label, "starting playback");

        let resume = match self.history.resume_point(&key, episode_index) {
            Some(position) => {
                let items = [
                    format!("Resume from {}", format_time(position)),
                    "Start over".to_string(),
                ];
                match self.menu.select_one("Continue where you left off?", &items)? {
                    Some(0) => Some(position),
                    Some(_) => None,
                    None => return Ok(()),
                }
            }
            None => None,
        };

        self.menu.show_status(&format!("Starting {}...", self.player.command()))?;
        let mut session = match self.player.launch(&media).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "playback aborted");
                self.menu.notify(&format!("Playback failed: {e}"))?;
                return Ok(());
            }
        };

        if let Some(position) = resume
            && let Err(e) = session.client().seek(position).await
        {
            warn!(error = %e, position, "could not seek to resume point");
        }

        let reporter = ProgressReporter::new(
            session.client().clone(),
            self.presence.clone(),
            now_playing,
        )
        .with_period(self.progress_period);
        let mut latest = reporter.subscribe();
        let mut reporter = reporter.spawn();

        self.menu
            .show_status(&format!("Playing {}. Close the player to return.", media.title))?;
        let exit = loop {
            tokio::select! {
                status = session.wait() => break status,
                Ok(()) = latest.changed() => {}
            }
            if let Some(observation) = *latest.borrow_and_update() {
                session.follow_pause(observation.paused);
            }
        };
        match exit {
            Ok(status) => debug!(%status, "player exited"),
            Err(e) => warn!(error = %e, "failed waiting for player"),
        }

        // the reporter notices the exit on its next tick and clears presence
        let grace = self.progress_period + REPORTER_GRACE;
        let observed = match tokio::time::timeout(grace, &mut reporter).await {
            Ok(Ok(last)) => last,
            Ok(Err(e)) => {
                warn!(error = %e, "progress reporter failed");
                *latest.borrow()
            }
            Err(_) => {
                warn!("progress reporter did not stop, aborting it");
                reporter.abort();
                if let Err(e) = lock_presence(&self.presence).clear() {
                    debug!(error = %e, "failed to clear presence");
                }
                *latest.borrow()
            }
        };
        if let Some(observation) = observed {
            self.history.update(
                key,
                title_name,
                episode_index,
                episode,
                observation.position,
                observation.duration,
            );
            self.history.save();
        }
        Ok(())
    }

    async fn download(&mut self) -> Result<(), NavError> {
        let Some(nav) = self.nav.as_ref() else {
            return Ok(());
        };
        let items: Vec<String> = nav.episodes.iter().map(|e| e.title.clone()).collect();
        let Some(selected) = self.menu.select_many("Select episodes to download", &items)? else {
            return Ok(());
        };
        if selected.is_empty() {
            return Ok(());
        }

        let total = selected.len();
        let mut failures = Vec::new();
        for (n, index) in selected.into_iter().enumerate() {
            let Some(base) = self.nav.as_ref() else {
                break;
            };
            let mut target = base.clone();
            if !target.select_episode(index) {
                continue;
            }
            let episode_title = items[index].clone();
            self.menu.show_status(&format!(
                "Downloading {}/{}: {} (resolving)",
                n + 1,
                total,
                episode_title
            ))?;

            let streams = match resolver::resolve(&self.sources[self.current], &target).await {
                Ok(streams) => streams,
                Err(e) => {
                    warn!(episode = %episode_title, error = %e, "download skipped");
                    failures.push(format!("{episode_title}: {e}"));
                    continue;
                }
            };
            target.clamp_resolution(streams.entries.len());
            let url = streams.entries[target.resolution_index].url.clone();
            let dest = episode_path(&self.download_dir, &target.title.name, &episode_title);

            let menu = &mut self.menu;
            let mut last_percent = None;
            let result = self
                .downloader
                .download(&url, &dest, |done, size| {
                    let percent = size.filter(|s| *s > 0).map(|s| done * 100 / s);
                    if percent != last_percent {
                        last_percent = percent;
                        let progress = match percent {
                            Some(p) => format!("{p}%"),
                            None => format!("{} MiB", done / (1024 * 1024)),
                        };
                        let _ = menu.show_status(&format!(
                            "Downloading {}/{}: {} ({})",
                            n + 1,
                            total,
                            episode_title,
                            progress
                        ));
                    }
                })
                .await;

            if let Err(e) = result {
                warn!(episode = %episode_title, error = %e, "download failed");
                failures.push(format!("{episode_title}: {e}"));
            }
        }

        if failures.is_empty() {
            self.menu.notify(&format!(
                "Downloaded {total} episode(s) to {}",
                self.download_dir.display()
            ))?;
        } else {
            self.menu.notify(&format!(
                "{} of {} downloads failed:\n{}",
                failures.len(),
                total,
                failures.join("\n")
            ))?;
        }
        Ok(())
    }
}

fn resolve_message(error: &ResolveError) -> String {
    match error {
        ResolveError::Fetch(e) => format!("Could not fetch streams: {e}"),
        ResolveError::Precondition(msg) => format!("Invalid selection: {msg}"),
        ResolveError::NoPlayableStream(what) => format!("No playable stream for {what}."),
    }
}
