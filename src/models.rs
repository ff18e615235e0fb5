use crate::sources::SourceKind;

/// How a source identifies a title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleRef {
    Id(u64),
    Slug(String),
}

impl std::fmt::Display for TitleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TitleRef::Id(id) => write!(f, "{id}"),
            TitleRef::Slug(slug) => f.write_str(slug),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Movie,
    Series,
}

/// A search result. Never mutated after the source returns it.
#[derive(Debug, Clone, PartialEq)]
pub struct Title {
    pub name: String,
    pub reference: TitleRef,
    pub content_type: ContentType,
    pub poster_url: Option<String>,
}

impl Title {
    pub fn is_movie(&self) -> bool {
        self.content_type == ContentType::Movie
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Season {
    pub numbers: Vec<u32>,
    pub is_movie: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    /// Opaque per-source identifier (a watch path or a number)
    pub id: String,
    pub title: String,
    pub number: u32,
    /// One-based season number
    pub season: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fansub {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub label: String,
    pub url: String,
}

impl StreamEntry {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub language: Option<String>,
    pub url: String,
}

/// Watch data as a source returns it: unordered entries and every caption.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawWatch {
    pub entries: Vec<StreamEntry>,
    pub captions: Vec<Caption>,
}

/// Ranked stream entries (best first) plus the chosen subtitle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSet {
    pub entries: Vec<StreamEntry>,
    pub subtitle_url: Option<String>,
}

impl StreamSet {
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.label.clone()).collect()
    }
}

/// The user's current selection while browsing one title.
#[derive(Debug, Clone)]
pub struct NavigationState {
    pub source: SourceKind,
    pub title: Title,
    pub episodes: Vec<Episode>,
    pub episode_index: usize,
    pub season_index: usize,
    pub fansub_index: usize,
    pub resolution_index: usize,
    pub resolution_label: String,
}

impl NavigationState {
    pub fn new(source: SourceKind, title: Title, episodes: Vec<Episode>) -> Self {
        let season_index = episodes
            .first()
            .map(|ep| ep.season.saturating_sub(1) as usize)
            .unwrap_or(0);
        Self {
            source,
            title,
            episodes,
            episode_index: 0,
            season_index,
            fansub_index: 0,
            resolution_index: 0,
            resolution_label: String::new(),
        }
    }

    pub fn is_movie(&self) -> bool {
        self.title.is_movie()
    }

    pub fn current_episode(&self) -> Option<&Episode> {
        self.episodes.get(self.episode_index)
    }

    /// Moves to `index`, keeping the season index in step with the episode.
    pub fn select_episode(&mut self, index: usize) -> bool {
        let Some(episode) = self.episodes.get(index) else {
            return false;
        };
        self.season_index = episode.season.saturating_sub(1) as usize;
        self.episode_index = index;
        true
    }

    /// Returns false at the last episode.
    pub fn next_episode(&mut self) -> bool {
        self.episode_index + 1 < self.episodes.len() && self.select_episode(self.episode_index + 1)
    }

    /// Returns false at the first episode.
    pub fn previous_episode(&mut self) -> bool {
        self.episode_index > 0 && self.select_episode(self.episode_index - 1)
    }

    /// Episodes before the current one that belong to the same season.
    pub fn season_episode_index(&self) -> usize {
        let Some(current) = self.current_episode() else {
            return 0;
        };
        self.episodes[..self.episode_index]
            .iter()
            .filter(|ep| ep.season == current.season)
            .count()
    }

    /// Keeps the resolution index inside `len` entries after a re-fetch.
    pub fn clamp_resolution(&mut self, len: usize) {
        if len == 0 {
            self.resolution_index = 0;
        } else if self.resolution_index >= len {
            self.resolution_index = len - 1;
        }
    }

    /// Records the chosen resolution; an unlabelled choice falls back to the best entry.
    pub fn set_resolution(&mut self, index: usize, label: &str) {
        if label.is_empty() {
            self.resolution_index = 0;
            self.resolution_label.clear();
        } else {
            self.resolution_index = index;
            self.resolution_label = label.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(season: u32, number: u32) -> Episode {
        Episode {
            id: format!("s{season}e{number}"),
            title: format!("Episode {number}"),
            number,
            season,
        }
    }

    fn state(episodes: Vec<Episode>) -> NavigationState {
        NavigationState::new(
            SourceKind::Animecix,
            Title {
                name: "Test".to_string(),
                reference: TitleRef::Id(1),
                content_type: ContentType::Series,
                poster_url: None,
            },
            episodes,
        )
    }

    #[test]
    fn test_next_and_previous_stop_at_bounds() {
        let mut nav = state(vec![episode(1, 1), episode(1, 2)]);
        assert!(!nav.previous_episode());
        assert!(nav.next_episode());
        assert_eq!(nav.episode_index, 1);
        assert!(!nav.next_episode());
        assert_eq!(nav.episode_index, 1);
        assert!(nav.previous_episode());
        assert_eq!(nav.episode_index, 0);
    }

    #[test]
    fn test_season_follows_episode() {
        let mut nav = state(vec![
            episode(1, 1),
            episode(1, 2),
            episode(2, 1),
            episode(2, 2),
        ]);
        assert!(nav.select_episode(3));
        assert_eq!(nav.season_index, 1);
        assert_eq!(nav.season_episode_index(), 1);
        assert!(nav.select_episode(1));
        assert_eq!(nav.season_index, 0);
        assert_eq!(nav.season_episode_index(), 1);
        assert!(!nav.select_episode(4));
    }

    #[test]
    fn test_clamp_resolution() {
        let mut nav = state(vec![episode(1, 1)]);
        nav.resolution_index = 3;
        nav.clamp_resolution(2);
        assert_eq!(nav.resolution_index, 1);
        nav.clamp_resolution(5);
        assert_eq!(nav.resolution_index, 1);
        nav.clamp_resolution(0);
        assert_eq!(nav.resolution_index, 0);
    }

    #[test]
    fn test_empty_label_resets_resolution() {
        let mut nav = state(vec![episode(1, 1)]);
        nav.set_resolution(2, "480p");
        assert_eq!(nav.resolution_index, 2);
        nav.set_resolution(2, "");
        assert_eq!(nav.resolution_index, 0);
        assert!(nav.resolution_label.is_empty());
    }
}
