pub mod animecix;
pub mod openanime;

pub use animecix::AnimecixClient;
pub use openanime::OpenAnimeClient;

use std::future::Future;

use thiserror::Error;

use crate::config::SourcesConfig;
use crate::models::{Episode, Fansub, RawWatch, Season, Title, TitleRef};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} returned HTTP {status}")]
    Status { status: u16, url: String },
    #[error("unexpected response: {0}")]
    Malformed(String),
    #[error("not supported by {provider}: {what}")]
    Unsupported { provider: &'static str, what: String },
}

/// Which catalogue a title came from. Selector shapes differ per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Animecix,
    OpenAnime,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Animecix, SourceKind::OpenAnime];

    pub fn name(self) -> &'static str {
        match self {
            SourceKind::Animecix => "animecix",
            SourceKind::OpenAnime => "openanime",
        }
    }

    /// Slug sources pick a fansub per episode before asking for streams.
    pub fn is_slug_based(self) -> bool {
        matches!(self, SourceKind::OpenAnime)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What to fetch from a numeric-id source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdTarget {
    Movie,
    Episode {
        url: String,
        season_index: usize,
        /// Position of the episode within its season
        season_episode_index: usize,
    },
}

/// Identifies one playable item in the shape its source expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSelector {
    ById {
        title_id: u64,
        target: IdTarget,
    },
    BySlug {
        slug: String,
        season: u32,
        episode: u32,
        fansub_id: String,
    },
}

/// A catalogue that can be searched and browsed down to raw stream data.
pub trait Source {
    fn kind(&self) -> SourceKind;

    fn search(&self, query: &str) -> impl Future<Output = Result<Vec<Title>, SourceError>> + Send;

    fn seasons(
        &self,
        reference: &TitleRef,
    ) -> impl Future<Output = Result<Season, SourceError>> + Send;

    /// All episodes of every season, in source order.
    fn episodes(
        &self,
        reference: &TitleRef,
    ) -> impl Future<Output = Result<Vec<Episode>, SourceError>> + Send;

    /// Release groups for one episode. Empty for sources without fansubs.
    fn fansubs(
        &self,
        reference: &TitleRef,
        episode: &Episode,
    ) -> impl Future<Output = Result<Vec<Fansub>, SourceError>> + Send;

    fn watch(
        &self,
        selector: &WatchSelector,
    ) -> impl Future<Output = Result<RawWatch, SourceError>> + Send;
}

/// Runtime choice between the concrete sources.
#[derive(Debug, Clone)]
pub enum AnySource {
    Animecix(AnimecixClient),
    OpenAnime(OpenAnimeClient),
}

impl AnySource {
    pub fn from_config(kind: SourceKind, config: &SourcesConfig, user_agent: &str) -> Self {
        match kind {
            SourceKind::Animecix => {
                AnySource::Animecix(AnimecixClient::new(&config.animecix, user_agent))
            }
            SourceKind::OpenAnime => {
                AnySource::OpenAnime(OpenAnimeClient::new(&config.openanime, user_agent))
            }
        }
    }
}

impl Source for AnySource {
    fn kind(&self) -> SourceKind {
        match self {
            AnySource::Animecix(s) => s.kind(),
            AnySource::OpenAnime(s) => s.kind(),
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<Title>, SourceError> {
        match self {
            AnySource::Animecix(s) => s.search(query).await,
            AnySource::OpenAnime(s) => s.search(query).await,
        }
    }

    async fn seasons(&self, reference: &TitleRef) -> Result<Season, SourceError> {
        match self {
            AnySource::Animecix(s) => s.seasons(reference).await,
            AnySource::OpenAnime(s) => s.seasons(reference).await,
        }
    }

    async fn episodes(&self, reference: &TitleRef) -> Result<Vec<Episode>, SourceError> {
        match self {
            AnySource::Animecix(s) => s.episodes(reference).await,
            AnySource::OpenAnime(s) => s.episodes(reference).await,
        }
    }

    async fn fansubs(
        &self,
        reference: &TitleRef,
        episode: &Episode,
    ) -> Result<Vec<Fansub>, SourceError> {
        match self {
            AnySource::Animecix(s) => s.fansubs(reference, episode).await,
            AnySource::OpenAnime(s) => s.fansubs(reference, episode).await,
        }
    }

    async fn watch(&self, selector: &WatchSelector) -> Result<RawWatch, SourceError> {
        match self {
            AnySource::Animecix(s) => s.watch(selector).await,
            AnySource::OpenAnime(s) => s.watch(selector).await,
        }
    }
}

/// Folds Turkish letters to ASCII and joins words with `separator`.
pub fn normalize_query(query: &str, separator: &str) -> String {
    let folded: String = query
        .trim()
        .chars()
        .map(|c| match c {
            'ç' => 'c',
            'Ç' => 'C',
            'ğ' => 'g',
            'Ğ' => 'G',
            'ı' => 'i',
            'İ' => 'I',
            'ö' => 'o',
            'Ö' => 'O',
            'ş' => 's',
            'Ş' => 'S',
            'ü' => 'u',
            'Ü' => 'U',
            other => other,
        })
        .collect();

    folded
        .split_whitespace()
        .map(|word| urlencoding::encode(word).into_owned())
        .collect::<Vec<_>>()
        .join(separator)
}

pub(crate) fn http_client(user_agent: &str) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .build()
        .unwrap_or_default()
}

pub(crate) fn ensure_success(response: &reqwest::Response) -> Result<(), SourceError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(SourceError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query_folds_turkish() {
        assert_eq!(normalize_query("Şövalye Ğüçlü", "-"), "Sovalye-Guclu");
        assert_eq!(normalize_query("  one   piece ", "+"), "one+piece");
        assert_eq!(normalize_query("ıİ", "-"), "iI");
    }

    #[test]
    fn test_normalize_query_encodes_reserved() {
        assert_eq!(normalize_query("re:zero", "-"), "re%3Azero");
    }

    #[test]
    fn test_source_kind_names() {
        assert_eq!(SourceKind::Animecix.name(), "animecix");
        assert_eq!(SourceKind::OpenAnime.to_string(), "openanime");
        assert!(SourceKind::OpenAnime.is_slug_based());
        assert!(!SourceKind::Animecix.is_slug_based());
    }
}
