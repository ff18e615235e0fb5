use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{
    Source, SourceError, SourceKind, WatchSelector, ensure_success, http_client, normalize_query,
};
use crate::config::OpenAnimeConfig;
use crate::models::{ContentType, Episode, Fansub, RawWatch, Season, StreamEntry, Title, TitleRef};

const SITE_ORIGIN: &str = "https://openani.me";

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    english: String,
    slug: String,
    pictures: Option<Pictures>,
}

#[derive(Debug, Deserialize)]
struct Pictures {
    avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnimeDetails {
    number_of_seasons: Option<u32>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeasonResponse {
    season: Option<SeasonDetails>,
}

#[derive(Debug, Deserialize)]
struct SeasonDetails {
    season_number: Option<u32>,
    #[serde(default)]
    episodes: Vec<SeasonEpisode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeasonEpisode {
    episode_number: u32,
}

#[derive(Debug, Deserialize)]
struct EpisodeResponse {
    #[serde(default)]
    fansubs: Vec<RawFansub>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFansub {
    id: String,
    name: String,
    #[serde(rename = "is4K")]
    is_4k: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    episode_data: Option<EpisodeData>,
}

#[derive(Debug, Deserialize)]
struct EpisodeData {
    #[serde(default)]
    files: Vec<VideoFile>,
}

#[derive(Debug, Deserialize)]
struct VideoFile {
    file: Option<String>,
    resolution: Option<f64>,
}

/// Client for the slug-based catalogue, where streams depend on a fansub choice.
#[derive(Debug, Clone)]
pub struct OpenAnimeClient {
    client: Client,
    base_url: String,
    video_host: String,
}

impl OpenAnimeClient {
    pub fn new(config: &OpenAnimeConfig, user_agent: &str) -> Self {
        Self {
            client: http_client(user_agent),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            video_host: config.video_host.trim_end_matches('/').to_string(),
        }
    }

    fn slug(reference: &TitleRef) -> Result<&str, SourceError> {
        match reference {
            TitleRef::Slug(slug) => Ok(slug),
            TitleRef::Id(id) => Err(SourceError::Unsupported {
                provider: "openanime",
                what: format!("numeric reference {id}"),
            }),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        debug!(url = %url, "openanime request");
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .header("Origin", SITE_ORIGIN)
            .header("Referer", SITE_ORIGIN)
            .send()
            .await?;
        ensure_success(&response)?;
        Ok(response.json().await?)
    }

    async fn details(&self, slug: &str) -> Result<AnimeDetails, SourceError> {
        self.get_json(&format!("{}/anime/{}", self.base_url, slug))
            .await
    }

    fn episode_url(&self, slug: &str, season: u32, episode: u32) -> String {
        format!(
            "{}/anime/{}/season/{}/episode/{}",
            self.base_url, slug, season, episode
        )
    }
}

impl Source for OpenAnimeClient {
    fn kind(&self) -> SourceKind {
        SourceKind::OpenAnime
    }

    async fn search(&self, query: &str) -> Result<Vec<Title>, SourceError> {
        let query = normalize_query(query, "+");
        let items: Vec<SearchItem> = self
            .get_json(&format!("{}/anime/search?q={}", self.base_url, query))
            .await?;

        Ok(items
            .into_iter()
            .map(|item| Title {
                name: item.english,
                reference: TitleRef::Slug(item.slug),
                // Search results carry no type; seasons() tells movies apart.
                content_type: ContentType::Series,
                poster_url: item
                    .pictures
                    .and_then(|p| p.avatar)
                    .filter(|p| !p.is_empty()),
            })
            .collect())
    }

    async fn seasons(&self, reference: &TitleRef) -> Result<Season, SourceError> {
        let slug = Self::slug(reference)?;
        let details = self.details(slug).await?;
        let count = details.number_of_seasons.unwrap_or(1);
        let is_movie = details
            .kind
            .as_deref()
            .is_some_and(|k| k.eq_ignore_ascii_case("movie"));

        Ok(Season {
            numbers: vec![count],
            is_movie,
        })
    }

    async fn episodes(&self, reference: &TitleRef) -> Result<Vec<Episode>, SourceError> {
        let slug = Self::slug(reference)?;
        let count = self.details(slug).await?.number_of_seasons.unwrap_or(1);

        let mut episodes = Vec::new();
        for season in 1..=count {
            let response: SeasonResponse = self
                .get_json(&format!("{}/anime/{}/season/{}", self.base_url, slug, season))
                .await?;
            let Some(details) = response.season else {
                continue;
            };
            let season_number = details.season_number.unwrap_or(season);
            episodes.extend(details.episodes.into_iter().map(|ep| Episode {
                id: ep.episode_number.to_string(),
                title: format!("Season {}, Episode {}", season_number, ep.episode_number),
                number: ep.episode_number,
                season: season_number,
            }));
        }

        Ok(episodes)
    }

    async fn fansubs(
        &self,
        reference: &TitleRef,
        episode: &Episode,
    ) -> Result<Vec<Fansub>, SourceError> {
        let slug = Self::slug(reference)?;
        let response: EpisodeResponse = self
            .get_json(&self.episode_url(slug, episode.season, episode.number))
            .await?;

        // 4K-only groups, or groups that don't say, can't be streamed.
        let fansubs: Vec<Fansub> = response
            .fansubs
            .into_iter()
            .filter(|f| f.is_4k == Some(false))
            .map(|f| Fansub {
                id: f.id,
                name: f.name,
            })
            .collect();

        if fansubs.is_empty() {
            return Err(SourceError::Malformed(format!(
                "no usable fansub for season {} episode {}",
                episode.season, episode.number
            )));
        }
        Ok(fansubs)
    }

    async fn watch(&self, selector: &WatchSelector) -> Result<RawWatch, SourceError> {
        let WatchSelector::BySlug {
            slug,
            season,
            episode,
            fansub_id,
        } = selector
        else {
            return Err(SourceError::Unsupported {
                provider: "openanime",
                what: "numeric selector".to_string(),
            });
        };

        let url = format!(
            "{}?fansub={}",
            self.episode_url(slug, *season, *episode),
            urlencoding::encode(fansub_id)
        );
        let response: WatchResponse = self.get_json(&url).await?;
        let data = response
            .episode_data
            .ok_or_else(|| SourceError::Malformed("episodeData missing".to_string()))?;

        let entries = data
            .files
            .into_iter()
            .filter_map(|f| match (f.file, f.resolution) {
                (Some(file), Some(resolution)) => Some(StreamEntry::new(
                    format!("{}p", resolution as u32),
                    format!("{}/animes/{}/{}/{}", self.video_host, slug, season, file),
                )),
                _ => None,
            })
            .collect();

        Ok(RawWatch {
            entries,
            captions: Vec::new(),
        })
    }
}
