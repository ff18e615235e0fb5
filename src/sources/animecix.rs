use itertools::Itertools;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    IdTarget, Source, SourceError, SourceKind, WatchSelector, ensure_success, http_client,
    normalize_query,
};
use crate::config::AnimecixConfig;
use crate::models::{
    Caption, ContentType, Episode, Fansub, RawWatch, Season, StreamEntry, Title, TitleRef,
};

/// Video id the related-videos endpoint wants; any valid one works.
const RELATED_VIDEO_ID: u32 = 637113;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: u64,
    name: String,
    title_type: Option<String>,
    poster: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelatedVideos {
    #[serde(default)]
    videos: Vec<RelatedVideo>,
}

#[derive(Debug, Deserialize)]
struct RelatedVideo {
    name: Option<String>,
    url: Option<String>,
    season_num: Option<u32>,
    title: Option<RelatedTitle>,
    #[serde(default)]
    captions: Vec<RawCaption>,
}

#[derive(Debug, Deserialize)]
struct RelatedTitle {
    #[serde(default)]
    seasons: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawCaption {
    language: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct TitleResponse {
    title: TitleDetails,
}

#[derive(Debug, Deserialize)]
struct TitleDetails {
    #[serde(default)]
    videos: Vec<MovieVideo>,
}

#[derive(Debug, Deserialize)]
struct MovieVideo {
    url: String,
    #[serde(default)]
    captions: Vec<RawCaption>,
}

#[derive(Debug, Deserialize)]
struct VideoResponse {
    #[serde(default)]
    urls: Vec<VideoUrl>,
}

#[derive(Debug, Deserialize)]
struct VideoUrl {
    label: String,
    url: String,
}

impl From<RawCaption> for Caption {
    fn from(raw: RawCaption) -> Self {
        Caption {
            language: raw.language,
            url: raw.url,
        }
    }
}

/// Client for the numeric-id catalogue.
#[derive(Debug, Clone)]
pub struct AnimecixClient {
    client: Client,
    base_url: String,
    alternative_url: String,
    video_api: String,
}

impl AnimecixClient {
    pub fn new(config: &AnimecixConfig, user_agent: &str) -> Self {
        Self {
            client: http_client(user_agent),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            alternative_url: config.alternative_url.trim_end_matches('/').to_string(),
            video_api: config.video_api.trim_end_matches('/').to_string(),
        }
    }

    fn title_id(reference: &TitleRef) -> Result<u64, SourceError> {
        match reference {
            TitleRef::Id(id) => Ok(*id),
            TitleRef::Slug(slug) => Err(SourceError::Unsupported {
                provider: "animecix",
                what: format!("slug reference '{slug}'"),
            }),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        debug!(url = %url, "animecix request");
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;
        ensure_success(&response)?;
        Ok(response.json().await?)
    }

    async fn related_videos(&self, title_id: u64, season: usize) -> Result<RelatedVideos, SourceError> {
        let url = format!(
            "{}/secure/related-videos?episode=1&season={}&titleId={}&videoId={}",
            self.alternative_url, season, title_id, RELATED_VIDEO_ID
        );
        self.get_json(&url).await
    }

    async fn season_count(&self, title_id: u64) -> Result<usize, SourceError> {
        let related = self.related_videos(title_id, 1).await?;
        let first = related
            .videos
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::Malformed("related videos list is empty".to_string()))?;
        let title = first
            .title
            .ok_or_else(|| SourceError::Malformed("related video has no title".to_string()))?;
        Ok(title.seasons.len())
    }

    /// Follows a watch page to its embed and asks the video host for the file list.
    async fn embed_streams(&self, page_url: &str) -> Result<Vec<StreamEntry>, SourceError> {
        let response = self
            .client
            .get(page_url)
            .header("x-e-h", "=.a")
            .send()
            .await?;

        if response.status().as_u16() == 422 {
            return Err(SourceError::Malformed(format!(
                "no embed behind {page_url}"
            )));
        }
        ensure_success(&response)?;

        let final_url = response.url().clone();
        let embed_id = final_url
            .path_segments()
            .and_then(|mut segments| segments.nth(1))
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| {
                SourceError::Malformed(format!("unexpected embed path {}", final_url.path()))
            })?
            .to_string();
        let vid = final_url
            .query_pairs()
            .find(|(key, _)| key == "vid")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();

        let api_url = format!("{}/api/video/{}?vid={}", self.video_api, embed_id, vid);
        let video: VideoResponse = self.get_json(&api_url).await?;

        Ok(video
            .urls
            .into_iter()
            .map(|v| StreamEntry::new(v.label, v.url))
            .collect())
    }

    async fn episode_captions(
        &self,
        title_id: u64,
        season_index: usize,
        season_episode_index: usize,
    ) -> Result<Vec<Caption>, SourceError> {
        let related = self.related_videos(title_id, season_index + 1).await?;
        let video = related
            .videos
            .into_iter()
            .nth(season_episode_index)
            .ok_or_else(|| {
                SourceError::Malformed(format!(
                    "season {} has no episode at {}",
                    season_index + 1,
                    season_episode_index
                ))
            })?;
        Ok(video.captions.into_iter().map(Caption::from).collect())
    }

    async fn movie(&self, title_id: u64) -> Result<RawWatch, SourceError> {
        let url = format!("{}/secure/titles/{}?titleId={}", self.base_url, title_id, title_id);
        debug!(url = %url, "animecix movie request");
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("x-e-h", "=.a")
            .send()
            .await?;
        ensure_success(&response)?;
        let details: TitleResponse = response.json().await?;

        for video in details.title.videos {
            let page_url = if video.url.starts_with("http") {
                video.url.clone()
            } else {
                format!("{}/{}", self.base_url, video.url.trim_start_matches('/'))
            };
            match self.embed_streams(&page_url).await {
                Ok(entries) => {
                    return Ok(RawWatch {
                        entries,
                        captions: video.captions.into_iter().map(Caption::from).collect(),
                    });
                }
                Err(SourceError::Malformed(reason)) => {
                    warn!(url = %video.url, %reason, "skipping movie video");
                }
                Err(e) => return Err(e),
            }
        }

        Err(SourceError::Malformed(format!(
            "title {title_id} has no playable video"
        )))
    }
}

impl Source for AnimecixClient {
    fn kind(&self) -> SourceKind {
        SourceKind::Animecix
    }

    async fn search(&self, query: &str) -> Result<Vec<Title>, SourceError> {
        let query = normalize_query(query, "-");
        let url = format!("{}/secure/search/{}?type=&limit=20", self.base_url, query);
        let response: SearchResponse = self.get_json(&url).await?;

        Ok(response
            .results
            .into_iter()
            .map(|item| Title {
                name: item.name,
                reference: TitleRef::Id(item.id),
                content_type: match item.title_type.as_deref() {
                    Some(t) if t.eq_ignore_ascii_case("movie") => ContentType::Movie,
                    _ => ContentType::Series,
                },
                poster_url: item.poster.filter(|p| !p.is_empty()),
            })
            .collect())
    }

    async fn seasons(&self, reference: &TitleRef) -> Result<Season, SourceError> {
        let title_id = Self::title_id(reference)?;
        let count = self.season_count(title_id).await?;
        Ok(Season {
            numbers: (0..count as u32).collect(),
            is_movie: false,
        })
    }

    async fn episodes(&self, reference: &TitleRef) -> Result<Vec<Episode>, SourceError> {
        let title_id = Self::title_id(reference)?;
        let count = self.season_count(title_id).await?;

        let mut collected = Vec::new();
        for season_index in 0..count {
            let related = self.related_videos(title_id, season_index + 1).await?;
            for video in related.videos {
                let (Some(name), Some(url)) = (video.name, video.url) else {
                    return Err(SourceError::Malformed(
                        "related video is missing name or url".to_string(),
                    ));
                };
                let season = video.season_num.unwrap_or(season_index as u32 + 1);
                collected.push((name, url, season));
            }
        }

        // Same-named episodes collapse to the first one seen.
        Ok(collected
            .into_iter()
            .unique_by(|(name, _, _)| name.clone())
            .enumerate()
            .map(|(i, (name, url, season))| Episode {
                id: url,
                title: name,
                number: i as u32 + 1,
                season,
            })
            .collect())
    }

    async fn fansubs(
        &self,
        _reference: &TitleRef,
        _episode: &Episode,
    ) -> Result<Vec<Fansub>, SourceError> {
        Ok(Vec::new())
    }

    async fn watch(&self, selector: &WatchSelector) -> Result<RawWatch, SourceError> {
        let WatchSelector::ById { title_id, target } = selector else {
            return Err(SourceError::Unsupported {
                provider: "animecix",
                what: "slug selector".to_string(),
            });
        };

        match target {
            IdTarget::Movie => self.movie(*title_id).await,
            IdTarget::Episode {
                url,
                season_index,
                season_episode_index,
            } => {
                let page_url = format!("{}/{}", self.base_url, url.trim_start_matches('/'));
                let entries = self.embed_streams(&page_url).await?;
                let captions = match self
                    .episode_captions(*title_id, *season_index, *season_episode_index)
                    .await
                {
                    Ok(captions) => captions,
                    Err(e) => {
                        warn!(error = %e, "captions unavailable");
                        Vec::new()
                    }
                };
                Ok(RawWatch { entries, captions })
            }
        }
    }
}
