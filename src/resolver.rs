use std::cmp::Reverse;

use thiserror::Error;
use tracing::debug;

use crate::models::{Caption, Fansub, NavigationState, RawWatch, StreamEntry, StreamSet, TitleRef};
use crate::sources::{IdTarget, Source, SourceError, WatchSelector};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("failed to fetch streams: {0}")]
    Fetch(#[from] SourceError),
    #[error("invalid selection: {0}")]
    Precondition(String),
    #[error("no playable stream for {0}")]
    NoPlayableStream(String),
}

/// Numeric rank of a quality label: "1080p" is 1080, anything unparseable is 0.
pub fn label_rank(label: &str) -> u32 {
    let trimmed = label.trim();
    trimmed
        .strip_suffix('p')
        .unwrap_or(trimmed)
        .parse()
        .unwrap_or(0)
}

/// Best quality first. Equal ranks keep the order the source returned.
pub fn sort_entries(entries: &mut [StreamEntry]) {
    entries.sort_by_key(|entry| Reverse(label_rank(&entry.label)));
}

/// A Turkish caption if there is one, else the first caption.
pub fn pick_subtitle(captions: &[Caption]) -> Option<String> {
    captions
        .iter()
        .find(|c| c.language.as_deref() == Some("tr"))
        .or_else(|| captions.first())
        .map(|c| c.url.clone())
}

/// Checks the parts of the selection that don't need the network.
fn check_selection(state: &NavigationState) -> Result<(), ResolveError> {
    if state.source.is_slug_based() && state.is_movie() {
        return Err(ResolveError::Precondition(format!(
            "{} does not serve movies",
            state.source
        )));
    }

    if !state.is_movie() && state.episode_index >= state.episodes.len() {
        return Err(ResolveError::Precondition(format!(
            "episode index {} out of range ({} episodes)",
            state.episode_index,
            state.episodes.len()
        )));
    }

    Ok(())
}

/// Builds the selector shape the state's source expects.
pub fn build_selector(
    state: &NavigationState,
    fansubs: &[Fansub],
) -> Result<WatchSelector, ResolveError> {
    check_selection(state)?;

    match &state.title.reference {
        TitleRef::Id(title_id) if !state.source.is_slug_based() => {
            let target = match state.current_episode() {
                Some(episode) if !state.is_movie() => IdTarget::Episode {
                    url: episode.id.clone(),
                    season_index: state.season_index,
                    season_episode_index: state.season_episode_index(),
                },
                _ => IdTarget::Movie,
            };
            Ok(WatchSelector::ById {
                title_id: *title_id,
                target,
            })
        }
        TitleRef::Slug(slug) if state.source.is_slug_based() => {
            let episode = state.current_episode().ok_or_else(|| {
                ResolveError::Precondition("no episode selected".to_string())
            })?;
            let fansub = fansubs.get(state.fansub_index).ok_or_else(|| {
                ResolveError::Precondition(format!(
                    "fansub index {} out of range ({} fansubs)",
                    state.fansub_index,
                    fansubs.len()
                ))
            })?;
            Ok(WatchSelector::BySlug {
                slug: slug.clone(),
                season: episode.season,
                episode: episode.number,
                fansub_id: fansub.id.clone(),
            })
        }
        other => Err(ResolveError::Precondition(format!(
            "{} cannot use title reference '{}'",
            state.source, other
        ))),
    }
}

/// Turns raw watch data into a ranked stream set.
pub fn rank_streams(raw: RawWatch, what: &str) -> Result<StreamSet, ResolveError> {
    let RawWatch {
        mut entries,
        captions,
    } = raw;
    entries.retain(|e| !e.url.is_empty());
    if entries.is_empty() {
        return Err(ResolveError::NoPlayableStream(what.to_string()));
    }

    sort_entries(&mut entries);
    Ok(StreamSet {
        entries,
        subtitle_url: pick_subtitle(&captions),
    })
}

/// Resolves the current selection to ranked streams plus a subtitle.
pub async fn resolve<S: Source>(source: &S, state: &NavigationState) -> Result<StreamSet, ResolveError> {
    check_selection(state)?;

    let what = match state.current_episode() {
        Some(episode) if !state.is_movie() => format!("{} / {}", state.title.name, episode.title),
        _ => state.title.name.clone(),
    };

    let fansubs = match state.current_episode() {
        Some(episode) if state.source.is_slug_based() => {
            source.fansubs(&state.title.reference, episode).await?
        }
        _ => Vec::new(),
    };

    let selector = build_selector(state, &fansubs)?;
    debug!(?selector, "resolving streams");
    let raw = source.watch(&selector).await?;
    rank_streams(raw, &what)
}
