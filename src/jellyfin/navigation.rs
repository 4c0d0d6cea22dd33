//! Where the current item sits in its season, and what the player window shows.

use super::types::MediaItem;

/// Position of an episode within its season listing.
///
/// Built once per playback session and never updated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesContext {
  episodes: Vec<MediaItem>,
  current: usize,
  pub series_name: String,
  pub season_number: Option<i32>,
  pub episode_number: Option<i32>,
}

impl SeriesContext {
  /// Order `episodes` by index number and locate `current` in it.
  ///
  /// Episodes without an index number sort after the numbered ones; equal numbers
  /// keep listing order. Returns `None` when `current` is not in the listing.
  pub fn new(current: &MediaItem, mut episodes: Vec<MediaItem>) -> Option<Self> {
    episodes.sort_by_key(|ep| (ep.index_number.is_none(), ep.index_number));
    let position = episodes.iter().position(|ep| ep.id == current.id)?;

    Some(Self {
      episodes,
      current: position,
      series_name: current.series_name.clone().unwrap_or_default(),
      season_number: current.parent_index_number,
      episode_number: current.index_number,
    })
  }

  #[cfg(test)]
  pub(crate) fn current_index(&self) -> usize {
    self.current
  }

  #[cfg(test)]
  pub(crate) fn len(&self) -> usize {
    self.episodes.len()
  }

  pub fn previous(&self) -> Option<&MediaItem> {
    self.current.checked_sub(1).and_then(|i| self.episodes.get(i))
  }

  pub fn next(&self) -> Option<&MediaItem> {
    self.episodes.get(self.current + 1)
  }
}

/// Everything the orchestrator knows about the item being played.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemContext {
  pub item_id: String,
  pub title: String,
  /// Runtime from the server, 0 when unknown.
  pub runtime_seconds: f64,
  pub series: Option<SeriesContext>,
}

impl ItemContext {
  /// Context for an item whose metadata could not be fetched.
  pub fn unknown(item_id: &str) -> Self {
    Self {
      item_id: item_id.to_string(),
      title: item_id.to_string(),
      runtime_seconds: 0.0,
      series: None,
    }
  }

  /// Context built from item metadata and, for episodes, the season listing.
  pub fn from_item(item: &MediaItem, episodes: Option<Vec<MediaItem>>) -> Self {
    let series = match episodes {
      Some(episodes) if item.is_episode() => {
        let context = SeriesContext::new(item, episodes);
        if context.is_none() {
          log::warn!("Episode {} missing from its season listing", item.id);
        }
        context
      }
      _ => None,
    };

    Self {
      item_id: item.id.clone(),
      title: format_title(item),
      runtime_seconds: item.runtime_seconds(),
      series,
    }
  }

  /// Title for the player window.
  pub fn window_title(&self) -> String {
    format!("Jellyfin - {}", self.title)
  }
}

/// Format media title for display in MPV.
pub fn format_title(item: &MediaItem) -> String {
  match item.item_type.as_str() {
    "Episode" => {
      let series = item.series_name.as_deref().unwrap_or("Unknown");
      let season = item.parent_index_number.unwrap_or(1);
      let episode = item.index_number.unwrap_or(1);
      format!("{} - S{:02}E{:02} - {}", series, season, episode, item.name)
    }
    _ => item.name.clone(),
  }
}
