//! Connects the orchestrator to the Jellyfin REST client.
//!
//! Metadata lookups run as background tasks and answer with an [`Event`]. Reports
//! go through one queue drained by a single task, so the server sees them in the
//! order they were made (mark-played before stop, stop before the next start).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::client::JellyfinClient;
use super::navigation::ItemContext;
use super::session::{Event, Hub, HubReport, ResolvedItem};

pub struct HubBridge {
  client: Arc<JellyfinClient>,
  events: mpsc::UnboundedSender<Event>,
  reports: mpsc::UnboundedSender<HubReport>,
}

impl HubBridge {
  /// Create the bridge and start its reporter. The reporter finishes once the
  /// bridge is dropped and every queued report has been sent.
  pub fn new(
    client: Arc<JellyfinClient>,
    events: mpsc::UnboundedSender<Event>,
  ) -> (Self, JoinHandle<()>) {
    let (reports, queue) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(run_reporter(client.clone(), queue));
    (
      Self {
        client,
        events,
        reports,
      },
      reporter,
    )
  }
}

impl Hub for HubBridge {
  fn resolve(&mut self, generation: u64, item_id: &str) {
    let client = self.client.clone();
    let events = self.events.clone();
    let item_id = item_id.to_string();

    tokio::spawn(async move {
      let item = resolve_item(&client, &item_id).await;
      let _ = events.send(Event::Resolved { generation, item });
    });
  }

  fn report(&mut self, report: HubReport) {
    if self.reports.send(report).is_err() {
      log::warn!("Report queue closed, dropping report");
    }
  }
}

/// Fetch what the orchestrator needs to start playing `item_id`.
///
/// Metadata failures are not fatal: the item still plays, just without episode
/// navigation or a known runtime.
pub async fn resolve_item(client: &JellyfinClient, item_id: &str) -> Option<ResolvedItem> {
  let stream_url = match client.stream_url(item_id) {
    Ok(url) => url,
    Err(e) => {
      log::error!("Cannot build stream URL for {}: {}", item_id, e);
      return None;
    }
  };

  let context = match client.get_item(item_id).await {
    Ok(item) => {
      let episodes = match (&item.series_id, item.is_episode()) {
        (Some(series_id), true) => {
          log::info!(
            "Episode detected: {} - S{:02}E{:02}",
            item.series_name.as_deref().unwrap_or("Unknown"),
            item.parent_index_number.unwrap_or(0),
            item.index_number.unwrap_or(0)
          );
          match client
            .get_season_episodes(series_id, item.season_id.as_deref())
            .await
          {
            Ok(episodes) => Some(episodes),
            Err(e) => {
              log::warn!("Failed to list episodes of {}: {}", series_id, e);
              None
            }
          }
        }
        _ => None,
      };
      ItemContext::from_item(&item, episodes)
    }
    Err(e) => {
      log::warn!("Failed to fetch metadata for {}: {}", item_id, e);
      ItemContext::unknown(item_id)
    }
  };

  Some(ResolvedItem {
    context,
    stream_url,
  })
}

/// Send reports one at a time until the queue is closed and empty.
async fn run_reporter(client: Arc<JellyfinClient>, mut queue: mpsc::UnboundedReceiver<HubReport>) {
  while let Some(report) = queue.recv().await {
    let result = match &report {
      HubReport::Start(info) => {
        log::info!("Reporting playback start for {}", info.item_id);
        client.report_playback_start(info).await
      }
      HubReport::Progress(info) => client.report_playback_progress(info).await,
      HubReport::Stop(info) => {
        log::info!("Reporting playback stop for {}", info.item_id);
        client.report_playback_stop(info).await
      }
      HubReport::MarkPlayed(item_id) => client.mark_played(item_id).await,
    };

    match (result, &report) {
      (Ok(()), _) => {}
      (Err(e), HubReport::Progress(_)) => log::debug!("Progress report failed: {}", e),
      (Err(e), _) => log::error!("Failed to send {:?}: {}", report, e),
    }
  }
  log::debug!("Report queue drained");
}
