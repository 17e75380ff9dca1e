use std::time::Duration;
use tokio::sync::mpsc;

use crate::fetch::Request;
use crate::lifecycle::{ActivateReport, InstallReport};
use crate::policy::FetchOutcome;
use crate::push::Notification;
use crate::sync::DrainReport;

/// Events delivered to an agent instance by its host.
#[derive(Debug)]
pub enum Event {
  Install,
  Activate,
  /// A page issued a request
  Fetch(Request),
  /// One-off background sync registered under `tag`
  Sync { tag: String },
  /// Periodic background sync registered under `tag`
  PeriodicSync { tag: String },
  /// Connectivity came back
  Online,
  /// Raw push message body
  Push(Vec<u8>),
  NotificationClick {
    action: String,
    data: Option<String>,
  },
}

impl Event {
  pub fn kind(&self) -> &'static str {
    match self {
      Event::Install => "install",
      Event::Activate => "activate",
      Event::Fetch(_) => "fetch",
      Event::Sync { .. } => "sync",
      Event::PeriodicSync { .. } => "periodicsync",
      Event::Online => "online",
      Event::Push(_) => "push",
      Event::NotificationClick { .. } => "notificationclick",
    }
  }
}

/// What handling an event produced. Returned only once all work the event
/// started has settled.
#[derive(Debug)]
pub enum EventOutcome {
  Installed(InstallReport),
  Activated(ActivateReport),
  Fetch(FetchOutcome),
  /// `None` when a drain was already running
  Synced(Option<DrainReport>),
  DataUpdated { notified: usize },
  Notified(Option<Notification>),
  /// Id of the page opened by a notification click, if any
  WindowOpened(Option<u64>),
  /// Event carried a tag this agent does not handle
  Ignored,
}

/// Produces background sync events from a tick timer.
pub struct Ticker {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl Ticker {
  /// Every `interval`, emit a sync for `sync_tag` followed by a periodic sync
  /// for `periodic_tag`.
  pub fn new(interval: Duration, sync_tag: String, periodic_tag: String) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut ticks = tokio::time::interval(interval);
      // The first tick completes immediately; the agent just activated
      ticks.tick().await;
      loop {
        ticks.tick().await;
        let events = [
          Event::Sync {
            tag: sync_tag.clone(),
          },
          Event::PeriodicSync {
            tag: periodic_tag.clone(),
          },
        ];
        for event in events {
          if tx.send(event).is_err() {
            return;
          }
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
