//! Push messages in, notifications out.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clients::Clients;
use crate::error::AgentError;

/// Validated push message body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
  pub title: String,
  pub body: String,
  pub url: String,
}

impl PushPayload {
  /// Parse a raw push body. Empty bodies carry nothing to show and yield `None`.
  pub fn parse(data: &[u8]) -> Result<Option<Self>, AgentError> {
    if data.iter().all(u8::is_ascii_whitespace) {
      return Ok(None);
    }
    let payload: PushPayload = serde_json::from_slice(data)
      .map_err(|e| AgentError::MalformedPushPayload(e.to_string()))?;
    if payload.title.trim().is_empty() {
      return Err(AgentError::MalformedPushPayload(
        "title must not be empty".to_string(),
      ));
    }
    Ok(Some(payload))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

/// What the platform is asked to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Target url opened by the `open` action
  pub data: String,
  pub actions: Vec<NotificationAction>,
}

/// Static presentation settings for notifications.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotificationStyle {
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub open_icon: String,
  pub close_icon: String,
}

impl Default for NotificationStyle {
  fn default() -> Self {
    Self {
      icon: "/static/images/icon-192x192.png".to_string(),
      badge: "/static/images/badge-72x72.png".to_string(),
      vibrate: vec![100, 50, 100],
      open_icon: "/static/images/checkmark.png".to_string(),
      close_icon: "/static/images/xmark.png".to_string(),
    }
  }
}

impl NotificationStyle {
  pub fn render(&self, payload: PushPayload) -> Notification {
    Notification {
      title: payload.title,
      body: payload.body,
      icon: self.icon.clone(),
      badge: self.badge.clone(),
      vibrate: self.vibrate.clone(),
      data: payload.url,
      actions: vec![
        NotificationAction {
          action: "open".to_string(),
          title: "Open".to_string(),
          icon: self.open_icon.clone(),
        },
        NotificationAction {
          action: "close".to_string(),
          title: "Close".to_string(),
          icon: self.close_icon.clone(),
        },
      ],
    }
  }
}

/// Platform facility that renders notifications.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: Notification) -> Result<()>;
}

/// Renders notifications as log records.
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: Notification) -> Result<()> {
    info!(
      title = %notification.title,
      body = %notification.body,
      url = %notification.data,
      "Notification"
    );
    Ok(())
  }
}

pub struct PushBridge<N: Notifier> {
  notifier: N,
  style: NotificationStyle,
  clients: Arc<Clients>,
}

impl<N: Notifier> PushBridge<N> {
  pub fn new(notifier: N, style: NotificationStyle, clients: Arc<Clients>) -> Self {
    Self {
      notifier,
      style,
      clients,
    }
  }

  /// Show a notification for a push message. Returns what was shown.
  pub fn on_push(&self, data: &[u8]) -> Result<Option<Notification>> {
    let Some(payload) = PushPayload::parse(data)? else {
      debug!("Empty push message ignored");
      return Ok(None);
    };
    let notification = self.style.render(payload);
    self.notifier.show(notification.clone())?;
    Ok(Some(notification))
  }

  /// Handle a click on a shown notification. The `open` action opens a page
  /// at the notification's url (or `/`); anything else only dismisses.
  /// Returns the id of the opened page.
  pub fn on_notification_click(&self, action: &str, data: Option<&str>) -> Option<u64> {
    if action != "open" {
      debug!(action, "Notification dismissed");
      return None;
    }
    let url = data.filter(|u| !u.is_empty()).unwrap_or("/");
    Some(self.clients.open_window(url))
  }
}
