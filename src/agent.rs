//! One agent instance: lifecycle, interception, sync and push wired to an
//! event dispatcher.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::clients::{ClientMessage, Clients};
use crate::error::AgentError;
use crate::event::{Event, EventOutcome};
use crate::fetch::{Network, OriginPolicy, Request, Response};
use crate::lifecycle::{ActivateReport, LifecycleController};
use crate::policy::{FetchOutcome, InterceptionPolicy};
use crate::push::{NotificationStyle, Notifier, PushBridge};
use crate::queue::ActionQueue;
use crate::sync::{SyncCoordinator, SyncEndpoint};

/// Static settings of one deployed version.
#[derive(Debug, Clone)]
pub struct AgentSettings {
  pub version: String,
  pub origins: OriginPolicy,
  pub offline_url: Url,
  pub manifest: Vec<String>,
  pub sync_tag: String,
  pub periodic_tag: String,
  pub notification: NotificationStyle,
}

/// Shared collaborators handed to every instance in a host.
pub struct Collaborators<S, N, Q, E, P> {
  pub store: Arc<S>,
  pub network: Arc<N>,
  pub queue: Arc<Q>,
  pub endpoint: E,
  pub notifier: P,
  pub clients: Arc<Clients>,
}

pub struct Agent<S, N, Q, E, P>
where
  S: CacheStore,
  N: Network,
  Q: ActionQueue,
  E: SyncEndpoint,
  P: Notifier,
{
  lifecycle: LifecycleController<S, N>,
  policy: InterceptionPolicy<S, N>,
  sync: SyncCoordinator<Q, E>,
  push: PushBridge<P>,
  clients: Arc<Clients>,
  sync_tag: String,
  periodic_tag: String,
}

impl<S, N, Q, E, P> Agent<S, N, Q, E, P>
where
  S: CacheStore,
  N: Network,
  Q: ActionQueue,
  E: SyncEndpoint,
  P: Notifier,
{
  pub fn new(settings: AgentSettings, parts: Collaborators<S, N, Q, E, P>) -> Self {
    let Collaborators {
      store,
      network,
      queue,
      endpoint,
      notifier,
      clients,
    } = parts;

    let lifecycle = LifecycleController::new(
      store.clone(),
      network.clone(),
      clients.clone(),
      settings.origins.clone(),
      settings.version.clone(),
      settings.manifest,
    );
    let policy = InterceptionPolicy::new(
      store,
      network,
      settings.origins,
      settings.version,
      settings.offline_url,
    );

    Self {
      lifecycle,
      policy,
      sync: SyncCoordinator::new(queue, endpoint, clients.clone()),
      push: PushBridge::new(notifier, settings.notification, clients.clone()),
      clients,
      sync_tag: settings.sync_tag,
      periodic_tag: settings.periodic_tag,
    }
  }

  pub fn version(&self) -> &str {
    self.lifecycle.version()
  }

  /// Whether an earlier run already installed this version.
  pub fn is_installed(&self) -> Result<bool> {
    self.lifecycle.is_installed()
  }

  /// Pick up a version installed by an earlier run without re-installing.
  pub async fn restore(&self) -> Result<ActivateReport> {
    self.lifecycle.restore().await
  }

  /// Handle one event to completion.
  pub async fn dispatch(&self, event: Event) -> Result<EventOutcome> {
    debug!(kind = event.kind(), version = %self.version(), "Dispatching event");

    match event {
      Event::Install => Ok(EventOutcome::Installed(self.lifecycle.install().await?)),
      Event::Activate => Ok(EventOutcome::Activated(self.lifecycle.activate().await?)),
      Event::Fetch(request) => Ok(EventOutcome::Fetch(self.on_fetch(&request).await?)),
      Event::Sync { tag } if tag == self.sync_tag => self.background_sync().await,
      Event::PeriodicSync { tag } if tag == self.periodic_tag => Ok(self.update_asset_data()),
      Event::PeriodicSync { tag } if tag == self.sync_tag => self.background_sync().await,
      Event::Online => self.background_sync().await,
      Event::Push(data) => Ok(EventOutcome::Notified(self.push.on_push(&data)?)),
      Event::NotificationClick { action, data } => Ok(EventOutcome::WindowOpened(
        self.push.on_notification_click(&action, data.as_deref()),
      )),
      Event::Sync { tag } | Event::PeriodicSync { tag } => {
        debug!(%tag, "Ignoring unknown sync tag");
        Ok(EventOutcome::Ignored)
      }
    }
  }

  /// Requests pass through until this instance is active.
  async fn on_fetch(&self, request: &Request) -> Result<FetchOutcome, AgentError> {
    if !self.lifecycle.is_active() {
      return Ok(FetchOutcome::PassThrough);
    }
    match self.policy.handle(request).await {
      Err(AgentError::OfflineUnavailable { url }) => {
        warn!(%url, "No offline page cached, responding 503");
        Ok(FetchOutcome::Respond(Response::service_unavailable()))
      }
      other => other,
    }
  }

  async fn background_sync(&self) -> Result<EventOutcome> {
    info!("Background sync triggered");
    Ok(EventOutcome::Synced(self.sync.drain().await?))
  }

  fn update_asset_data(&self) -> EventOutcome {
    info!("Updating asset data in background");
    let notified = self.clients.post_all(ClientMessage::DataUpdated {
      message: "Asset data updated in background".to_string(),
    });
    EventOutcome::DataUpdated { notified }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::db;
  use crate::queue::SqliteActionQueue;
  use crate::testing::{InstrumentedStore, MockNetwork, MockSyncEndpoint, RecordingNotifier};
  use serde_json::json;

  pub(crate) type TestAgent =
    Agent<InstrumentedStore, MockNetwork, SqliteActionQueue, MockSyncEndpoint, RecordingNotifier>;

  pub(crate) fn settings(version: &str) -> AgentSettings {
    AgentSettings {
      version: version.to_string(),
      origins: OriginPolicy::new(
        Url::parse("https://app.example").unwrap(),
        vec!["cdn.jsdelivr.net".to_string()],
      ),
      offline_url: Url::parse("https://app.example/offline.html").unwrap(),
      manifest: vec!["/".to_string(), "/offline.html".to_string()],
      sync_tag: "background-sync".to_string(),
      periodic_tag: "asset-updates".to_string(),
      notification: NotificationStyle::default(),
    }
  }

  pub(crate) struct Fixture {
    pub store: Arc<InstrumentedStore>,
    pub network: MockNetwork,
    pub queue: Arc<SqliteActionQueue>,
    pub endpoint: MockSyncEndpoint,
    pub clients: Arc<Clients>,
  }

  impl Fixture {
    pub fn new() -> Self {
      Self {
        store: Arc::new(InstrumentedStore::new()),
        network: MockNetwork::new()
          .with_response("https://app.example/", Response::new(200, "index"))
          .with_response("https://app.example/offline.html", Response::new(200, "offline")),
        queue: Arc::new(SqliteActionQueue::new(db::open_in_memory().unwrap())),
        endpoint: MockSyncEndpoint::new(),
        clients: Arc::new(Clients::new()),
      }
    }

    pub fn agent(&self, settings: AgentSettings) -> TestAgent {
      Agent::new(
        settings,
        Collaborators {
          store: self.store.clone(),
          network: Arc::new(self.network.clone()),
          queue: self.queue.clone(),
          endpoint: self.endpoint.clone(),
          notifier: RecordingNotifier::default(),
          clients: self.clients.clone(),
        },
      )
    }
  }

  fn fetch(url: &str) -> Event {
    Event::Fetch(Request::get(Url::parse(url).unwrap()))
  }

  fn navigate(url: &str) -> Event {
    Event::Fetch(Request::navigate(Url::parse(url).unwrap()))
  }

  async fn activated(fixture: &Fixture) -> TestAgent {
    let agent = fixture.agent(settings("v1"));
    agent.dispatch(Event::Install).await.unwrap();
    agent.dispatch(Event::Activate).await.unwrap();
    agent
  }

  #[tokio::test]
  async fn test_requests_pass_through_until_active() {
    let fixture = Fixture::new();
    let agent = fixture.agent(settings("v1"));

    let outcome = agent.dispatch(fetch("https://app.example/")).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Fetch(FetchOutcome::PassThrough)));

    agent.dispatch(Event::Install).await.unwrap();
    let outcome = agent.dispatch(fetch("https://app.example/")).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Fetch(FetchOutcome::PassThrough)));
    assert_eq!(fixture.network.calls().len(), 2);

    agent.dispatch(Event::Activate).await.unwrap();
    match agent.dispatch(fetch("https://app.example/")).await.unwrap() {
      EventOutcome::Fetch(FetchOutcome::Respond(resp)) => assert_eq!(resp.body, b"index"),
      other => panic!("unexpected outcome: {:?}", other),
    }
    // Served from the installed generation
    assert_eq!(fixture.network.calls().len(), 2);
  }

  #[tokio::test]
  async fn test_offline_navigation_uses_installed_offline_page() {
    let fixture = Fixture::new();
    let agent = activated(&fixture).await;
    fixture.network.set_offline(true);

    match agent.dispatch(navigate("https://app.example/assets/7")).await.unwrap() {
      EventOutcome::Fetch(FetchOutcome::Respond(resp)) => {
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"offline");
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_missing_offline_page_becomes_503() {
    let fixture = Fixture::new();
    let mut s = settings("v1");
    s.manifest = vec!["/".to_string()];
    let agent = fixture.agent(s);
    agent.dispatch(Event::Install).await.unwrap();
    agent.dispatch(Event::Activate).await.unwrap();
    fixture.network.set_offline(true);

    match agent.dispatch(navigate("https://app.example/assets/7")).await.unwrap() {
      EventOutcome::Fetch(FetchOutcome::Respond(resp)) => assert_eq!(resp.status, 503),
      other => panic!("unexpected outcome: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_sync_tags_route_to_drain() {
    let fixture = Fixture::new();
    let agent = activated(&fixture).await;
    fixture.queue.enqueue(&json!({"op": "checkout"})).unwrap();

    let outcome = agent
      .dispatch(Event::Sync {
        tag: "something-else".to_string(),
      })
      .await
      .unwrap();
    assert!(matches!(outcome, EventOutcome::Ignored));
    assert_eq!(fixture.queue.list().unwrap().len(), 1);

    let outcome = agent
      .dispatch(Event::Sync {
        tag: "background-sync".to_string(),
      })
      .await
      .unwrap();
    match outcome {
      EventOutcome::Synced(Some(report)) => assert_eq!(report.synced.len(), 1),
      other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(fixture.queue.list().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_online_triggers_drain() {
    let fixture = Fixture::new();
    let agent = activated(&fixture).await;
    fixture.queue.enqueue(&json!({"op": "note"})).unwrap();

    agent.dispatch(Event::Online).await.unwrap();
    assert!(fixture.queue.list().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_periodic_sync_posts_data_updated() {
    let fixture = Fixture::new();
    let agent = activated(&fixture).await;
    fixture.clients.register("/");
    let mut rx = fixture.clients.subscribe();

    let outcome = agent
      .dispatch(Event::PeriodicSync {
        tag: "asset-updates".to_string(),
      })
      .await
      .unwrap();

    assert!(matches!(outcome, EventOutcome::DataUpdated { notified: 1 }));
    assert!(matches!(
      rx.try_recv().unwrap(),
      ClientMessage::DataUpdated { .. }
    ));
  }

  #[tokio::test]
  async fn test_push_and_click() {
    let fixture = Fixture::new();
    let agent = activated(&fixture).await;

    let outcome = agent
      .dispatch(Event::Push(
        br#"{"title":"Audit","body":"Audit starts","url":"/audits/3"}"#.to_vec(),
      ))
      .await
      .unwrap();
    assert!(matches!(outcome, EventOutcome::Notified(Some(_))));

    let err = agent
      .dispatch(Event::Push(br#"{"title":"Audit"}"#.to_vec()))
      .await
      .unwrap_err();
    assert!(matches!(
      err.downcast_ref::<AgentError>(),
      Some(AgentError::MalformedPushPayload(_))
    ));

    let outcome = agent
      .dispatch(Event::NotificationClick {
        action: "open".to_string(),
        data: Some("/audits/3".to_string()),
      })
      .await
      .unwrap();
    assert!(matches!(outcome, EventOutcome::WindowOpened(Some(_))));
  }
}
