//! Deployment slot: routes events to the active instance and swaps in new
//! versions without a service gap.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::agent::Agent;
use crate::cache::CacheStore;
use crate::event::{Event, EventOutcome};
use crate::fetch::Network;
use crate::policy::FetchOutcome;
use crate::push::Notifier;
use crate::queue::ActionQueue;
use crate::sync::SyncEndpoint;

pub struct Host<S, N, Q, E, P>
where
  S: CacheStore,
  N: Network,
  Q: ActionQueue,
  E: SyncEndpoint,
  P: Notifier,
{
  active: RwLock<Option<Arc<Agent<S, N, Q, E, P>>>>,
}

impl<S, N, Q, E, P> Host<S, N, Q, E, P>
where
  S: CacheStore,
  N: Network,
  Q: ActionQueue,
  E: SyncEndpoint,
  P: Notifier,
{
  pub fn new() -> Self {
    Self {
      active: RwLock::new(None),
    }
  }

  pub async fn active_version(&self) -> Option<String> {
    self
      .active
      .read()
      .await
      .as_ref()
      .map(|agent| agent.version().to_string())
  }

  /// Install `agent` next to the running instance, then activate it and make
  /// it the one serving requests.
  ///
  /// The current instance keeps serving during install. Activation holds the
  /// slot exclusively, so events arriving meanwhile wait for the new instance
  /// instead of reading a generation that is being deleted. Events already
  /// running on the old instance finish there. If install fails the current
  /// instance stays active.
  pub async fn deploy(&self, agent: Agent<S, N, Q, E, P>) -> Result<()> {
    let version = agent.version().to_string();

    if let Err(e) = agent.dispatch(Event::Install).await {
      error!(%version, "Install failed, previous version keeps serving: {}", e);
      return Err(e);
    }

    let mut slot = self.active.write().await;
    agent.dispatch(Event::Activate).await?;
    let previous = slot.replace(Arc::new(agent));
    info!(
      %version,
      previous = previous.as_ref().map(|a| a.version()).unwrap_or("<none>"),
      "Now serving"
    );
    Ok(())
  }

  /// Make an already-installed `agent` the active instance, as after a
  /// process restart.
  pub async fn resume(&self, agent: Agent<S, N, Q, E, P>) -> Result<()> {
    let mut slot = self.active.write().await;
    agent.restore().await?;
    info!(version = %agent.version(), "Resumed");
    *slot = Some(Arc::new(agent));
    Ok(())
  }

  /// Serve `agent`'s version: resume it when an earlier run already
  /// installed it, otherwise install and activate it.
  pub async fn start(&self, agent: Agent<S, N, Q, E, P>) -> Result<()> {
    if agent.is_installed()? {
      self.resume(agent).await
    } else {
      self.deploy(agent).await
    }
  }

  /// Route an event to the active instance. Without one, fetches pass
  /// through and everything else is ignored.
  ///
  /// The slot is only held long enough to pick the instance, so a slow
  /// event never delays a deploy or the events behind it.
  pub async fn dispatch(&self, event: Event) -> Result<EventOutcome> {
    let active = self.active.read().await.clone();
    match active {
      Some(agent) => agent.dispatch(event).await,
      None => match event {
        Event::Fetch(_) => Ok(EventOutcome::Fetch(FetchOutcome::PassThrough)),
        _ => Ok(EventOutcome::Ignored),
      },
    }
  }
}

impl<S, N, Q, E, P> Default for Host<S, N, Q, E, P>
where
  S: CacheStore,
  N: Network,
  Q: ActionQueue,
  E: SyncEndpoint,
  P: Notifier,
{
  fn default() -> Self {
    Self::new()
  }
}
