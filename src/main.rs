mod agent;
mod cache;
mod clients;
mod config;
mod db;
mod error;
mod event;
mod fetch;
mod host;
mod lifecycle;
mod logging;
mod policy;
mod push;
mod queue;
mod sync;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::agent::{Agent, Collaborators};
use crate::cache::SqliteCacheStore;
use crate::clients::Clients;
use crate::config::Config;
use crate::event::{Event, EventOutcome, Ticker};
use crate::fetch::{AbortController, HttpNetwork, Network, Request, RequestMode, Response};
use crate::host::Host;
use crate::policy::FetchOutcome;
use crate::push::LogNotifier;
use crate::queue::{ActionQueue, SqliteActionQueue};
use crate::sync::HttpSyncEndpoint;

type LiveAgent = Agent<SqliteCacheStore, HttpNetwork, SqliteActionQueue, HttpSyncEndpoint, LogNotifier>;
type LiveHost = Host<SqliteCacheStore, HttpNetwork, SqliteActionQueue, HttpSyncEndpoint, LogNotifier>;

#[derive(Parser, Debug)]
#[command(name = "offline-agent")]
#[command(about = "Offline caching agent: versioned asset cache, offline fallback and action sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-agent/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep cache and queue in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the manifest into a new generation for the configured version
  Install,
  /// Activate the installed version, deleting older generations
  Activate,
  /// Fetch a URL through the agent and write the body to stdout
  Fetch {
    url: Url,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Drain the pending action queue now
  Sync,
  /// Report that connectivity came back, draining the pending action queue
  Online,
  /// Queue an action (JSON) for the next sync
  Enqueue { payload: String },
  /// List pending actions as JSON
  Queue,
  /// Deliver a push message (JSON) and show the resulting notification
  Push { payload: String },
  /// Simulate a click on a notification action
  Click {
    action: String,
    #[arg(long)]
    url: Option<String>,
  },
  /// Resume or install the configured version, then sync on an interval until interrupted
  Run,
}

/// Storage and transport shared by every instance built in this process.
struct Runtime {
  config: Config,
  store: Arc<SqliteCacheStore>,
  network: Arc<HttpNetwork>,
  queue: Arc<SqliteActionQueue>,
  endpoint: HttpSyncEndpoint,
  clients: Arc<Clients>,
}

impl Runtime {
  fn new(config: Config, ephemeral: bool) -> Result<Self> {
    let (cache_conn, queue_conn) = if ephemeral {
      (db::open_in_memory()?, db::open_in_memory()?)
    } else {
      let path = match &config.database {
        Some(path) => path.clone(),
        None => db::default_path()?,
      };
      info!(path = %path.display(), "Opening database");
      (db::open(&path)?, db::open(&path)?)
    };

    let network = HttpNetwork::new(config.origin_policy(), config.connect_timeout())?;
    let endpoint = HttpSyncEndpoint::new(config.sync_endpoint()?, Config::get_sync_token())?;

    Ok(Self {
      store: Arc::new(SqliteCacheStore::new(cache_conn)),
      network: Arc::new(network),
      queue: Arc::new(SqliteActionQueue::new(queue_conn)),
      endpoint,
      clients: Arc::new(Clients::new()),
      config,
    })
  }

  fn agent(&self) -> Result<LiveAgent> {
    Ok(Agent::new(
      self.config.agent_settings()?,
      Collaborators {
        store: self.store.clone(),
        network: self.network.clone(),
        queue: self.queue.clone(),
        endpoint: self.endpoint.clone(),
        notifier: LogNotifier,
        clients: self.clients.clone(),
      },
    ))
  }

  /// Host serving the configured version, if an earlier run installed it.
  async fn resumed_host(&self) -> Result<LiveHost> {
    let host = Host::new();
    if let Err(e) = host.resume(self.agent()?).await {
      warn!("Version {} not active, run `install` first: {}", self.config.version, e);
    }
    Ok(host)
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let log_dir = if args.ephemeral {
    None
  } else {
    Some(db::data_dir()?.join("logs"))
  };
  let _guard = logging::init(log_dir.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let runtime = Runtime::new(config, args.ephemeral)?;

  match args.command {
    Command::Install => {
      let agent = runtime.agent()?;
      if let EventOutcome::Installed(report) = agent.dispatch(Event::Install).await? {
        println!("Installed {} ({} entries)", report.version, report.entries);
      }
    }
    Command::Activate => {
      let report = runtime.agent()?.restore().await?;
      println!(
        "Activated {}; deleted generations: {:?}",
        runtime.config.version, report.deleted
      );
    }
    Command::Fetch {
      url,
      navigate,
      method,
      data,
    } => {
      let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
      let controller = AbortController::new();
      let mut request = Request::new(method, url).with_signal(controller.signal());
      if navigate {
        request.mode = RequestMode::Navigate;
      }
      if let Some(data) = data {
        request = request.with_body(data.into_bytes());
      }

      let abort = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          controller.abort();
        }
      });

      let host = runtime.resumed_host().await?;
      let response = match host.dispatch(Event::Fetch(request.clone())).await? {
        EventOutcome::Fetch(FetchOutcome::Respond(response)) => response,
        _ => runtime.network.fetch(&request).await?,
      };
      abort.abort();
      write_response(&response)?;
    }
    Command::Sync => {
      let host = runtime.resumed_host().await?;
      let tag = runtime.config.sync.tag.clone();
      match host.dispatch(Event::Sync { tag }).await? {
        EventOutcome::Synced(Some(report)) => {
          println!("{}", serde_json::to_string_pretty(&report.summary())?)
        }
        EventOutcome::Synced(None) => println!("Sync already in progress"),
        _ => println!("No active version, nothing synced"),
      }
    }
    Command::Online => {
      let host = runtime.resumed_host().await?;
      match host.dispatch(Event::Online).await? {
        EventOutcome::Synced(Some(report)) => {
          println!("{}", serde_json::to_string_pretty(&report.summary())?)
        }
        EventOutcome::Synced(None) => println!("Sync already in progress"),
        _ => println!("No active version, nothing synced"),
      }
    }
    Command::Enqueue { payload } => {
      let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Invalid action JSON: {}", e))?;
      let action = runtime.queue.enqueue(&payload)?;
      println!("Queued action {}", action.id);
    }
    Command::Queue => {
      let actions = runtime.queue.list()?;
      println!("{}", serde_json::to_string_pretty(&actions)?);
    }
    Command::Push { payload } => {
      let host = runtime.resumed_host().await?;
      match host.dispatch(Event::Push(payload.into_bytes())).await? {
        EventOutcome::Notified(Some(notification)) => {
          println!("{}", serde_json::to_string_pretty(&notification)?)
        }
        _ => println!("No notification shown"),
      }
    }
    Command::Click { action, url } => {
      let host = runtime.resumed_host().await?;
      let event = Event::NotificationClick { action, data: url };
      if let EventOutcome::WindowOpened(Some(_)) = host.dispatch(event).await? {
        for client in runtime.clients.match_all() {
          println!("Opened {}", client.url);
        }
      }
    }
    Command::Run => run(&runtime).await?,
  }

  Ok(())
}

async fn run(runtime: &Runtime) -> Result<()> {
  // This process stands in for one open page of the app
  let page = runtime.clients.register(runtime.config.origin.as_str());
  let host = LiveHost::new();
  host.start(runtime.agent()?).await?;

  let mut messages = runtime.clients.subscribe();
  let mut ticker = Ticker::new(
    runtime.config.sync_interval(),
    runtime.config.sync.tag.clone(),
    runtime.config.sync.periodic_tag.clone(),
  );

  info!(version = %runtime.config.version, "Agent running, press Ctrl-C to stop");
  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      Ok(message) = messages.recv() => {
        info!(message = %serde_json::to_string(&message)?, "Client message");
      }
      Some(event) = ticker.next() => {
        if let Err(e) = host.dispatch(event).await {
          warn!("Scheduled event failed: {}", e);
        }
      }
    }
  }

  runtime.clients.unregister(page);
  info!("Shutting down");
  Ok(())
}

fn write_response(response: &Response) -> Result<()> {
  eprintln!("{} {} ({})", response.status, response.status_text, response.kind);
  for (name, value) in &response.headers {
    eprintln!("{}: {}", name, value);
  }
  let mut stdout = std::io::stdout().lock();
  stdout.write_all(&response.body)?;
  stdout.flush()?;
  Ok(())
}
