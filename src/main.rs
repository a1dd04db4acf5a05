use clap::{Parser, Subcommand};
use color_eyre::Result;
use portal_offline::app::App;
use portal_offline::config::Config;
use portal_offline::queue::DeliveryOutcome;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "portal-offline")]
#[command(about = "Offline-resilience layer for the WatchTheFall portal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/portal-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Portal origin, overrides the config file
  #[arg(short, long)]
  origin: Option<String>,

  /// Write logs to daily files in this directory instead of stderr
  #[arg(long)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Warm the cache, then probe and drain the queue until Ctrl-C
  Run,
  /// Resolve one GET through the cache proxy
  Fetch {
    /// Portal path or absolute URL
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Queue downloads and try to deliver them immediately
  Submit { urls: Vec<String> },
  /// Queue downloads without attempting delivery
  Enqueue { urls: Vec<String> },
  /// Run one drain cycle
  Drain,
  /// Probe the server and list queued downloads
  Status,
  /// Print the brand config, falling back to the offline copy
  Brands,
}

fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
  let filter =
    EnvFilter::try_from_env("PORTAL_OFFLINE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "portal-offline.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_dir.as_ref());

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    Config { origin, ..config }
  } else {
    config
  };

  let app = App::new(config)?;

  match args.command {
    Command::Run => app.run().await?,
    Command::Fetch { url, navigate } => {
      app.start_proxy().await;
      let response = app.fetch(&url, navigate).await?;
      println!("{} ({} bytes)", response.status, response.body.len());
    }
    Command::Submit { urls } => {
      for url in urls {
        match app.queue().submit(&url).await? {
          DeliveryOutcome::Delivered => println!("delivered  {}", url),
          DeliveryOutcome::Rejected(error) => println!("rejected   {}: {}", url, error),
          DeliveryOutcome::Retry => println!("queued     {}", url),
        }
      }
    }
    Command::Enqueue { urls } => {
      for url in urls {
        app.queue().enqueue(&url)?;
      }
      println!("{} queued", app.queue().pending()?.len());
    }
    Command::Drain => {
      let report = app.queue().drain().await;
      println!(
        "attempted {}, delivered {}, rejected {}, requeued {}",
        report.attempted, report.delivered, report.rejected, report.requeued
      );
    }
    Command::Status => {
      let state = app.monitor().probe().await;
      println!("server: {:?}", state);
      let pending = app.queue().pending()?;
      println!("queued downloads: {}", pending.len());
      for action in pending {
        println!("  {}  {}", action.timestamp, action.url);
      }
    }
    Command::Brands => {
      let brands = app.brands().load().await;
      println!("{}", serde_json::to_string_pretty(&brands)?);
    }
  }

  Ok(())
}
