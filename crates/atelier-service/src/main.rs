//! Main entry point for the atelier service.
//!
//! Runs the production engine for one shop: it seeds the configured tailors,
//! keeps the backlog moving, and logs every committed event so notification
//! delivery can hang off the same stream. It also prices custom-order
//! configurations from the command line.

use atelier_config::Config;
use atelier_core::AtelierEngine;
use atelier_pricing::PricingService;
use atelier_types::{
	AtelierEvent, CapacityEvent, OrderEvent, PriceBreakdown, ProductionEvent, RawCustomOrderConfig,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;

mod factory_registry;

/// Command-line arguments for the atelier service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", global = true)]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info", global = true)]
	log_level: String,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
	/// Run the engine until interrupted (default)
	Run,
	/// Price a custom-order configuration stored as JSON
	Quote {
		/// Path to the configuration JSON
		file: PathBuf,
	},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let config = Config::from_file(&args.config.to_string_lossy()).await?;
	tracing::info!("Loaded configuration [{}]", config.shop.id);

	match args.command.unwrap_or(Command::Run) {
		Command::Run => run(config).await,
		Command::Quote { file } => {
			let breakdown = quote_file(&config, &file).await?;
			println!("{}", serde_json::to_string_pretty(&breakdown)?);
			Ok(())
		},
	}
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
	let engine = factory_registry::build_engine_from_config(config)?;
	engine.initialize().await?;

	let logger = spawn_event_logger(&engine);
	tracing::info!("Started atelier");
	engine.run().await?;

	engine.shutdown().await?;
	logger.abort();
	tracing::info!("Stopped atelier");
	Ok(())
}

/// Prices the raw configuration in `path` against the configured table.
async fn quote_file(
	config: &Config,
	path: &Path,
) -> Result<PriceBreakdown, Box<dyn std::error::Error>> {
	let contents = tokio::fs::read_to_string(path).await?;
	let raw: RawCustomOrderConfig = serde_json::from_str(&contents)?;
	Ok(PricingService::new(&config.pricing).quote_raw(raw)?)
}

/// Logs every event on the bus. Delivery channels (email, SMS, chat)
/// subscribe the same way.
fn spawn_event_logger(engine: &AtelierEngine) -> tokio::task::JoinHandle<()> {
	let mut events = engine.event_bus().subscribe();
	tokio::spawn(async move {
		loop {
			match events.recv().await {
				Ok(event) => log_event(&event),
				Err(RecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, "Event logger fell behind");
				},
				Err(RecvError::Closed) => break,
			}
		}
	})
}

fn log_event(event: &AtelierEvent) {
	match event {
		AtelierEvent::Order(OrderEvent::Created {
			order_id, total, ..
		}) => {
			tracing::info!(%order_id, total = ?total, "Order placed");
		},
		AtelierEvent::Order(OrderEvent::StatusChanged {
			order_id,
			from,
			to,
			actor,
			..
		}) => {
			tracing::info!(%order_id, %from, %to, %actor, "Order status changed");
		},
		AtelierEvent::Production(ProductionEvent::Assigned {
			queue_item_id,
			tailor_id,
			expected_completion_at,
		}) => {
			tracing::info!(%queue_item_id, %tailor_id, %expected_completion_at, "Tailor assigned");
		},
		AtelierEvent::Production(ProductionEvent::Backlogged {
			queue_item_id,
			reason,
		}) => {
			tracing::warn!(%queue_item_id, %reason, "Order waiting for capacity");
		},
		AtelierEvent::Capacity(CapacityEvent::Reset {
			tailor_id,
			business_day,
		}) => {
			tracing::debug!(%tailor_id, %business_day, "Capacity reset");
		},
		other => tracing::debug!(event = ?other, "Event"),
	}
}
