#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use anyhow::anyhow;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use gigchat_server::config;
use gigchat_server::server::notify::Notifier;
use gigchat_server::server::pipeline::MessagePipeline;
use gigchat_server::server::room_hub::{RoomHub, RoomHubConfig};
use gigchat_server::server::routes::{AppState, HealthState, build_router};
use gigchat_server::server::store::{Directory, MemoryStore, MessageStore, SqliteStore};
use gigchat_server::server::uploads::UploadStore;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: gigchat_server [--bind host:port]\n\
\n\
Options:\n\
\t--bind    Bind address (default: 127.0.0.1:8090)\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind = "127.0.0.1:8090".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected host:port)");
					usage_and_exit();
				}
				bind = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	bind.parse().unwrap_or_else(|e| {
		eprintln!("invalid bind address {bind}: {e}");
		usage_and_exit();
	})
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,gigchat_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("gigchat_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let bind_addr = parse_args();

	let config_path = config::default_config_path()?;
	let server_cfg = config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let hmac_secret = server_cfg
		.server
		.auth_hmac_secret
		.clone()
		.ok_or_else(|| anyhow!("auth_hmac_secret must be configured (config file or GIGCHAT_AUTH_HMAC_SECRET)"))?;

	if server_cfg.server.service_token.is_none() {
		warn!("no service_token configured; /internal/events is disabled");
	}

	let uploads = Arc::new(UploadStore::new(
		server_cfg.uploads.dir.clone(),
		server_cfg.uploads.max_file_bytes,
		server_cfg.uploads.max_files,
	)?);
	info!(dir = %server_cfg.uploads.dir.display(), "upload store ready");

	let (directory, message_store): (Arc<dyn Directory>, Arc<dyn MessageStore>) = if server_cfg.persistence.enabled {
		let url = server_cfg
			.persistence
			.database_url
			.as_deref()
			.ok_or_else(|| anyhow!("persistence enabled but no database_url configured"))?;
		let store = Arc::new(SqliteStore::connect(url).await?);
		info!("sqlite persistence enabled");
		(store.clone(), store)
	} else {
		let store = Arc::new(MemoryStore::new());
		warn!("persistence disabled; history is in-memory and lost on restart");
		(store.clone(), store)
	};

	let hub = RoomHub::new(RoomHubConfig::default());
	let pipeline = Arc::new(MessagePipeline::new(directory.clone(), message_store, hub.clone()));
	let notifier = Notifier::new(hub.clone());
	let health = HealthState::new();

	let state = AppState {
		hmac_secret,
		service_token: server_cfg.server.service_token.clone(),
		directory,
		pipeline,
		hub,
		notifier,
		uploads,
		health: health.clone(),
		next_conn_id: Arc::new(AtomicU64::new(1)),
	};

	let router = build_router(state);
	let listener = tokio::net::TcpListener::bind(bind_addr).await?;
	health.mark_ready();
	info!(bind = %bind_addr, "gigchat_server listening");

	axum::serve(listener, router).await?;

	Ok(())
}
