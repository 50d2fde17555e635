use anyhow::{Context, Result};
use audiod_core::{AppConfig, ConfigDiff, DeviceRole, StreamInfo};
use audiod_device::{
    AdapterAttr, AdapterRegistry, DeviceManager, RouterCenter, RouterRegistry, SourceAdapter,
};
use audiod_ipc::{serve_connection, AudioServer, ConnectionId, Dispatcher, ServerParts};
use audiod_policy::{Orchestrator, ParameterStore, VolumePolicy};
use audiod_stream::{CaptureEndpoint, Endpoint, EndpointHandle, StreamService};
use clap::Parser;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Parser)]
#[command(name = "audiod", about = "Audio routing and stream transport daemon")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "audiod.toml")]
    config: PathBuf,

    /// Do not watch the configuration file for changes
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from_file(&cli.config)
        .with_context(|| format!("failed to load config from {:?}", cli.config))?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.general.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, filter_handle) = reload::Layer::new(env_filter);

    let subscriber = Registry::default().with(filter_layer).with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false),
    );
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    tracing::info!("audiod starting");

    // ── Devices and routing ───────────────────────────────────

    let devices = Arc::new(DeviceManager::new(config.privacy.clone()));
    let device_rx = devices.subscribe();
    for seed in &config.device {
        let change = devices.on_device_connected(seed.to_descriptor());
        tracing::info!("seeded device {}", change.device);
    }

    let router = RouterCenter::new(
        Arc::clone(&devices),
        &config.routing,
        &RouterRegistry::new(),
    )
    .context("failed to build router chains")?;

    let buffer_dir = PathBuf::from(&config.ipc.buffer_dir);
    std::fs::create_dir_all(&buffer_dir)
        .with_context(|| format!("failed to create buffer dir {buffer_dir:?}"))?;
    let streams = Arc::new(StreamService::with_buffer_dir(buffer_dir));
    let session_rx = streams
        .take_events()
        .context("session events already taken")?;

    let orchestrator = Arc::new(Orchestrator::new(Arc::new(router)));
    let event_loop = Arc::clone(&orchestrator).spawn_event_loop(device_rx, session_rx);

    let volume = Arc::new(VolumePolicy::new(&config.volume, Arc::clone(&streams)));
    let parameters = Arc::new(ParameterStore::new(config.parameters.clone()));

    let mut parameter_rx = parameters.subscribe();
    tokio::spawn(async move {
        while let Some(change) = parameter_rx.recv().await {
            tracing::info!(
                network_id = ?change.network_id,
                key = %change.key,
                condition = %change.condition,
                value = %change.value,
                "audio parameter changed"
            );
        }
    });

    // ── Endpoints ─────────────────────────────────────────────

    let endpoints = start_render_endpoints(&config, &streams);
    let captures = start_capture_endpoints(&config, &streams);
    tracing::info!(
        "{} render and {} capture endpoint(s) running",
        endpoints.len(),
        captures.len()
    );

    // ── Config hot reload ─────────────────────────────────────

    let _watcher = if cli.no_watch {
        None
    } else {
        match spawn_config_watcher(
            cli.config.clone(),
            config.clone(),
            Arc::clone(&volume),
            Arc::clone(&parameters),
            filter_handle,
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!("config hot reload disabled: {e:#}");
                None
            }
        }
    };

    // ── IPC ───────────────────────────────────────────────────

    let server = Arc::new(AudioServer::new(ServerParts {
        streams: Arc::clone(&streams),
        orchestrator: Arc::clone(&orchestrator),
        volume,
        parameters,
    }));
    let dispatcher = Arc::new(Dispatcher::new(&config.ipc.interface_token, server));

    let socket_path = PathBuf::from(&config.ipc.socket_path);
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)
            .with_context(|| format!("failed to remove stale socket {socket_path:?}"))?;
    }
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("failed to bind {socket_path:?}"))?;
    tracing::info!("listening on {}", socket_path.display());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut next_conn: ConnectionId = 1;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let conn = next_conn;
                    next_conn += 1;
                    let dispatcher = Arc::clone(&dispatcher);
                    tokio::spawn(async move {
                        // Errors are logged by serve_connection itself.
                        let _ = serve_connection(stream, conn, dispatcher).await;
                    });
                }
                Err(e) => tracing::warn!("accept failed: {e}"),
            },
            _ = &mut shutdown => break,
        }
    }

    tracing::info!("shutting down");
    for handle in endpoints {
        handle.stop();
    }
    for handle in captures {
        handle.stop();
    }
    event_loop.abort();
    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::debug!("socket cleanup failed: {e}");
    }

    Ok(())
}

/// Stream format and cycle length shared by every endpoint.
fn endpoint_timing(config: &AppConfig) -> (StreamInfo, Duration) {
    let general = &config.general;
    let info = StreamInfo {
        sample_rate: general.sample_rate,
        channels: general.channels,
        format: general.format,
    };
    let interval =
        Duration::from_secs_f64(general.span_size_frames as f64 / general.sample_rate as f64);
    (info, interval)
}

/// One mixing endpoint per configured output device. A device whose adapter
/// cannot be opened is skipped so the rest of the daemon still runs.
fn start_render_endpoints(
    config: &AppConfig,
    streams: &Arc<StreamService>,
) -> Vec<EndpointHandle> {
    let general = &config.general;
    let (info, interval) = endpoint_timing(config);
    let adapters = AdapterRegistry::new();

    let mut handles = Vec::new();
    for seed in config.device.iter().filter(|d| d.role == DeviceRole::Output) {
        let device = seed.to_descriptor();
        let attr = AdapterAttr::new(device.clone(), info);
        let started = adapters
            .open_sink(&seed.adapter, &attr)
            .and_then(|sink| {
                Endpoint::new(
                    device.clone(),
                    info,
                    general.span_size_frames,
                    Arc::clone(streams),
                    sink,
                )
            })
            .and_then(|endpoint| endpoint.start(interval));
        match started {
            Ok(handle) => handles.push(handle),
            Err(e) => tracing::warn!(
                adapter = %seed.adapter,
                "no endpoint for {device}: {e}"
            ),
        }
    }
    handles
}

/// One capture loop per configured input device, skipped the same way.
fn start_capture_endpoints(
    config: &AppConfig,
    streams: &Arc<StreamService>,
) -> Vec<EndpointHandle<dyn SourceAdapter>> {
    let (info, interval) = endpoint_timing(config);
    let adapters = AdapterRegistry::new();

    let mut handles = Vec::new();
    for seed in config.device.iter().filter(|d| d.role == DeviceRole::Input) {
        let device = seed.to_descriptor();
        let attr = AdapterAttr::new(device.clone(), info);
        let started = adapters
            .open_source(&seed.adapter, &attr)
            .and_then(|source| {
                CaptureEndpoint::new(
                    device.clone(),
                    info,
                    config.general.span_size_frames,
                    Arc::clone(streams),
                    source,
                )
            })
            .and_then(|capture| capture.start(interval));
        match started {
            Ok(handle) => handles.push(handle),
            Err(e) => tracing::warn!(
                adapter = %seed.adapter,
                "no capture endpoint for {device}: {e}"
            ),
        }
    }
    handles
}

/// Watches the config file's directory and applies the reloadable part of
/// every change. The returned watcher must be kept alive.
fn spawn_config_watcher(
    path: PathBuf,
    initial: AppConfig,
    volume: Arc<VolumePolicy>,
    parameters: Arc<ParameterStore>,
    filter: FilterHandle,
) -> Result<RecommendedWatcher> {
    let file_name = path
        .file_name()
        .context("config path has no file name")?
        .to_os_string();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                && event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
            if relevant {
                let _ = tx.send(());
            }
        }
    })
    .context("notify watcher init failed")?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watch failed for {dir:?}"))?;
    tracing::info!(path = %path.display(), "watching config");

    tokio::spawn(async move {
        let mut current = initial;
        while rx.recv().await.is_some() {
            // Editors tend to emit several events per save.
            tokio::time::sleep(Duration::from_millis(100)).await;
            while rx.try_recv().is_ok() {}

            let next = match AppConfig::load_from_file(&path) {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!("config reload rejected: {e}");
                    continue;
                }
            };
            let diff = ConfigDiff::diff(&current, &next);
            apply_diff(&diff, &next, &volume, &parameters, &filter);
            current = next;
        }
    });

    Ok(watcher)
}

fn apply_diff(
    diff: &ConfigDiff,
    config: &AppConfig,
    volume: &VolumePolicy,
    parameters: &ParameterStore,
    filter: &FilterHandle,
) {
    if let Some(level) = &diff.log_level_change {
        match EnvFilter::try_new(level) {
            Ok(new_filter) => match filter.reload(new_filter) {
                Ok(()) => tracing::info!("log level now '{level}'"),
                Err(e) => tracing::warn!("log level reload failed: {e}"),
            },
            Err(e) => tracing::warn!("invalid log level '{level}': {e}"),
        }
    }
    if !diff.volume_changes.is_empty() {
        volume.apply_levels(&diff.volume_changes, &config.volume);
    }
    if !diff.parameter_changes.is_empty() {
        parameters.apply(&diff.parameter_changes);
    }
    for note in &diff.non_reloadable {
        tracing::warn!("{note}");
    }
}
