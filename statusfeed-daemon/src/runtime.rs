use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use statusfeed_core::{config, CaseInsensitiveName};
use statusfeed_sync::{
    progress, ConfigPermissionsAuthority, JsonHistoryStore, StatusStore, SyncEngine, SyncReport,
    SyncScope,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{config_path, history_path, socket_path, statusfeed_root, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Everything the daemon tasks share.
#[derive(Clone)]
pub struct FeedState {
    pub home: PathBuf,
    pub store: Arc<StatusStore>,
    pub engine: Arc<SyncEngine>,
    pub authority: Arc<ConfigPermissionsAuthority>,
    /// Unix seconds of the last committed reconciliation, 0 before the first.
    pub last_sync_at_unix: Arc<RwLock<u64>>,
    pub started_at_unix: u64,
}

impl FeedState {
    /// State over `<home>/.statusfeed/` with an empty store.
    pub fn new(home: &Path) -> Self {
        let store = Arc::new(StatusStore::new());
        let authority = Arc::new(ConfigPermissionsAuthority::default());
        let history = Arc::new(JsonHistoryStore::new(history_path(home)));
        let engine = Arc::new(SyncEngine::new(store.clone(), history, authority.clone()));
        Self {
            home: home.to_path_buf(),
            store,
            engine,
            authority,
            last_sync_at_unix: Arc::new(RwLock::new(0)),
            started_at_unix: unix_seconds_now(),
        }
    }
}

struct SyncJob {
    scope: SyncScope,
    source: &'static str,
    respond_to: oneshot::Sender<Result<SyncReport, String>>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let state = FeedState::new(&home);
    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = sync_processor_task(state, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    // Populate the feed before the first reader arrives.
    match enqueue_sync(&sync_tx, SyncScope::All, "startup").await {
        Ok(report) => tracing::info!(entries = report.entries, "initial reconciliation completed"),
        Err(err) => tracing::warn!(error = %err, "initial reconciliation failed; feed is empty"),
    }

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(home, sync_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(state, sync_tx, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, processor_result, socket_result, signal_result) = tokio::join!(
        watcher_handle,
        processor_handle,
        socket_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn watcher_task(
    home: PathBuf,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = statusfeed_root(&home);
    // Canonicalize so that FSEvents paths (which arrive as real paths, e.g.
    // /private/var/... on macOS) match the config path comparison below.
    let root = fs::canonicalize(&root).unwrap_or(root);
    let config_file = root.join(config::CONFIG_FILE);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&root, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %root.display(), "watching configuration directory");

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                if !event.paths.iter().any(|path| path == &config_file) {
                    continue;
                }
                if !should_process_event(&mut debounce, &config_file, Instant::now()) {
                    continue;
                }

                match enqueue_sync(&sync_tx, SyncScope::All, "watcher").await {
                    Ok(report) => {
                        tracing::info!(
                            entries = report.entries,
                            placeholders = report.placeholders,
                            duration_ms = report.duration_ms,
                            "watcher-triggered reconciliation completed",
                        );
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "watcher-triggered reconciliation failed");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Runs reconciliation passes one at a time, in arrival order.
async fn sync_processor_task(
    state: FeedState,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                tracing::debug!(scope = %job.scope.label(), source = job.source, "reconciliation requested");

                let outcome = match run_pass(&state, job.scope).await {
                    Ok(report) => {
                        *state.last_sync_at_unix.write().await = unix_seconds_now();
                        Ok(report)
                    }
                    Err(err) => Err(err.to_string()),
                };

                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

/// Load the configuration from disk and reconcile `scope` against it.
///
/// A configuration that fails to load leaves the store as it was.
async fn run_pass(state: &FeedState, scope: SyncScope) -> Result<SyncReport, DaemonError> {
    let path = config_path(&state.home);
    let engine = state.engine.clone();
    let authority = state.authority.clone();
    tokio::task::spawn_blocking(move || -> Result<SyncReport, DaemonError> {
        let config = config::load_from(&path)?;
        authority.update(&config);
        Ok(engine.run(&config, &scope)?)
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("sync task join error: {err}")))?
}

async fn socket_server_task(
    state: FeedState,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state, sync_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: FeedState,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = if stop {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        } else {
            handle_request(&state, &sync_tx, request).await
        };

        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

/// Answer every command except `stop`.
async fn handle_request(
    state: &FeedState,
    sync_tx: &mpsc::Sender<SyncJob>,
    request: DaemonRequest,
) -> DaemonResponse {
    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(build_status_payload(state).await),
        "snapshot" => DaemonResponse::ok(json!(state.store.snapshot())),
        "feed" => match request.principal {
            Some(principal) => DaemonResponse::ok(json!(state.store.snapshot_visible_to(&principal))),
            None => DaemonResponse::error("feed requires a principal"),
        },
        "sync" => {
            let scope = match request.pipeline {
                Some(pipeline) => SyncScope::Pipeline(CaseInsensitiveName::from(pipeline)),
                None => SyncScope::All,
            };
            match enqueue_sync(sync_tx, scope, "socket").await {
                Ok(report) => DaemonResponse::ok(json!(report)),
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "progress" => match request.progress {
            Some(event) => {
                let outcome = progress::record(&state.store, event);
                DaemonResponse::ok(json!({ "outcome": outcome }))
            }
            None => DaemonResponse::error("progress requires an event"),
        },
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

async fn build_status_payload(state: &FeedState) -> Value {
    let last_sync_at_unix = *state.last_sync_at_unix.read().await;
    let snapshot = state.store.snapshot();
    let placeholders = snapshot.iter().filter(|e| e.is_placeholder()).count();

    json!({
        "running": true,
        "started_at_unix": state.started_at_unix,
        "last_sync_at_unix": last_sync_at_unix,
        "generation": state.store.generation(),
        "entries": snapshot.len(),
        "placeholders": placeholders,
        "config": config_path(&state.home).display().to_string(),
        "socket": socket_path(&state.home).display().to_string(),
    })
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    scope: SyncScope,
    source: &'static str,
) -> Result<SyncReport, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            scope,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = statusfeed_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use statusfeed_core::{Principal, ProjectName, StatusEntry};
    use statusfeed_sync::history::{self, HistoryFile, HistoryRecord};
    use statusfeed_sync::ProgressEvent;
    use tempfile::TempDir;
    use tokio::time::advance;

    const CONFIG: &str = r#"
admins:
  roles: [admin]
groups:
  - name: open
    pipelines:
      - name: pipeline1
        stages:
          - name: stage
            jobs:
              - name: job
  - name: locked
    authorization:
      view:
        users: [user3]
    pipelines:
      - name: pipeline2
        stages:
          - name: stage
"#;

    fn home_with_config(contents: &str) -> TempDir {
        let home = TempDir::new().expect("home");
        ensure_runtime_dirs(home.path()).expect("dirs");
        fs::write(config_path(home.path()), contents).expect("write config");
        home
    }

    /// Spawn a processor and return a sender wired to it.
    fn spawn_processor(state: &FeedState) -> (mpsc::Sender<SyncJob>, broadcast::Sender<()>) {
        let (sync_tx, sync_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(sync_processor_task(state.clone(), sync_rx, shutdown_rx));
        (sync_tx, shutdown_tx)
    }

    fn names(value: &Value) -> Vec<String> {
        let entries: Vec<StatusEntry> = serde_json::from_value(value.clone()).expect("entries");
        entries.iter().map(|e| e.name.to_string()).collect()
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_events() {
        let threshold = Duration::from_millis(100);
        let mut debounce = HashMap::<PathBuf, Instant>::new();
        let path = PathBuf::from("/tmp/.statusfeed/config.yaml");
        let mut sync_triggers = 0usize;

        for _ in 0..5 {
            if should_process_event_with_threshold(&mut debounce, &path, Instant::now(), threshold)
            {
                sync_triggers += 1;
            }
            advance(Duration::from_millis(10)).await;
        }

        advance(Duration::from_millis(150)).await;
        assert!(should_process_event_with_threshold(
            &mut debounce,
            &path,
            Instant::now(),
            threshold
        ));
        assert_eq!(
            sync_triggers, 1,
            "rapid saves should collapse to one reconciliation"
        );
    }

    #[tokio::test]
    async fn sync_request_reconciles_from_config_on_disk() {
        let home = home_with_config(CONFIG);
        let state = FeedState::new(home.path());
        let (sync_tx, _shutdown) = spawn_processor(&state);

        let response = handle_request(&state, &sync_tx, DaemonRequest::command("sync")).await;
        assert!(response.ok, "{:?}", response.error);

        let snapshot = handle_request(&state, &sync_tx, DaemonRequest::command("snapshot")).await;
        assert_eq!(
            names(&snapshot.data.expect("data")),
            [
                "pipeline1 :: stage",
                "pipeline1 :: stage :: job",
                "pipeline2 :: stage"
            ]
        );
        assert!(*state.last_sync_at_unix.read().await > 0);
    }

    #[tokio::test]
    async fn feed_filters_by_principal() {
        let home = home_with_config(CONFIG);
        let state = FeedState::new(home.path());
        let (sync_tx, _shutdown) = spawn_processor(&state);
        enqueue_sync(&sync_tx, SyncScope::All, "test")
            .await
            .expect("sync");

        let feed_for = |principal: Principal| DaemonRequest {
            principal: Some(principal),
            ..DaemonRequest::command("feed")
        };

        let guest = handle_request(&state, &sync_tx, feed_for(Principal::new("guest"))).await;
        assert_eq!(
            names(&guest.data.expect("data")),
            ["pipeline1 :: stage", "pipeline1 :: stage :: job"]
        );

        let admin = handle_request(
            &state,
            &sync_tx,
            feed_for(Principal::new("someone").with_role("admin")),
        )
        .await;
        assert_eq!(names(&admin.data.expect("data")).len(), 3);

        let missing = handle_request(&state, &sync_tx, DaemonRequest::command("feed")).await;
        assert!(!missing.ok);
    }

    #[tokio::test]
    async fn history_fills_uncached_stages() {
        let home = home_with_config(CONFIG);
        history::save_to(
            &history_path(home.path()),
            &HistoryFile {
                recorded_at: Utc::now(),
                records: vec![HistoryRecord {
                    name: ProjectName::parse("pipeline2 :: stage").expect("name"),
                    status: statusfeed_core::ExecutionStatus {
                        activity: "Sleeping".into(),
                        outcome: "Success".into(),
                        label: "12".into(),
                        last_updated: Utc::now(),
                        web_url: "http://ci/pipeline2/12".into(),
                    },
                }],
            },
        )
        .expect("save history");
        let state = FeedState::new(home.path());
        let (sync_tx, _shutdown) = spawn_processor(&state);

        let report = enqueue_sync(&sync_tx, SyncScope::All, "test")
            .await
            .expect("sync");

        assert_eq!(report.stages_from_history, 1);
        assert_eq!(report.placeholders, 2);
    }

    #[tokio::test]
    async fn broken_config_keeps_previous_feed() {
        let home = home_with_config(CONFIG);
        let state = FeedState::new(home.path());
        let (sync_tx, _shutdown) = spawn_processor(&state);
        enqueue_sync(&sync_tx, SyncScope::All, "test")
            .await
            .expect("sync");

        fs::write(config_path(home.path()), "groups: [").expect("corrupt config");
        let err = enqueue_sync(&sync_tx, SyncScope::All, "test")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("config.yaml"), "got: {err}");
        assert_eq!(state.store.len(), 3);
    }

    #[tokio::test]
    async fn progress_updates_known_entries_only() {
        let home = home_with_config(CONFIG);
        let state = FeedState::new(home.path());
        let (sync_tx, _shutdown) = spawn_processor(&state);
        enqueue_sync(&sync_tx, SyncScope::All, "test")
            .await
            .expect("sync");

        let progress_for = |raw: &str| DaemonRequest {
            progress: Some(ProgressEvent {
                name: ProjectName::parse(raw).expect("name"),
                activity: "Building".into(),
                outcome: "Unknown".into(),
                label: "13".into(),
                web_url: "http://ci/13".into(),
                at: Utc::now(),
            }),
            ..DaemonRequest::command("progress")
        };

        let applied = handle_request(&state, &sync_tx, progress_for("pipeline1 :: stage")).await;
        assert_eq!(applied.data.expect("data")["outcome"], json!("applied"));

        let ignored = handle_request(&state, &sync_tx, progress_for("ghost :: stage")).await;
        assert_eq!(ignored.data.expect("data")["outcome"], json!("unknown_unit"));

        let entry = state
            .store
            .get(&ProjectName::parse("pipeline1 :: stage").expect("name"))
            .expect("entry");
        assert_eq!(entry.execution().expect("known").activity, "Building");
    }

    #[tokio::test]
    async fn status_payload_before_first_sync() {
        let home = home_with_config(CONFIG);
        let state = FeedState::new(home.path());

        let payload = build_status_payload(&state).await;

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["last_sync_at_unix"], json!(0u64));
        assert_eq!(payload["generation"], json!(0u64));
        assert_eq!(payload["entries"], json!(0));
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let home = home_with_config(CONFIG);
        let state = FeedState::new(home.path());
        let (sync_tx, _shutdown) = spawn_processor(&state);

        let response = handle_request(&state, &sync_tx, DaemonRequest::command("reboot")).await;

        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("unknown command 'reboot'"));
    }
}
