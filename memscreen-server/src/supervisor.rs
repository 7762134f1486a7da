//! Supervisor (C13): process lifecycle. Boots C1-C12 in dependency order,
//! best-effort-starts the model runtime as a scoped subprocess, binds the
//! HTTP server, and drives a clean shutdown sequence per spec.md §4.13.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use memscreen_core::{Config, Paths, Result, RuntimeSettings};
use memscreen_db::models::{AnalysisState, RecordingFilter, RecordingOrder, RecordingPatch};
use memscreen_db::{MetadataStore, VectorStore};
use memscreen_runtime::RuntimeClient;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::http::{build_router, AppState};
use crate::ingestion::{IngestionDeps, IngestionQueue};
use crate::orchestrator::{Orchestrator, OrchestratorDeps};
use crate::query::QueryEngine;
use crate::tracking::TrackingManager;

/// Options the binary entrypoint collects from the CLI (§6 "Command-line
/// surface") before handing off to the supervisor.
#[derive(Debug, Clone, Default)]
pub struct BootOptions {
    pub data_root: Option<PathBuf>,
    pub bind: Option<String>,
    pub runtime_url: Option<String>,
    pub runtime_bin: Option<PathBuf>,
    pub debug: bool,
}

/// Handle to a best-effort, supervisor-spawned model runtime subprocess.
/// Dropped (and killed) on shutdown; the supervisor never depends on this
/// existing, since `runtime_base_url` may point at an already-running or
/// entirely external runtime.
struct ManagedRuntime {
    child: Child,
}

impl Drop for ManagedRuntime {
    fn drop(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        let _ = self.child.start_kill();
    }
}

pub struct Supervisor {
    pub state: Arc<AppState>,
    managed_runtime: Option<ManagedRuntime>,
    log_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl Supervisor {
    /// Runs the boot sequence from spec.md §4.13: C1 → C2 open & migrate →
    /// C3 open → C4 health ping (non-blocking) → best-effort runtime spawn →
    /// component wiring. Does not bind the HTTP listener; call [`Supervisor::serve`]
    /// for that, so tests can construct a `Supervisor` without opening a port.
    pub async fn boot(opts: BootOptions) -> Result<Self> {
        // C1: paths + config.
        let paths = Paths::resolve(opts.data_root.as_deref())?;
        let log_guard = memscreen_core::logging::init(&paths.logs_dir(), opts.debug);
        info!(root = %paths.root().display(), "resolved data root");

        let config_path = paths.root().join("config.toml");
        let mut config = Config::load(&config_path)?;
        if let Some(bind) = opts.bind {
            config.api_bind = bind;
        }
        if let Some(url) = opts.runtime_url {
            config.runtime_base_url = url;
        }

        let settings_path = paths.settings_path();
        let settings = RuntimeSettings::load(&settings_path)?;

        // C2: metadata store, open + migrate.
        let db = Arc::new(MetadataStore::open(&paths.metadata_db_path()).await?);
        info!("metadata store migrated and opened");

        // C3: vector store (lazily creates per-model collection files).
        let vectors = Arc::new(VectorStore::new(paths.vectors_dir()));

        // C4: health ping, non-blocking — failures never abort boot.
        let runtime = Arc::new(RuntimeClient::new(&config.runtime_base_url)?);
        let managed_runtime = match runtime.catalog().await {
            Ok(_) => {
                info!(base_url = %config.runtime_base_url, "model runtime reachable");
                None
            }
            Err(err) => {
                warn!(error = %err, "model runtime unreachable at boot, attempting best-effort spawn");
                try_spawn_runtime(&opts.runtime_bin, &paths).await
            }
        };

        // Orphan-recording reconciliation (testable property 7): any row
        // left pointing at a nonexistent file after a crash mid-recording
        // is reconciled to analysis_state=failed, and stray staging
        // tempdirs left under runtime/ are removed.
        reconcile_orphans(&db, &paths).await;

        // Component wiring (C5-C11), dependency order innermost-out.
        let tracking = Arc::new(TrackingManager::new(Arc::clone(&db)));
        let ingestion = IngestionQueue::spawn(IngestionDeps {
            config: config.clone(),
            paths: paths.clone(),
            db: Arc::clone(&db),
            vectors: Arc::clone(&vectors),
            runtime: Arc::clone(&runtime),
        });
        let orchestrator = Orchestrator::spawn(OrchestratorDeps {
            config: config.clone(),
            paths: paths.clone(),
            db: Arc::clone(&db),
            ingestion: Arc::clone(&ingestion),
            tracking: Arc::clone(&tracking),
        });
        let query = QueryEngine::new(config.clone(), Arc::clone(&db), Arc::clone(&vectors), Arc::clone(&runtime));

        let state = Arc::new(AppState {
            config,
            paths,
            db,
            vectors,
            runtime,
            orchestrator,
            ingestion,
            tracking,
            query,
            settings: Mutex::new(settings),
            settings_path,
        });

        Ok(Self {
            state,
            managed_runtime,
            log_guard: Some(log_guard),
        })
    }

    /// Binds C12 and runs until `shutdown` resolves, then drains per
    /// §4.13's shutdown order: stop accepting new requests, grace period
    /// for in-flight ones, stop the orchestrator, cancel+await ingestion,
    /// flush stores.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let addr: SocketAddr = self
            .state
            .config
            .api_bind
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid api_bind {:?}: {e}", self.state.config.api_bind))?;

        let app = build_router(Arc::clone(&self.state));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "HTTP API listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("no longer accepting new requests, giving in-flight requests a grace period");
        sleep(Duration::from_secs(5)).await;

        if let Err(err) = self.state.orchestrator.stop().await {
            warn!(error = %err, "orchestrator did not stop cleanly");
        }

        info!("cancelling and awaiting in-flight ingestion tasks");
        self.state.ingestion.shutdown().await;

        // Drop managed runtime and log guard explicitly for ordered shutdown
        // rather than relying on destructor order at end of scope.
        drop(self.managed_runtime);
        info!("shutdown complete");
        drop(self.log_guard);
        Ok(())
    }
}

async fn try_spawn_runtime(runtime_bin: &Option<PathBuf>, paths: &Paths) -> Option<ManagedRuntime> {
    let bin = match runtime_bin {
        Some(path) if path.is_file() => path.clone(),
        _ => which::which("ollama").ok()?,
    };
    let child = Command::new(&bin)
        .arg("serve")
        .current_dir(paths.runtime_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    match child {
        Ok(child) => {
            info!(bin = %bin.display(), "spawned model runtime as a scoped subprocess");
            Some(ManagedRuntime { child })
        }
        Err(err) => {
            warn!(error = %err, bin = %bin.display(), "failed to spawn model runtime, continuing without it");
            None
        }
    }
}

async fn reconcile_orphans(db: &MetadataStore, paths: &Paths) {
    let filter = RecordingFilter {
        analysis_state: None,
        ..Default::default()
    };
    let recordings = match db.list_recordings(&filter, RecordingOrder::StartTimeDesc, 10_000).await {
        Ok(rows) => rows,
        Err(err) => {
            error!(error = %err, "could not scan recordings for orphan reconciliation");
            return;
        }
    };

    for recording in recordings {
        if matches!(recording.analysis_state, AnalysisState::Done | AnalysisState::Failed) {
            continue;
        }
        let exists = recording
            .file_path
            .as_deref()
            .map(|p| std::path::Path::new(p).is_file())
            .unwrap_or(false);
        if exists {
            continue;
        }
        warn!(recording_id = %recording.id, "found transient recording row from an unclean shutdown, marking failed");
        let patch = RecordingPatch {
            analysis_state: Some(AnalysisState::Failed),
            ..Default::default()
        };
        if let Err(err) = db.update_recording(&recording.id, &patch).await {
            error!(recording_id = %recording.id, error = %err, "failed to reconcile orphan recording");
        }
    }

    // Orchestrator scratch frames land in `videos_dir()/scratch-<id>` and the
    // ingestion pipeline decodes into a `tempfile` `TempDir` created in the
    // same directory (default-prefixed `.tmp*`); a crash during RECORDING or
    // ingestion leaves one of these behind with nothing left to clean it up.
    let videos_dir = paths.videos_dir();
    let Ok(entries) = std::fs::read_dir(&videos_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_dir() && (name.starts_with("scratch-") || name.starts_with(".tmp")) {
            if let Err(err) = std::fs::remove_dir_all(&path) {
                warn!(path = %path.display(), error = %err, "failed to remove orphan staging tempdir");
            } else {
                info!(path = %path.display(), "removed orphan staging tempdir left by an unclean shutdown");
            }
        }
    }
}

/// Future that resolves on SIGINT or SIGTERM, for [`Supervisor::serve`]'s
/// graceful-shutdown hook.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(_) => return,
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memscreen_db::models::{AudioSourceTag, Recording, RecordingMode};

    fn sample(id: &str, file_path: Option<String>, state: AnalysisState) -> Recording {
        let now = chrono::Utc::now();
        Recording {
            id: id.to_string(),
            device_name: "monitor_0".to_string(),
            start_time: now,
            end_time: now,
            frame_count: 0,
            fps: 0.0,
            duration_seconds: 0.0,
            file_path,
            audio_source_tag: AudioSourceTag::None,
            mode: RecordingMode::Fullscreen,
            target_display_id: None,
            target_window_title: None,
            region_rect: None,
            app_name: None,
            content_summary: None,
            content_tags: vec![],
            user_tags: vec![],
            analysis_state: state,
        }
    }

    #[tokio::test]
    async fn reconcile_fails_rows_pointing_at_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::resolve(Some(tmp.path())).unwrap();
        let db = MetadataStore::open(&paths.metadata_db_path()).await.unwrap();

        db.put_recording(&sample("orphan", None, AnalysisState::Pending))
            .await
            .unwrap();

        let real_file = paths.videos_dir().join("finished.mp4");
        std::fs::write(&real_file, b"not really an mp4").unwrap();
        db.put_recording(&sample(
            "finished",
            Some(real_file.to_string_lossy().into_owned()),
            AnalysisState::Done,
        ))
        .await
        .unwrap();

        reconcile_orphans(&db, &paths).await;

        let orphan = db.get_recording("orphan").await.unwrap();
        assert_eq!(orphan.analysis_state, AnalysisState::Failed);

        let finished = db.get_recording("finished").await.unwrap();
        assert_eq!(finished.analysis_state, AnalysisState::Done);
    }

    #[tokio::test]
    async fn reconcile_removes_stray_staging_tempdirs() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::resolve(Some(tmp.path())).unwrap();
        let db = MetadataStore::open(&paths.metadata_db_path()).await.unwrap();

        let scratch = paths.videos_dir().join("scratch-rec-1");
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join("frame_000001.png"), b"x").unwrap();

        let ingestion_tmp = paths.videos_dir().join(".tmpabc123");
        std::fs::create_dir_all(&ingestion_tmp).unwrap();

        reconcile_orphans(&db, &paths).await;

        assert!(!scratch.exists());
        assert!(!ingestion_tmp.exists());
    }
}
