//! VCP plugin runtime server.
//!
//! Boots the plugin store, executor, preprocessor pipeline, static
//! refresher, and distributed bridge; serves the distributed WebSocket
//! route and a minimal admin surface. The chat API lives elsewhere and
//! calls into the dispatcher and pipeline.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::{json, Value};
use tracing::info;

use vcp_bridge::{ws_handler, BridgeState, DistributedRegistry};
use vcp_core::{ChatMessage, FileFetcher, RemoteInvoker};
use vcp_dispatch::{ReloadCoordinator, ServiceRegistry, ToolDispatcher};
use vcp_executor::{StdioExecutor, WellKnownEnv};
use vcp_pipeline::PreprocessorPipeline;
use vcp_plugins::{EventBus, PlaceholderTable, PluginStore};
use vcp_scheduler::{CronJobs, StaticRefresher};

#[derive(Parser, Debug)]
#[command(name = "vcp-server", about = "VCP plugin orchestration runtime")]
struct Args {
    /// Plugin root directory, scanned one level deep.
    #[arg(long, default_value = "Plugin")]
    plugin_dir: PathBuf,

    /// Preprocessor order file.
    #[arg(long, default_value = "preprocessor-order.json")]
    order_file: PathBuf,

    /// Listen port.
    #[arg(long, default_value_t = 6005)]
    port: u16,

    /// Log directory for the rolling NDJSON file.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Verbose logging (overridden by RUST_LOG).
    #[arg(long)]
    debug: bool,
}

#[derive(Clone)]
struct AppState {
    store: Arc<PluginStore>,
    placeholders: Arc<PlaceholderTable>,
    pipeline: Arc<PreprocessorPipeline>,
    executor: Arc<StdioExecutor>,
    dispatcher: Arc<ToolDispatcher>,
    coordinator: Arc<ReloadCoordinator>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = vcp_logging::init(&args.log_dir, args.debug);

    let store = Arc::new(PluginStore::new());
    let placeholders = Arc::new(PlaceholderTable::new());

    let well_known = WellKnownEnv {
        project_root: std::env::current_dir().ok(),
        server_port: Some(args.port),
        image_server_key: std::env::var("IMAGESERVER_IMAGE_KEY").ok(),
        callback_base_url: Some(format!("http://127.0.0.1:{}/plugin-callback", args.port)),
    };
    let executor = Arc::new(StdioExecutor::new(well_known));

    let registry = DistributedRegistry::new(store.clone(), placeholders.clone());
    let fetcher: Arc<dyn FileFetcher> = registry.clone();
    executor.set_file_fetcher(fetcher);

    let pipeline = Arc::new(PreprocessorPipeline::new(store.clone()));
    let refresher = StaticRefresher::new(store.clone(), placeholders.clone(), executor.clone());
    let jobs = Arc::new(CronJobs::new(store.clone(), refresher.clone()));
    let events = Arc::new(EventBus::new());

    let services = ServiceRegistry::new();
    let remote: Arc<dyn RemoteInvoker> = registry.clone();
    let dispatcher = Arc::new(ToolDispatcher::new(
        store.clone(),
        executor.clone(),
        services.clone(),
        remote,
    ));

    let coordinator = ReloadCoordinator::new(
        args.plugin_dir.clone(),
        args.order_file.clone(),
        store.clone(),
        placeholders.clone(),
        pipeline.clone(),
        refresher,
        jobs,
        services,
        events.clone(),
    );
    coordinator.reload().await?;
    let _watcher = coordinator.clone().spawn_watcher()?;

    let mut reload_events = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = reload_events.recv().await {
            info!(?event, "runtime event");
        }
    });

    let state = AppState {
        store,
        placeholders,
        pipeline,
        executor,
        dispatcher,
        coordinator,
    };

    let bridge_routes = Router::new()
        .route("/ws/distributed/:server_id", get(ws_handler))
        .with_state(BridgeState { registry });

    let admin_routes = Router::new()
        .route("/admin/plugins", get(list_plugins))
        .route("/admin/reload", post(trigger_reload))
        .route("/admin/placeholders/:key", get(read_placeholder))
        .route("/admin/plugins/:name/stderr", get(read_stderr_tail))
        .route("/admin/preprocess", post(preview_preprocess))
        .route("/tools/:name/invoke", post(invoke_tool))
        .with_state(state);

    let app = bridge_routes.merge(admin_routes);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(%addr, "vcp-server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn list_plugins(State(state): State<AppState>) -> Json<Value> {
    let plugins: Vec<Value> = state
        .store
        .list()
        .await
        .iter()
        .map(|m| {
            json!({
                "name": m.name,
                "displayName": m.display_name(),
                "pluginType": m.plugin_type.to_string(),
                "isDistributed": m.is_distributed,
                "serverId": m.server_id,
            })
        })
        .collect();
    Json(json!({ "plugins": plugins }))
}

async fn trigger_reload(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.reload().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok"}))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "message": e.to_string()})),
        ),
    }
}

async fn read_placeholder(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.placeholders.get(&key).await {
        Some(value) => (StatusCode::OK, Json(json!({ "key": key, "value": value }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "message": format!("no placeholder '{key}'")})),
        ),
    }
}

async fn read_stderr_tail(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.executor.stderr_tail(&name).await {
        Some(tail) => (StatusCode::OK, Json(json!({ "plugin": name, "stderr": tail }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "message": format!("no captured stderr for '{name}'")})),
        ),
    }
}

/// Run a message array through the active preprocessor chain without
/// sending it anywhere. Debugging aid for chain ordering.
async fn preview_preprocess(
    State(state): State<AppState>,
    Json(messages): Json<Vec<ChatMessage>>,
) -> Json<Vec<ChatMessage>> {
    Json(state.pipeline.run(messages).await)
}

async fn invoke_tool(
    Path(name): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    Json(args): Json<Value>,
) -> Json<Value> {
    let maid = args
        .get("maid")
        .and_then(Value::as_str)
        .map(str::to_string);
    let origin = addr.ip().to_string();
    Json(
        state
            .dispatcher
            .process_tool_call_rendered(&name, args, Some(&origin), maid)
            .await,
    )
}
