use crate::detector::RemoteDetector;
use crate::model::GuideConfig;
use crate::orchestrator::{SessionDeps, SessionRegistry};
use crate::planner::{ChatPlanner, ChatPlannerConfig, OfflinePlanner, Planner};
use crate::server::{self, AppState};
use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "panel_guide=info,tower_http=info";

#[derive(Debug, Parser, Clone)]
#[command(
    name = "panel-guide",
    version,
    about = "Step-by-step guidance for appliance control panels, driven by camera frames"
)]
pub struct Cli {
    /// Address to serve the session socket and HTTP API on
    #[arg(long, env = "PANEL_GUIDE_LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Detection service that frames are posted to
    #[arg(
        long,
        env = "PANEL_GUIDE_DETECTOR_URL",
        default_value = "http://127.0.0.1:9000/detect"
    )]
    pub detector_url: String,

    /// Per-frame detection timeout
    #[arg(long, default_value = "5s")]
    pub detector_timeout: humantime::Duration,

    /// OpenAI-compatible chat completions endpoint (offline planner when unset)
    #[arg(long, env = "PANEL_GUIDE_PLANNER_URL")]
    pub planner_url: Option<String>,

    /// Bearer token for the planner endpoint
    #[arg(long, env = "PANEL_GUIDE_PLANNER_API_KEY", hide_env_values = true)]
    pub planner_api_key: Option<String>,

    /// Model name sent to the planner endpoint
    #[arg(long, env = "PANEL_GUIDE_PLANNER_MODEL", default_value = "gpt-4o-mini")]
    pub planner_model: String,

    #[arg(long, default_value_t = 0.2)]
    pub planner_temperature: f32,

    /// Upper bound on a single planner call
    #[arg(long, default_value = "20s")]
    pub planner_timeout: humantime::Duration,

    /// Consecutive rich frames before a plan is requested
    #[arg(long, default_value_t = 3)]
    pub stable_frames: usize,

    /// Detections a frame needs to count as rich
    #[arg(long, default_value_t = 10)]
    pub min_detections: usize,

    /// Longest plan kept after sanitizing
    #[arg(long, default_value_t = 8)]
    pub max_steps: usize,

    /// Pending events per session before the reader waits
    #[arg(long, default_value_t = 32)]
    pub event_queue_depth: usize,
}

/// Build a `GuideConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> GuideConfig {
    GuideConfig {
        stable_frames: args.stable_frames,
        min_detections: args.min_detections,
        max_steps: args.max_steps,
        planner_timeout: Duration::from(args.planner_timeout),
        detector_timeout: Duration::from(args.detector_timeout),
        event_queue_depth: args.event_queue_depth,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_planner(args: &Cli, cfg: &GuideConfig) -> Result<Arc<dyn Planner>> {
    match &args.planner_url {
        Some(endpoint) => {
            let planner = ChatPlanner::new(ChatPlannerConfig {
                endpoint: endpoint.clone(),
                api_key: args.planner_api_key.clone(),
                model: args.planner_model.clone(),
                temperature: args.planner_temperature,
                timeout: cfg.planner_timeout,
            })
            .context("failed to build planner client")?;
            info!(endpoint = %endpoint, model = %args.planner_model, "using chat planner");
            Ok(Arc::new(planner))
        }
        None => {
            info!("no planner endpoint configured, using the offline planner");
            Ok(Arc::new(OfflinePlanner))
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    init_tracing();

    let cfg = build_config(&args);
    info!(config = %serde_json::to_string(&cfg)?, "starting panel-guide");

    let detector = RemoteDetector::new(&args.detector_url, cfg.detector_timeout)
        .with_context(|| format!("invalid detector url {}", args.detector_url))?;
    let planner = build_planner(&args, &cfg)?;

    let shutdown = CancellationToken::new();
    let state = AppState {
        registry: SessionRegistry::default(),
        deps: Arc::new(SessionDeps {
            detector: Arc::new(detector),
            planner,
            cfg,
        }),
        shutdown: shutdown.clone(),
    };

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!(addr = %args.listen, "listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested, closing sessions");
            shutdown.cancel();
        })
        .await
        .context("server error")?;
    Ok(())
}
