mod api;
mod chart;
mod classify;
mod config;
mod http;
mod metrics;
mod poller;
mod render;
mod series;
mod session;
mod snapshot;
mod state;

use api::ApiClient;
use axum::serve;
use clap::Parser;
use config::Config;
use metrics::{now_unix, Metrics};
use poller::{run_cycle, MetricsPoller};
use session::{
    ensure_client_id, AuthContext, FileSessionStore, MemorySessionStore, SessionStore,
};
use state::DashboardState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const API_BASE_ENV: &str = "ADMINMON_API_BASE";

#[derive(Parser, Debug)]
#[command(name = "adminmon")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./adminmon.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Backend API root, e.g. https://lms.example/api
    #[arg(long)]
    api_base: Option<String>,
    /// Poll once, print the dashboard and exit.
    #[arg(long)]
    once: bool,
    /// Forget the stored session and exit.
    #[arg(long)]
    logout: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(api_base) = resolve_api_base_override(cli.api_base.as_deref()) {
        if let Err(err) = cfg.set_api_base(&api_base) {
            error!(error = %err, "invalid api base override");
            std::process::exit(1);
        }
    }

    let store: Arc<dyn SessionStore> = match cfg.session_file.as_ref() {
        Some(path) => Arc::new(FileSessionStore::new(path)),
        None => Arc::new(MemorySessionStore::default()),
    };

    if cli.logout {
        if let Err(err) = store.clear() {
            error!(error = %err, "failed to clear session");
            std::process::exit(1);
        }
        info!("session cleared");
        return;
    }

    let api = match ApiClient::new(
        &cfg.api_base,
        Duration::from_millis(cfg.request_timeout_ms),
        AuthContext::default(),
    ) {
        Ok(api) => Arc::new(api),
        Err(err) => {
            error!(error = %err, "failed to build HTTP client");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        api_base = %api.base(),
        interval_ms = cfg.interval_ms,
        history_capacity = cfg.history_capacity,
        "starting adminmon"
    );

    authenticate(&cfg, &api, store.as_ref()).await;

    let shared_state = Arc::new(RwLock::new(DashboardState::new(
        now_unix(),
        cfg.history_capacity,
        cfg.thresholds,
    )));

    if cli.once {
        let outcome = run_cycle(api.as_ref(), 1).await;
        let mut guard = shared_state.write().await;
        guard.apply_tick(outcome, now_unix());
        println!("{}", render::format_dashboard(&guard.view()));
        if guard.error().is_some() {
            std::process::exit(1);
        }
        return;
    }

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let listen = cfg.listen.clone();
        let metrics = metrics.clone();
        let http_state = shared_state.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let heartbeat_task = if cfg.heartbeat.enabled {
        match ensure_client_id(store.as_ref()) {
            Ok(client_id) => Some(tokio::spawn(run_heartbeat(
                api.clone(),
                client_id,
                Duration::from_secs(cfg.heartbeat.interval_secs),
                shutdown_rx.clone(),
            ))),
            Err(err) => {
                warn!(error = %err, "no client id, heartbeat disabled");
                None
            }
        }
    } else {
        None
    };

    let poller = MetricsPoller::new(
        api.clone(),
        shared_state.clone(),
        metrics.clone(),
        Duration::from_millis(cfg.interval_ms),
    )
    .start();

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    poller.cancel().await;
    if let Some(task) = heartbeat_task {
        let _ = task.await;
    }
    let _ = http_task.await;
}

/// Resolves the bearer token: env var, then config, then the stored session,
/// then a fresh login. Leaves the client unauthenticated when all of them
/// come up empty; the poller then surfaces the backend's 401.
async fn authenticate(cfg: &Config, api: &ApiClient, store: &dyn SessionStore) {
    let stored = match store.get() {
        Ok(session) => session,
        Err(err) => {
            warn!(error = %err, "ignoring unreadable session");
            Default::default()
        }
    };

    let mut ctx = if let Some(token) = resolve_env(&cfg.auth.token_env) {
        debug!(env = %cfg.auth.token_env, "using token from environment");
        AuthContext::with_token(token)
    } else if let Some(token) = cfg
        .auth
        .token
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        AuthContext::with_token(token)
    } else {
        AuthContext::from_session(&stored)
    };

    if !ctx.is_authenticated() {
        if let (Some(username), Some(password)) = (
            cfg.auth.username.as_deref(),
            resolve_env(&cfg.auth.password_env),
        ) {
            match api.login(username, &password).await {
                Ok(resp) => {
                    let mut session = stored;
                    session.token = Some(resp.access_token.clone());
                    session.user = Some(resp.user.clone());
                    if let Err(err) = store.set(&session) {
                        warn!(error = %err, "failed to persist session");
                    }
                    ctx = AuthContext::from_session(&session);
                    info!(user = %resp.user.username, "logged in");
                }
                Err(err) => {
                    let reason = err.display_message("login failed");
                    error!(user = %username, error = %reason, "login failed");
                }
            }
        }
    }

    if !ctx.is_authenticated() {
        warn!("no credentials available, polling unauthenticated");
        return;
    }
    api.set_auth(ctx.clone());

    match api.profile().await {
        Ok(user) => {
            ctx.user = Some(user);
            if !ctx.is_admin() {
                error!(
                    role = ctx.role().unwrap_or("unknown"),
                    "session does not belong to an admin, metrics calls will be rejected"
                );
            }
            api.set_auth(ctx);
        }
        Err(err) => {
            warn!(status = ?err.status(), error = %err, "could not verify profile");
        }
    }
}

async fn run_heartbeat(
    api: Arc<ApiClient>,
    client_id: String,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Err(err) = api.heartbeat(&client_id).await {
                    debug!(error = %err, "heartbeat failed");
                }
            }
        }
    }
}

fn resolve_api_base_override(cli_value: Option<&str>) -> Option<String> {
    cli_value
        .map(str::to_string)
        .or_else(|| resolve_env(API_BASE_ENV))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn resolve_env(env_name: &str) -> Option<String> {
    if let Ok(v) = std::env::var(env_name) {
        if !v.trim().is_empty() {
            return Some(v.trim().to_string());
        }
    }
    None
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
