use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tidepool::api;
use tidepool::config::Config;
use tidepool::detector;
use tidepool::routes::{RouteGraph, RouteTable};
use tidepool::scanner::TemplateSet;
use tidepool::state::{AppStateInner, Rig, RunControl, Shared};
use tidepool::status::OperatorStatus;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    let table = match &config.routes_file {
        Some(path) => RouteTable::load(path)?,
        None => RouteTable::builtin()?,
    };
    let routes = Arc::new(RouteGraph::from_table(table).context("invalid route table")?);

    tracing::info!(
        "tidepool starting, {} maps in cycle, starting map {}, listen: {}",
        routes.len(),
        config.starting_map.as_deref().unwrap_or(routes.starting_map()),
        config.listen_addr,
    );

    // Load templates once; missing ones are reported and skipped on every scan
    let dirs = detector::template_search_dirs(config.assets_dir.as_deref());
    let templates = Arc::new(TemplateSet::load(
        &config.template_names,
        &dirs,
        config.matching.scale_down,
    ));
    tracing::info!(
        "loaded {}/{} template image(s)",
        templates.available(),
        config.template_names.len()
    );

    let operator = Arc::new(OperatorStatus::new());
    let control = Arc::new(RunControl::new(operator.clone()));

    let mut counts = control.subscribe_count();
    tokio::spawn(async move {
        while counts.changed().await.is_ok() {
            tracing::info!("water collected: {}", *counts.borrow_and_update());
        }
    });

    let rig = desktop_rig(routes, templates)?;

    if config.stop_hotkey {
        start_stop_hotkey(control.clone());
    }

    let shared = Shared {
        app: Arc::new(Mutex::new(AppStateInner::new(config.clone()))),
        control,
        operator,
        rig,
    };

    let app = api::router(shared).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .context(format!("failed to bind to {}", config.listen_addr))?;

    tracing::info!("listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}

#[cfg(feature = "desktop")]
fn desktop_rig(routes: Arc<RouteGraph>, templates: Arc<TemplateSet>) -> Result<Rig> {
    use tidepool::desktop::{EnigoInput, XcapScreen};

    Ok(Rig {
        screen: Arc::new(XcapScreen),
        input: Arc::new(EnigoInput),
        routes,
        templates,
    })
}

#[cfg(feature = "desktop")]
fn start_stop_hotkey(control: Arc<RunControl>) {
    tidepool::hotkey::spawn_stop_listener(control);
}

#[cfg(not(feature = "desktop"))]
fn start_stop_hotkey(_control: Arc<RunControl>) {
    tracing::warn!("stop hotkey requires the `desktop` feature");
}

#[cfg(not(feature = "desktop"))]
fn desktop_rig(_routes: Arc<RouteGraph>, _templates: Arc<TemplateSet>) -> Result<Rig> {
    anyhow::bail!("built without the `desktop` feature: no screen or input backend available")
}
