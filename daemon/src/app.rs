use chrono::{DateTime, Utc};
use log::{debug, info};
use std::ops::Deref;
use std::sync::{Arc, LazyLock};
use tokio::sync::Notify;

use crate::config::AppConfig;
use crate::management::comm::rcon::{ControlEndpoint, Connector};
use crate::management::minecraft::RconClient;
use crate::management::supervisor::Supervisor;
use crate::storage::files::Paths;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
static START_TIME: LazyLock<DateTime<Utc>> = LazyLock::new(Utc::now);

pub struct ApplicationState {
    pub supervisor: Arc<Supervisor>,
    pub stop_notify: Arc<Notify>,
}
pub type AppState = Arc<ApplicationState>;

pub fn get_start_time() -> &'static DateTime<Utc> {
    START_TIME.deref()
}

fn rcon_connector() -> Connector {
    Arc::new(|endpoint: ControlEndpoint| {
        Box::pin(async move {
            let client =
                RconClient::connect(&endpoint.host, endpoint.port, &endpoint.password).await?;
            Ok(Box::new(client) as _)
        })
    })
}

async fn init_app_state() -> anyhow::Result<AppState> {
    let config = AppConfig::get();
    debug!(
        "config loaded: {}",
        serde_json::to_string_pretty(&config).unwrap_or_default()
    );

    Paths::new(config.storage.root.clone()).init_dirs()?;
    let supervisor = Supervisor::new(config.clone(), rcon_connector());
    supervisor.bootstrap().await?;

    Ok(Arc::new(ApplicationState {
        supervisor,
        stop_notify: Arc::new(Notify::new()),
    }))
}

pub async fn run_app() -> anyhow::Result<()> {
    let _ = get_start_time();
    info!("craftd {} starting", VERSION);

    let state = init_app_state().await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.expect("can't install ctrl+c signal handler");
        }
        _ = state.stop_notify.notified() => {}
    }

    state.supervisor.shutdown("daemon").await;
    info!("Bye.");
    Ok(())
}
