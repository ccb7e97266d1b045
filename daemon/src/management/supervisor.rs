use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use craftd_protocol::management::backup::{BackupEntry, RetentionPolicy};
use craftd_protocol::management::instance::{
    slug_id, InstanceConfig, InstanceDraft, InstanceSettings, InstanceState, LogCategory,
    LogEntry, SettingsView, StatusSummary,
};
use craftd_protocol::management::player::{PlayerAction, PlayerRecord};
use craftd_protocol::status::{PlayersSummary, PublicStatus};

use crate::config::AppConfig;
use crate::management::backup::BackupManager;
use crate::management::comm::console::ConsoleSink;
use crate::management::comm::process::{InstanceProcess, ProcessEvent};
use crate::management::comm::rcon::{Connector, ControlEndpoint, Session};
use crate::management::config::InstanceConfigExt;
use crate::management::error::{Result, SupervisorError};
use crate::management::minecraft::{parse_list_response, ListQuery};
use crate::management::roster;
use crate::storage::file::write_atomic;
use crate::storage::files::Paths;
use crate::storage::properties::ServerProperties;

const STOP_POLL_STEP: Duration = Duration::from_millis(500);

fn no_selection() -> SupervisorError {
    SupervisorError::InstanceNotFound("(none selected)".to_string())
}

struct SupervisorInner {
    state: InstanceState,
    descriptor: Option<InstanceConfig>,
    process: Option<InstanceProcess>,
    start_time: Option<DateTime<Utc>>,
    /// Unintended exits since the last manual start.
    crash_count: u32,
    /// Set for the duration of a deliberate stop/restart so the exit
    /// handler never mistakes the exit for a crash.
    stop_intent: bool,
    monitor: Option<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,
    respawn_task: Option<JoinHandle<()>>,
}

impl Default for SupervisorInner {
    fn default() -> Self {
        Self {
            state: InstanceState::Offline,
            descriptor: None,
            process: None,
            start_time: None,
            crash_count: 0,
            stop_intent: false,
            monitor: None,
            poller: None,
            connect_task: None,
            respawn_task: None,
        }
    }
}

/// The lifecycle state machine. Owns the descriptor, current state,
/// crash counter, subprocess handle, and control-channel session for the
/// lifetime of the daemon; everything mutates through its operations.
/// `op_lock` serializes start/stop/restart so no two code paths can
/// spawn or kill concurrently.
pub struct Supervisor {
    config: AppConfig,
    paths: Paths,
    backups: BackupManager,
    console: Arc<ConsoleSink>,
    session: Arc<Session>,
    connector: Connector,
    status_tx: broadcast::Sender<StatusSummary>,
    inner: Mutex<SupervisorInner>,
    op_lock: Mutex<()>,
}

impl Supervisor {
    pub fn new(config: AppConfig, connector: Connector) -> Arc<Self> {
        let paths = Paths::new(config.storage.root.clone());
        let backups = BackupManager::new(paths.backups_root());
        let (status_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            config,
            paths,
            backups,
            console: Arc::new(ConsoleSink::new()),
            session: Arc::new(Session::new()),
            connector,
            status_tx,
            inner: Mutex::new(SupervisorInner::default()),
            op_lock: Mutex::new(()),
        })
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Re-selects the on-disk instance (if any) after a daemon restart.
    pub async fn bootstrap(self: &Arc<Self>) -> Result<()> {
        if let Some(descriptor) = self.scan_instances().await?.into_iter().next() {
            info!("selected instance `{}`", descriptor.id);
            let _ = self
                .console
                .attach_file(self.paths.console_log_path(&descriptor.id))
                .await;
            self.inner.lock().await.descriptor = Some(descriptor);
        }
        Ok(())
    }

    // ---- event streams -------------------------------------------------

    pub fn subscribe_log(&self) -> broadcast::Receiver<LogEntry> {
        self.console.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusSummary> {
        self.status_tx.subscribe()
    }

    // ---- instance management -------------------------------------------

    pub async fn list_instances(&self) -> Result<Vec<InstanceConfig>> {
        self.scan_instances().await
    }

    /// Creates the single instance slot: descriptor, starter properties
    /// wired for the control channel, and eula acceptance. Rejected while
    /// any instance exists.
    pub async fn create_instance(self: &Arc<Self>, draft: InstanceDraft) -> Result<InstanceConfig> {
        let _op = self.op_lock.lock().await;
        if let Some(existing) = self.scan_instances().await?.into_iter().next() {
            return Err(SupervisorError::InstanceExists(existing.id));
        }
        let id = slug_id(&draft.name);
        if id.is_empty() {
            return Err(SupervisorError::Other(anyhow::anyhow!(
                "instance name produces an empty id"
            )));
        }

        let descriptor = InstanceConfig {
            id: id.clone(),
            name: draft.name,
            jar_file: draft.jar_file,
            java_args: draft.java_args,
            rcon_port: draft.rcon_port,
            rcon_password: draft.rcon_password,
            auto_restart: draft.auto_restart,
            created: Utc::now(),
        };

        let dir = self.paths.instance_dir(&id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SupervisorError::Other(e.into()))?;
        self.save_descriptor(&descriptor).await?;

        let mut properties = ServerProperties::default();
        properties.set("motd", descriptor.name.clone());
        properties.set("enable-rcon", "true");
        properties.set("rcon.port", descriptor.rcon_port.to_string());
        properties.set("rcon.password", descriptor.rcon_password.clone());
        properties
            .save(self.paths.properties_path(&id))
            .await
            .map_err(|source| SupervisorError::AtomicWrite {
                path: self.paths.properties_path(&id),
                source,
            })?;
        write_atomic(dir.join("eula.txt"), "eula=true\n")
            .await
            .map_err(|source| SupervisorError::AtomicWrite {
                path: dir.join("eula.txt"),
                source,
            })?;

        let _ = self
            .console
            .attach_file(self.paths.console_log_path(&id))
            .await;
        self.inner.lock().await.descriptor = Some(descriptor.clone());
        info!("instance `{}` created", id);
        Ok(descriptor)
    }

    pub async fn select_instance(self: &Arc<Self>, id: &str) -> Result<InstanceConfig> {
        let _op = self.op_lock.lock().await;
        let mut g = self.inner.lock().await;
        if !matches!(g.state, InstanceState::Offline | InstanceState::Crashed) {
            return Err(SupervisorError::InvalidLifecycle {
                op: "select_instance",
                state: g.state,
            });
        }
        let descriptor = self.load_descriptor(id).await?;
        let _ = self
            .console
            .attach_file(self.paths.console_log_path(id))
            .await;
        g.descriptor = Some(descriptor.clone());
        let _ = self.status_tx.send(Self::summary_of(&g));
        Ok(descriptor)
    }

    pub async fn delete_instance(
        self: &Arc<Self>,
        id: &str,
        policy: RetentionPolicy,
        actor: &str,
    ) -> Result<()> {
        let _op = self.op_lock.lock().await;
        {
            let g = self.inner.lock().await;
            if g.state != InstanceState::Offline {
                return Err(SupervisorError::InvalidLifecycle {
                    op: "delete_instance",
                    state: g.state,
                });
            }
        }
        let dir = self.paths.instance_dir(id);
        if !dir.is_dir() {
            return Err(SupervisorError::InstanceNotFound(id.to_string()));
        }
        self.backups
            .apply_retention(id, policy)
            .await
            .map_err(SupervisorError::Other)?;
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| SupervisorError::Other(e.into()))?;
        let mut g = self.inner.lock().await;
        if g.descriptor.as_ref().is_some_and(|d| d.id == id) {
            g.descriptor = None;
        }
        info!("instance `{}` deleted by {}", id, actor);
        Ok(())
    }

    // ---- lifecycle ------------------------------------------------------

    pub async fn start(self: &Arc<Self>, id: Option<&str>, actor: &str) -> Result<()> {
        let _op = self.op_lock.lock().await;
        self.start_inner(id, true, false, actor).await
    }

    pub async fn stop(self: &Arc<Self>, actor: &str) -> Result<()> {
        let _op = self.op_lock.lock().await;
        self.stop_inner(actor).await
    }

    pub async fn restart(self: &Arc<Self>, actor: &str) -> Result<()> {
        let _op = self.op_lock.lock().await;
        let state = self.inner.lock().await.state;
        match state {
            // restart of a stopped instance is equivalent to start
            InstanceState::Offline | InstanceState::Crashed => {
                self.start_inner(None, true, false, actor).await
            }
            InstanceState::Online | InstanceState::Stopping => {
                {
                    let mut g = self.inner.lock().await;
                    self.set_state(&mut g, InstanceState::Restarting);
                    self.console
                        .push(
                            LogCategory::Info,
                            format!("Restarting instance (requested by {})", actor),
                        )
                        .await;
                }
                self.stop_inner(actor).await?;
                tokio::time::sleep(Duration::from_secs(self.config.lifecycle.settle_delay_secs))
                    .await;
                self.start_inner(None, true, true, actor).await
            }
            other => Err(SupervisorError::InvalidLifecycle {
                op: "restart",
                state: other,
            }),
        }
    }

    async fn start_inner(
        self: &Arc<Self>,
        id: Option<&str>,
        manual: bool,
        via_restart: bool,
        actor: &str,
    ) -> Result<()> {
        let mut g = self.inner.lock().await;
        let allowed = if via_restart {
            g.state == InstanceState::Restarting
        } else {
            matches!(g.state, InstanceState::Offline | InstanceState::Crashed)
        };
        if !allowed || g.process.is_some() {
            return Err(SupervisorError::InvalidLifecycle {
                op: "start",
                state: g.state,
            });
        }

        if let Some(id) = id {
            let descriptor = self.load_descriptor(id).await?;
            let _ = self
                .console
                .attach_file(self.paths.console_log_path(id))
                .await;
            g.descriptor = Some(descriptor);
        }
        let descriptor = g.descriptor.clone().ok_or_else(no_selection)?;

        if manual {
            // fresh crash budget on every operator-initiated start
            g.crash_count = 0;
        }
        g.stop_intent = false;
        if let Some(task) = g.respawn_task.take() {
            task.abort();
        }

        self.set_state(&mut g, InstanceState::Starting);
        self.console
            .push(
                LogCategory::Info,
                format!(
                    "Starting instance `{}` (requested by {})",
                    descriptor.name, actor
                ),
            )
            .await;

        let start_info = descriptor.start_info(&self.config.java.path);
        let (event_tx, event_rx) = mpsc::channel(16);
        match InstanceProcess::spawn(
            start_info,
            &self.paths.instance_dir(&descriptor.id),
            self.console.clone(),
            event_tx,
        )
        .await
        {
            Ok(process) => {
                self.console
                    .push(
                        LogCategory::Info,
                        format!("Server process started (pid {})", process.pid()),
                    )
                    .await;
                g.start_time = Some(Utc::now());
                g.process = Some(process);
                g.monitor = Some(self.clone().spawn_monitor(event_rx));
                Ok(())
            }
            Err(e) => {
                self.set_state(&mut g, InstanceState::Crashed);
                self.console
                    .push(
                        LogCategory::Error,
                        format!("Failed to launch server process: {}", e),
                    )
                    .await;
                Err(SupervisorError::Spawn(e))
            }
        }
    }

    async fn stop_inner(self: &Arc<Self>, actor: &str) -> Result<()> {
        {
            let mut g = self.inner.lock().await;
            match g.state {
                InstanceState::Offline => return Ok(()),
                InstanceState::Crashed => {
                    // nothing running; just cancel a pending respawn
                    if let Some(task) = g.respawn_task.take() {
                        task.abort();
                    }
                    return Ok(());
                }
                _ => {}
            }
            if let Some(task) = g.respawn_task.take() {
                task.abort();
            }
            g.stop_intent = true;
            if g.state != InstanceState::Restarting {
                self.set_state(&mut g, InstanceState::Stopping);
            }
            self.console
                .push(
                    LogCategory::Info,
                    format!("Stopping instance (requested by {})", actor),
                )
                .await;
            if g.process.is_none() {
                g.stop_intent = false;
                if g.state == InstanceState::Stopping {
                    self.set_state(&mut g, InstanceState::Offline);
                }
                return Ok(());
            }
        }

        // graceful request; delivery failure just means we escalate below
        let _ = self.deliver_command("stop").await;
        if !self.wait_for_handle_clear().await {
            self.console
                .push(
                    LogCategory::Warn,
                    "Graceful stop timed out, terminating process".to_string(),
                )
                .await;
            {
                let g = self.inner.lock().await;
                if let Some(process) = g.process.as_ref() {
                    process.terminate(true);
                }
            }
            self.wait_for_handle_clear().await;
        }

        let mut g = self.inner.lock().await;
        g.stop_intent = false;
        if g.process.is_none() && g.state == InstanceState::Stopping {
            self.set_state(&mut g, InstanceState::Offline);
        }
        Ok(())
    }

    /// Bounded poll for the subprocess to die after a stop request; true
    /// once the process has exited or the handle is already cleared.
    async fn wait_for_handle_clear(&self) -> bool {
        let rounds =
            (self.config.lifecycle.stop_timeout_secs * 1000 / STOP_POLL_STEP.as_millis() as u64)
                .max(1);
        for _ in 0..rounds {
            tokio::time::sleep(STOP_POLL_STEP).await;
            let g = self.inner.lock().await;
            if g.process.as_ref().map(|p| p.exited()).unwrap_or(true) {
                return true;
            }
        }
        false
    }

    fn spawn_monitor(self: Arc<Self>, mut event_rx: mpsc::Receiver<ProcessEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    ProcessEvent::Ready => self.handle_ready().await,
                    ProcessEvent::Exited { code, benign } => {
                        self.handle_exit(code, benign).await;
                        break;
                    }
                }
            }
        })
    }

    async fn handle_ready(self: &Arc<Self>) {
        let mut g = self.inner.lock().await;
        if g.state != InstanceState::Starting {
            return;
        }
        self.set_state(&mut g, InstanceState::Online);
        self.console
            .push(LogCategory::Info, "Instance reports ready".to_string())
            .await;
        let Some(descriptor) = g.descriptor.clone() else {
            return;
        };
        g.poller = Some(self.clone().spawn_poller());
        g.connect_task = Some(self.clone().spawn_connect(ControlEndpoint {
            host: "127.0.0.1".to_string(),
            port: descriptor.rcon_port,
            password: descriptor.rcon_password,
        }));
    }

    async fn handle_exit(self: &Arc<Self>, code: Option<i32>, benign: bool) {
        let mut g = self.inner.lock().await;
        g.process = None;
        g.start_time = None;
        if let Some(task) = g.poller.take() {
            task.abort();
        }
        if let Some(task) = g.connect_task.take() {
            task.abort();
        }
        // an exit invalidates any respawn scheduled for an earlier crash
        if let Some(task) = g.respawn_task.take() {
            task.abort();
        }
        self.session.teardown().await;

        let state = g.state;
        let deliberate = g.stop_intent
            || state == InstanceState::Stopping
            || state == InstanceState::Restarting;
        if deliberate || benign {
            self.console
                .push(
                    LogCategory::Info,
                    format!("Server process exited (code {})", code.unwrap_or(0)),
                )
                .await;
            if state != InstanceState::Restarting {
                self.set_state(&mut g, InstanceState::Offline);
            }
            return;
        }

        if matches!(state, InstanceState::Starting | InstanceState::Online) {
            g.crash_count += 1;
            let count = g.crash_count;
            self.set_state(&mut g, InstanceState::Crashed);
            self.console
                .push(
                    LogCategory::Error,
                    format!(
                        "Server process exited unexpectedly (code {:?}), crash {} since last start",
                        code, count
                    ),
                )
                .await;

            let auto_restart = g.descriptor.as_ref().is_some_and(|d| d.auto_restart);
            let limit = self.config.lifecycle.crash_limit;
            if auto_restart && count <= limit {
                let delay = Duration::from_secs(self.config.lifecycle.respawn_delay_secs);
                self.console
                    .push(
                        LogCategory::Warn,
                        format!("Scheduling automatic restart {}/{} in {:?}", count, limit, delay),
                    )
                    .await;
                g.respawn_task = Some(self.clone().spawn_respawn(delay));
            } else if auto_restart {
                self.console
                    .push(
                        LogCategory::Error,
                        format!("{}", SupervisorError::CrashLimitExceeded(count)),
                    )
                    .await;
            }
        } else {
            self.set_state(&mut g, InstanceState::Offline);
        }
    }

    fn spawn_respawn(self: Arc<Self>, delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _op = self.op_lock.lock().await;
            {
                // detach our own handle so start_inner's cancel is a no-op
                let mut g = self.inner.lock().await;
                if g.state != InstanceState::Crashed {
                    return;
                }
                drop(g.respawn_task.take());
            }
            if let Err(e) = self.start_inner(None, false, false, "auto-restart").await {
                warn!("automatic restart failed: {}", e);
            }
        })
    }

    fn spawn_poller(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                self.config.lifecycle.poll_interval_secs,
            ));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if self.inner.lock().await.state != InstanceState::Online {
                    break;
                }
                // fire-and-forget: a failed or overlapping poll is dropped
                if let Err(e) = self.get_players().await {
                    debug!("status poll dropped: {}", e);
                }
            }
        })
    }

    fn spawn_connect(self: Arc<Self>, endpoint: ControlEndpoint) -> JoinHandle<()> {
        tokio::spawn(async move {
            let attempts = self.config.control.connect_attempts;
            let delay = Duration::from_secs(self.config.control.retry_delay_secs);
            for attempt in 1..=attempts {
                match (self.connector)(endpoint.clone()).await {
                    Ok(channel) => {
                        self.session.install(channel).await;
                        debug!("control channel connected on attempt {}", attempt);
                        return;
                    }
                    Err(e) => {
                        debug!("control channel attempt {}/{} failed: {}", attempt, attempts, e);
                    }
                }
                tokio::time::sleep(delay).await;
            }
            // give up silently; command delivery falls back to stdin
            debug!("control channel unavailable after {} attempts", attempts);
        })
    }

    // ---- status & console ----------------------------------------------

    pub async fn get_status(&self) -> StatusSummary {
        Self::summary_of(&*self.inner.lock().await)
    }

    pub fn recent_logs(&self) -> Vec<LogEntry> {
        self.console.recent()
    }

    pub async fn get_public_info(&self) -> Result<PublicStatus> {
        self.build_snapshot(None, None).await
    }

    // ---- players --------------------------------------------------------

    /// Rebuilds the roster from the static sources plus, when ONLINE and
    /// connected, the live `list` query. Refreshes the public snapshot as
    /// a side effect.
    pub async fn get_players(self: &Arc<Self>) -> Result<Vec<PlayerRecord>> {
        let (descriptor, online) = {
            let g = self.inner.lock().await;
            (g.descriptor.clone(), g.state == InstanceState::Online)
        };
        let descriptor = descriptor.ok_or_else(no_selection)?;

        let live = if online {
            // a failed live query is non-fatal: static sources only
            match self.session.execute("list").await {
                Ok(response) => parse_list_response(&response),
                Err(_) => None,
            }
        } else {
            None
        };

        let names = live.as_ref().map(|q| q.names.clone());
        let records =
            roster::aggregate(&self.paths.instance_dir(&descriptor.id), names.as_deref()).await;

        if let Err(e) = self.write_snapshot(Some(&records), live.as_ref()).await {
            warn!("failed to refresh status snapshot: {}", e);
        }
        Ok(records)
    }

    pub async fn perform_player_action(
        self: &Arc<Self>,
        actor: &str,
        name: &str,
        action: PlayerAction,
        payload: Option<&str>,
    ) -> Result<String> {
        let command = match (action, payload) {
            (PlayerAction::Kick, Some(reason)) => format!("kick {} {}", name, reason),
            (PlayerAction::Kick, None) => format!("kick {}", name),
            (PlayerAction::Ban, Some(reason)) => format!("ban {} {}", name, reason),
            (PlayerAction::Ban, None) => format!("ban {}", name),
            (PlayerAction::Pardon, _) => format!("pardon {}", name),
            (PlayerAction::Op, _) => format!("op {}", name),
            (PlayerAction::Deop, _) => format!("deop {}", name),
            (PlayerAction::WhitelistAdd, _) => format!("whitelist add {}", name),
            (PlayerAction::WhitelistRemove, _) => format!("whitelist remove {}", name),
        };
        self.execute_command(actor, &command).await
    }

    // ---- commands -------------------------------------------------------

    /// Runs a console command through the session, falling back to the
    /// subprocess input stream when no channel is connected. Responses
    /// only exist on the session path.
    pub async fn execute_command(self: &Arc<Self>, actor: &str, text: &str) -> Result<String> {
        self.console
            .push(LogCategory::Info, format!("{} issued command: {}", actor, text))
            .await;
        self.deliver_command(text).await
    }

    async fn deliver_command(self: &Arc<Self>, text: &str) -> Result<String> {
        match self.session.execute(text).await {
            Ok(response) => Ok(response),
            Err(_) => {
                let g = self.inner.lock().await;
                let Some(process) = g.process.as_ref() else {
                    return Err(SupervisorError::ControlChannelUnavailable);
                };
                process.write_line(text).await.map_err(SupervisorError::Other)?;
                Ok(String::new())
            }
        }
    }

    // ---- settings -------------------------------------------------------

    pub async fn get_settings(&self) -> Result<SettingsView> {
        let descriptor = self
            .inner
            .lock()
            .await
            .descriptor
            .clone()
            .ok_or_else(no_selection)?;
        let properties = ServerProperties::load(self.paths.properties_path(&descriptor.id))
            .await
            .map_err(|e| SupervisorError::Other(e.into()))?;
        Ok(SettingsView {
            instance: descriptor,
            properties: properties.entries().clone(),
        })
    }

    pub async fn save_settings(
        self: &Arc<Self>,
        actor: &str,
        patch: InstanceSettings,
    ) -> Result<SettingsView> {
        let _op = self.op_lock.lock().await;
        let mut descriptor = self
            .inner
            .lock()
            .await
            .descriptor
            .clone()
            .ok_or_else(no_selection)?;

        if let Some(java_args) = patch.java_args {
            descriptor.java_args = java_args;
        }
        if let Some(auto_restart) = patch.auto_restart {
            descriptor.auto_restart = auto_restart;
        }
        if let Some(rcon_port) = patch.rcon_port {
            descriptor.rcon_port = rcon_port;
        }
        if let Some(rcon_password) = patch.rcon_password {
            descriptor.rcon_password = rcon_password;
        }
        self.save_descriptor(&descriptor).await?;

        let properties_path = self.paths.properties_path(&descriptor.id);
        let mut properties = ServerProperties::load(&properties_path)
            .await
            .map_err(|e| SupervisorError::Other(e.into()))?;
        if let Some(patch_properties) = &patch.properties {
            properties.merge(patch_properties);
            properties
                .save(&properties_path)
                .await
                .map_err(|source| SupervisorError::AtomicWrite {
                    path: properties_path.clone(),
                    source,
                })?;
        }

        self.inner.lock().await.descriptor = Some(descriptor.clone());
        self.console
            .push(LogCategory::Info, format!("Settings updated by {}", actor))
            .await;
        Ok(SettingsView {
            instance: descriptor,
            properties: properties.entries().clone(),
        })
    }

    // ---- backups --------------------------------------------------------

    pub async fn get_backups(&self) -> Result<Vec<BackupEntry>> {
        let descriptor = self
            .inner
            .lock()
            .await
            .descriptor
            .clone()
            .ok_or_else(no_selection)?;
        self.backups
            .list(&descriptor.id)
            .await
            .map_err(SupervisorError::Other)
    }

    pub async fn create_backup(
        self: &Arc<Self>,
        actor: &str,
        name: Option<&str>,
    ) -> Result<BackupEntry> {
        let _op = self.op_lock.lock().await;
        let descriptor = self.require_offline("create_backup").await?;
        let entry = self
            .backups
            .create(&descriptor.id, &self.paths.instance_dir(&descriptor.id), name)
            .await
            .map_err(SupervisorError::Other)?;
        self.console
            .push(
                LogCategory::Info,
                format!("Backup `{}` created by {}", entry.id, actor),
            )
            .await;
        Ok(entry)
    }

    pub async fn restore_backup(self: &Arc<Self>, actor: &str, backup_id: &str) -> Result<()> {
        let _op = self.op_lock.lock().await;
        let descriptor = self.require_offline("restore_backup").await?;
        self.backups
            .restore(
                &descriptor.id,
                backup_id,
                &self.paths.instance_dir(&descriptor.id),
            )
            .await?;
        self.console
            .push(
                LogCategory::Warn,
                format!("Backup `{}` restored by {}", backup_id, actor),
            )
            .await;
        Ok(())
    }

    pub async fn delete_backup(&self, actor: &str, backup_id: &str) -> Result<()> {
        let descriptor = self
            .inner
            .lock()
            .await
            .descriptor
            .clone()
            .ok_or_else(no_selection)?;
        self.backups.delete(&descriptor.id, backup_id).await?;
        info!("backup `{}` deleted by {}", backup_id, actor);
        Ok(())
    }

    // ---- shutdown -------------------------------------------------------

    pub async fn shutdown(self: &Arc<Self>, actor: &str) {
        if let Err(e) = self.stop(actor).await {
            warn!("shutdown stop failed: {}", e);
        }
        let mut g = self.inner.lock().await;
        for task in [
            g.monitor.take(),
            g.poller.take(),
            g.connect_task.take(),
            g.respawn_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        self.session.teardown().await;
    }

    // ---- internals ------------------------------------------------------

    fn summary_of(g: &SupervisorInner) -> StatusSummary {
        StatusSummary {
            running: g.state.is_running(),
            state: g.state,
            active_id: g.descriptor.as_ref().map(|d| d.id.clone()),
            name: g.descriptor.as_ref().map(|d| d.name.clone()),
            start_time: g.start_time,
        }
    }

    /// Transitions are applied synchronously at the point of decision;
    /// the snapshot rewrite runs detached.
    fn set_state(self: &Arc<Self>, g: &mut SupervisorInner, state: InstanceState) {
        if g.state == state {
            return;
        }
        debug!("state {:?} -> {:?}", g.state, state);
        g.state = state;
        let _ = self.status_tx.send(Self::summary_of(g));
        let sup = self.clone();
        tokio::spawn(async move {
            if let Err(e) = sup.write_snapshot(None, None).await {
                debug!("snapshot refresh dropped: {}", e);
            }
        });
    }

    async fn require_offline(&self, op: &'static str) -> Result<InstanceConfig> {
        let g = self.inner.lock().await;
        if g.state != InstanceState::Offline {
            return Err(SupervisorError::InvalidLifecycle { op, state: g.state });
        }
        g.descriptor.clone().ok_or_else(no_selection)
    }

    async fn scan_instances(&self) -> Result<Vec<InstanceConfig>> {
        let mut read_dir = match tokio::fs::read_dir(self.paths.instances_root()).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(SupervisorError::Other(e.into())),
        };
        let mut instances = vec![];
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| SupervisorError::Other(e.into()))?
        {
            let path = entry.path().join(crate::storage::files::DESCRIPTOR_FILE);
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            match serde_json::from_str::<InstanceConfig>(&content) {
                Ok(descriptor) => instances.push(descriptor),
                Err(e) => warn!("skipping unreadable descriptor {}: {}", path.display(), e),
            }
        }
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    async fn load_descriptor(&self, id: &str) -> Result<InstanceConfig> {
        if !self.paths.instance_dir(id).is_dir() {
            return Err(SupervisorError::InstanceNotFound(id.to_string()));
        }
        let path = self.paths.descriptor_path(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SupervisorError::ConfigNotFound(path))
            }
            Err(e) => return Err(SupervisorError::Other(e.into())),
        };
        serde_json::from_str(&content).map_err(|e| SupervisorError::Other(e.into()))
    }

    async fn save_descriptor(&self, descriptor: &InstanceConfig) -> Result<()> {
        let path = self.paths.descriptor_path(&descriptor.id);
        let content =
            serde_json::to_string_pretty(descriptor).map_err(|e| SupervisorError::Other(e.into()))?;
        write_atomic(&path, &content)
            .await
            .map_err(|source| SupervisorError::AtomicWrite { path, source })
    }

    async fn build_snapshot(
        &self,
        players: Option<&[PlayerRecord]>,
        live: Option<&ListQuery>,
    ) -> Result<PublicStatus> {
        let (state, descriptor) = {
            let g = self.inner.lock().await;
            (g.state, g.descriptor.clone())
        };
        let descriptor = descriptor.ok_or_else(no_selection)?;
        let properties = ServerProperties::load(self.paths.properties_path(&descriptor.id))
            .await
            .map_err(|e| SupervisorError::Other(e.into()))?;

        let list: Vec<String> = players
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.online)
                    .map(|r| r.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        let max = live
            .map(|q| q.max)
            .or_else(|| properties.get_u32("max-players"))
            .unwrap_or(20);
        let online = live.map(|q| q.online).unwrap_or(list.len() as u32);

        Ok(PublicStatus {
            name: descriptor.name,
            motd: properties.get("motd").unwrap_or("").to_string(),
            status: state,
            version: self.config.query.version.clone(),
            core_type: self.config.query.core_type.clone(),
            players: PlayersSummary { online, max, list },
            last_updated: Utc::now(),
        })
    }

    async fn write_snapshot(
        &self,
        players: Option<&[PlayerRecord]>,
        live: Option<&ListQuery>,
    ) -> Result<()> {
        let snapshot = match self.build_snapshot(players, live).await {
            Ok(snapshot) => snapshot,
            // nothing to publish before the first instance exists
            Err(SupervisorError::InstanceNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let path = self.paths.status_snapshot_path();
        let content =
            serde_json::to_string_pretty(&snapshot).map_err(|e| SupervisorError::Other(e.into()))?;
        write_atomic(&path, &content)
            .await
            .map_err(|source| SupervisorError::AtomicWrite { path, source })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use craftd_protocol::management::instance::JavaArgs;

    use super::*;

    fn test_config(root: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.root = root.to_path_buf();
        // spawn fails fast; no JVM in the test environment
        config.java.path = "/nonexistent/craftd-java".to_string();
        // keep scheduled respawns pending while the test asserts
        config.lifecycle.respawn_delay_secs = 120;
        config
    }

    fn failing_connector() -> Connector {
        Arc::new(|_| Box::pin(async { anyhow::bail!("no control channel in tests") }))
    }

    fn new_supervisor(root: &Path) -> Arc<Supervisor> {
        let supervisor = Supervisor::new(test_config(root), failing_connector());
        supervisor.paths().init_dirs().unwrap();
        supervisor
    }

    fn draft(name: &str) -> InstanceDraft {
        InstanceDraft {
            name: name.to_string(),
            jar_file: "server.jar".to_string(),
            java_args: JavaArgs {
                xmx: "1G".to_string(),
                xms: "512M".to_string(),
                args: vec![],
            },
            rcon_port: 25575,
            rcon_password: "secret".to_string(),
            auto_restart: true,
        }
    }

    #[tokio::test]
    async fn create_instance_derives_slug_and_writes_layout() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());

        let descriptor = supervisor.create_instance(draft("My Test!")).await.unwrap();
        assert_eq!(descriptor.id, "my-test-");
        assert!(supervisor.paths().descriptor_path("my-test-").is_file());
        assert!(supervisor
            .paths()
            .instance_dir("my-test-")
            .join("eula.txt")
            .is_file());

        let properties =
            ServerProperties::load(supervisor.paths().properties_path("my-test-"))
                .await
                .unwrap();
        assert_eq!(properties.get("enable-rcon"), Some("true"));
        assert_eq!(properties.get("rcon.port"), Some("25575"));

        let status = supervisor.get_status().await;
        assert_eq!(status.active_id.as_deref(), Some("my-test-"));
        assert_eq!(status.state, InstanceState::Offline);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn second_create_is_rejected_while_one_exists() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());

        supervisor.create_instance(draft("First")).await.unwrap();
        assert!(matches!(
            supervisor.create_instance(draft("Another Name")).await,
            Err(SupervisorError::InstanceExists(id)) if id == "first"
        ));
        assert_eq!(supervisor.list_instances().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_rejected_outside_offline_or_crashed() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();

        for state in [
            InstanceState::Starting,
            InstanceState::Online,
            InstanceState::Stopping,
            InstanceState::Restarting,
        ] {
            supervisor.inner.lock().await.state = state;
            let result = supervisor.start(None, "tester").await;
            assert!(
                matches!(result, Err(SupervisorError::InvalidLifecycle { op: "start", .. })),
                "start accepted in {:?}",
                state
            );
            assert_eq!(supervisor.inner.lock().await.state, state);
        }
    }

    #[tokio::test]
    async fn spawn_failure_drives_crashed_with_fatal_log() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();

        let result = supervisor.start(None, "tester").await;
        assert!(matches!(result, Err(SupervisorError::Spawn(_))));

        let status = supervisor.get_status().await;
        assert_eq!(status.state, InstanceState::Crashed);
        assert!(supervisor
            .recent_logs()
            .iter()
            .any(|entry| entry.category == LogCategory::Error
                && entry.message.contains("Failed to launch server process")));
        // readiness never fired, so no control-channel attempt was made
        assert!(supervisor.inner.lock().await.connect_task.is_none());
        assert!(!supervisor.session.is_connected().await);
    }

    #[tokio::test]
    async fn manual_start_resets_crash_counter() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();

        supervisor.inner.lock().await.crash_count = 7;
        let _ = supervisor.start(None, "tester").await;
        assert_eq!(supervisor.inner.lock().await.crash_count, 0);
    }

    #[tokio::test]
    async fn four_unintended_exits_schedule_exactly_three_respawns() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();

        for exit in 1..=4u32 {
            supervisor.inner.lock().await.state = InstanceState::Online;
            supervisor.handle_exit(Some(1), false).await;

            let g = supervisor.inner.lock().await;
            assert_eq!(g.state, InstanceState::Crashed);
            assert_eq!(g.crash_count, exit);
            if exit <= 3 {
                assert!(g.respawn_task.is_some(), "respawn {} not scheduled", exit);
            } else {
                assert!(g.respawn_task.is_none(), "respawn scheduled past the limit");
            }
        }
        supervisor.shutdown("tester").await;
    }

    #[tokio::test]
    async fn unintended_exit_without_auto_restart_stays_crashed() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        let mut no_auto = draft("Survival");
        no_auto.auto_restart = false;
        supervisor.create_instance(no_auto).await.unwrap();

        supervisor.inner.lock().await.state = InstanceState::Online;
        supervisor.handle_exit(Some(1), false).await;

        let g = supervisor.inner.lock().await;
        assert_eq!(g.state, InstanceState::Crashed);
        assert!(g.respawn_task.is_none());
    }

    #[tokio::test]
    async fn deliberate_exit_goes_offline_not_crashed() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();

        {
            let mut g = supervisor.inner.lock().await;
            g.state = InstanceState::Stopping;
            g.stop_intent = true;
        }
        supervisor.handle_exit(Some(1), false).await;
        let g = supervisor.inner.lock().await;
        assert_eq!(g.state, InstanceState::Offline);
        assert_eq!(g.crash_count, 0);
    }

    #[tokio::test]
    async fn stop_on_offline_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();

        supervisor.stop("tester").await.unwrap();
        assert_eq!(supervisor.get_status().await.state, InstanceState::Offline);
    }

    #[tokio::test]
    async fn backup_operations_gated_on_offline() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();

        supervisor.inner.lock().await.state = InstanceState::Online;
        assert!(matches!(
            supervisor.create_backup("tester", None).await,
            Err(SupervisorError::InvalidLifecycle { op: "create_backup", .. })
        ));
        assert!(matches!(
            supervisor.restore_backup("tester", "any").await,
            Err(SupervisorError::InvalidLifecycle { op: "restore_backup", .. })
        ));
        assert!(matches!(
            supervisor
                .delete_instance("survival", RetentionPolicy::KeepAll, "tester")
                .await,
            Err(SupervisorError::InvalidLifecycle { op: "delete_instance", .. })
        ));
    }

    #[tokio::test]
    async fn backup_round_trip_while_offline() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();
        let instance_dir = supervisor.paths().instance_dir("survival");
        tokio::fs::write(instance_dir.join("world.dat"), b"level data")
            .await
            .unwrap();

        let entry = supervisor.create_backup("tester", Some("nightly")).await.unwrap();
        assert!(entry.id.starts_with("nightly-"));
        assert_eq!(supervisor.get_backups().await.unwrap().len(), 1);

        tokio::fs::remove_file(instance_dir.join("world.dat")).await.unwrap();
        supervisor.restore_backup("tester", &entry.id).await.unwrap();
        assert!(instance_dir.join("world.dat").is_file());

        supervisor.delete_backup("tester", &entry.id).await.unwrap();
        assert!(supervisor.get_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_instance_applies_retention_and_clears_selection() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();
        supervisor.create_backup("tester", None).await.unwrap();

        supervisor
            .delete_instance("survival", RetentionPolicy::DeleteAll, "tester")
            .await
            .unwrap();
        assert!(!supervisor.paths().instance_dir("survival").exists());
        assert!(supervisor.list_instances().await.unwrap().is_empty());
        assert!(supervisor.inner.lock().await.descriptor.is_none());
        assert!(supervisor
            .backups
            .list("survival")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn execute_command_without_channel_or_process_fails_transiently() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();

        let result = supervisor.execute_command("tester", "say hi").await;
        assert!(matches!(result, Err(ref e) if e.is_transient()));
    }

    #[tokio::test]
    async fn restart_without_descriptor_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        assert!(matches!(
            supervisor.restart("tester").await,
            Err(SupervisorError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn restart_rejected_while_starting() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();

        supervisor.inner.lock().await.state = InstanceState::Starting;
        assert!(matches!(
            supervisor.restart("tester").await,
            Err(SupervisorError::InvalidLifecycle { op: "restart", .. })
        ));
    }

    #[tokio::test]
    async fn save_settings_patches_descriptor_and_properties() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();

        let mut properties = std::collections::BTreeMap::new();
        properties.insert("max-players".to_string(), "40".to_string());
        let view = supervisor
            .save_settings(
                "tester",
                InstanceSettings {
                    auto_restart: Some(false),
                    properties: Some(properties),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!view.instance.auto_restart);
        assert_eq!(view.properties.get("max-players").map(String::as_str), Some("40"));

        // persisted, not just in-memory
        let reloaded = supervisor.get_settings().await.unwrap();
        assert!(!reloaded.instance.auto_restart);
        assert_eq!(
            reloaded.properties.get("max-players").map(String::as_str),
            Some("40")
        );
    }

    #[tokio::test]
    async fn status_stream_emits_on_every_transition() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();
        let mut status_rx = supervisor.subscribe_status();

        // spawn failure walks Offline -> Starting -> Crashed
        let _ = supervisor.start(None, "tester").await;
        assert_eq!(status_rx.recv().await.unwrap().state, InstanceState::Starting);
        assert_eq!(status_rx.recv().await.unwrap().state, InstanceState::Crashed);
    }

    #[tokio::test]
    async fn public_info_reflects_properties_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();

        let info = supervisor.get_public_info().await.unwrap();
        assert_eq!(info.name, "Survival");
        assert_eq!(info.motd, "Survival");
        assert_eq!(info.status, InstanceState::Offline);
        assert_eq!(info.core_type, "vanilla");
        assert_eq!(info.players.online, 0);
    }

    #[tokio::test]
    async fn get_players_without_live_query_uses_static_sources() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = new_supervisor(dir.path());
        supervisor.create_instance(draft("Survival")).await.unwrap();
        tokio::fs::write(
            supervisor.paths().instance_dir("survival").join("ops.json"),
            r#"[{"uuid": "10000000-0000-0000-0000-000000000001", "name": "steve", "level": 4}]"#,
        )
        .await
        .unwrap();

        let first = supervisor.get_players().await.unwrap();
        let second = supervisor.get_players().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert!(first[0].op && !first[0].online);

        // aggregation refreshed the public snapshot
        let snapshot = tokio::fs::read_to_string(supervisor.paths().status_snapshot_path())
            .await
            .unwrap();
        let snapshot: PublicStatus = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(snapshot.name, "Survival");
    }
}
