//! Main agent loop
//!
//! One iteration: authenticate if needed, reconcile registration, run pending
//! commands in order, send whichever side reports are due, then sleep. Nothing
//! that happens inside an iteration can end the loop except a command that
//! asks the agent to exit.

use crate::acquire::FileAcquirer;
use crate::bridge::SessionBridge;
use crate::command::{CommandDispatcher, HandlerRegistry, HandlerServices};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::identity::IdentityStore;
use crate::platform::SystemActions;
use crate::registration::{Reconciler, Session};
use crate::reports::Reporter;
use crate::rpc::InventoryRpc;
use crate::update::{UpdatePipeline, VersionStore};
use lab_agent_shared::limits;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What the loop should do after an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Sleep(Duration),
    Exit,
}

/// Elapsed-time gate for one periodic report
#[derive(Debug)]
struct Every {
    period: Duration,
    last: Option<Instant>,
}

impl Every {
    fn new(period_ms: u64) -> Self {
        Self {
            period: Duration::from_millis(period_ms),
            last: None,
        }
    }

    /// True on first use and whenever the period has elapsed; marks the run
    fn due(&mut self, now: Instant) -> bool {
        let due = self.last.map_or(true, |last| now.duration_since(last) >= self.period);
        if due {
            self.last = Some(now);
        }
        due
    }
}

pub struct Agent {
    config: Arc<AgentConfig>,
    rpc: Arc<dyn InventoryRpc>,
    system: Arc<dyn SystemActions>,
    reconciler: Reconciler,
    dispatcher: CommandDispatcher,
    reporter: Arc<Reporter>,
    versions: VersionStore,
    session: Session,
    metrics: Every,
    inventory: Every,
    wallpaper: Every,
}

impl Agent {
    /// Wire every collaborator around the given transport and platform
    pub fn new(
        config: AgentConfig,
        rpc: Arc<dyn InventoryRpc>,
        system: Arc<dyn SystemActions>,
    ) -> Self {
        let config = Arc::new(config);
        let identity = IdentityStore::new(config.identity_path()).resolve();
        info!("[IDENTITY] Machine id {}", identity);

        let acquirer = Arc::new(FileAcquirer::new(rpc.clone(), system.clone()));
        let bridge = Arc::new(SessionBridge::new(system.clone(), config.bridge_dir.clone()));
        let pipeline = Arc::new(UpdatePipeline::new(
            rpc.clone(),
            system.clone(),
            acquirer.clone(),
            config.clone(),
        ));
        let reporter = Arc::new(Reporter::new(
            rpc.clone(),
            system.clone(),
            acquirer.clone(),
            bridge.clone(),
            config.clone(),
        ));
        let services = Arc::new(HandlerServices {
            rpc: rpc.clone(),
            system: system.clone(),
            config: config.clone(),
            acquirer,
            bridge,
            pipeline,
            reporter: reporter.clone(),
        });

        Self {
            reconciler: Reconciler::new(rpc.clone(), identity, config.lab_id),
            dispatcher: CommandDispatcher::new(HandlerRegistry::with_defaults(), services),
            versions: VersionStore::from_config(&config),
            reporter,
            config,
            rpc,
            system,
            session: Session::default(),
            metrics: Every::new(limits::METRICS_INTERVAL_MS),
            inventory: Every::new(limits::INVENTORY_INTERVAL_MS),
            wallpaper: Every::new(limits::WALLPAPER_INTERVAL_MS),
        }
    }

    #[cfg(test)]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run until a command asks the agent to exit
    pub async fn run(mut self) {
        info!(
            "Agent {} starting for lab {} against {}",
            self.versions.current(),
            self.config.lab_id,
            self.config.api_base_url
        );
        loop {
            match self.tick().await {
                Tick::Sleep(pause) => tokio::time::sleep(pause).await,
                Tick::Exit => {
                    info!("Agent exiting on request");
                    break;
                }
            }
        }
    }

    /// One loop iteration
    pub async fn tick(&mut self) -> Tick {
        if self.session.token.is_none() && !self.login().await {
            let retry = Duration::from_millis(limits::LOGIN_RETRY_MS).min(self.config.poll_interval);
            return Tick::Sleep(retry);
        }

        let hostname = self.system.hostname();
        let version = self.versions.current();
        self.reconciler
            .reconcile(&mut self.session, &hostname, &version)
            .await;

        let batch = self.dispatcher.poll(&mut self.session).await;
        if batch.exit_requested {
            return Tick::Exit;
        }

        self.side_reports().await;
        Tick::Sleep(Duration::from_millis(limits::LOOP_SLEEP_MS))
    }

    async fn login(&mut self) -> bool {
        match self
            .rpc
            .authenticate(&self.config.email, &self.config.password)
            .await
        {
            Ok(token) => {
                info!("[REG] Logged in as {}", self.config.email);
                self.session.token = Some(token);
                true
            }
            Err(e) => {
                warn!("[REG] Login failed: {}", e);
                false
            }
        }
    }

    async fn side_reports(&mut self) {
        let (Some(token), Some(server_id)) = (self.session.token.clone(), self.session.server_id) else {
            return;
        };
        let now = Instant::now();

        if self.metrics.due(now) {
            let sent = self.reporter.push_metrics(&token, server_id).await;
            if self.absorb("metrics", sent) {
                return;
            }
        }
        if self.inventory.due(now) {
            let sent = self.reporter.push_inventory(&token, server_id).await;
            if self.absorb("inventory", sent) {
                return;
            }
        }
        if self.wallpaper.due(now) {
            let policy = self.session.lab_policy.clone();
            if let Err(e) = self.reporter.enforce_wallpaper(&policy).await {
                debug!("[REPORT] Lab wallpaper enforcement skipped: {:#}", e);
            }
        }
    }

    /// Log a report failure; true when the token expired and reporting should stop
    fn absorb(&mut self, what: &str, result: Result<(), AgentError>) -> bool {
        match result {
            Ok(()) => false,
            Err(e) if e.is_auth_expired() => {
                warn!("[REPORT] Token rejected sending {}, re-authenticating next cycle", what);
                self.session.expire();
                true
            }
            Err(e) => {
                warn!("[REPORT] Failed to send {}: {}", what, e);
                false
            }
        }
    }
}
