//! Coordinator controller
//!
//! The top-level event loop. It sequences bootstrap, steady-state
//! scheduling and reactions to node churn and status reports, and owns
//! the public changefeed management API. All registry, operator and
//! bootstrapper transitions happen on the loop task or under the API
//! lock; parallelism is limited to the node-watcher callback (flips a
//! flag), the public API, and the periodic tick producers.

use crate::backend::MetadataBackend;
use crate::bootstrap::Bootstrapper;
use crate::changefeed::{
    Changefeed, ChangefeedId, ChangefeedInfo, ChangefeedStatus, DisplayName, FeedState, Progress,
};
use crate::config::{CoordinatorConfig, OwnerMismatchPolicy};
use crate::error::{CoordinatorError, Result};
use crate::messaging::{IncomingMessage, MessageSender, OutboundMessage};
use crate::node::{NodeId, NodeManager};
use crate::observability::CoordinatorMetrics;
use crate::operator_controller::OperatorController;
use crate::protocol::{ComponentState, CoordinatorMessage, MaintainerStatus, RunningError};
use crate::registry::ChangefeedRegistry;
use crate::scheduler::{BalanceScheduler, BasicScheduler, Scheduler};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Interval between period events
const PERIOD_INTERVAL: Duration = Duration::from_millis(500);

/// Interval between operator controller polls
const OPERATOR_TICK: Duration = Duration::from_millis(100);

/// Minimum interval between metrics refreshes
const METRICS_INTERVAL: Duration = Duration::from_secs(20);

/// An event consumed by the controller loop
#[derive(Debug)]
pub enum Event {
    /// A typed message from a node
    Message(IncomingMessage),
    /// Periodic housekeeping
    Period,
}

/// Published when a changefeed's derived state changes
#[derive(Debug, Clone)]
pub struct ChangefeedStateChangeEvent {
    pub changefeed_id: ChangefeedId,
    pub state: FeedState,
    pub err: Option<RunningError>,
}

/// A maintainer reported running on a remote node during bootstrap
struct RemoteMaintainer {
    node: NodeId,
    status: MaintainerStatus,
}

/// The cluster-wide coordinator controller
pub struct Controller {
    config: CoordinatorConfig,
    registry: Arc<ChangefeedRegistry>,
    operator_controller: Arc<OperatorController>,
    schedulers: Vec<Arc<dyn Scheduler>>,
    backend: Arc<dyn MetadataBackend>,
    sender: Arc<dyn MessageSender>,
    node_manager: Arc<NodeManager>,

    bootstrapper: Mutex<Bootstrapper<Vec<MaintainerStatus>>>,
    bootstrapped: AtomicBool,
    node_changed: Arc<AtomicBool>,

    updated_changefeed_tx: mpsc::Sender<HashMap<ChangefeedId, Arc<Changefeed>>>,
    state_changed_tx: mpsc::Sender<ChangefeedStateChangeEvent>,

    task_handles: Mutex<Vec<JoinHandle<()>>>,
    last_metrics_at: Mutex<Instant>,
    api_lock: tokio::sync::RwLock<()>,
}

impl Controller {
    /// Build the controller, send the initial bootstrap handshakes and
    /// start the period tick. The event loop itself is started with
    /// [`Controller::spawn_event_loop`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoordinatorConfig,
        backend: Arc<dyn MetadataBackend>,
        sender: Arc<dyn MessageSender>,
        node_manager: Arc<NodeManager>,
        event_tx: mpsc::Sender<Event>,
        updated_changefeed_tx: mpsc::Sender<HashMap<ChangefeedId, Arc<Changefeed>>>,
        state_changed_tx: mpsc::Sender<ChangefeedStateChangeEvent>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let registry = Arc::new(ChangefeedRegistry::new());
        let operator_controller = Arc::new(OperatorController::new(
            registry.clone(),
            sender.clone(),
            config.batch_size,
            config.resend_interval,
        ));
        let schedulers: Vec<Arc<dyn Scheduler>> = vec![
            Arc::new(BasicScheduler::new(
                config.batch_size,
                operator_controller.clone(),
                registry.clone(),
                node_manager.clone(),
            )),
            Arc::new(BalanceScheduler::new(
                config.batch_size,
                config.balance_interval,
                operator_controller.clone(),
                registry.clone(),
                node_manager.clone(),
            )),
        ];

        let version = config.version;
        let bootstrapper = Bootstrapper::new(
            "coordinator",
            Box::new(move |id: &NodeId| {
                info!(node = %id, "send coordinator bootstrap request");
                OutboundMessage::new(
                    id.clone(),
                    CoordinatorMessage::BootstrapRequest { version },
                )
            }),
        );

        let controller = Arc::new(Self {
            config,
            registry,
            operator_controller,
            schedulers,
            backend,
            sender,
            node_manager,
            bootstrapper: Mutex::new(bootstrapper),
            bootstrapped: AtomicBool::new(false),
            node_changed: Arc::new(AtomicBool::new(false)),
            updated_changefeed_tx,
            state_changed_tx,
            task_handles: Mutex::new(Vec::new()),
            last_metrics_at: Mutex::new(Instant::now()),
            api_lock: tokio::sync::RwLock::new(()),
        });

        // watch for fleet changes; the flag is drained at the head of
        // every event so the watcher callback never blocks
        let node_changed = controller.node_changed.clone();
        controller.node_manager.register_node_change_handler(
            "coordinator-controller",
            Box::new(move |_| {
                node_changed.store(true, Ordering::SeqCst);
            }),
        );

        // handshake every node known at startup
        let initial_nodes: Vec<_> = controller
            .node_manager
            .get_alive_nodes()
            .into_values()
            .collect();
        info!(nodes = initial_nodes.len(), "coordinator bootstrap initial nodes");
        let outbound = controller
            .bootstrapper
            .lock()
            .handle_new_nodes(&initial_nodes);
        controller.send_messages(outbound);

        // period tick producer
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PERIOD_INTERVAL);
            loop {
                ticker.tick().await;
                if event_tx.send(Event::Period).await.is_err() {
                    break;
                }
            }
        });
        controller.task_handles.lock().push(handle);

        Ok(controller)
    }

    /// Start the single consumer task draining the event queue
    pub fn spawn_event_loop(self: &Arc<Self>, mut event_rx: mpsc::Receiver<Event>) {
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                controller.handle_event(event).await;
            }
        });
        self.task_handles.lock().push(handle);
    }

    /// Cancel every background task
    pub fn stop(&self) {
        for handle in self.task_handles.lock().drain(..) {
            handle.abort();
        }
    }

    // ==================== Event loop ====================

    /// Dispatch one event. Slow iterations are logged, never preempted.
    pub async fn handle_event(&self, event: Event) {
        let start = Instant::now();
        // fleet changes first, so handlers see a current node view
        self.check_node_changed().await;
        match event {
            Event::Message(message) => self.on_message(message).await,
            Event::Period => self.on_period(),
        }
        let elapsed = start.elapsed();
        if elapsed > Duration::from_secs(1) {
            warn!(duration = ?elapsed, "coordinator event loop is too slow");
            CoordinatorMetrics::record_slow_event(elapsed.as_secs_f64());
        }
    }

    async fn check_node_changed(&self) {
        if self.node_changed.swap(false, Ordering::SeqCst) {
            self.on_node_changed().await;
        }
    }

    async fn on_node_changed(&self) {
        let alive = self.node_manager.get_alive_nodes();
        let (outbound, removed, cache) = {
            let mut bootstrapper = self.bootstrapper.lock();
            let known: HashSet<NodeId> = bootstrapper.all_node_ids().into_iter().collect();
            let new_nodes: Vec<_> = alive
                .values()
                .filter(|n| !known.contains(&n.id))
                .cloned()
                .collect();
            let removed: Vec<NodeId> = known
                .into_iter()
                .filter(|id| !alive.contains_key(id))
                .collect();
            for id in &removed {
                self.remove_node(id);
            }
            let outbound = bootstrapper.handle_new_nodes(&new_nodes);
            let cache = bootstrapper.handle_remove_nodes(&removed);
            (outbound, removed, cache)
        };
        info!(new = outbound.len(), removed = removed.len(), "node changed");
        self.send_messages(outbound);
        if let Some(cache) = cache {
            info!("bootstrap done after some nodes removed");
            self.on_bootstrap_done(cache).await;
        }
    }

    async fn on_message(&self, message: IncomingMessage) {
        match message.message {
            CoordinatorMessage::BootstrapResponse { statuses } => {
                info!(node = %message.from, "received coordinator bootstrap response");
                let cache = self
                    .bootstrapper
                    .lock()
                    .handle_bootstrap_response(&message.from, statuses);
                if let Some(cache) = cache {
                    self.on_bootstrap_done(cache).await;
                }
            }
            CoordinatorMessage::Heartbeat { statuses } => {
                if self.bootstrapper.lock().check_all_node_initialized() {
                    self.handle_status(&message.from, statuses).await;
                }
            }
            other => panic!(
                "unexpected message type on coordinator event loop: {}",
                other.kind()
            ),
        }
    }

    fn on_period(&self) {
        let outbound = self.bootstrapper.lock().resend_bootstrap_message();
        self.send_messages(outbound);
        self.collect_metrics();
    }

    fn collect_metrics(&self) {
        let mut last = self.last_metrics_at.lock();
        if last.elapsed() >= METRICS_INTERVAL {
            self.registry.record_metrics();
            CoordinatorMetrics::set_operator_count(self.operator_controller.operator_count());
            *last = Instant::now();
        }
    }

    fn send_messages(&self, messages: Vec<OutboundMessage>) {
        for message in messages {
            // delivery is eventual: the periodic resend layer covers losses
            let _ = self.sender.send(message);
        }
    }

    // ==================== Bootstrap ====================

    async fn on_bootstrap_done(&self, cache: HashMap<NodeId, Vec<MaintainerStatus>>) {
        let mut running: HashMap<ChangefeedId, RemoteMaintainer> = HashMap::new();
        for (node, statuses) in cache {
            info!(node = %node, maintainers = statuses.len(), "bootstrap response content");
            for status in statuses {
                let id = status.changefeed_id;
                if running.contains_key(&id) {
                    panic!("maintainer for changefeed {id} runs on multiple nodes");
                }
                running.insert(
                    id,
                    RemoteMaintainer {
                        node: node.clone(),
                        status,
                    },
                );
            }
        }
        self.finish_bootstrap(running).await;
    }

    /// Reconcile persisted changefeeds with the fleet's bootstrap
    /// answers, then open the steady state: schedulers and the operator
    /// tick start, and the public API unblocks.
    async fn finish_bootstrap(&self, mut running: HashMap<ChangefeedId, RemoteMaintainer>) {
        if self.bootstrapped.load(Ordering::SeqCst) {
            panic!("coordinator bootstrapped twice");
        }
        let all = match self.backend.get_all_changefeeds().await {
            Ok(all) => all,
            // the coordinator cannot serve with an unknown world
            Err(e) => panic!("load all changefeeds failed: {e}"),
        };
        info!(changefeeds = all.len(), "load all changefeeds");

        for (id, meta) in all {
            match running.remove(&id) {
                Some(remote) => {
                    info!(
                        changefeed = %id,
                        node = %remote.node,
                        checkpoint_ts = remote.status.checkpoint_ts,
                        "changefeed maintainer already running on another node"
                    );
                    let cf = Arc::new(Changefeed::new(
                        meta.info.clone(),
                        remote.status.checkpoint_ts,
                    ));
                    self.registry.add_replicating(cf, remote.node);
                }
                None => {
                    let cf = Arc::new(Changefeed::new(
                        meta.info.clone(),
                        meta.status.checkpoint_ts,
                    ));
                    if cf.should_run() {
                        self.registry.add_absent(cf);
                    } else {
                        self.registry.add_stopped(cf);
                    }
                }
            }
            // resume an interrupted stop or removal
            match meta.status.progress {
                Progress::Stopping => {
                    info!(changefeed = %id, "stop changefeed on bootstrap");
                    self.operator_controller.stop_changefeed(id, false);
                }
                Progress::Removing => {
                    info!(changefeed = %id, "remove changefeed on bootstrap");
                    self.operator_controller.stop_changefeed(id, true);
                }
                Progress::Normal => {}
            }
        }

        // whatever is still running remotely has no persisted metadata
        for (id, remote) in running {
            warn!(changefeed = %id, node = %remote.node, "maintainer not found in metadata, removing");
            let _ = self.sender.send(OutboundMessage::new(
                remote.node,
                CoordinatorMessage::RemoveMaintainerRequest {
                    changefeed_id: id,
                    cascade: true,
                    remove_metadata: true,
                },
            ));
        }

        let mut handles = self.task_handles.lock();
        for scheduler in &self.schedulers {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(scheduler.interval());
                loop {
                    ticker.tick().await;
                    scheduler.execute();
                }
            }));
        }
        let operator_controller = self.operator_controller.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(OPERATOR_TICK);
            loop {
                ticker.tick().await;
                operator_controller.poll();
            }
        }));
        drop(handles);

        self.bootstrapped.store(true, Ordering::SeqCst);
        info!("coordinator bootstrapped");
    }

    // ==================== Status reports ====================

    /// Fold one node's heartbeat statuses into operators and feeds
    pub async fn handle_status(&self, from: &NodeId, statuses: Vec<MaintainerStatus>) {
        let mut updated: HashMap<ChangefeedId, Arc<Changefeed>> = HashMap::new();
        for status in statuses {
            let id = status.changefeed_id;
            self.operator_controller.update_status(from, &status);

            let Some(cf) = self.registry.get_by_id(&id) else {
                if status.state == ComponentState::Working
                    && !self.operator_controller.has_operator(&id)
                {
                    warn!(
                        changefeed = %id,
                        node = %from,
                        "unknown working maintainer reported, removing it"
                    );
                    let _ = self.sender.send(OutboundMessage::new(
                        from.clone(),
                        CoordinatorMessage::RemoveMaintainerRequest {
                            changefeed_id: id,
                            cascade: true,
                            remove_metadata: true,
                        },
                    ));
                }
                continue;
            };

            let Some(node) = cf.node_id() else {
                // the changefeed is stopped
                continue;
            };
            if &node != from {
                warn!(
                    changefeed = %id,
                    remote_node = %from,
                    local_node = %node,
                    "maintainer node mismatch with local record"
                );
                if self.config.owner_mismatch_policy == OwnerMismatchPolicy::RemoveReporter {
                    let _ = self.sender.send(OutboundMessage::new(
                        from.clone(),
                        CoordinatorMessage::RemoveMaintainerRequest {
                            changefeed_id: id,
                            cascade: true,
                            remove_metadata: false,
                        },
                    ));
                }
                continue;
            }

            updated.insert(id, cf.clone());
            if let Some((state, err)) = cf.update_status(&status) {
                info!(changefeed = %id, ?state, "changefeed state changed");
                let event = ChangefeedStateChangeEvent {
                    changefeed_id: id,
                    state,
                    err,
                };
                // the consumer is expected to drain this channel
                let _ = self.state_changed_tx.send(event).await;
            }
        }
        // drop the per-tick map when the receiver is slow
        let _ = self.updated_changefeed_tx.try_send(updated);
    }

    /// A node left the cluster: notify the operator controller
    pub fn remove_node(&self, id: &NodeId) {
        self.operator_controller.on_node_removed(id);
    }

    // ==================== Public management API ====================

    fn ensure_bootstrapped(&self) -> Result<()> {
        if !self.bootstrapped.load(Ordering::SeqCst) {
            return Err(CoordinatorError::NotBootstrapped);
        }
        Ok(())
    }

    /// Create a changefeed: persist it, then schedule it
    pub async fn create_changefeed(&self, info: ChangefeedInfo) -> Result<()> {
        let _guard = self.api_lock.write().await;
        self.ensure_bootstrapped()?;

        if self
            .registry
            .get_by_display_name(&info.display_name)
            .is_some()
        {
            return Err(CoordinatorError::ChangefeedAlreadyExists(
                info.display_name.to_string(),
            ));
        }
        if self.operator_controller.has_operator(&info.id) {
            return Err(CoordinatorError::InScheduling(info.display_name.to_string()));
        }
        self.backend.create_changefeed(&info).await?;
        let start_ts = info.start_ts;
        self.registry
            .add_absent(Arc::new(Changefeed::new(info, start_ts)));
        Ok(())
    }

    /// Remove a changefeed; returns its last known checkpoint
    pub async fn remove_changefeed(&self, id: ChangefeedId) -> Result<u64> {
        let _guard = self.api_lock.write().await;
        self.ensure_bootstrapped()?;

        let cf = self
            .registry
            .get_by_id(&id)
            .ok_or_else(|| CoordinatorError::ChangefeedNotFound(id.to_string()))?;
        self.backend
            .set_changefeed_progress(id, Progress::Removing)
            .await?;
        self.operator_controller.stop_changefeed(id, true);
        Ok(cf.checkpoint_ts())
    }

    /// Pause a changefeed
    pub async fn pause_changefeed(&self, id: ChangefeedId) -> Result<()> {
        let _guard = self.api_lock.write().await;
        self.ensure_bootstrapped()?;

        let cf = self
            .registry
            .get_by_id(&id)
            .ok_or_else(|| CoordinatorError::ChangefeedNotFound(id.to_string()))?;
        self.backend.pause_changefeed(id).await?;
        let mut info = cf.info();
        info.state = FeedState::Stopped;
        cf.set_info(info);
        self.operator_controller.stop_changefeed(id, false);
        Ok(())
    }

    /// Resume a paused changefeed, optionally overriding its checkpoint
    pub async fn resume_changefeed(
        &self,
        id: ChangefeedId,
        new_checkpoint_ts: u64,
        overwrite_checkpoint_ts: bool,
    ) -> Result<()> {
        let _guard = self.api_lock.write().await;
        self.ensure_bootstrapped()?;

        let cf = self
            .registry
            .get_by_id(&id)
            .ok_or_else(|| CoordinatorError::ChangefeedNotFound(id.to_string()))?;
        self.backend
            .resume_changefeed(id, new_checkpoint_ts)
            .await?;
        let mut info = cf.info();
        info.state = FeedState::Normal;
        cf.set_info(info);
        if overwrite_checkpoint_ts {
            cf.force_checkpoint(new_checkpoint_ts);
        }
        self.registry.resume(&id);
        Ok(())
    }

    /// Replace the configuration of a stopped changefeed
    pub async fn update_changefeed(&self, info: ChangefeedInfo) -> Result<()> {
        let _guard = self.api_lock.write().await;
        self.ensure_bootstrapped()?;

        let cf = self
            .registry
            .get_by_id(&info.id)
            .ok_or_else(|| CoordinatorError::ChangefeedNotFound(info.id.to_string()))?;
        self.backend
            .update_changefeed(&info, cf.checkpoint_ts(), Progress::Stopping)
            .await?;
        self.registry.replace_stopped(&cf, info);
        Ok(())
    }

    /// List every changefeed with its status
    pub async fn list_changefeeds(&self) -> Result<Vec<(ChangefeedInfo, ChangefeedStatus)>> {
        let _guard = self.api_lock.read().await;
        self.ensure_bootstrapped()?;

        Ok(self
            .registry
            .get_all()
            .into_iter()
            .map(|cf| (cf.info(), ChangefeedStatus::new(cf.checkpoint_ts())))
            .collect())
    }

    /// Look one changefeed up by display name, resolving its maintainer
    /// address through the node manager
    pub async fn get_changefeed(
        &self,
        display_name: &DisplayName,
    ) -> Result<(ChangefeedInfo, ChangefeedStatus)> {
        let _guard = self.api_lock.read().await;
        self.ensure_bootstrapped()?;

        let cf = self
            .registry
            .get_by_display_name(display_name)
            .ok_or_else(|| CoordinatorError::ChangefeedNotFound(display_name.to_string()))?;
        let mut status = ChangefeedStatus::new(cf.checkpoint_ts());
        if let Some(node) = cf.node_id() {
            status.maintainer_addr = self
                .node_manager
                .get_node_info(&node)
                .map(|n| n.advertise_addr);
        }
        Ok((cf.info(), status))
    }

    // ==================== Introspection ====================

    pub fn registry(&self) -> &Arc<ChangefeedRegistry> {
        &self.registry
    }

    pub fn operator_controller(&self) -> &Arc<OperatorController> {
        &self.operator_controller
    }

    /// The configured schedulers, basic first
    pub fn schedulers(&self) -> &[Arc<dyn Scheduler>] {
        &self.schedulers
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::changefeed::ChangefeedMeta;
    use crate::messaging::LocalRouter;
    use crate::node::NodeInfo;
    use crate::registry::Bucket;

    struct Harness {
        controller: Arc<Controller>,
        router: Arc<LocalRouter>,
        backend: Arc<MemoryBackend>,
        node_manager: Arc<NodeManager>,
        state_rx: mpsc::Receiver<ChangefeedStateChangeEvent>,
        updated_rx: mpsc::Receiver<HashMap<ChangefeedId, Arc<Changefeed>>>,
    }

    fn node_set(ids: &[&str]) -> HashMap<NodeId, NodeInfo> {
        ids.iter()
            .map(|id| (id.to_string(), NodeInfo::new(*id, format!("{id}.example:8300"))))
            .collect()
    }

    fn harness(nodes: &[&str], backend: Arc<MemoryBackend>) -> Harness {
        let router = Arc::new(LocalRouter::new());
        let node_manager = Arc::new(NodeManager::new());
        node_manager.apply_node_changes(node_set(nodes));

        let (event_tx, _event_rx) = mpsc::channel(1024);
        let (updated_tx, updated_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = mpsc::channel(16);

        let controller = Controller::new(
            CoordinatorConfig::new("coordinator").with_batch_size(8),
            backend.clone(),
            router.clone(),
            node_manager.clone(),
            event_tx,
            updated_tx,
            state_tx,
        )
        .unwrap();

        Harness {
            controller,
            router,
            backend,
            node_manager,
            state_rx,
            updated_rx,
        }
    }

    fn seed_feed(backend: &MemoryBackend, name: &str, checkpoint_ts: u64) -> ChangefeedInfo {
        let info = ChangefeedInfo::new(DisplayName::new("default", name), checkpoint_ts, "kafka://sink");
        backend.seed(ChangefeedMeta {
            info: info.clone(),
            status: ChangefeedStatus::new(checkpoint_ts),
        });
        info
    }

    fn bootstrap_response(from: &str, statuses: Vec<MaintainerStatus>) -> Event {
        Event::Message(IncomingMessage::new(
            from,
            CoordinatorMessage::BootstrapResponse { statuses },
        ))
    }

    fn heartbeat(from: &str, statuses: Vec<MaintainerStatus>) -> Event {
        Event::Message(IncomingMessage::new(
            from,
            CoordinatorMessage::Heartbeat { statuses },
        ))
    }

    fn working(id: ChangefeedId, checkpoint_ts: u64) -> MaintainerStatus {
        MaintainerStatus {
            changefeed_id: id,
            state: ComponentState::Working,
            checkpoint_ts,
            err: None,
        }
    }

    fn stopped(id: ChangefeedId) -> MaintainerStatus {
        MaintainerStatus {
            changefeed_id: id,
            state: ComponentState::Stopped,
            checkpoint_ts: 0,
            err: None,
        }
    }

    async fn bootstrap_empty(h: &Harness, nodes: &[&str]) {
        for node in nodes {
            h.controller
                .handle_event(bootstrap_response(node, vec![]))
                .await;
        }
        assert!(h.controller.is_bootstrapped());
    }

    // Scenario A: fresh cluster, one feed, two nodes
    #[tokio::test]
    async fn test_fresh_cluster_schedules_persisted_feed() {
        let backend = Arc::new(MemoryBackend::new());
        let info = seed_feed(&backend, "cf1", 100);
        let h = harness(&["n1", "n2"], backend);

        // both nodes got a handshake at construction
        for node in ["n1", "n2"] {
            let sent = h.router.take(&node.to_string());
            assert!(sent
                .iter()
                .any(|m| matches!(m, CoordinatorMessage::BootstrapRequest { version: 1 })));
        }

        bootstrap_empty(&h, &["n1", "n2"]).await;
        assert_eq!(
            h.controller.registry().bucket_of(&info.id),
            Some(Bucket::Absent)
        );

        // one basic tick files exactly one add operator
        h.controller.schedulers()[0].execute();
        assert_eq!(h.controller.operator_controller().operator_count(), 1);
        let cf = h.controller.registry().get_by_id(&info.id).unwrap();
        let target = cf.node_id().expect("bound to a node");
        assert!(target == "n1" || target == "n2");

        // ack from the target promotes the feed to replicating
        h.controller
            .handle_event(heartbeat(&target, vec![working(info.id, 101)]))
            .await;
        assert_eq!(
            h.controller.registry().bucket_of(&info.id),
            Some(Bucket::Replicating)
        );
        assert_eq!(cf.checkpoint_ts(), 101);
        assert_eq!(h.controller.operator_controller().operator_count(), 0);
    }

    // Scenario B: failover to the surviving node
    #[tokio::test]
    async fn test_failover_reschedules_preserving_checkpoint() {
        let backend = Arc::new(MemoryBackend::new());
        let info = seed_feed(&backend, "cf1", 100);
        let h = harness(&["n1", "n2"], backend);

        // cf1 already runs on n1
        h.controller
            .handle_event(bootstrap_response("n1", vec![working(info.id, 150)]))
            .await;
        h.controller
            .handle_event(bootstrap_response("n2", vec![]))
            .await;
        assert_eq!(
            h.controller.registry().bucket_of(&info.id),
            Some(Bucket::Replicating)
        );

        // n1 drops out of the fleet
        h.node_manager.apply_node_changes(node_set(&["n2"]));
        h.controller.handle_event(Event::Period).await;
        assert_eq!(
            h.controller.registry().bucket_of(&info.id),
            Some(Bucket::Absent)
        );

        // next basic tick reassigns to n2, checkpoint preserved
        h.controller.schedulers()[0].execute();
        let cf = h.controller.registry().get_by_id(&info.id).unwrap();
        assert_eq!(cf.node_id().as_deref(), Some("n2"));

        h.controller
            .handle_event(heartbeat("n2", vec![working(info.id, 150)]))
            .await;
        assert_eq!(
            h.controller.registry().bucket_of(&info.id),
            Some(Bucket::Replicating)
        );
        assert_eq!(cf.checkpoint_ts(), 150);
    }

    // Scenario C: stale maintainer is told to remove itself
    #[tokio::test]
    async fn test_stale_maintainer_removed() {
        let backend = Arc::new(MemoryBackend::new());
        let h = harness(&["n1", "n2", "n3"], backend);
        bootstrap_empty(&h, &["n1", "n2", "n3"]).await;
        h.router.take(&"n3".to_string());

        let unknown = uuid::Uuid::new_v4();
        h.controller
            .handle_event(heartbeat("n3", vec![working(unknown, 10)]))
            .await;

        let sent = h.router.take(&"n3".to_string());
        assert!(sent.iter().any(|m| matches!(
            m,
            CoordinatorMessage::RemoveMaintainerRequest { changefeed_id, .. } if *changefeed_id == unknown
        )));
    }

    // Scenario E: duplicate-running detection is fatal
    #[tokio::test]
    #[should_panic(expected = "runs on multiple nodes")]
    async fn test_duplicate_running_maintainer_panics() {
        let backend = Arc::new(MemoryBackend::new());
        let info = seed_feed(&backend, "cf1", 100);
        let h = harness(&["n1", "n2"], backend);

        h.controller
            .handle_event(bootstrap_response("n1", vec![working(info.id, 100)]))
            .await;
        h.controller
            .handle_event(bootstrap_response("n2", vec![working(info.id, 100)]))
            .await;
    }

    // Scenario F: pause then resume with checkpoint override
    #[tokio::test]
    async fn test_pause_resume_cycle() {
        let backend = Arc::new(MemoryBackend::new());
        let info = seed_feed(&backend, "cf1", 100);
        let h = harness(&["n1"], backend.clone());

        h.controller
            .handle_event(bootstrap_response("n1", vec![working(info.id, 120)]))
            .await;
        h.router.take(&"n1".to_string());

        // pause: backend updated, stop operator filed
        h.controller.pause_changefeed(info.id).await.unwrap();
        let persisted = backend.get_all_changefeeds().await.unwrap();
        assert_eq!(persisted[&info.id].info.state, FeedState::Stopped);
        assert_eq!(h.controller.operator_controller().operator_count(), 1);

        h.controller.operator_controller().poll();
        let sent = h.router.take(&"n1".to_string());
        assert!(sent.iter().any(|m| matches!(
            m,
            CoordinatorMessage::RemoveMaintainerRequest {
                remove_metadata: false,
                ..
            }
        )));

        // the node confirms teardown: feed lands in Stopped
        h.controller
            .handle_event(heartbeat("n1", vec![stopped(info.id)]))
            .await;
        assert_eq!(
            h.controller.registry().bucket_of(&info.id),
            Some(Bucket::Stopped)
        );

        // resume with overwrite: absent at the new checkpoint
        h.controller
            .resume_changefeed(info.id, 200, true)
            .await
            .unwrap();
        assert_eq!(
            h.controller.registry().bucket_of(&info.id),
            Some(Bucket::Absent)
        );
        let cf = h.controller.registry().get_by_id(&info.id).unwrap();
        assert_eq!(cf.checkpoint_ts(), 200);

        // next tick reschedules it
        h.controller.schedulers()[0].execute();
        assert_eq!(cf.node_id().as_deref(), Some("n1"));
    }

    // Bootstrap idempotence: replaying responses changes nothing
    #[tokio::test]
    async fn test_bootstrap_replay_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let info = seed_feed(&backend, "cf1", 100);
        let h = harness(&["n1", "n2"], backend);

        h.controller
            .handle_event(bootstrap_response("n1", vec![working(info.id, 130)]))
            .await;
        h.controller
            .handle_event(bootstrap_response("n2", vec![]))
            .await;
        let sizes = h.controller.registry().sizes();

        // replay the full response set
        h.controller
            .handle_event(bootstrap_response("n1", vec![working(info.id, 130)]))
            .await;
        h.controller
            .handle_event(bootstrap_response("n2", vec![]))
            .await;

        assert_eq!(h.controller.registry().sizes(), sizes);
        assert_eq!(
            h.controller.registry().bucket_of(&info.id),
            Some(Bucket::Replicating)
        );
    }

    #[tokio::test]
    async fn test_api_rejects_until_bootstrapped() {
        let backend = Arc::new(MemoryBackend::new());
        let h = harness(&["n1"], backend);

        let info = ChangefeedInfo::new(DisplayName::new("default", "cf1"), 1, "kafka://sink");
        let err = h.controller.create_changefeed(info).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NotBootstrapped));
        assert!(h.controller.list_changefeeds().await.is_err());
    }

    #[tokio::test]
    async fn test_create_duplicate_display_name_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let h = harness(&["n1"], backend);
        bootstrap_empty(&h, &["n1"]).await;

        let info = ChangefeedInfo::new(DisplayName::new("default", "cf1"), 1, "kafka://sink");
        h.controller.create_changefeed(info).await.unwrap();

        let same_name = ChangefeedInfo::new(DisplayName::new("default", "cf1"), 2, "kafka://other");
        let err = h.controller.create_changefeed(same_name).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::ChangefeedAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_remove_returns_last_checkpoint() {
        let backend = Arc::new(MemoryBackend::new());
        let info = seed_feed(&backend, "cf1", 100);
        let h = harness(&["n1"], backend);

        h.controller
            .handle_event(bootstrap_response("n1", vec![working(info.id, 140)]))
            .await;

        let checkpoint = h.controller.remove_changefeed(info.id).await.unwrap();
        assert_eq!(checkpoint, 140);

        // teardown ack drops the feed entirely
        h.controller
            .handle_event(heartbeat("n1", vec![stopped(info.id)]))
            .await;
        assert!(h.controller.registry().get_by_id(&info.id).is_none());
    }

    #[tokio::test]
    async fn test_state_change_published_on_error() {
        let backend = Arc::new(MemoryBackend::new());
        let info = seed_feed(&backend, "cf1", 100);
        let mut h = harness(&["n1"], backend);

        h.controller
            .handle_event(bootstrap_response("n1", vec![working(info.id, 120)]))
            .await;

        let mut status = working(info.id, 121);
        status.err = Some(RunningError {
            node: "n1".into(),
            code: "CDC:ErrSink".into(),
            message: "sink unreachable".into(),
        });
        h.controller.handle_event(heartbeat("n1", vec![status])).await;

        let event = h.state_rx.try_recv().unwrap();
        assert_eq!(event.changefeed_id, info.id);
        assert_eq!(event.state, FeedState::Failed);
        assert!(event.err.is_some());

        // the per-tick update map came through the non-blocking channel
        let updated = h.updated_rx.try_recv().unwrap();
        assert!(updated.contains_key(&info.id));
    }

    #[tokio::test]
    async fn test_owner_mismatch_ignored_by_default() {
        let backend = Arc::new(MemoryBackend::new());
        let info = seed_feed(&backend, "cf1", 100);
        let h = harness(&["n1", "n2"], backend);

        h.controller
            .handle_event(bootstrap_response("n1", vec![working(info.id, 130)]))
            .await;
        h.controller
            .handle_event(bootstrap_response("n2", vec![]))
            .await;
        h.router.take(&"n2".to_string());

        // n2 claims a feed the registry binds to n1
        h.controller
            .handle_event(heartbeat("n2", vec![working(info.id, 999)]))
            .await;

        let cf = h.controller.registry().get_by_id(&info.id).unwrap();
        assert_eq!(cf.node_id().as_deref(), Some("n1"));
        assert_eq!(cf.checkpoint_ts(), 130, "mismatched report must be discarded");
        assert!(h.router.take(&"n2".to_string()).is_empty());
    }

    #[tokio::test]
    async fn test_get_changefeed_resolves_maintainer_addr() {
        let backend = Arc::new(MemoryBackend::new());
        let info = seed_feed(&backend, "cf1", 100);
        let h = harness(&["n1"], backend);

        h.controller
            .handle_event(bootstrap_response("n1", vec![working(info.id, 130)]))
            .await;

        let (got_info, status) = h
            .controller
            .get_changefeed(&DisplayName::new("default", "cf1"))
            .await
            .unwrap();
        assert_eq!(got_info.id, info.id);
        assert_eq!(status.checkpoint_ts, 130);
        assert_eq!(status.maintainer_addr.as_deref(), Some("n1.example:8300"));
    }

    #[tokio::test]
    async fn test_bootstrap_removes_unpersisted_maintainer() {
        let backend = Arc::new(MemoryBackend::new());
        let h = harness(&["n1"], backend);

        let ghost = uuid::Uuid::new_v4();
        h.controller
            .handle_event(bootstrap_response("n1", vec![working(ghost, 50)]))
            .await;
        assert!(h.controller.is_bootstrapped());

        // nothing persisted for it: the node is told to tear it down
        let sent = h.router.take(&"n1".to_string());
        assert!(sent.iter().any(|m| matches!(
            m,
            CoordinatorMessage::RemoveMaintainerRequest {
                changefeed_id,
                remove_metadata: true,
                ..
            } if *changefeed_id == ghost
        )));
        assert!(h.controller.registry().get_by_id(&ghost).is_none());
    }

    #[tokio::test]
    async fn test_new_node_gets_handshake_on_change() {
        let backend = Arc::new(MemoryBackend::new());
        let h = harness(&["n1"], backend);
        bootstrap_empty(&h, &["n1"]).await;

        h.node_manager.apply_node_changes(node_set(&["n1", "n2"]));
        h.controller.handle_event(Event::Period).await;

        let sent = h.router.take(&"n2".to_string());
        assert!(sent
            .iter()
            .any(|m| matches!(m, CoordinatorMessage::BootstrapRequest { .. })));
    }
}
