//! The node itself: state, lifecycle, and responsibility lookups.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use corelib::{Id, KeySpace, NodeRef, NodeStorage, RingView};
use replication::{QuorumConfig, QuorumCoordinator};
use wire::message::{self as msg, MessageType};
use wire::{Envelope, Server};

use crate::config::NodeConfig;
use crate::error::{Result, RuntimeError};
use crate::handlers;
use crate::state::NodeState;

/// Upper bound on ring hops while chasing responsibility for an id.
pub const MAX_LOOKUP_HOPS: usize = 10;

/// Timeout for one FIND_SUCCESSOR step of the walk.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout when relaying a client request to the responsible node.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// One running node.
///
/// All mutable state lives behind its own lock and no lock is ever held
/// across an await point, so the many connection tasks interleave only at
/// I/O boundaries. That is the cooperative single-writer discipline the
/// protocol assumes.
pub struct Node {
    pub(crate) config: NodeConfig,
    local: NodeRef,
    space: KeySpace,
    pub(crate) ring: RwLock<RingView>,
    storage: NodeStorage,
    pub(crate) quorum: QuorumCoordinator,
    state: RwLock<NodeState>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) next_finger: Mutex<usize>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Bind the listener and bring the node up in `INIT` state. The caller
    /// then founds a ring or joins one.
    pub async fn launch(config: NodeConfig) -> Result<Arc<Self>> {
        let space = KeySpace::new(config.m)?;
        let (listener, bound) = wire::transport::bind(&config.bind_address)
            .await
            .map_err(RuntimeError::Wire)?;
        let advertise = config
            .advertise_address
            .clone()
            .unwrap_or_else(|| bound.to_string());
        let id = space.hash_address(&advertise);
        let local = NodeRef::new(id, advertise);

        let storage = match &config.storage_dir {
            Some(dir) => NodeStorage::with_persistence(id, space, dir)?,
            None => NodeStorage::new(id, space),
        };
        let quorum_config = QuorumConfig::new(
            config.n_replicas,
            config.read_quorum,
            config.write_quorum,
        )?;
        info!(
            node = %id,
            address = %local.address,
            n = config.n_replicas,
            r = config.read_quorum,
            w = config.write_quorum,
            consistency = %quorum_config.level(),
            "node starting"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let node = Arc::new(Node {
            ring: RwLock::new(RingView::new(local.clone(), space)),
            quorum: QuorumCoordinator::new(local.clone(), quorum_config),
            state: RwLock::new(NodeState::Init),
            next_finger: Mutex::new(0),
            tasks: Mutex::new(Vec::new()),
            config,
            local,
            space,
            storage,
            shutdown_tx,
        });

        let registry = handlers::build_registry(&node);
        let server = Arc::new(Server::new(node.local.clone(), registry));
        let accept_task = tokio::spawn(server.serve(listener, shutdown_rx));
        node.tasks.lock().push(accept_task);
        crate::stabilize::spawn_maintenance(&node);
        Ok(node)
    }

    /// Bring a node all the way up according to its config: launch, then
    /// found or join a ring.
    pub async fn start(config: NodeConfig) -> Result<Arc<Self>> {
        let join = config.join.clone();
        let node = Self::launch(config).await?;
        match join {
            Some(known) => node.join_ring(&known).await?,
            None => node.create_ring().await?,
        }
        Ok(node)
    }

    /// Stop accepting connections, cancel maintenance tasks and mark the
    /// node terminated. In-flight connection handlers drain on their own.
    pub async fn shutdown(&self) {
        info!(node = %self.local.id, "shutting down");
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
        }
        self.set_state(NodeState::Terminated);
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn local(&self) -> &NodeRef {
        &self.local
    }

    pub fn id(&self) -> Id {
        self.local.id
    }

    pub fn address(&self) -> &str {
        &self.local.address
    }

    pub fn space(&self) -> KeySpace {
        self.space
    }

    pub fn storage(&self) -> &NodeStorage {
        &self.storage
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, next: NodeState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(node = %self.local.id, from = %*state, to = %next, "state transition");
            *state = next;
        }
    }

    pub(crate) fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    // ------------------------------------------------------------------
    // Responsibility lookup
    // ------------------------------------------------------------------

    /// Walk the ring until a node reports itself responsible for `id`,
    /// bounded by [`MAX_LOOKUP_HOPS`]. An unreachable hop ends the walk at
    /// the best node known so far; the caller's sloppy-quorum fallback
    /// covers the rest.
    pub async fn find_responsible_node(&self, id: Id) -> NodeRef {
        let mut current = {
            let ring = self.ring.read();
            ring.find_successor(id)
                .unwrap_or_else(|| ring.local().clone())
        };
        if current.id == self.local.id {
            return current;
        }

        let mut visited: HashSet<Id> = HashSet::from([self.local.id]);
        let mut hops = 0;
        while hops < MAX_LOOKUP_HOPS && !visited.contains(&current.id) {
            visited.insert(current.id);
            let Ok(request) = Envelope::request(
                MessageType::FindSuccessor,
                &self.local,
                msg::FindSuccessor { identifier: id },
            ) else {
                return current;
            };
            match wire::call_checked(&current.address, &request, LOOKUP_TIMEOUT).await {
                Ok(reply) => match reply.payload::<msg::FindSuccessorReply>() {
                    Ok(msg::FindSuccessorReply {
                        successor: Some(next),
                    }) => {
                        if next.id == current.id {
                            // This node claims responsibility.
                            return current;
                        }
                        current = next;
                    }
                    _ => return current,
                },
                Err(err) => {
                    debug!(
                        node = %self.local.id,
                        target = %current,
                        %err,
                        "lookup hop unreachable, settling for best known"
                    );
                    return current;
                }
            }
            hops += 1;
        }
        current
    }

    /// Replica candidates for a key: its `N`-successor arc with `exclude`d
    /// ids removed, capped at `N-1` fan-out targets. Falls back to the
    /// successor list while full-ring knowledge is missing.
    pub(crate) fn replica_candidates(&self, key_hash: Id, exclude: &[Id]) -> Vec<NodeRef> {
        let n = self.config.n_replicas;
        let ring = self.ring.read();
        let mut replicas: Vec<NodeRef> = ring
            .n_successors(key_hash, n)
            .into_iter()
            .filter(|node| !exclude.contains(&node.id))
            .take(n.saturating_sub(1))
            .collect();
        if replicas.is_empty() {
            replicas = ring
                .successor_list()
                .iter()
                .filter(|node| !exclude.contains(&node.id))
                .take(n.saturating_sub(1))
                .cloned()
                .collect();
        }
        replicas
    }
}
