//! Periodic stabilization.
//!
//! Four maintenance loops per node, each on its own tick:
//!
//! - **Stabilize**: verify the successor against its predecessor and
//!   notify it of our existence
//! - **Fix-fingers**: refresh one finger entry per tick, round-robin
//! - **Check-predecessor**: ping the predecessor and clear it on silence
//! - **Successor list**: rebuild `[successor] ++ successor's list`,
//!   truncated to N

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use corelib::id::in_arc_open;
use corelib::NodeRef;
use wire::message::{self as msg, MessageType};
use wire::Envelope;

use crate::node::Node;

/// Timeout for stabilization RPCs (GET_PREDECESSOR, GET_SUCCESSOR_LIST).
pub const STABILIZE_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the predecessor liveness probe.
pub const PING_TIMEOUT: Duration = Duration::from_secs(3);

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(3);

/// Spawn the four maintenance loops for a node. They stop when the node's
/// shutdown signal flips.
pub(crate) fn spawn_maintenance(node: &Arc<Node>) {
    spawn_periodic(node, node.config.stabilize_interval, |node| async move {
        node.stabilize().await;
    });
    spawn_periodic(node, node.config.fix_fingers_interval, |node| async move {
        node.fix_fingers();
    });
    spawn_periodic(node, node.config.check_predecessor_interval, |node| async move {
        node.check_predecessor().await;
    });
    spawn_periodic(node, node.config.successor_list_interval, |node| async move {
        node.update_successor_list().await;
    });
}

fn spawn_periodic<F, Fut>(node: &Arc<Node>, interval: Duration, tick: F)
where
    F: Fn(Arc<Node>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let node_task = Arc::clone(node);
    let mut shutdown = node.shutdown_tx.subscribe();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    tick(Arc::clone(&node_task)).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });
    node.track_task(handle);
}

impl Node {
    /// Ask the successor for its predecessor X; adopt X as successor when
    /// it sits in `(self, successor)`, then notify the (possibly new)
    /// successor that we exist.
    pub async fn stabilize(&self) {
        let (successor, predecessor) = {
            let ring = self.ring.read();
            (ring.successor().cloned(), ring.predecessor().cloned())
        };
        let Some(mut successor) = successor else {
            return;
        };

        if successor.id == self.id() {
            // Alone so far; a predecessor learned via NOTIFY makes a
            // two-node ring.
            match predecessor.filter(|p| p.id != self.id()) {
                Some(pred) => {
                    info!(node = %self.id(), successor = %pred, "was alone, adopting predecessor as successor");
                    self.ring.write().set_successor(pred.clone());
                    successor = pred;
                }
                None => return,
            }
        }

        let Ok(request) = Envelope::request(
            MessageType::GetPredecessor,
            self.local(),
            msg::Empty::default(),
        ) else {
            return;
        };
        match wire::call_checked(&successor.address, &request, STABILIZE_RPC_TIMEOUT).await {
            Ok(reply) => {
                if let Ok(payload) = reply.payload::<msg::PredecessorReply>() {
                    if let Some(between) = payload.predecessor {
                        if between.id != self.id()
                            && in_arc_open(between.id, self.id(), successor.id)
                        {
                            info!(node = %self.id(), successor = %between, "stabilize adopted closer successor");
                            self.ring.write().set_successor(between.clone());
                            successor = between;
                        }
                    }
                }
            }
            Err(err) => {
                debug!(node = %self.id(), successor = %successor, %err, "stabilize: successor unreachable");
                return;
            }
        }

        let Ok(notify) = Envelope::request(
            MessageType::Notify,
            self.local(),
            msg::NodeAnnounce::from(self.local()),
        ) else {
            return;
        };
        if let Err(err) = wire::cast(&successor.address, &notify, NOTIFY_TIMEOUT).await {
            debug!(node = %self.id(), successor = %successor, %err, "notify failed");
        }
    }

    /// Refresh one finger entry per tick, rotating through the table.
    pub(crate) fn fix_fingers(&self) {
        let index = {
            let mut next = self.next_finger.lock();
            *next = (*next + 1) % self.space().m() as usize;
            *next
        };
        let target = {
            let ring = self.ring.read();
            ring.find_successor(ring.finger_start(index))
        };
        if let Some(node) = target {
            debug!(node = %self.id(), finger = index, points_at = %node.id, "fixed finger");
            self.ring.write().set_finger(index, node);
        }
    }

    /// Probe the predecessor; clear it when it stops answering so a
    /// replacement can be adopted via NOTIFY.
    pub(crate) async fn check_predecessor(&self) {
        let Some(predecessor) = self.ring.read().predecessor().cloned() else {
            return;
        };
        let Ok(request) =
            Envelope::request(MessageType::Ping, self.local(), msg::Empty::default())
        else {
            return;
        };
        if let Err(err) = wire::call_checked(&predecessor.address, &request, PING_TIMEOUT).await {
            warn!(node = %self.id(), predecessor = %predecessor, %err, "predecessor unresponsive, clearing");
            let mut ring = self.ring.write();
            if ring.predecessor().is_some_and(|p| p.id == predecessor.id) {
                ring.clear_predecessor();
            }
        }
    }

    /// Rebuild the successor list as `[successor] ++ successor's list`,
    /// deduplicated and truncated to N, with the predecessor appended while
    /// the list is short.
    pub(crate) async fn update_successor_list(&self) {
        let n = self.config.n_replicas;
        let (successor, predecessor) = {
            let ring = self.ring.read();
            (ring.successor().cloned(), ring.predecessor().cloned())
        };
        let Some(successor) = successor else {
            self.ring.write().set_successor_list(Vec::new());
            return;
        };
        if successor.id == self.id() {
            let list = predecessor
                .filter(|p| p.id != self.id())
                .map(|p| vec![p])
                .unwrap_or_default();
            self.ring.write().set_successor_list(list);
            return;
        }

        let mut list: Vec<NodeRef> = vec![successor.clone()];
        let request = Envelope::request(
            MessageType::GetSuccessorList,
            self.local(),
            msg::Empty::default(),
        );
        if let Ok(request) = request {
            match wire::call_checked(&successor.address, &request, STABILIZE_RPC_TIMEOUT).await {
                Ok(reply) => {
                    if let Ok(payload) = reply.payload::<msg::SuccessorListReply>() {
                        for node in payload.successor_list {
                            if list.len() >= n {
                                break;
                            }
                            if node.id != self.id() && list.iter().all(|seen| seen.id != node.id)
                            {
                                list.push(node);
                            }
                        }
                    }
                }
                Err(err) => {
                    debug!(node = %self.id(), successor = %successor, %err, "successor list fetch failed");
                }
            }
        }
        if list.len() < n {
            if let Some(pred) = predecessor {
                if pred.id != self.id() && list.iter().all(|seen| seen.id != pred.id) {
                    list.push(pred);
                }
            }
        }
        list.truncate(n);
        debug!(node = %self.id(), len = list.len(), "successor list updated");
        self.ring.write().set_successor_list(list);
    }
}
