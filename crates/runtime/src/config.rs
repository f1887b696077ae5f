//! Per-node instance parameters.

use std::path::PathBuf;
use std::time::Duration;

/// Everything one node needs to come up.
///
/// The bind address may carry port 0; the advertised address (the one
/// peers hash to obtain this node's identifier) then defaults to whatever
/// the listener actually bound.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address the listener binds, e.g. `127.0.0.1:5000` or `127.0.0.1:0`.
    pub bind_address: String,
    /// Address other nodes use to reach this one. Defaults to the bound
    /// address; set it when binding a wildcard.
    pub advertise_address: Option<String>,
    /// Bit width of the identifier space (ring size `2^m`).
    pub m: u32,
    /// Replication factor N (total replicas including the primary).
    pub n_replicas: usize,
    /// Read quorum R.
    pub read_quorum: usize,
    /// Write quorum W.
    pub write_quorum: usize,
    /// Address of an existing ring member to join; `None` founds a ring.
    pub join: Option<String>,
    /// Root directory for the on-disk mirror; `None` keeps the store in
    /// memory only.
    pub storage_dir: Option<PathBuf>,
    pub stabilize_interval: Duration,
    pub fix_fingers_interval: Duration,
    pub check_predecessor_interval: Duration,
    pub successor_list_interval: Duration,
}

impl NodeConfig {
    /// Defaults matching a small development ring: m=6, N=3, R=W=2,
    /// 3-second maintenance ticks, in-memory storage.
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            advertise_address: None,
            m: 6,
            n_replicas: 3,
            read_quorum: 2,
            write_quorum: 2,
            join: None,
            storage_dir: None,
            stabilize_interval: Duration::from_secs(3),
            fix_fingers_interval: Duration::from_secs(3),
            check_predecessor_interval: Duration::from_secs(3),
            successor_list_interval: Duration::from_secs(3),
        }
    }

    pub fn with_quorum(mut self, n: usize, r: usize, w: usize) -> Self {
        self.n_replicas = n;
        self.read_quorum = r;
        self.write_quorum = w;
        self
    }

    pub fn with_join(mut self, known: impl Into<String>) -> Self {
        self.join = Some(known.into());
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn with_m(mut self, m: u32) -> Self {
        self.m = m;
        self
    }
}
