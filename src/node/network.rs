//! In-process simulated network connecting all nodes of a deployment.
//!
//! Every message is encoded with `rmp_serde` into a `Bytes` payload when
//! sent and decoded by the receiving node's runner, so whatever crosses the
//! network really is a serialized copy. Delivery is unreliable according to
//! `NetworkConfig`: messages may be dropped, duplicated, and delayed (thus
//! reordered). Disconnected nodes neither send nor receive anything.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::node::{Address, WireMsg};
use crate::utils::PaxlabError;

use bytes::Bytes;

use rand::Rng;

use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;

use serde::Deserialize;

use tokio::sync::mpsc;
use tokio::time::{self, Duration};

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetworkConfig {
    /// Probability of silently dropping a message.
    pub drop_rate: f64,

    /// Probability of delivering a message twice.
    pub dup_rate: f64,

    /// Min per-message delivery delay in millisecs.
    pub delay_min_ms: u64,
    /// Max per-message delivery delay in millisecs.
    pub delay_max_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            drop_rate: 0.0,
            dup_rate: 0.0,
            delay_min_ms: 0,
            delay_max_ms: 2,
        }
    }
}

impl NetworkConfig {
    /// Parses a network config from an optional TOML string, validating
    /// the parsed values.
    pub fn from_config_str(
        config_str: Option<&str>,
    ) -> Result<Self, PaxlabError> {
        let config = parsed_config!(config_str => NetworkConfig;
                                    drop_rate, dup_rate,
                                    delay_min_ms, delay_max_ms)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PaxlabError> {
        if !(0.0..=1.0).contains(&self.drop_rate) {
            return logged_err!(
                "invalid config.drop_rate '{}'",
                self.drop_rate
            );
        }
        if !(0.0..=1.0).contains(&self.dup_rate) {
            return logged_err!("invalid config.dup_rate '{}'", self.dup_rate);
        }
        if self.delay_max_ms < self.delay_min_ms {
            return logged_err!(
                "invalid config.delay_max_ms '{}'",
                self.delay_max_ms
            );
        }
        Ok(())
    }
}

/// Receiver side of a node's inbox: (sender, encoded message) pairs.
pub type Inbox = mpsc::UnboundedReceiver<(Address, Bytes)>;

struct NetworkInner {
    /// Map from address -> sender side of that node's inbox.
    routes: HashMap<Address, mpsc::UnboundedSender<(Address, Bytes)>>,

    /// Currently disconnected (crashed or partitioned) nodes.
    disconnected: HashSet<Address>,

    /// Current fault injection parameters.
    config: NetworkConfig,
}

/// Shared simulated network carrying messages of type `M`. Cheap to clone;
/// all clones refer to the same routing table.
pub struct Network<M> {
    inner: Arc<Mutex<NetworkInner>>,
    _msg: PhantomData<fn() -> M>,
}

impl<M> Clone for Network<M> {
    fn clone(&self) -> Self {
        Network {
            inner: self.inner.clone(),
            _msg: PhantomData,
        }
    }
}

impl<M> fmt::Debug for Network<M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.lock();
        write!(
            f,
            "Network{{routes: {}, disconnected: {:?}, config: {:?}}}",
            inner.routes.len(),
            inner.disconnected,
            inner.config
        )
    }
}

impl<M> Network<M>
where
    M: WireMsg,
{
    /// Creates a new network with given fault injection parameters.
    pub fn new(config: NetworkConfig) -> Result<Self, PaxlabError> {
        config.validate()?;
        Ok(Network {
            inner: Arc::new(Mutex::new(NetworkInner {
                routes: HashMap::new(),
                disconnected: HashSet::new(),
                config,
            })),
            _msg: PhantomData,
        })
    }

    /// Creates a reliable network (no drops, no duplicates, tiny delays).
    pub fn reliable() -> Self {
        Network {
            inner: Arc::new(Mutex::new(NetworkInner {
                routes: HashMap::new(),
                disconnected: HashSet::new(),
                config: NetworkConfig::default(),
            })),
            _msg: PhantomData,
        }
    }

    /// Registers a node address, returning the receiver side of its inbox.
    pub fn register(&self, addr: &Address) -> Result<Inbox, PaxlabError> {
        let mut inner = self.lock();
        if inner.routes.contains_key(addr) {
            return logged_err!(addr; "address already registered");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.routes.insert(addr.clone(), tx);
        Ok(rx)
    }

    /// Removes a node address from the routing table.
    pub fn unregister(&self, addr: &Address) {
        self.lock().routes.remove(addr);
    }

    /// Sends a message from `from` to `to`, subject to fault injection.
    /// Messages to unknown destinations are silently dropped, just like
    /// messages lost in transit.
    pub fn send(
        &self,
        from: &Address,
        to: &Address,
        msg: &M,
    ) -> Result<(), PaxlabError> {
        let (tx, config) = {
            let inner = self.lock();
            if inner.disconnected.contains(from)
                || inner.disconnected.contains(to)
            {
                return Ok(());
            }
            match inner.routes.get(to) {
                Some(tx) => (tx.clone(), inner.config.clone()),
                None => {
                    pf_trace!(from; "dropping msg to unknown {}", to);
                    return Ok(());
                }
            }
        };

        let bytes = Bytes::from(encode_to_vec(msg)?);

        let mut rng = rand::thread_rng();
        if rng.gen_bool(config.drop_rate) {
            pf_trace!(from; "dropped msg -> {}: {:?}", to, msg);
            return Ok(());
        }
        let copies = if rng.gen_bool(config.dup_rate) { 2 } else { 1 };

        for _ in 0..copies {
            let delay = rng.gen_range(config.delay_min_ms..=config.delay_max_ms);
            let (tx, from, bytes) = (tx.clone(), from.clone(), bytes.clone());
            if delay == 0 {
                // receiver may have shut down; nothing to do then
                let _ = tx.send((from, bytes));
            } else {
                tokio::spawn(async move {
                    time::sleep(Duration::from_millis(delay)).await;
                    let _ = tx.send((from, bytes));
                });
            }
        }
        Ok(())
    }

    /// Decodes a payload previously encoded by `send`.
    pub fn decode(bytes: &Bytes) -> Result<M, PaxlabError> {
        Ok(decode_from_slice(bytes)?)
    }

    /// Cuts a node off the network.
    pub fn disconnect(&self, addr: &Address) {
        pf_info!(addr; "disconnected from network");
        self.lock().disconnected.insert(addr.clone());
    }

    /// Reattaches a previously disconnected node.
    pub fn reconnect(&self, addr: &Address) {
        pf_info!(addr; "reconnected to network");
        self.lock().disconnected.remove(addr);
    }

    /// Whether a node is currently attached.
    pub fn is_connected(&self, addr: &Address) -> bool {
        !self.lock().disconnected.contains(addr)
    }

    /// Replaces the fault injection parameters.
    pub fn set_config(&self, config: NetworkConfig) -> Result<(), PaxlabError> {
        config.validate()?;
        self.lock().config = config;
        Ok(())
    }
}

impl<M> Network<M> {
    // no critical section can panic halfway, so poisoning is ignored
    fn lock(&self) -> MutexGuard<'_, NetworkInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
