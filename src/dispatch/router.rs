//! Request/response correlation over the frame stream.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::sync::oneshot;

use crate::binary::Node;
use crate::error::{Error, Result};

/// Default deadline for an `<iq>` reply.
pub const DEFAULT_IQ_TIMEOUT: Duration = Duration::from_secs(60);

/// Pending-request table keyed by request id. The waiter entry is always
/// inserted before the node hits the socket, so a reply can never race
/// the registration.
pub struct RequestRouter {
    pending: Mutex<HashMap<String, oneshot::Sender<Node>>>,
    timeout: Duration,
}

impl RequestRouter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Fresh 16-hex-char request id.
    pub fn generate_id() -> String {
        let n: u64 = rand::thread_rng().gen();
        format!("{n:016X}")
    }

    /// Registers a waiter for `id`.
    pub fn register(&self, id: &str) -> oneshot::Receiver<Node> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("router lock")
            .insert(id.to_string(), tx);
        rx
    }

    /// Awaits the reply registered under `id`, enforcing the timeout.
    pub async fn wait(&self, id: &str, rx: oneshot::Receiver<Node>) -> Result<Node> {
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(node)) => Ok(node),
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => {
                self.pending.lock().expect("router lock").remove(id);
                Err(Error::RequestTimeout { id: id.to_string() })
            }
        }
    }

    /// Completes the waiter for `id`; false when no waiter matched. The
    /// waiter is completed exactly once because the entry is removed.
    pub fn complete(&self, id: &str, reply: Node) -> bool {
        match self.pending.lock().expect("router lock").remove(id) {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Drops the waiter for one id, e.g. when its send failed.
    pub fn cancel(&self, id: &str) {
        self.pending.lock().expect("router lock").remove(id);
    }

    /// Fails every outstanding waiter with `SessionClosed`.
    pub fn fail_all(&self) {
        self.pending.lock().expect("router lock").clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("router lock").len()
    }
}
