use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Absent,
    Created,
    Running,
    Stopped,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: u32,
    pub hostname: String,
    pub cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub network: serde_json::Value,
    #[serde(default)]
    pub mounts: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,
    #[serde(default = "default_status", skip_deserializing)]
    pub status: ResourceStatus,
}

fn default_status() -> ResourceStatus {
    ResourceStatus::Created
}

/// A canned HTTP failure for requests touching one resource id.
#[derive(Clone, Debug)]
pub struct Fault {
    pub status: u16,
    pub message: String,
    /// `None` fails forever.
    pub remaining: Option<u32>,
}

/// One recorded request, e.g. `("POST", "/nodes/pve1/resources/201/start")`.
pub type RequestLog = Vec<(String, String)>;

#[derive(Default)]
pub struct Inner {
    pub resources: HashMap<u32, Resource>,
    pub faults: HashMap<u32, VecDeque<Fault>>,
    pub requests: RequestLog,
}

#[derive(Clone)]
pub struct AppState {
    pub node: String,
    /// Delay before an accepted mutation becomes visible.
    pub transition_delay: Duration,
    pub inner: Arc<RwLock<Inner>>,
}

impl AppState {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            transition_delay: Duration::ZERO,
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    pub fn with_transition_delay(mut self, delay: Duration) -> Self {
        self.transition_delay = delay;
        self
    }

    /// Seed a resource directly, bypassing the API.
    pub async fn insert(&self, resource: Resource) {
        self.inner.write().await.resources.insert(resource.id, resource);
    }

    pub async fn status(&self, id: u32) -> ResourceStatus {
        self.inner
            .read()
            .await
            .resources
            .get(&id)
            .map(|r| r.status)
            .unwrap_or(ResourceStatus::Absent)
    }

    /// Queue a failure for the next request on `id`.
    pub async fn fail_next(&self, id: u32, status: u16, message: &str) {
        self.push_fault(id, status, message, Some(1)).await;
    }

    /// Fail every request on `id`.
    pub async fn fail_always(&self, id: u32, status: u16, message: &str) {
        self.push_fault(id, status, message, None).await;
    }

    async fn push_fault(&self, id: u32, status: u16, message: &str, remaining: Option<u32>) {
        self.inner
            .write()
            .await
            .faults
            .entry(id)
            .or_default()
            .push_back(Fault {
                status,
                message: message.to_string(),
                remaining,
            });
    }

    pub async fn requests(&self) -> RequestLog {
        self.inner.read().await.requests.clone()
    }

    /// Mutating requests only.
    pub async fn mutations(&self) -> RequestLog {
        self.requests()
            .await
            .into_iter()
            .filter(|(method, _)| method != "GET")
            .collect()
    }

    /// Record a request and return the pending fault for `id`, if any.
    pub(crate) async fn enter(&self, method: &str, path: String, id: u32) -> Option<Fault> {
        let mut inner = self.inner.write().await;
        inner.requests.push((method.to_string(), path));

        let queue = inner.faults.get_mut(&id)?;
        let fault = queue.front_mut()?;
        let current = fault.clone();
        match &mut fault.remaining {
            None => {}
            Some(n) if *n > 1 => *n -= 1,
            Some(_) => {
                queue.pop_front();
            }
        }
        Some(current)
    }

    /// Make `resource` visible now, or after the transition delay.
    pub(crate) async fn provision(&self, resource: Resource) {
        self.after_delay(move |inner| {
            inner.resources.insert(resource.id, resource);
        })
        .await;
    }

    /// Set `id` to `status` now, or after the transition delay.
    pub(crate) async fn transition(&self, id: u32, status: ResourceStatus) {
        self.after_delay(move |inner| {
            if status == ResourceStatus::Absent {
                inner.resources.remove(&id);
            } else if let Some(r) = inner.resources.get_mut(&id) {
                r.status = status;
            }
        })
        .await;
    }

    async fn after_delay<F>(&self, apply: F)
    where
        F: FnOnce(&mut Inner) + Send + 'static,
    {
        if self.transition_delay.is_zero() {
            apply(&mut *self.inner.write().await);
            return;
        }
        let state = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(state.transition_delay).await;
            apply(&mut *state.inner.write().await);
        });
    }
}
