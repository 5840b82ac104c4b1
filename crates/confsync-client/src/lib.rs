//! Client library for the confsync configuration center.
//!
//! Applications subscribe by logical name and read strongly-typed
//! values out of a shared registry. A subscription is fed from one of
//! four sources: a local TOML file, a one-shot HTTP pull, a long-lived
//! TCP session with server-pushed change notifications, or the locally
//! persisted snapshot of the last successful remote payload.

mod endpoint;
mod env;
mod error;
mod file;
mod http;
mod registry;
mod snapshot;
mod sync;
#[cfg(test)]
pub(crate) mod testutil;
mod value;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use crate::endpoint::Endpoint;
pub use crate::env::{ENV_CONF_PATH, ENV_PROFILE, Environment};
pub use crate::error::SyncError;
pub use crate::registry::{ConfigObject, Registry};
pub use crate::sync::SyncPolicy;
pub use crate::value::{FlatMap, Item, Value};

use crate::snapshot::SnapshotStore;
use crate::sync::{apply_local, apply_refresh, extract_kv};
use crate::value::flatten_json;

/// Where a subscription gets its data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Local TOML file under the configuration root.
    File,
    /// One-shot pull from the center over HTTP.
    CenterHttp,
    /// Long-lived TCP session with change notifications.
    CenterTcp,
    /// The persisted copy of the last successful remote payload.
    Snapshot,
}

/// The client context: registry, snapshot store and live TCP
/// subscriptions, bound to one resolved [`Environment`].
///
/// All state is explicit; there are no process-wide singletons. Clone
/// handles out of it freely, drop it (or call [`ConfClient::shutdown`])
/// to stop every session.
pub struct ConfClient {
    env: Environment,
    registry: Arc<Registry>,
    snapshots: SnapshotStore,
    policy: SyncPolicy,
    shutdown: CancellationToken,
    cache_enabled: AtomicBool,
    endpoint: std::sync::Mutex<Option<Endpoint>>,
    active_tcp: std::sync::Mutex<HashSet<String>>,
}

impl ConfClient {
    pub fn new(env: Environment) -> Self {
        Self::with_policy(env, SyncPolicy::default())
    }

    pub fn with_policy(
        env: Environment,
        policy: SyncPolicy,
    ) -> Self {
        let snapshots = SnapshotStore::new(env.conf_root());
        Self {
            env,
            registry: Arc::new(Registry::new()),
            snapshots,
            policy,
            shutdown: CancellationToken::new(),
            cache_enabled: AtomicBool::new(true),
            endpoint: std::sync::Mutex::new(None),
            active_tcp: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Loads the logical name from the given source and returns a live
    /// handle onto the registry.
    ///
    /// With caching enabled (the default) a name that is already loaded
    /// is served from the registry without refetching. For the TCP
    /// source the call blocks until the first payload has been
    /// injected, or fails with [`SyncError::DialFailed`] (the caller
    /// may then fall back to [`Source::Snapshot`]).
    pub async fn subscribe(
        &self,
        name: &str,
        source: Source,
    ) -> Result<ConfigHandle, SyncError> {
        if self.cache_enabled.load(Ordering::Relaxed)
            && self.registry.contains(name)
        {
            return Ok(self.handle(name));
        }

        match source {
            Source::File => {
                let values = file::load(&self.env, name)?;
                apply_local(&self.registry, name, values);
            }
            Source::Snapshot => {
                let payload =
                    self.snapshots.load(name).await.ok_or_else(|| {
                        SyncError::SnapshotMiss(name.to_string())
                    })?;
                apply_local(&self.registry, name, flatten_json(&payload));
            }
            Source::CenterHttp => {
                let endpoint = self.endpoint()?.for_name(name);
                let configs = http::pull_configs(&endpoint).await?;
                let payload = extract_kv(&configs);
                apply_refresh(
                    &self.registry,
                    &self.snapshots,
                    name,
                    &payload,
                )
                .await;
            }
            Source::CenterTcp => {
                self.subscribe_tcp(name).await?;
            }
        }

        Ok(self.handle(name))
    }

    async fn subscribe_tcp(
        &self,
        name: &str,
    ) -> Result<(), SyncError> {
        // Claim the name up front so concurrent subscribes cannot open
        // two sessions for one subscription.
        {
            let mut active = self
                .active_tcp
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if !active.insert(name.to_string()) {
                return Ok(());
            }
        }

        match self.open_tcp(name).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.active_tcp
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(name);
                Err(err)
            }
        }
    }

    async fn open_tcp(
        &self,
        name: &str,
    ) -> Result<(), SyncError> {
        let endpoint = self.endpoint()?.for_name(name);
        let mut subscription =
            sync::start(endpoint, self.policy, &self.shutdown).await?;

        // Block until the server state of this moment is visible, or
        // until the supervisor gives up entirely.
        let first = tokio::select! {
            maybe = subscription.refresh_rx.recv() => maybe,
            _ = subscription.dormant_rx.wait_for(|dormant| *dormant) => None,
        };
        let Some(payload) = first else {
            return Err(SyncError::ReloadExhausted);
        };
        apply_refresh(&self.registry, &self.snapshots, name, &payload)
            .await;

        let registry = Arc::clone(&self.registry);
        let snapshots = self.snapshots.clone();
        let owned_name = name.to_string();
        let mut refresh_rx = subscription.refresh_rx;
        let mut dormant_rx = subscription.dormant_rx;
        tokio::spawn(async move {
            while let Some(payload) = refresh_rx.recv().await {
                apply_refresh(&registry, &snapshots, &owned_name, &payload)
                    .await;
            }
            if *dormant_rx.borrow_and_update() {
                warn!(
                    "subscription dormant, serving last loaded values: name={}",
                    owned_name
                );
            }
        });

        Ok(())
    }

    /// Replaces the process-wide change callback, invoked after every
    /// successful refresh from any source.
    pub fn set_change_callback<F>(
        &self,
        callback: F,
    ) where
        F: Fn(&str, &ConfigObject) + Send + Sync + 'static,
    {
        self.registry.set_callback(Box::new(callback));
    }

    /// Makes subsequent [`ConfClient::subscribe`] calls refetch even
    /// for names that are already loaded.
    pub fn disable_cache(&self) {
        self.cache_enabled.store(false, Ordering::Relaxed);
    }

    /// Stops every live session. Registry contents stay readable.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    fn handle(
        &self,
        name: &str,
    ) -> ConfigHandle {
        ConfigHandle {
            name: name.to_string(),
            registry: Arc::clone(&self.registry),
        }
    }

    fn endpoint(&self) -> Result<Endpoint, SyncError> {
        let mut slot =
            self.endpoint.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(endpoint) = slot.as_ref() {
            return Ok(endpoint.clone());
        }
        let endpoint = Endpoint::load(&self.env)?;
        *slot = Some(endpoint.clone());
        Ok(endpoint)
    }
}

impl Drop for ConfClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Live view of one logical name. Reads go through the registry's
/// shared lock, so a handle always reflects the most recent successful
/// refresh, including across reconnects and after reload exhaustion.
#[derive(Clone)]
pub struct ConfigHandle {
    name: String,
    registry: Arc<Registry>,
}

impl ConfigHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exists(&self) -> bool {
        self.registry.contains(&self.name)
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Item {
        match self.registry.object(&self.name) {
            Some(object) => object.get(key),
            None => Item::missing(),
        }
    }

    /// A point-in-time copy of the whole mapping.
    pub fn all(&self) -> BTreeMap<String, Value> {
        match self.registry.object(&self.name) {
            Some(object) => object.all().clone(),
            None => BTreeMap::new(),
        }
    }
}
