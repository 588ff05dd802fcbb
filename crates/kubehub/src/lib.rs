//! kube-events kubehub: typed watchers feeding the pipeline, API server ping

#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::fmt::Debug;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Node, PersistentVolumeClaim, ResourceQuota, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kevents_core::{handoff, Notification, NotificationKind, Payload, ResourceKind, StopHandle, StreamHandle};
use kube::{
    api::Api,
    config::{KubeConfigOptions, Kubeconfig},
    runtime::{watcher, WatchStreamExt},
    Client, Resource,
};
use metrics::counter;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Build a client from an explicit kubeconfig path, or infer (env, in-cluster).
pub async fn client(kubeconfig: Option<&str>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            info!(path = %path, "using kubeconfig");
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path))?;
            let cfg = kube::Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .context("loading kubeconfig")?;
            Client::try_from(cfg).context("building kube client")
        }
        None => {
            info!("inferring kube config");
            Client::try_default().await.context("building kube client")
        }
    }
}

/// Tracks the last seen resourceVersion per uid so `Applied` events can be
/// told apart as Added or Modified and relist replays are dropped.
#[derive(Debug, Default)]
pub struct SeenTracker {
    seen: FxHashMap<String, String>,
}

impl SeenTracker {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.seen.len() }

    pub fn is_empty(&self) -> bool { self.seen.is_empty() }

    /// Kind to emit for an applied object; `None` when the same
    /// resourceVersion was already delivered.
    pub fn applied(&mut self, uid: &str, rv: &str) -> Option<NotificationKind> {
        match self.seen.get_mut(uid) {
            None => {
                self.seen.insert(uid.to_string(), rv.to_string());
                Some(NotificationKind::Added)
            }
            Some(prev) if prev != rv => {
                *prev = rv.to_string();
                Some(NotificationKind::Modified)
            }
            Some(_) => None,
        }
    }

    pub fn deleted(&mut self, uid: &str) { self.seen.remove(uid); }

    /// Drop every uid not present in a relist; returns how many were dropped.
    pub fn retain_listed(&mut self, listed: &HashSet<String>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|uid, _| listed.contains(uid));
        before - self.seen.len()
    }
}

fn meta_keys(meta: &ObjectMeta) -> Option<(&str, &str)> {
    let uid = meta.uid.as_deref()?;
    Some((uid, meta.resource_version.as_deref().unwrap_or("")))
}

/// Error notification standing in for a failed watch call on `K`.
pub fn watch_failure<K>(error: &impl std::fmt::Display) -> Notification
where
    K: Default,
    Payload: From<K>,
{
    Notification::watch_failure(K::default(), error.to_string())
}

async fn forward(tx: &mpsc::Sender<Notification>, n: Notification) -> bool {
    counter!("watch_notifications_total", 1, "kind" => n.resource_kind().as_str(), "notification" => n.kind.as_str());
    tx.send(n).await.is_ok()
}

/// Start a list+watch for `K` over all namespaces. Notifications flow into the
/// returned handle; stopping the handle ends the watch. A failed watch call
/// is forwarded as an Error notification before the watcher backs off.
pub fn start_watcher<K>(client: Client) -> StreamHandle<Notification>
where
    K: Resource<DynamicType = ()> + Clone + Default + DeserializeOwned + Debug + Send + Sync + 'static,
    Payload: From<K>,
{
    let (tx, rx) = handoff();
    let stop = StopHandle::new("watch_source");
    let token = stop.token();
    let api: Api<K> = Api::all(client);
    let kind = K::kind(&()).to_string();

    tokio::spawn(async move {
        let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
        futures::pin_mut!(stream);
        let mut tracker = SeenTracker::new();
        info!(kind = %kind, "watcher started");
        loop {
            let ev = tokio::select! {
                _ = token.cancelled() => break,
                ev = stream.next() => ev,
            };
            let pending: Vec<Notification> = match ev {
                None => {
                    warn!(kind = %kind, "watcher stream ended");
                    break;
                }
                Some(Err(e)) => {
                    warn!(kind = %kind, error = %e, "watch error; backing off");
                    vec![watch_failure::<K>(&e)]
                }
                Some(Ok(watcher::Event::Applied(o))) => {
                    let k = meta_keys(o.meta()).and_then(|(uid, rv)| tracker.applied(uid, rv));
                    k.map(|k| vec![Notification::new(k, o)]).unwrap_or_default()
                }
                Some(Ok(watcher::Event::Deleted(o))) => {
                    if let Some((uid, _)) = meta_keys(o.meta()) {
                        tracker.deleted(uid);
                    }
                    vec![Notification::new(NotificationKind::Deleted, o)]
                }
                Some(Ok(watcher::Event::Restarted(list))) => {
                    let listed: HashSet<String> = list.iter().filter_map(|o| o.meta().uid.clone()).collect();
                    let dropped = tracker.retain_listed(&listed);
                    debug!(kind = %kind, count = list.len(), dropped, "watch restart");
                    list.into_iter()
                        .filter_map(|o| {
                            let k = meta_keys(o.meta()).and_then(|(uid, rv)| tracker.applied(uid, rv))?;
                            Some(Notification::new(k, o))
                        })
                        .collect()
                }
            };
            for n in pending {
                let sent = tokio::select! {
                    _ = token.cancelled() => false,
                    ok = forward(&tx, n) => ok,
                };
                if !sent {
                    info!(kind = %kind, "watcher stopped");
                    return;
                }
            }
        }
        info!(kind = %kind, "watcher stopped");
    });

    StreamHandle::new(rx, stop)
}

/// Start one watcher per configured kind.
pub fn watch_all(client: &Client, kinds: &[ResourceKind]) -> Vec<StreamHandle<Notification>> {
    info!(kinds = %kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(","), "watching");
    kinds
        .iter()
        .map(|kind| {
            let c = client.clone();
            match kind {
                ResourceKind::ResourceQuota => start_watcher::<ResourceQuota>(c),
                ResourceKind::Deployment => start_watcher::<Deployment>(c),
                ResourceKind::Event => start_watcher::<Event>(c),
                ResourceKind::Service => start_watcher::<Service>(c),
                ResourceKind::Ingress => start_watcher::<Ingress>(c),
                ResourceKind::PersistentVolumeClaim => start_watcher::<PersistentVolumeClaim>(c),
                ResourceKind::Secret => start_watcher::<Secret>(c),
                ResourceKind::ConfigMap => start_watcher::<ConfigMap>(c),
                ResourceKind::Node => start_watcher::<Node>(c),
                ResourceKind::CustomResourceDefinition => start_watcher::<CustomResourceDefinition>(c),
            }
        })
        .collect()
}

/// Ping the API server every `period`; resolves with the first failure.
pub async fn ping(client: Client, period: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let info = client.apiserver_version().await.context("api server ping failed")?;
        debug!(version = %info.git_version, "api server ping ok");
    }
}
