//! kube-events core types: notifications, canonical records, stop lifecycle.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Node, PersistentVolumeClaim, ResourceQuota, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub mod lifecycle;

pub use lifecycle::{LifecycleState, StopHandle};

/// Symbolic names of resource-state records.
pub const RESOURCE_CREATED: &str = "ResourceCreated";
pub const RESOURCE_MODIFIED: &str = "ResourceModified";
pub const RESOURCE_DELETED: &str = "ResourceDeleted";
pub const RESOURCE_ERROR: &str = "ResourceError";

/// Capacity of every stage-to-stage channel. Tokio has no rendezvous channel,
/// one slot is the closest: a send waits until the consumer drained the slot.
pub const HANDOFF_CAP: usize = 1;

/// Create a stage-to-stage channel.
pub fn handoff<T>() -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
    mpsc::channel(HANDOFF_CAP)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Added,
    Modified,
    Deleted,
    Error,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Added => "ADDED",
            NotificationKind::Modified => "MODIFIED",
            NotificationKind::Deleted => "DELETED",
            NotificationKind::Error => "ERROR",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

macro_rules! payloads {
    ($($variant:ident => $ty:ty, $collection:literal, [$($alias:literal),*];)+) => {
        /// Resource kinds the service watches.
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ResourceKind { $($variant,)+ }

        impl ResourceKind {
            pub const ALL: &'static [ResourceKind] = &[$(ResourceKind::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self { $(ResourceKind::$variant => stringify!($variant),)+ }
            }

            /// Sink collection records produced from this kind land in.
            pub fn collection(&self) -> &'static str {
                match self { $(ResourceKind::$variant => $collection,)+ }
            }
        }

        impl FromStr for ResourceKind {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let key = s.trim().to_ascii_lowercase();
                $(
                    if key == stringify!($variant).to_ascii_lowercase() $(|| key == $alias)* {
                        return Ok(ResourceKind::$variant);
                    }
                )+
                Err(format!("unknown resource kind: {}", s))
            }
        }

        /// Typed snapshot of the object a notification is about.
        #[derive(Debug, Clone)]
        pub enum Payload { $($variant($ty),)+ }

        impl Payload {
            pub fn kind(&self) -> ResourceKind {
                match self { $(Payload::$variant(_) => ResourceKind::$variant,)+ }
            }

            pub fn metadata(&self) -> &ObjectMeta {
                match self { $(Payload::$variant(o) => &o.metadata,)+ }
            }
        }

        $(
            impl From<$ty> for Payload {
                fn from(v: $ty) -> Self { Payload::$variant(v) }
            }
        )+
    };
}

payloads! {
    ResourceQuota => ResourceQuota, "resource_quotas", ["quota", "rq", "resourcequotas"];
    Deployment => Deployment, "deployments", ["deploy", "deployments"];
    Event => Event, "events", ["ev", "events"];
    Service => Service, "services", ["svc", "services"];
    Ingress => Ingress, "ingresses", ["ing", "ingresses"];
    PersistentVolumeClaim => PersistentVolumeClaim, "pvcs", ["pvc", "pvcs"];
    Secret => Secret, "secrets", ["secrets"];
    ConfigMap => ConfigMap, "configmaps", ["cm", "configmaps"];
    Node => Node, "nodes", ["no", "nodes"];
    CustomResourceDefinition => CustomResourceDefinition, "crds", ["crd", "crds"];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Stable identity of a watched object. Missing metadata becomes empty strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EntityIdentity {
    pub uid: String,
    pub namespace: String,
    pub name: String,
}

impl EntityIdentity {
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            uid: meta.uid.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

/// A single reported change for one resource instance.
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub payload: Payload,
    /// Set on Error notifications raised by the watch itself; the payload is
    /// then an empty object of the watched kind.
    pub watch_error: Option<String>,
}

impl Notification {
    pub fn new(kind: NotificationKind, payload: impl Into<Payload>) -> Self {
        Self { kind, payload: payload.into(), watch_error: None }
    }

    pub fn watch_failure(payload: impl Into<Payload>, message: impl Into<String>) -> Self {
        Self { kind: NotificationKind::Error, payload: payload.into(), watch_error: Some(message.into()) }
    }

    pub fn resource_kind(&self) -> ResourceKind { self.payload.kind() }

    pub fn identity(&self) -> EntityIdentity { EntityIdentity::from_meta(self.payload.metadata()) }

    pub fn is_error(&self) -> bool { self.kind == NotificationKind::Error }

    pub fn is_watch_failure(&self) -> bool { self.watch_error.is_some() }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Resource type a record is about (not necessarily the watched kind:
/// Event records are about their involved object).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Namespace,
    Deployment,
    Pod,
    Service,
    Ingress,
    Volume,
    Secret,
    ConfigMap,
    Node,
    CustomResource,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Namespace => "namespace",
            ResourceType::Deployment => "deployment",
            ResourceType::Pod => "pod",
            ResourceType::Service => "service",
            ResourceType::Ingress => "ingress",
            ResourceType::Volume => "volume",
            ResourceType::Secret => "secret",
            ResourceType::ConfigMap => "config_map",
            ResourceType::Node => "node",
            ResourceType::CustomResource => "custom_resource",
        }
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            ResourceType::Namespace,
            ResourceType::Deployment,
            ResourceType::Pod,
            ResourceType::Service,
            ResourceType::Ingress,
            ResourceType::Volume,
            ResourceType::Secret,
            ResourceType::ConfigMap,
            ResourceType::Node,
            ResourceType::CustomResource,
        ];
        all.into_iter().find(|t| t.as_str() == s).ok_or_else(|| format!("unknown resource type: {}", s))
    }
}

/// Canonical, severity-classified output unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub time: DateTime<Utc>,
    pub severity: Severity,
    pub name: String,
    pub resource_name: String,
    pub resource_namespace: String,
    pub resource_uid: String,
    pub resource_type: ResourceType,
    pub message: String,
    pub details: BTreeMap<String, String>,
    /// Watched kind that produced the record.
    pub source: ResourceKind,
}

impl Record {
    pub fn collection(&self) -> &'static str { self.source.collection() }
}

/// Receiving side of a pipeline stage together with the handle that stops it.
pub struct StreamHandle<T> {
    pub rx: mpsc::Receiver<T>,
    pub stop: StopHandle,
}

impl<T> StreamHandle<T> {
    pub fn new(rx: mpsc::Receiver<T>, stop: StopHandle) -> Self { Self { rx, stop } }
}

pub mod prelude {
    pub use super::{
        handoff, EntityIdentity, LifecycleState, Notification, NotificationKind, Payload, Record, ResourceKind,
        ResourceType, Severity, StopHandle, StreamHandle,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_names_and_aliases() {
        assert_eq!("Deployment".parse::<ResourceKind>().unwrap(), ResourceKind::Deployment);
        assert_eq!("pvc".parse::<ResourceKind>().unwrap(), ResourceKind::PersistentVolumeClaim);
        assert_eq!(" CRD ".parse::<ResourceKind>().unwrap(), ResourceKind::CustomResourceDefinition);
        assert!("pod".parse::<ResourceKind>().is_err());
        assert_eq!(ResourceKind::ALL.len(), 10);
    }

    #[test]
    fn payload_kind_follows_variant() {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some("cfg".into());
        cm.metadata.uid = Some("u-1".into());
        let n = Notification::new(NotificationKind::Added, cm);
        assert_eq!(n.resource_kind(), ResourceKind::ConfigMap);
        let id = n.identity();
        assert_eq!(id.uid, "u-1");
        assert_eq!(id.name, "cfg");
        assert_eq!(id.namespace, "");
        assert_eq!(n.resource_kind().collection(), "configmaps");
        assert!(!n.is_watch_failure());
    }

    #[test]
    fn watch_failures_are_error_notifications() {
        let n = Notification::watch_failure(Deployment::default(), "410 Gone");
        assert!(n.is_error());
        assert!(n.is_watch_failure());
        assert_eq!(n.watch_error.as_deref(), Some("410 Gone"));
        assert_eq!(n.resource_kind(), ResourceKind::Deployment);
    }

    #[test]
    fn severity_and_type_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::Warning).unwrap(), "\"warning\"");
        assert_eq!(serde_json::to_string(&ResourceType::ConfigMap).unwrap(), "\"config_map\"");
        assert_eq!("config_map".parse::<ResourceType>().unwrap(), ResourceType::ConfigMap);
        assert_eq!("error".parse::<Severity>().unwrap(), Severity::Error);
    }
}
