//! Notification -> Record transformer.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kevents_core::{
    handoff, EntityIdentity, Notification, NotificationKind, Payload, Record, ResourceKind, ResourceType, Severity,
    StopHandle, StreamHandle, RESOURCE_CREATED, RESOURCE_DELETED, RESOURCE_ERROR, RESOURCE_MODIFIED,
};
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{ClassificationRuleSet, InvolvedKind};

/// Rule-lookup key: the watched kind, or for Events the involved kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKey {
    Resource(ResourceKind),
    Event(InvolvedKind),
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKey::Resource(kind) => write!(f, "{kind}"),
            RuleKey::Event(involved) => write!(f, "Event/{involved}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// Source/classifier mismatch; the pipeline must not continue.
    #[error("no classification rule for {kind} (uid {uid:?})")]
    Unsupported { kind: String, uid: String },
    /// Notification lacks data a record needs; the notification is skipped.
    #[error("malformed {kind} notification {uid}: {what}")]
    Malformed { kind: ResourceKind, uid: String, what: &'static str },
}

impl ClassifyError {
    pub fn is_fatal(&self) -> bool { matches!(self, ClassifyError::Unsupported { .. }) }
}

pub struct Classifier {
    rules: Arc<ClassificationRuleSet>,
}

impl Classifier {
    pub fn new(rules: Arc<ClassificationRuleSet>) -> Self { Self { rules } }

    pub fn rules(&self) -> &ClassificationRuleSet { &self.rules }

    /// Key the rule set is consulted under. Watch failures carry no object,
    /// so they are keyed by the watched kind even for Events.
    pub fn rule_key(n: &Notification) -> Result<RuleKey, ClassifyError> {
        match &n.payload {
            Payload::Event(ev) if !n.is_watch_failure() => event_scope(ev).map(RuleKey::Event),
            other => Ok(RuleKey::Resource(other.kind())),
        }
    }

    pub fn classify(&self, n: &Notification) -> Result<Record, ClassifyError> {
        let key = Self::rule_key(n)?;
        if !self.rules.supports(key) {
            return Err(ClassifyError::Unsupported { kind: key.to_string(), uid: n.identity().uid });
        }
        match (key, &n.payload) {
            (RuleKey::Event(involved), Payload::Event(ev)) => self.event_record(n.kind, involved, ev),
            _ => Ok(resource_record(n)),
        }
    }

    fn event_record(&self, kind: NotificationKind, involved: InvolvedKind, ev: &Event) -> Result<Record, ClassifyError> {
        let reason = ev.reason.as_deref().unwrap_or("");
        if reason.is_empty() {
            return Err(ClassifyError::Malformed {
                kind: ResourceKind::Event,
                uid: ev.metadata.uid.clone().unwrap_or_default(),
                what: "missing reason",
            });
        }
        let (severity, name) = match self.rules.scoped_match(involved, reason) {
            Some(rule) => (rule.severity, rule.name.clone()),
            None => {
                let severity = if kind == NotificationKind::Error {
                    Severity::Error
                } else if self.rules.is_error_reason(reason) {
                    Severity::Warning
                } else {
                    Severity::Info
                };
                (severity, reason.to_string())
            }
        };

        let mut details = BTreeMap::new();
        if involved == InvolvedKind::Pod {
            if let Some(fp) = ev.involved_object.field_path.as_deref().filter(|fp| !fp.is_empty()) {
                details.insert("container".to_string(), container_from_field_path(fp).to_string());
            }
        }
        let time = ev
            .first_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| ev.event_time.as_ref().map(|t| t.0))
            .unwrap_or_else(Utc::now);

        Ok(Record {
            time,
            severity,
            name,
            resource_name: ev.involved_object.name.clone().unwrap_or_default(),
            resource_namespace: ev.metadata.namespace.clone().unwrap_or_default(),
            resource_uid: ev.metadata.uid.clone().unwrap_or_default(),
            resource_type: involved.resource_type(),
            message: ev.message.clone().unwrap_or_default(),
            details,
            source: ResourceKind::Event,
        })
    }

    /// Spawn the transform loop. The join handle resolves to the fatal error
    /// that stopped the loop, if any.
    pub fn output(self, input: StreamHandle<Notification>) -> (StreamHandle<Record>, JoinHandle<Result<(), ClassifyError>>) {
        let (tx, rx) = handoff();
        let stop = StopHandle::with_children("classifier", vec![input.stop]);
        let token = stop.token();
        let mut input_rx = input.rx;
        let task = tokio::spawn(async move {
            let mut records = 0u64;
            loop {
                let n = tokio::select! {
                    _ = token.cancelled() => break,
                    n = input_rx.recv() => match n { Some(n) => n, None => break },
                };
                let record = match self.classify(&n) {
                    Ok(r) => r,
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, records, "classifier: fatal notification");
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(error = %e, "classifier: skipping notification");
                        counter!("classify_skipped_total", 1);
                        continue;
                    }
                };
                counter!("classify_records_total", 1, "severity" => record.severity.as_str());
                records += 1;
                tokio::select! {
                    _ = token.cancelled() => break,
                    sent = tx.send(record) => if sent.is_err() { break },
                }
            }
            info!(records, "classifier stopped");
            Ok(())
        });
        (StreamHandle::new(rx, stop), task)
    }
}

fn event_scope(ev: &Event) -> Result<InvolvedKind, ClassifyError> {
    let kind = ev.involved_object.kind.as_deref().unwrap_or("");
    kind.parse::<InvolvedKind>().map_err(|kind| ClassifyError::Unsupported {
        kind,
        uid: ev.metadata.uid.clone().unwrap_or_default(),
    })
}

fn container_from_field_path(fp: &str) -> &str {
    let s = fp.strip_prefix("spec.containers{").unwrap_or(fp);
    s.strip_suffix('}').unwrap_or(s)
}

fn resource_type_of(payload: &Payload) -> ResourceType {
    match payload {
        Payload::ResourceQuota(_) => ResourceType::Namespace,
        Payload::Deployment(_) => ResourceType::Deployment,
        // Only failed Event watches get here; they are filed under pods.
        Payload::Event(_) => ResourceType::Pod,
        Payload::Service(_) => ResourceType::Service,
        Payload::Ingress(_) => ResourceType::Ingress,
        Payload::PersistentVolumeClaim(_) => ResourceType::Volume,
        Payload::Secret(_) => ResourceType::Secret,
        Payload::ConfigMap(_) => ResourceType::ConfigMap,
        Payload::Node(_) => ResourceType::Node,
        Payload::CustomResourceDefinition(_) => ResourceType::CustomResource,
    }
}

fn creation_time(meta: &ObjectMeta) -> Option<DateTime<Utc>> { meta.creation_timestamp.as_ref().map(|t| t.0) }

/// Record for a resource-state change, named after the notification kind.
fn resource_record(n: &Notification) -> Record {
    let (kind, payload) = (n.kind, &n.payload);
    let meta = payload.metadata();
    let id = EntityIdentity::from_meta(meta);
    let now = Utc::now();
    let (severity, name, time) = match kind {
        NotificationKind::Added => (Severity::Info, RESOURCE_CREATED, creation_time(meta).unwrap_or(now)),
        NotificationKind::Modified => (Severity::Info, RESOURCE_MODIFIED, now),
        NotificationKind::Deleted => (Severity::Info, RESOURCE_DELETED, now),
        NotificationKind::Error => (Severity::Error, RESOURCE_ERROR, now),
    };
    // Quotas stand in for their namespace.
    let resource_name = match payload {
        Payload::ResourceQuota(_) => id.namespace.clone(),
        _ => id.name,
    };
    Record {
        time,
        severity,
        name: name.to_string(),
        resource_name,
        resource_namespace: id.namespace,
        resource_uid: id.uid,
        resource_type: resource_type_of(payload),
        message: n.watch_error.clone().unwrap_or_default(),
        details: BTreeMap::new(),
        source: payload.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_path_container_extraction() {
        assert_eq!(container_from_field_path("spec.containers{nginx}"), "nginx");
        assert_eq!(container_from_field_path("spec.initContainers{x}"), "spec.initContainers{x");
        assert_eq!(container_from_field_path("plain"), "plain");
    }

    #[test]
    fn rule_keys_display_their_scope() {
        assert_eq!(RuleKey::Resource(ResourceKind::ConfigMap).to_string(), "ConfigMap");
        assert_eq!(RuleKey::Event(InvolvedKind::Pod).to_string(), "Event/Pod");
    }

    #[test]
    fn fatal_only_for_unsupported() {
        let u = ClassifyError::Unsupported { kind: "Job".into(), uid: "1".into() };
        let m = ClassifyError::Malformed { kind: ResourceKind::Event, uid: "1".into(), what: "missing reason" };
        assert!(u.is_fatal());
        assert!(!m.is_fatal());
    }
}
