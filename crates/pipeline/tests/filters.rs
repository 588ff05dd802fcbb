#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Event, ObjectReference, PersistentVolumeClaim, ResourceQuota, ResourceQuotaSpec, ResourceQuotaStatus,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kevents_core::{handoff, Notification, NotificationKind, StopHandle, StreamHandle};
use kevents_pipeline::{
    predicate, standard_predicates, EventFilter, FilterPipeline, GenerationFilter, Predicate, PvcFilter,
    ResourceQuotaFilter,
};
use kevents_rules::ClassificationRuleSet;

fn rules() -> Arc<ClassificationRuleSet> { Arc::new(ClassificationRuleSet::kubernetes_default().unwrap()) }

fn event(kind: NotificationKind, involved: &str, reason: &str, message: &str) -> Notification {
    let ev = Event {
        metadata: ObjectMeta { uid: Some("ev".into()), namespace: Some("prod".into()), ..Default::default() },
        involved_object: ObjectReference { kind: Some(involved.into()), name: Some("web-0".into()), ..Default::default() },
        reason: Some(reason.into()),
        message: Some(message.into()),
        ..Default::default()
    };
    Notification::new(kind, ev)
}

fn quota(spec: &[(&str, &str)], status: &[(&str, &str)]) -> ResourceQuota {
    let hard = |pairs: &[(&str, &str)]| -> BTreeMap<String, Quantity> {
        pairs.iter().map(|(k, v)| (k.to_string(), Quantity(v.to_string()))).collect()
    };
    ResourceQuota {
        metadata: ObjectMeta { namespace: Some("team-a".into()), ..Default::default() },
        spec: Some(ResourceQuotaSpec { hard: Some(hard(spec)), ..Default::default() }),
        status: Some(ResourceQuotaStatus { hard: Some(hard(status)), ..Default::default() }),
    }
}

fn pvc(finalizers: &[&str], deleting: bool) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            finalizers: if finalizers.is_empty() { None } else { Some(finalizers.iter().map(|f| f.to_string()).collect()) },
            deletion_timestamp: deleting.then(|| Time("2024-03-01T10:00:00Z".parse().unwrap())),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn deployment(uid: &str, generation: i64) -> Deployment {
    Deployment {
        metadata: ObjectMeta { uid: Some(uid.into()), generation: Some(generation), ..Default::default() },
        ..Default::default()
    }
}

#[test]
fn image_pull_failures_are_denied() {
    let f = EventFilter::new(rules());
    for reason in ["FailedToStartContainer", "Failed"] {
        assert!(!f.test(&event(NotificationKind::Added, "Pod", reason, "Back-off: Error: ImagePullBackOff")));
        assert!(!f.test(&event(NotificationKind::Added, "Pod", reason, "Error: ErrImagePull")));
        assert!(f.test(&event(NotificationKind::Added, "Pod", reason, "unrelated failure")));
    }
}

#[test]
fn event_filter_shape_checks() {
    let f = EventFilter::new(rules());
    // Not allow-listed.
    assert!(!f.test(&event(NotificationKind::Added, "Pod", "Scheduled", "")));
    // Only Added and Error pass.
    assert!(!f.test(&event(NotificationKind::Modified, "Pod", "Pulling", "")));
    assert!(!f.test(&event(NotificationKind::Deleted, "Pod", "Pulling", "")));
    assert!(f.test(&event(NotificationKind::Error, "Pod", "Pulling", "")));
    // Unsupported involved kinds.
    assert!(!f.test(&event(NotificationKind::Added, "Job", "Pulling", "")));
    assert!(f.test(&event(NotificationKind::Added, "Node", "NodeNotReady", "")));
    // Other kinds are not inspected.
    assert!(f.test(&Notification::new(NotificationKind::Modified, deployment("d", 1))));
}

#[test]
fn quota_modified_passes_only_on_limit_drift() {
    let f = ResourceQuotaFilter;
    let same = quota(&[("limits.cpu", "1"), ("requests.memory", "1Gi")], &[("limits.cpu", "1000m"), ("requests.memory", "1024Mi")]);
    assert!(!f.test(&Notification::new(NotificationKind::Modified, same.clone())));
    assert!(f.test(&Notification::new(NotificationKind::Added, same)));

    let drift = quota(&[("limits.cpu", "2")], &[("limits.cpu", "1")]);
    assert!(f.test(&Notification::new(NotificationKind::Modified, drift)));

    // Untracked keys are ignored.
    let pods = quota(&[("pods", "10")], &[("pods", "5")]);
    assert!(!f.test(&Notification::new(NotificationKind::Modified, pods)));

    // Present on one side only.
    let one_sided = quota(&[("limits.memory", "512Mi")], &[]);
    assert!(f.test(&Notification::new(NotificationKind::Modified, one_sided)));
}

#[test]
fn pvc_modified_needs_finalizers_and_no_deletion() {
    let f = PvcFilter;
    let modified = |p: PersistentVolumeClaim| Notification::new(NotificationKind::Modified, p);
    assert!(f.test(&modified(pvc(&["kubernetes.io/pvc-protection"], false))));
    assert!(!f.test(&modified(pvc(&[], false))));
    assert!(!f.test(&modified(pvc(&["kubernetes.io/pvc-protection"], true))));
    assert!(f.test(&Notification::new(NotificationKind::Deleted, pvc(&[], true))));
}

#[test]
fn evaluation_short_circuits_in_order() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let pipeline = FilterPipeline::new(vec![
        predicate("reject_all", |_| false),
        predicate("count", move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            true
        }),
    ]);
    let n = Notification::new(NotificationKind::Added, deployment("d", 1));
    assert_eq!(pipeline.rejected_by(&n), Some("reject_all"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn generation_only_advances_for_otherwise_accepted() {
    let generations = Arc::new(GenerationFilter::new());
    let pipeline = FilterPipeline::new(standard_predicates(rules(), false, Arc::clone(&generations)));
    // Error notifications are rejected before the generation filter sees them.
    assert!(!pipeline.passes(&Notification::new(NotificationKind::Error, deployment("d", 7))));
    assert_eq!(generations.generation("d"), None);

    assert!(pipeline.passes(&Notification::new(NotificationKind::Modified, deployment("d", 1))));
    assert!(!pipeline.passes(&Notification::new(NotificationKind::Modified, deployment("d", 1))));
    assert!(pipeline.passes(&Notification::new(NotificationKind::Modified, deployment("d", 2))));
    assert_eq!(generations.generation("d"), Some(2));
}

#[test]
fn watch_failures_pass_only_when_errors_are_permitted() {
    let failures = || {
        [
            Notification::watch_failure(Event::default(), "410 Gone"),
            Notification::watch_failure(Deployment::default(), "410 Gone"),
            Notification::watch_failure(ResourceQuota::default(), "410 Gone"),
        ]
    };
    let dropping = FilterPipeline::new(standard_predicates(rules(), false, Arc::new(GenerationFilter::new())));
    for n in failures() {
        assert_eq!(dropping.rejected_by(&n), Some("error"));
    }
    let permitting = FilterPipeline::new(standard_predicates(rules(), true, Arc::new(GenerationFilter::new())));
    for n in failures() {
        assert!(permitting.passes(&n), "{:?} was rejected", n.resource_kind());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn output_forwards_passing_notifications_in_order() {
    let (tx, rx) = handoff();
    let source_stop = StopHandle::new("source");
    let pipeline = FilterPipeline::new(standard_predicates(rules(), false, Arc::new(GenerationFilter::new())));
    let mut out = pipeline.output(StreamHandle::new(rx, source_stop.clone()));

    tokio::spawn(async move {
        let input = vec![
            event(NotificationKind::Added, "Pod", "Pulling", "pulling nginx"),
            event(NotificationKind::Added, "Pod", "Failed", "Error: ImagePullBackOff"),
            Notification::new(NotificationKind::Modified, deployment("d", 3)),
            Notification::new(NotificationKind::Modified, deployment("d", 2)),
            event(NotificationKind::Added, "Pod", "Started", "started container"),
        ];
        for n in input {
            let _ = tx.send(n).await;
        }
    });

    let mut got = Vec::new();
    while let Some(n) = out.rx.recv().await {
        got.push(n);
    }
    assert_eq!(got.len(), 3);
    assert_eq!(got[0].resource_kind(), kevents_core::ResourceKind::Event);
    assert_eq!(got[1].identity().uid, "d");
    assert_eq!(got[2].resource_kind(), kevents_core::ResourceKind::Event);

    assert!(out.stop.stop());
    assert!(source_stop.is_stopped());
}
