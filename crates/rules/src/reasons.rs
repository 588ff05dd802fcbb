//! Event reasons emitted by the kubelet, the scheduler and the volume controllers.
//!
//! `name` is the upstream constant name, `wire` the string that actually lands
//! in `Event.reason`. Rule sets register both spellings.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reason {
    pub name: &'static str,
    pub wire: &'static str,
}

impl Reason {
    pub const fn new(name: &'static str, wire: &'static str) -> Self { Self { name, wire } }

    /// Reason whose constant name and wire value coincide.
    pub const fn same(name: &'static str) -> Self { Self { name, wire: name } }

    pub fn spellings(&self) -> impl Iterator<Item = &'static str> {
        let wire = (self.wire != self.name).then_some(self.wire);
        std::iter::once(self.name).chain(wire)
    }
}

// Container
pub const STARTED_CONTAINER: Reason = Reason::new("StartedContainer", "Started");
pub const FAILED_TO_CREATE_CONTAINER: Reason = Reason::new("FailedToCreateContainer", "Failed");
pub const FAILED_TO_START_CONTAINER: Reason = Reason::new("FailedToStartContainer", "Failed");
pub const PREEMPT_CONTAINER: Reason = Reason::new("PreemptContainer", "Preempting");
pub const BACK_OFF_START_CONTAINER: Reason = Reason::new("BackOffStartContainer", "BackOff");
pub const EXCEEDED_GRACE_PERIOD: Reason = Reason::same("ExceededGracePeriod");
pub const CONTAINER_UNHEALTHY: Reason = Reason::new("ContainerUnhealthy", "Unhealthy");

// Pod
pub const FAILED_TO_KILL_POD: Reason = Reason::new("FailedToKillPod", "FailedKillPod");
pub const FAILED_TO_CREATE_POD_CONTAINER: Reason = Reason::new("FailedToCreatePodContainer", "FailedCreatePodContainer");
pub const NETWORK_NOT_READY: Reason = Reason::same("NetworkNotReady");
pub const FAILED_SCHEDULING: Reason = Reason::same("FailedScheduling");
pub const FAILED_SYNC: Reason = Reason::same("FailedSync");
pub const FAILED_VALIDATION: Reason = Reason::same("FailedValidation");
pub const FAILED_CREATE_POD_SANDBOX: Reason = Reason::same("FailedCreatePodSandBox");
pub const FAILED_STATUS_POD_SANDBOX: Reason = Reason::new("FailedStatusPodSandBox", "FailedPodSandBoxStatus");

// Image
pub const PULLING_IMAGE: Reason = Reason::new("PullingImage", "Pulling");
pub const PULLED_IMAGE: Reason = Reason::new("PulledImage", "Pulled");
pub const FAILED_TO_INSPECT_IMAGE: Reason = Reason::new("FailedToInspectImage", "InspectFailed");
pub const ERR_IMAGE_NEVER_PULL_POLICY: Reason = Reason::new("ErrImageNeverPullPolicy", "ErrImageNeverPull");
pub const BACK_OFF_PULL_IMAGE: Reason = Reason::new("BackOffPullImage", "BackOff");
pub const IMAGE_GC_FAILED: Reason = Reason::same("ImageGCFailed");
pub const INVALID_DISK_CAPACITY: Reason = Reason::same("InvalidDiskCapacity");
pub const FREE_DISK_SPACE_FAILED: Reason = Reason::same("FreeDiskSpaceFailed");

// Node
pub const NODE_READY: Reason = Reason::same("NodeReady");
pub const NODE_NOT_READY: Reason = Reason::same("NodeNotReady");
pub const NODE_NOT_SCHEDULABLE: Reason = Reason::same("NodeNotSchedulable");
pub const NODE_SELECTOR_MISMATCHING: Reason = Reason::same("NodeSelectorMismatching");
pub const HOST_PORT_CONFLICT: Reason = Reason::same("HostPortConflict");
pub const INSUFFICIENT_FREE_CPU: Reason = Reason::same("InsufficientFreeCPU");
pub const INSUFFICIENT_FREE_MEMORY: Reason = Reason::same("InsufficientFreeMemory");
pub const HOST_NETWORK_NOT_SUPPORTED: Reason = Reason::same("HostNetworkNotSupported");

// Kubelet volumes
pub const FAILED_ATTACH_VOLUME: Reason = Reason::same("FailedAttachVolume");
pub const FAILED_DETACH_VOLUME: Reason = Reason::same("FailedDetachVolume");
pub const FAILED_MOUNT_VOLUME: Reason = Reason::new("FailedMountVolume", "FailedMount");
pub const FAILED_UNMOUNT_VOLUME: Reason = Reason::new("FailedUnMountVolume", "FailedUnMount");
pub const FAILED_MAP_VOLUME: Reason = Reason::same("FailedMapVolume");
pub const FAILED_UNMAP_DEVICE: Reason = Reason::same("FailedUnmapDevice");
pub const WARN_ALREADY_MOUNTED_VOLUME: Reason = Reason::new("WarnAlreadyMountedVolume", "AlreadyMountedVolume");
pub const SUCCESSFUL_MOUNT_VOLUME: Reason = Reason::same("SuccessfulMountVolume");
pub const SUCCESSFUL_UNMOUNT_VOLUME: Reason = Reason::same("SuccessfulUnMountVolume");
pub const VOLUME_RESIZE_FAILED: Reason = Reason::same("VolumeResizeFailed");
pub const VOLUME_RESIZE_SUCCESS: Reason = Reason::new("VolumeResizeSuccess", "VolumeResizeSuccessful");
pub const FILE_SYSTEM_RESIZE_FAILED: Reason = Reason::same("FileSystemResizeFailed");
pub const UNSUPPORTED_MOUNT_OPTION: Reason = Reason::same("UnsupportedMountOption");

// Volume controllers
pub const FAILED_BINDING: Reason = Reason::same("FailedBinding");
pub const VOLUME_MISMATCH: Reason = Reason::same("VolumeMismatch");
pub const VOLUME_FAILED_RECYCLE: Reason = Reason::same("VolumeFailedRecycle");
pub const VOLUME_RECYCLED: Reason = Reason::same("VolumeRecycled");
pub const VOLUME_FAILED_DELETE: Reason = Reason::same("VolumeFailedDelete");
pub const EXTERNAL_PROVISIONING: Reason = Reason::same("ExternalProvisioning");
pub const PROVISIONING_FAILED: Reason = Reason::same("ProvisioningFailed");
pub const PROVISIONING_CLEANUP_FAILED: Reason = Reason::same("ProvisioningCleanupFailed");
pub const PROVISIONING_SUCCEEDED: Reason = Reason::same("ProvisioningSucceeded");

/// Reasons that mark a record as Warning under the default rule.
pub const ERROR_REASONS: &[Reason] = &[
    FAILED_TO_CREATE_CONTAINER,
    FAILED_TO_KILL_POD,
    FAILED_TO_CREATE_POD_CONTAINER,
    NETWORK_NOT_READY,
    FAILED_TO_INSPECT_IMAGE,
    ERR_IMAGE_NEVER_PULL_POLICY,
    BACK_OFF_PULL_IMAGE,
    NODE_NOT_READY,
    NODE_NOT_SCHEDULABLE,
    FAILED_ATTACH_VOLUME,
    FAILED_DETACH_VOLUME,
    FAILED_MOUNT_VOLUME,
    VOLUME_RESIZE_FAILED,
    FILE_SYSTEM_RESIZE_FAILED,
    FAILED_UNMOUNT_VOLUME,
    FAILED_MAP_VOLUME,
    FAILED_UNMAP_DEVICE,
    WARN_ALREADY_MOUNTED_VOLUME,
    HOST_PORT_CONFLICT,
    NODE_SELECTOR_MISMATCHING,
    INSUFFICIENT_FREE_CPU,
    INSUFFICIENT_FREE_MEMORY,
    HOST_NETWORK_NOT_SUPPORTED,
    UNSUPPORTED_MOUNT_OPTION,
    FAILED_CREATE_POD_SANDBOX,
    FAILED_STATUS_POD_SANDBOX,
    FAILED_SYNC,
    FAILED_VALIDATION,
    FAILED_BINDING,
    VOLUME_MISMATCH,
    VOLUME_FAILED_RECYCLE,
    VOLUME_RECYCLED,
    VOLUME_FAILED_DELETE,
    PROVISIONING_FAILED,
    PROVISIONING_CLEANUP_FAILED,
    FAILED_SCHEDULING,
];

pub const POD_FAILED_REASONS: &[Reason] = &[
    FAILED_TO_CREATE_CONTAINER,
    BACK_OFF_START_CONTAINER,
    FAILED_TO_CREATE_POD_CONTAINER,
    FAILED_CREATE_POD_SANDBOX,
    FAILED_SCHEDULING,
];

pub const POD_KILL_FAILED_REASONS: &[Reason] = &[FAILED_TO_KILL_POD, EXCEEDED_GRACE_PERIOD];

pub const VOLUME_PROVISIONED_REASONS: &[Reason] = &[VOLUME_RESIZE_SUCCESS, PROVISIONING_SUCCEEDED];

/// Allow-listed reasons with the message patterns that veto them. Image pull
/// failures surface as `FailedToStartContainer` too but are already covered
/// by the dedicated image reasons.
pub const ALLOWED_REASONS: &[(Reason, &[&str])] = &[
    (FAILED_TO_START_CONTAINER, &["Error: ImagePullBackOff", "Error: ErrImagePull"]),
    (PULLING_IMAGE, &[]),
    (PULLED_IMAGE, &[]),
    (FAILED_TO_INSPECT_IMAGE, &[]),
    (ERR_IMAGE_NEVER_PULL_POLICY, &[]),
    (BACK_OFF_PULL_IMAGE, &[]),
    (IMAGE_GC_FAILED, &[]),
    (INVALID_DISK_CAPACITY, &[]),
    (FREE_DISK_SPACE_FAILED, &[]),
    (STARTED_CONTAINER, &[]),
    (PREEMPT_CONTAINER, &[]),
    (EXCEEDED_GRACE_PERIOD, &[]),
    (CONTAINER_UNHEALTHY, &[]),
    (FAILED_TO_KILL_POD, &[]),
    (FAILED_TO_CREATE_POD_CONTAINER, &[]),
    (NETWORK_NOT_READY, &[]),
    (FAILED_SYNC, &[]),
    (FAILED_CREATE_POD_SANDBOX, &[]),
    (FAILED_SCHEDULING, &[]),
    (FAILED_BINDING, &[]),
    (VOLUME_MISMATCH, &[]),
    (VOLUME_FAILED_RECYCLE, &[]),
    (VOLUME_FAILED_DELETE, &[]),
    (EXTERNAL_PROVISIONING, &[]),
    (PROVISIONING_FAILED, &[]),
    (PROVISIONING_CLEANUP_FAILED, &[]),
    (PROVISIONING_SUCCEEDED, &[]),
    (FAILED_ATTACH_VOLUME, &[]),
    (FAILED_DETACH_VOLUME, &[]),
    (FAILED_MOUNT_VOLUME, &[]),
    (FAILED_UNMOUNT_VOLUME, &[]),
    (VOLUME_RESIZE_FAILED, &[]),
    (VOLUME_RESIZE_SUCCESS, &[]),
    (FAILED_MAP_VOLUME, &[]),
    (WARN_ALREADY_MOUNTED_VOLUME, &[]),
    (SUCCESSFUL_MOUNT_VOLUME, &[]),
    (SUCCESSFUL_UNMOUNT_VOLUME, &[]),
    (NODE_READY, &[]),
    (NODE_NOT_READY, &[]),
    (NODE_SELECTOR_MISMATCHING, &[]),
];
