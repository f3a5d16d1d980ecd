//! API groups, versions and well-known metadata keys.

/// Group of the `ManagedCluster` kind.
pub const CLUSTER_GROUP: &str = "cluster.mcf.io";
pub const CLUSTER_VERSION: &str = "v1";

/// Group of the `ClusterInfo` kind.
pub const INTERNAL_GROUP: &str = "internal.mcf.io";
pub const INTERNAL_VERSION: &str = "v1beta1";

/// Group of the `ClusterAction` kind.
pub const ACTION_GROUP: &str = "action.mcf.io";
pub const ACTION_VERSION: &str = "v1beta1";

/// Group of the `ManagedClusterView` kind.
pub const VIEW_GROUP: &str = "view.mcf.io";
pub const VIEW_VERSION: &str = "v1beta1";

/// Group of the `ClusterPermission` kind.
pub const PERMISSION_GROUP: &str = "rbac.mcf.io";
pub const PERMISSION_VERSION: &str = "v1alpha1";

/// Group serving the virtual `Project` and `UserPermission` resources.
pub const CLUSTERVIEW_GROUP: &str = "clusterview.mcf.io";
pub const PROJECT_VERSION: &str = "v1";
pub const USERPERMISSION_VERSION: &str = "v1beta1";

/// Kubernetes RBAC group used for hub-side roles and bindings.
pub const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
pub const RBAC_VERSION: &str = "v1";

// ─── Annotations and labels ───────────────────────────────────────────────

/// Base64 encoded user the action is performed as.
pub const ANNOTATION_USER_IDENTITY: &str = "mcf.io/user-identity";

/// Base64 encoded, comma separated groups the action is performed as.
pub const ANNOTATION_USER_GROUP: &str = "mcf.io/user-group";

/// Label carrying the owning cluster on virtual `Project` items.
pub const LABEL_CLUSTER: &str = "cluster";

/// Label that marks a ClusterRole as eligible for UserPermission.
pub const LABEL_DISCOVERABLE: &str = "discoverable";

/// Annotation asking the host environment to inject its service CA.
pub const ANNOTATION_INJECT_CABUNDLE: &str = "service.alpha.openshift.io/inject-cabundle";

/// Configmap data key that receives the injected service CA.
pub const SERVICE_CA_KEY: &str = "service-ca.crt";

/// Node label marking a worker node.
pub const LABEL_WORKER_ROLE: &str = "node-role.kubernetes.io/worker";

// ─── Cluster capacity ─────────────────────────────────────────────────────

pub const CAPACITY_CORE: &str = "core";
pub const CAPACITY_CORE_WORKER: &str = "core_worker";
pub const CAPACITY_SOCKET: &str = "socket";
pub const CAPACITY_SOCKET_WORKER: &str = "socket_worker";

// ─── Condition types ──────────────────────────────────────────────────────

pub const CONDITION_COMPLETED: &str = "Completed";
pub const CONDITION_FAILED: &str = "Failed";
pub const CONDITION_CLUSTER_INFO_SYNCED: &str = "ManagedClusterInfoSynced";

// ─── Agent surface ────────────────────────────────────────────────────────

/// Path prefix of the agent log endpoint.
pub const CONTAINER_LOGS_PATH: &str = "/containerLogs";

/// Header used to carry the request id on hub API responses.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
