//! Well-known identities and role names.

/// Roles whose bindings surface as virtual `Project` entries.
pub const KUBEVIRT_ROLES: [&str; 3] = ["kubevirt.io:admin", "kubevirt.io:edit", "kubevirt.io:view"];

/// Synthetic role granting actions and views on a managed cluster.
pub const MANAGED_CLUSTER_ADMIN_ROLE: &str = "managedcluster:admin";

/// Synthetic role granting views on a managed cluster.
pub const MANAGED_CLUSTER_VIEW_ROLE: &str = "managedcluster:view";

pub const ACTION_RESOURCE: &str = "managedclusteractions";
pub const VIEW_RESOURCE: &str = "managedclusterviews";

/// Common name of the client certificate the hub presents to agents.
pub const HUB_LOG_PROXY_USER: &str = "mcf:hub-log-proxy";

/// Group the hub log proxy certificate is issued into.
pub const HUB_GROUP: &str = "mcf:hubs";

/// Identity assigned to requests when the agent runs insecure.
pub const ANONYMOUS_USER: &str = "system:anonymous";
pub const UNAUTHENTICATED_GROUP: &str = "system:unauthenticated";
