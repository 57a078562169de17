//! Label and annotation protocol
//!
//! All pool state lives on cluster objects as labels and annotations under
//! the fixed `kubrun/` prefix; the keys here are the wire protocol and must
//! not change without migrating existing clusters. Label values are
//! sanitized through [`k8s_name`]; annotations carry the raw originals
//! where the sanitized form loses information.

use std::collections::BTreeMap;

use jsonptr::PointerBuf;

/// Pool membership, set at spawn
pub const LABEL_POOL_ID: &str = "kubrun/pool-id";
/// 8-char random id shared by a workload+service pair, set at spawn
pub const LABEL_UID: &str = "kubrun/uid";
/// Component type (e.g. `mysql`), set at spawn
pub const LABEL_COMPONENT_TYPE: &str = "kubrun/component-type";
/// Caller-assigned logical name, set at claim
pub const LABEL_COMPONENT_NAME: &str = "kubrun/component-name";
/// Logical container name inside the spec, set at spawn
pub const LABEL_CONTAINER_NAME: &str = "kubrun/container-name";
/// Lease owner, set at claim
pub const LABEL_TEST_ID: &str = "kubrun/test-id";
/// Marks an unclaimed replica; removed at claim
pub const LABEL_IDLE: &str = "kubrun/idle";

/// Unsanitized component type
pub const ANNOTATION_COMPONENT_TYPE: &str = "kubrun/component-type";
/// Unsanitized container name
pub const ANNOTATION_CONTAINER_NAME: &str = "kubrun/container-name";
/// RFC-3339 UTC deadline after which the sweep deletes the object
pub const ANNOTATION_EXPIRE_AFTER: &str = "kubrun/expire-after";
/// Human-readable test name, set at claim when provided
pub const ANNOTATION_TEST_NAME: &str = "kubrun/test-name";

/// An equality label selector / label map
pub type LabelSet = BTreeMap<String, String>;

/// Canonicalize strings into valid Kubernetes names and label values.
///
/// Joins the parts with `-`, lowercases, and collapses every run of
/// characters outside `[a-z0-9-]` into a single `-`. Idempotent: the
/// output always sanitizes to itself.
pub fn k8s_name(parts: &[&str]) -> String {
    let joined = parts.join("-").to_lowercase();

    let mut out = String::with_capacity(joined.len());
    let mut in_invalid_run = false;
    for ch in joined.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' {
            out.push(ch);
            in_invalid_run = false;
        } else if !in_invalid_run {
            out.push('-');
            in_invalid_run = true;
        }
    }

    out
}

/// JSON-Patch pointer for a label key.
///
/// Keys contain `/`, which the pointer encoding escapes as `~1`.
pub fn label_path(key: &str) -> PointerBuf {
    PointerBuf::from_tokens(["metadata", "labels", key])
}

/// JSON-Patch pointer for an annotation key.
pub fn annotation_path(key: &str) -> PointerBuf {
    PointerBuf::from_tokens(["metadata", "annotations", key])
}
