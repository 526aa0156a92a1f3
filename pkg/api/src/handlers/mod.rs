pub mod claims;
pub mod metrics;
pub mod namespaces;
pub mod pools;
pub mod quotas;
pub mod watch;

use axum::{Json, http::StatusCode};
use chrono::Utc;
use pkg_state::DeleteOutcome;
use pkg_types::ObjectMeta;

/// Server-owned metadata is never taken from a create request.
pub(crate) fn prepare_create(meta: &mut ObjectMeta) {
    meta.uid.clear();
    meta.resource_version = 0;
    meta.generation = 1;
    meta.finalizers.clear();
    meta.owner_references.clear();
    meta.creation_timestamp = Utc::now();
    meta.deletion_timestamp = None;
}

/// Metadata for an update: server-owned fields from `existing`, labels and
/// annotations from the request. A request without a resourceVersion
/// updates unconditionally.
pub(crate) fn merge_meta(existing: &ObjectMeta, incoming: ObjectMeta) -> ObjectMeta {
    let mut meta = existing.clone();
    meta.labels = incoming.labels;
    meta.annotations = incoming.annotations;
    if incoming.resource_version != 0 {
        meta.resource_version = incoming.resource_version;
    }
    meta
}

/// 200 with the removed object, or 202 while finalizers are pending.
pub(crate) fn delete_response<T>(outcome: DeleteOutcome<T>) -> (StatusCode, Json<T>) {
    match outcome {
        DeleteOutcome::Deleted(obj) => (StatusCode::OK, Json(obj)),
        DeleteOutcome::Marked(obj) => (StatusCode::ACCEPTED, Json(obj)),
    }
}
