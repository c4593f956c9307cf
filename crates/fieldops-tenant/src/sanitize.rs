//! Role-based field redaction

use fieldops_common::{Document, Principal};
use serde_json::Value;

use crate::entity::job;

/// Is the principal the server assigned to this job
pub fn is_assigned_server(principal: &Principal, doc: &Document) -> bool {
    matches!(doc.get(job::ASSIGNED_SERVER), Some(Value::String(s)) if *s == principal.id)
}

/// Read-time projection of a job for the given principal.
///
/// Contractors who are not the assigned server only see the allow-listed fields.
pub fn job_view(principal: &Principal, doc: Document) -> Document {
    if !principal.is_contractor() || is_assigned_server(principal, &doc) {
        return doc;
    }
    doc.into_iter()
        .filter(|(field, _)| job::CONTRACTOR_VISIBLE.contains(&field.as_str()))
        .collect()
}

/// Drop everything a contractor may not change
pub fn contractor_patch(mut payload: Document) -> Document {
    payload.retain(|field, _| job::CONTRACTOR_MUTABLE.contains(&field.as_str()));
    payload
}
