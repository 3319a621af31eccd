use serde::{Deserialize, Serialize};
use stratus_schema::DesiredState;

/// Resource-level delta between a deployed stack and its desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDiff {
    pub stack_name: String,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    /// Tags or outputs differ.
    pub metadata_changed: bool,
    pub has_changes: bool,
}

/// Compare a desired state against the last deployed one (`None` when the
/// stack has never been deployed).
pub fn diff_templates(deployed: Option<&DesiredState>, desired: &DesiredState) -> StackDiff {
    let mut added = Vec::new();
    let mut modified = Vec::new();
    let mut removed = Vec::new();

    for (id, resource) in &desired.resources {
        match deployed.and_then(|d| d.resources.get(id)) {
            None => added.push(id.to_string()),
            Some(old) if old != resource => modified.push(id.to_string()),
            Some(_) => {}
        }
    }
    if let Some(old) = deployed {
        removed.extend(
            old.resources
                .keys()
                .filter(|id| !desired.resources.contains_key(*id))
                .map(ToString::to_string),
        );
    }

    let metadata_changed = match deployed {
        Some(old) => old.tags != desired.tags || old.outputs != desired.outputs,
        None => !desired.tags.is_empty() || !desired.outputs.is_empty(),
    };
    let has_changes =
        metadata_changed || !added.is_empty() || !modified.is_empty() || !removed.is_empty();

    StackDiff {
        stack_name: desired.stack_name.clone(),
        added,
        modified,
        removed,
        metadata_changed,
        has_changes,
    }
}
