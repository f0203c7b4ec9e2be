/// Project (tenant) scoping types
///
/// Every read and write against the store is filtered by the set of projects the
/// caller may see. Writes that create rows stamp them with the caller's current project.

use serde::{Deserialize, Serialize};

/// The tenant visibility of a single caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectScope {
    /// Projects the caller may read and mutate
    pub allowed: Vec<String>,
    /// Project new rows are created in
    pub current: String,
}

impl ProjectScope {
    /// Scope restricted to one project
    pub fn single(project_id: impl Into<String>) -> Self {
        let project_id = project_id.into();
        Self {
            allowed: vec![project_id.clone()],
            current: project_id,
        }
    }

    pub fn new(allowed: Vec<String>, current: impl Into<String>) -> Self {
        Self {
            allowed,
            current: current.into(),
        }
    }

    pub fn allows(&self, project_id: &str) -> bool {
        self.allowed.iter().any(|allowed| allowed == project_id)
    }

    /// JSON array bound into `json_each(?)` filters
    pub(crate) fn allowed_json(&self) -> String {
        serde_json::Value::from(self.allowed.clone()).to_string()
    }
}
