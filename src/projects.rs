// Project lookup collaborator

use crate::models::Project;
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolves a project ID to its record; `None` means not found
pub trait ProjectResolver: Send + Sync + 'static {
    fn lookup(&self, project_id: &str) -> Option<Project>;
}

/// Resolver backed by an in-memory map
#[derive(Default)]
pub struct InMemoryProjectResolver {
    projects: RwLock<HashMap<String, Project>>,
}

impl InMemoryProjectResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(self, project: Project) -> Self {
        self.add(project);
        self
    }

    pub fn add(&self, project: Project) {
        let mut projects = match self.projects.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        projects.insert(project.id.clone(), project);
    }

    pub fn remove(&self, project_id: &str) -> Option<Project> {
        let mut projects = match self.projects.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        projects.remove(project_id)
    }
}

impl ProjectResolver for InMemoryProjectResolver {
    fn lookup(&self, project_id: &str) -> Option<Project> {
        let projects = match self.projects.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        projects.get(project_id).cloned()
    }
}
