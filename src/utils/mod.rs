// Utility functions

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Get the .genflow directory path for a project.
#[inline]
pub fn genflow_dir(project_path: &str) -> PathBuf {
    Path::new(project_path).join(".genflow")
}

/// Get the .genflow/config.yaml path for a project.
#[inline]
pub fn config_path(project_path: &str) -> PathBuf {
    genflow_dir(project_path).join("config.yaml")
}

/// Safely acquire a mutex lock, recovering from poisoning by returning the guard.
/// A panicking listener or job must not take the registry or job table down with it.
pub fn lock_mutex_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mutex was poisoned, recovering: {}", poisoned);
            poisoned.into_inner()
        }
    }
}

/// Truncate a message to `max` characters for display, appending "..."
pub fn truncate_message(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_string();
    }
    let kept: String = message.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}
