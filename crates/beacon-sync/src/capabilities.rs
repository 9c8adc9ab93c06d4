//! # Platform Capabilities
//!
//! What the current execution context can do, injected instead of probed.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   Capability Matrix                                     │
//! │                                                                         │
//! │                        MainAppCapabilities   NoCapabilities             │
//! │  context()             MainApp               NotificationExtension      │
//! │  periodic flush        yes                   no                         │
//! │  background task       tracked guard         inert guard                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Where the engine is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// The host application process.
    MainApp,
    /// A short-lived notification-processing extension.
    NotificationExtension,
}

/// Keeps a platform background task alive until dropped.
pub struct BackgroundTaskGuard {
    name: String,
    on_end: Option<Box<dyn FnOnce() + Send>>,
}

impl BackgroundTaskGuard {
    /// A guard that does nothing when dropped.
    pub fn inert(name: impl Into<String>) -> Self {
        BackgroundTaskGuard {
            name: name.into(),
            on_end: None,
        }
    }

    /// A guard that runs `on_end` when dropped.
    pub fn with_end(name: impl Into<String>, on_end: impl FnOnce() + Send + 'static) -> Self {
        BackgroundTaskGuard {
            name: name.into(),
            on_end: Some(Box::new(on_end)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for BackgroundTaskGuard {
    fn drop(&mut self) {
        if let Some(on_end) = self.on_end.take() {
            debug!(task = %self.name, "Ending background task");
            on_end();
        }
    }
}

impl std::fmt::Debug for BackgroundTaskGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTaskGuard")
            .field("name", &self.name)
            .finish()
    }
}

/// Capability provider injected per execution context.
pub trait PlatformCapabilities: Send + Sync {
    fn context(&self) -> ExecutionContext;

    /// Whether a recurring flush timer may run here.
    fn supports_periodic_flush(&self) -> bool;

    /// Asks the platform for extra time to finish `name`.
    fn begin_background_task(&self, name: &str) -> BackgroundTaskGuard;
}

/// The extension context: nothing is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapabilities;

impl PlatformCapabilities for NoCapabilities {
    fn context(&self) -> ExecutionContext {
        ExecutionContext::NotificationExtension
    }

    fn supports_periodic_flush(&self) -> bool {
        false
    }

    fn begin_background_task(&self, name: &str) -> BackgroundTaskGuard {
        BackgroundTaskGuard::inert(name)
    }
}

/// Default for the main process. Counts open background tasks.
#[derive(Debug, Clone, Default)]
pub struct MainAppCapabilities {
    active: Arc<AtomicUsize>,
}

impl MainAppCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of background tasks currently held open.
    pub fn active_background_tasks(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl PlatformCapabilities for MainAppCapabilities {
    fn context(&self) -> ExecutionContext {
        ExecutionContext::MainApp
    }

    fn supports_periodic_flush(&self) -> bool {
        true
    }

    fn begin_background_task(&self, name: &str) -> BackgroundTaskGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        debug!(task = %name, "Beginning background task");

        let active = Arc::clone(&self.active);
        BackgroundTaskGuard::with_end(name, move || {
            active.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_app_guard_lifecycle() {
        let caps = MainAppCapabilities::new();
        assert_eq!(caps.context(), ExecutionContext::MainApp);

        let guard = caps.begin_background_task("final-flush");
        assert_eq!(guard.name(), "final-flush");
        assert_eq!(caps.active_background_tasks(), 1);

        drop(guard);
        assert_eq!(caps.active_background_tasks(), 0);
    }

    #[test]
    fn test_no_capabilities() {
        let caps = NoCapabilities;
        assert_eq!(caps.context(), ExecutionContext::NotificationExtension);
        assert!(!caps.supports_periodic_flush());
        let _guard = caps.begin_background_task("anything");
    }
}
