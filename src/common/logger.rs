//! Component logging handle.
//!
//! Components receive a [`Logger`] when they are constructed instead of
//! reaching for a process-wide instance. Every event carries the component
//! name and, once narrowed with [`Logger::scoped`], the unit of work it
//! belongs to (for example `ep1/720p`).

use std::fmt::Display;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct Logger {
    component: &'static str,
    scope: Option<Arc<str>>,
}

impl Logger {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            scope: None,
        }
    }

    /// Narrow the logger to one unit of work. Nested scopes are joined with `/`.
    pub fn scoped(&self, scope: impl Display) -> Self {
        let scope = match &self.scope {
            Some(parent) => format!("{}/{}", parent, scope),
            None => scope.to_string(),
        };
        Self {
            component: self.component,
            scope: Some(scope.into()),
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn scope(&self) -> &str {
        self.scope.as_deref().unwrap_or("-")
    }

    pub fn debug(&self, message: impl Display) {
        debug!(component = self.component, scope = self.scope(), "{}", message);
    }

    pub fn info(&self, message: impl Display) {
        info!(component = self.component, scope = self.scope(), "{}", message);
    }

    pub fn warn(&self, message: impl Display) {
        warn!(component = self.component, scope = self.scope(), "{}", message);
    }

    pub fn error(&self, message: impl Display) {
        error!(component = self.component, scope = self.scope(), "{}", message);
    }
}
