//! Predefined actions
//!
//! Any command name other than `"new connection"` and `"cancel"` is looked
//! up here. An action runs against an existing session and answers with a
//! stream of follow-up commands.

mod marker;
mod script;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use apollo_core::config::ActionConfig;
use apollo_core::error::ActionError;
use apollo_protocol::{Command, SessionId};

use crate::pty::PtySession;

pub use marker::MarkerWatcher;
pub use script::ScriptAction;

/// A named operation that runs inside a session
pub trait Action: Send + Sync {
    /// Command name that triggers the action
    fn name(&self) -> &str;

    /// Start the action. Follow-up commands arrive on the returned
    /// receiver; it closes when the action is over.
    fn run(&self, session: Arc<PtySession>) -> Result<mpsc::Receiver<Command>, ActionError>;
}

/// Actions keyed by command name
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`ScriptAction`] per configured action
    pub fn from_config(actions: &[ActionConfig]) -> Self {
        let mut registry = Self::new();
        for config in actions {
            registry.register(ScriptAction::new(config.clone()));
        }
        registry
    }

    /// Add an action, replacing any with the same name
    pub fn register(&mut self, action: impl Action + 'static) {
        let name = action.name().to_string();
        if self.actions.insert(name.clone(), Arc::new(action)).is_some() {
            tracing::warn!("Action '{}' registered twice, keeping the last one", name);
        }
    }

    /// Whether an action is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered command names
    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    /// Run the action called `name` in `session`
    pub fn dispatch(
        &self,
        name: &str,
        id: &SessionId,
        session: Option<Arc<PtySession>>,
    ) -> Result<mpsc::Receiver<Command>, ActionError> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| ActionError::Unknown(name.to_string()))?;
        let session = session.ok_or_else(|| ActionError::NoSession(id.clone()))?;

        tracing::info!("Running action '{}' in {}", name, id);
        action.run(session)
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
