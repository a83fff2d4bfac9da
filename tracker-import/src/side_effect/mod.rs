//! Side-effect dispatch
//!
//! After an enrollment or event is persisted, the commit engine builds a
//! [`SideEffectDescriptor`] and hands it to every registered handler. Each
//! handler decides on its own whether to act on it.

pub mod notification;

use crate::models::{ImportStrategy, RuleEffect, TrackerType};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

pub use notification::NotificationHandler;

/// What was persisted and which rule effects apply to it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SideEffectDescriptor {
    pub tracker_type: TrackerType,
    pub uid: String,
    /// Program UID
    pub program: Option<String>,
    pub rule_effects: Vec<RuleEffect>,
    /// Username of the importing user
    pub username: Option<String>,
    pub import_strategy: ImportStrategy,
}

pub trait SideEffectHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(&self, descriptor: &SideEffectDescriptor);
}

/// Ordered, possibly empty set of handlers
#[derive(Clone, Default)]
pub struct SideEffectDispatcher {
    handlers: Vec<Arc<dyn SideEffectHandler>>,
}

impl SideEffectDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn SideEffectHandler>) {
        self.handlers.push(handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn SideEffectHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Deliver `descriptor` to every handler, in registration order
    pub fn dispatch(&self, descriptor: &SideEffectDescriptor) {
        for handler in &self.handlers {
            debug!(
                handler = handler.name(),
                tracker_type = %descriptor.tracker_type,
                uid = %descriptor.uid,
                effects = descriptor.rule_effects.len(),
                "Dispatching side effects"
            );
            handler.handle(descriptor);
        }
    }
}

impl std::fmt::Debug for SideEffectDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SideEffectDispatcher")
            .field("handlers", &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collect(&'static str, Arc<Mutex<Vec<String>>>);

    impl SideEffectHandler for Collect {
        fn name(&self) -> &'static str {
            self.0
        }

        fn handle(&self, descriptor: &SideEffectDescriptor) {
            self.1.lock().unwrap().push(format!("{}:{}", self.0, descriptor.uid));
        }
    }

    fn descriptor() -> SideEffectDescriptor {
        SideEffectDescriptor {
            tracker_type: TrackerType::Event,
            uid: "ZwwuwNp6gVd".to_string(),
            program: Some("IpHINAT79UW".to_string()),
            rule_effects: Vec::new(),
            username: None,
            import_strategy: ImportStrategy::Create,
        }
    }

    #[test]
    fn test_dispatch_reaches_handlers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = SideEffectDispatcher::new()
            .with_handler(Arc::new(Collect("a", Arc::clone(&seen))))
            .with_handler(Arc::new(Collect("b", Arc::clone(&seen))));

        dispatcher.dispatch(&descriptor());

        assert_eq!(*seen.lock().unwrap(), vec!["a:ZwwuwNp6gVd", "b:ZwwuwNp6gVd"]);
    }

    #[test]
    fn test_empty_dispatcher_is_a_no_op() {
        let dispatcher = SideEffectDispatcher::new();
        assert!(dispatcher.is_empty());
        dispatcher.dispatch(&descriptor());
    }
}
