//! Notification side effects
//!
//! Turns SendMessage and ScheduleMessage rule effects into
//! `NotificationRequested` events on the event bus. Delivery happens
//! elsewhere.

use super::{SideEffectDescriptor, SideEffectHandler};
use chrono::Utc;
use tracker_common::events::{EventBus, ImportEvent};

pub struct NotificationHandler {
    event_bus: EventBus,
}

impl NotificationHandler {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

impl SideEffectHandler for NotificationHandler {
    fn name(&self) -> &'static str {
        "notifications"
    }

    fn handle(&self, descriptor: &SideEffectDescriptor) {
        for effect in descriptor.rule_effects.iter().filter(|e| e.is_notification()) {
            self.event_bus.emit_lossy(ImportEvent::NotificationRequested {
                tracker_type: descriptor.tracker_type.to_string(),
                uid: descriptor.uid.clone(),
                program: descriptor.program.clone(),
                rule: effect.rule.clone(),
                template: effect.template.clone(),
                scheduled_at: effect.scheduled_at,
                username: descriptor.username.clone(),
                timestamp: Utc::now(),
            });
        }
    }
}
