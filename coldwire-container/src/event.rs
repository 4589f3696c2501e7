//! Event-subscriber registration service.
//!
//! Components flagged as having subscription methods are registered here by
//! the container immediately after they are sealed, before their
//! post-construct callback runs. The bus is an explicitly constructed service
//! object with resettable state rather than a process-global singleton, so
//! tests can isolate registrations.

use crate::bindings::ComponentInstanceAnyPtr;
use itertools::Itertools;
use parking_lot::Mutex;
use tracing::{debug, info};

struct Subscription {
    component: String,
    instance: ComponentInstanceAnyPtr,
}

/// Registry of event-subscribing component instances.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sealed component instance as an event subscriber.
    pub fn register(&self, component: impl Into<String>, instance: ComponentInstanceAnyPtr) {
        let component = component.into();
        debug!(%component, "Registered event subscriber");
        self.subscriptions.lock().push(Subscription {
            component,
            instance,
        });
    }

    /// Class names of registered subscribers, in registration order.
    pub fn registered_components(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .iter()
            .map(|subscription| subscription.component.clone())
            .collect_vec()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Looks up a registered subscriber instance by component class name.
    pub fn subscriber(&self, component: &str) -> Option<ComponentInstanceAnyPtr> {
        self.subscriptions
            .lock()
            .iter()
            .find(|subscription| subscription.component == component)
            .map(|subscription| subscription.instance.clone())
    }

    /// Drops all registrations; for test isolation.
    pub fn clear(&self) {
        self.subscriptions.lock().clear();
    }

    /// Releases all subscriber references during container shutdown.
    pub fn shutdown(&self) {
        let count = {
            let mut subscriptions = self.subscriptions.lock();
            let count = subscriptions.len();
            subscriptions.clear();
            count
        };
        info!(subscribers = count, "Event bus shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn should_track_subscribers_in_registration_order() {
        let bus = EventBus::new();
        bus.register("com.example.First", Arc::new(1u32));
        bus.register("com.example.Second", Arc::new(2u32));

        assert_eq!(
            bus.registered_components(),
            vec!["com.example.First", "com.example.Second"]
        );
        assert_eq!(bus.subscriber_count(), 2);

        let instance = bus.subscriber("com.example.Second").unwrap();
        assert_eq!(*instance.downcast::<u32>().unwrap(), 2);
        assert!(bus.subscriber("com.example.Missing").is_none());
    }

    #[test]
    fn should_clear_and_shut_down() {
        let bus = EventBus::new();
        bus.register("com.example.First", Arc::new(1u32));

        bus.clear();
        assert_eq!(bus.subscriber_count(), 0);

        bus.register("com.example.Second", Arc::new(2u32));
        bus.shutdown();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
