use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use shoal_common::types::ServiceInstance;

use crate::resource::DnsType;

/// Callbacks a discovery subscriber receives.
///
/// Subscribers are only ever read (iterated) during notification;
/// the cache logic never mutates them.
pub trait Subscriber: Send {
    /// A fully resolved instance was seen for the first time.
    fn instance_discovered(&mut self, instance: &ServiceInstance);

    /// A previously discovered instance changed.
    fn instance_changed(&mut self, instance: &ServiceInstance);

    /// An instance went away.
    fn instance_lost(&mut self, service_name: &str, instance_name: &str);

    /// Informational: the requestor issued a query of this type.
    fn query(&mut self, _dns_type: DnsType) {}
}

/// Shared handle under which subscribers are registered and compared
/// (removal is by pointer identity).
pub type SharedSubscriber = Arc<Mutex<dyn Subscriber + Send>>;

/// Events emitted by the discovery engine.
/// The broadcast-channel rendering of the [`Subscriber`] callbacks.
#[derive(Debug, Clone)]
pub enum InstanceEvent {
    Discovered(ServiceInstance),
    Changed(ServiceInstance),
    Lost {
        service_name: String,
        instance_name: String,
    },
    Query {
        dns_type: DnsType,
    },
}

/// Bridges the [`Subscriber`] trait onto a broadcast channel so async
/// consumers can receive discovery events.
pub struct ChannelSubscriber {
    event_tx: broadcast::Sender<InstanceEvent>,
}

impl ChannelSubscriber {
    pub fn new(event_tx: broadcast::Sender<InstanceEvent>) -> Self {
        Self { event_tx }
    }
}

impl Subscriber for ChannelSubscriber {
    fn instance_discovered(&mut self, instance: &ServiceInstance) {
        let _ = self
            .event_tx
            .send(InstanceEvent::Discovered(instance.clone()));
    }

    fn instance_changed(&mut self, instance: &ServiceInstance) {
        let _ = self.event_tx.send(InstanceEvent::Changed(instance.clone()));
    }

    fn instance_lost(&mut self, service_name: &str, instance_name: &str) {
        let _ = self.event_tx.send(InstanceEvent::Lost {
            service_name: service_name.to_string(),
            instance_name: instance_name.to_string(),
        });
    }

    fn query(&mut self, dns_type: DnsType) {
        let _ = self.event_tx.send(InstanceEvent::Query { dns_type });
    }
}
