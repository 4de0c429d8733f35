//! Continuous discovery of all instances of one service type.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use shoal_common::names;
use shoal_common::types::{HostAddress, ReplyAddress, ServiceInstance};

use crate::agent::{Agent, Host};
use crate::events::{SharedSubscriber, Subscriber};
use crate::host::DiscoveryOptions;
use crate::resource::{DnsType, Question, Resource, ResourceData, Section};

/// First re-query fires this long after the initial one.
const INITIAL_QUERY_DELAY: Duration = Duration::from_secs(1);

/// Re-query interval doubles up to this cap.
const MAX_QUERY_DELAY: Duration = Duration::from_secs(3600);

/// Cache state for one discovered instance.
#[derive(Default)]
struct InstanceInfo {
    instance_name: String,
    /// Host short name from the SRV target, empty until SRV arrives.
    target: String,
    target_full_name: String,
    port: u16,
    text: Vec<Vec<u8>>,
    srv_priority: u16,
    srv_weight: u16,
    /// Never reported to subscribers yet.
    new: bool,
    /// Changed since the last end-of-message pass.
    dirty: bool,
}

/// Cache state for one SRV target host. Shared between instances that
/// point at the same host.
#[derive(Default)]
struct TargetInfo {
    addresses: BTreeSet<HostAddress>,
    /// Mark bit for the end-of-message sweep.
    keep: bool,
    dirty: bool,
}

/// Agent that discovers and tracks every instance of one service type,
/// reporting coalesced changes to its subscribers.
pub struct InstanceRequestor {
    service_name: String,
    service_full_name: String,
    options: DiscoveryOptions,
    subscribers: Vec<SharedSubscriber>,
    /// Keyed by instance full name.
    instances: HashMap<String, InstanceInfo>,
    /// Keyed by host full name.
    targets: HashMap<String, TargetInfo>,
    query_delay: Duration,
}

impl InstanceRequestor {
    pub fn new(service_name: impl Into<String>, options: DiscoveryOptions) -> Self {
        let service_name = service_name.into();
        let service_full_name = names::service_full_name(&service_name);
        Self {
            service_name,
            service_full_name,
            options,
            subscribers: Vec::new(),
            instances: HashMap::new(),
            targets: HashMap::new(),
            query_delay: INITIAL_QUERY_DELAY,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Register a subscriber, replaying every already-resolved instance
    /// so late subscribers see the same picture as early ones.
    pub fn add_subscriber(&mut self, subscriber: SharedSubscriber) {
        for info in self.instances.values() {
            if info.new {
                continue;
            }
            if let Some(instance) = self.instance_for_report(info) {
                subscriber.lock().unwrap().instance_discovered(&instance);
            }
        }
        self.subscribers.push(subscriber);
    }

    /// Drop a subscriber by handle identity. Schedules self-removal
    /// when the last one is gone.
    pub fn remove_subscriber(&mut self, host: &mut dyn Host, subscriber: &SharedSubscriber) {
        self.subscribers
            .retain(|existing| !Arc::ptr_eq(existing, subscriber));
        if self.subscribers.is_empty() {
            host.remove_self();
        }
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    fn notify(&self, mut f: impl FnMut(&mut dyn Subscriber)) {
        for subscriber in &self.subscribers {
            f(&mut *subscriber.lock().unwrap());
        }
    }

    fn send_query(&mut self, host: &mut dyn Host) {
        host.send_question(
            Question {
                name: self.service_full_name.clone(),
                dns_type: DnsType::Ptr,
            },
            ReplyAddress::multicast(self.options.media, self.options.ip_versions),
        );
        self.notify(|subscriber| subscriber.query(DnsType::Ptr));
    }

    /// Whether a local-publication event for `instance` concerns this
    /// requestor.
    fn accepts_local(&self, service_name: &str, from_proxy: bool) -> bool {
        if service_name != self.service_name {
            return false;
        }
        if from_proxy {
            self.options.include_local_proxies
        } else {
            self.options.include_local
        }
    }

    /// Install a locally published instance into the cache as if its
    /// records had arrived off the network.
    fn apply_local_instance(&mut self, instance: &ServiceInstance, mark_new: bool) {
        let key = names::instance_full_name(&instance.instance_name, &self.service_name);
        let target_full_name = names::host_full_name(&instance.target);
        let info = self.instances.entry(key).or_default();
        info.instance_name = instance.instance_name.clone();
        info.target = instance.target.clone();
        info.target_full_name = target_full_name.clone();
        info.port = instance.port;
        info.text = instance.text.clone();
        info.srv_priority = instance.srv_priority;
        info.srv_weight = instance.srv_weight;
        // `new` sticks until the instance has been reported.
        info.new = info.new || mark_new;
        info.dirty = true;

        let target = self.targets.entry(target_full_name).or_default();
        target.addresses = instance
            .addresses
            .iter()
            .map(|address| HostAddress::from_socket_address(*address))
            .collect();
        target.dirty = true;
    }

    /// Remove an instance from the cache, notifying loss if it had
    /// been reported.
    fn remove_instance(&mut self, instance_full_name: &str) {
        if let Some(info) = self.instances.remove(instance_full_name) {
            if !info.new {
                let service_name = self.service_name.clone();
                self.notify(|subscriber| {
                    subscriber.instance_lost(&service_name, &info.instance_name)
                });
            }
        }
    }

    /// Build the subscriber-facing instance for `info`, or `None` when
    /// it has no resolved addresses yet.
    fn instance_for_report(&self, info: &InstanceInfo) -> Option<ServiceInstance> {
        if info.target_full_name.is_empty() {
            return None;
        }
        let target = self.targets.get(&info.target_full_name)?;
        if target.addresses.is_empty() {
            return None;
        }
        Some(ServiceInstance {
            service_name: self.service_name.clone(),
            instance_name: info.instance_name.clone(),
            target: info.target.clone(),
            port: info.port,
            addresses: target
                .addresses
                .iter()
                .map(|address| address.to_socket_address(info.port))
                .collect(),
            text: info.text.clone(),
            srv_priority: info.srv_priority,
            srv_weight: info.srv_weight,
        })
    }

    /// A/AAAA handling, shared between both address record kinds.
    /// Returns whether the record touched a tracked target.
    fn update_target_address(
        &mut self,
        resource: &Resource,
        address: std::net::IpAddr,
        interface_id: u32,
    ) -> bool {
        let Some(target) = self.targets.get_mut(&resource.name) else {
            return false;
        };
        if resource.time_to_live == 0 {
            // Goodbyes retire the address on every interface it was
            // learned on (synthesized expirations carry no interface).
            let before = target.addresses.len();
            target.addresses.retain(|existing| existing.address != address);
            if target.addresses.len() != before {
                target.dirty = true;
            }
        } else if target.addresses.insert(HostAddress::new(address, interface_id)) {
            target.dirty = true;
        }
        true
    }
}

impl Agent for InstanceRequestor {
    fn start(&mut self, host: &mut dyn Host, _local_host_full_name: &str) {
        self.send_query(host);
        host.post_wake(host.now() + self.query_delay);
    }

    fn wake(&mut self, host: &mut dyn Host) {
        self.send_query(host);
        self.query_delay = (self.query_delay * 2).min(MAX_QUERY_DELAY);
        host.post_wake(host.now() + self.query_delay);
    }

    fn receive_resource(
        &mut self,
        host: &mut dyn Host,
        resource: &Resource,
        _section: Section,
        sender: &ReplyAddress,
    ) {
        if !sender.matches_media(self.options.media)
            || !sender.matches_ip_versions(self.options.ip_versions)
        {
            return;
        }

        match &resource.data {
            ResourceData::Ptr {
                pointer_domain_name,
            } => {
                if names::match_service_name(&resource.name, &self.service_name).is_none() {
                    return;
                }
                if resource.time_to_live == 0 {
                    self.remove_instance(pointer_domain_name);
                    return;
                }
                let Some((instance_name, _)) = names::split_instance_full_name(pointer_domain_name)
                else {
                    return;
                };
                self.instances
                    .entry(pointer_domain_name.clone())
                    .or_insert_with(|| InstanceInfo {
                        instance_name,
                        new: true,
                        dirty: true,
                        ..Default::default()
                    });
                host.renew(resource);
            }
            ResourceData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                if resource.time_to_live == 0 {
                    self.remove_instance(&resource.name);
                    return;
                }
                let Some(info) = self.instances.get_mut(&resource.name) else {
                    return;
                };
                if info.target_full_name != *target {
                    info.target = names::host_name_from_full_name(target)
                        .unwrap_or(target)
                        .to_string();
                    info.target_full_name = target.clone();
                    info.dirty = true;
                    self.targets.entry(target.clone()).or_default();
                }
                if info.srv_priority != *priority {
                    info.srv_priority = *priority;
                    info.dirty = true;
                }
                if info.srv_weight != *weight {
                    info.srv_weight = *weight;
                    info.dirty = true;
                }
                if info.port != *port {
                    info.port = *port;
                    info.dirty = true;
                }
                host.renew(resource);
            }
            ResourceData::Txt { strings } => {
                let Some(info) = self.instances.get_mut(&resource.name) else {
                    return;
                };
                if resource.time_to_live == 0 {
                    if !info.text.is_empty() {
                        info.text.clear();
                        info.dirty = true;
                    }
                    return;
                }
                if info.text != *strings {
                    info.text = strings.clone();
                    info.dirty = true;
                }
                host.renew(resource);
            }
            ResourceData::A { address } => {
                if self.update_target_address(
                    resource,
                    std::net::IpAddr::V4(*address),
                    sender.interface_id,
                ) && resource.time_to_live != 0
                {
                    host.renew(resource);
                }
            }
            ResourceData::Aaaa { address } => {
                if self.update_target_address(
                    resource,
                    std::net::IpAddr::V6(*address),
                    sender.interface_id,
                ) && resource.time_to_live != 0
                {
                    host.renew(resource);
                }
            }
        }
    }

    fn end_of_message(&mut self, host: &mut dyn Host) {
        // Mark pass: targets still referenced by an instance survive
        // the sweep.
        for info in self.instances.values() {
            if info.target_full_name.is_empty() {
                continue;
            }
            if let Some(target) = self.targets.get_mut(&info.target_full_name) {
                target.keep = true;
            }
        }

        // Report pass: collect every instance whose picture changed
        // and is complete enough to report.
        let mut reports = Vec::new();
        for (key, info) in &self.instances {
            let Some(target) = self.targets.get(&info.target_full_name) else {
                continue;
            };
            if !info.dirty && !target.dirty {
                continue;
            }
            if let Some(instance) = self.instance_for_report(info) {
                reports.push((key.clone(), info.new, instance));
            }
        }
        for (key, _, _) in &reports {
            if let Some(info) = self.instances.get_mut(key) {
                info.new = false;
                info.dirty = false;
            }
        }
        for (_, was_new, instance) in &reports {
            if *was_new {
                self.notify(|subscriber| subscriber.instance_discovered(instance));
            } else {
                self.notify(|subscriber| subscriber.instance_changed(instance));
            }
        }

        // Querying for addresses of targets that have none yet.
        let mut address_queries = Vec::new();
        for (name, target) in &self.targets {
            if target.keep && target.addresses.is_empty() {
                address_queries.push(name.clone());
            }
        }
        for name in address_queries {
            host.send_question(
                Question {
                    name,
                    dns_type: DnsType::A,
                },
                ReplyAddress::multicast(self.options.media, self.options.ip_versions),
            );
            self.notify(|subscriber| subscriber.query(DnsType::A));
        }

        // Sweep pass: unreferenced targets go; mark and dirty bits
        // reset for the next message.
        self.targets.retain(|_, target| target.keep);
        for target in self.targets.values_mut() {
            target.keep = false;
            target.dirty = false;
        }
    }

    fn quit(&mut self, _host: &mut dyn Host) {
        tracing::debug!(service = %self.service_name, "instance requestor stopping");
    }

    fn on_add_local_service_instance(
        &mut self,
        host: &mut dyn Host,
        instance: &ServiceInstance,
        from_proxy: bool,
    ) {
        if !self.accepts_local(&instance.service_name, from_proxy) {
            return;
        }
        // An add only introduces the instance if it is not already
        // known; re-adds reconcile like changes.
        let key = names::instance_full_name(&instance.instance_name, &self.service_name);
        let mark_new = !self.instances.contains_key(&key);
        self.apply_local_instance(instance, mark_new);
        self.end_of_message(host);
    }

    fn on_change_local_service_instance(
        &mut self,
        host: &mut dyn Host,
        instance: &ServiceInstance,
        from_proxy: bool,
    ) {
        if !self.accepts_local(&instance.service_name, from_proxy) {
            return;
        }
        self.apply_local_instance(instance, false);
        self.end_of_message(host);
    }

    fn on_remove_local_service_instance(
        &mut self,
        _host: &mut dyn Host,
        service_name: &str,
        instance_name: &str,
        from_proxy: bool,
    ) {
        if !self.accepts_local(service_name, from_proxy) {
            return;
        }
        let key = names::instance_full_name(instance_name, &self.service_name);
        self.remove_instance(&key);
    }
}
