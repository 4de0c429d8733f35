//! One-shot resolution of a single named service instance.

use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Instant;

use shoal_common::names;
use shoal_common::types::{ReplyAddress, ServiceInstance};

use crate::agent::{Agent, Host};
use crate::host::DiscoveryOptions;
use crate::resource::{DnsType, Question, Resource, ResourceData, Section};

/// Invoked exactly once: with the resolved (or partial) instance, or
/// `None` when nothing was learned before the deadline.
pub type ResolveCallback = Box<dyn FnOnce(Option<ServiceInstance>) + Send>;

/// Agent that resolves one instance to its target, port, and
/// addresses, then removes itself.
pub struct ServiceInstanceResolver {
    service_name: String,
    instance_name: String,
    instance_full_name: String,
    deadline: Instant,
    options: DiscoveryOptions,
    /// Present until the result is delivered.
    callback: Option<ResolveCallback>,
    port: Option<u16>,
    target: String,
    target_full_name: String,
    srv_priority: u16,
    srv_weight: u16,
    addresses: Vec<SocketAddr>,
    text: Vec<Vec<u8>>,
}

impl ServiceInstanceResolver {
    pub fn new(
        service_name: impl Into<String>,
        instance_name: impl Into<String>,
        deadline: Instant,
        options: DiscoveryOptions,
        callback: ResolveCallback,
    ) -> Self {
        let service_name = service_name.into();
        let instance_name = instance_name.into();
        let instance_full_name = names::instance_full_name(&instance_name, &service_name);
        Self {
            service_name,
            instance_name,
            instance_full_name,
            deadline,
            options,
            callback: Some(callback),
            port: None,
            target: String::new(),
            target_full_name: String::new(),
            srv_priority: 0,
            srv_weight: 0,
            addresses: Vec::new(),
            text: Vec::new(),
        }
    }

    /// What has been learned so far, or `None` before the SRV record
    /// arrives.
    fn partial_instance(&self) -> Option<ServiceInstance> {
        self.port.map(|port| ServiceInstance {
            service_name: self.service_name.clone(),
            instance_name: self.instance_name.clone(),
            target: self.target.clone(),
            port,
            addresses: self.addresses.clone(),
            text: self.text.clone(),
            srv_priority: self.srv_priority,
            srv_weight: self.srv_weight,
        })
    }

    /// Deliver the result and schedule self-removal. Idempotent.
    fn finish(&mut self, host: &mut dyn Host, result: Option<ServiceInstance>) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        callback(result);
        host.remove_self();
    }
}

impl Agent for ServiceInstanceResolver {
    fn start(&mut self, host: &mut dyn Host, _local_host_full_name: &str) {
        host.send_question(
            Question {
                name: self.instance_full_name.clone(),
                dns_type: DnsType::Srv,
            },
            ReplyAddress::multicast(self.options.media, self.options.ip_versions),
        );
        host.post_wake(self.deadline);
    }

    fn wake(&mut self, host: &mut dyn Host) {
        // Deadline reached: report whatever was learned.
        let partial = self.partial_instance();
        self.finish(host, partial);
    }

    fn receive_resource(
        &mut self,
        _host: &mut dyn Host,
        resource: &Resource,
        _section: Section,
        sender: &ReplyAddress,
    ) {
        if self.callback.is_none() {
            return;
        }
        if !sender.matches_media(self.options.media)
            || !sender.matches_ip_versions(self.options.ip_versions)
        {
            return;
        }
        if resource.time_to_live == 0 {
            return;
        }

        match &resource.data {
            ResourceData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                if resource.name != self.instance_full_name {
                    return;
                }
                self.port = Some(*port);
                self.srv_priority = *priority;
                self.srv_weight = *weight;
                self.target = names::host_name_from_full_name(target)
                    .unwrap_or(target)
                    .to_string();
                self.target_full_name = target.clone();
            }
            ResourceData::A { address } => {
                if resource.name != self.target_full_name || self.target_full_name.is_empty() {
                    return;
                }
                let socket = SocketAddr::V4(SocketAddrV4::new(*address, self.port.unwrap_or(0)));
                if !self.addresses.contains(&socket) {
                    self.addresses.push(socket);
                }
            }
            ResourceData::Aaaa { address } => {
                if resource.name != self.target_full_name || self.target_full_name.is_empty() {
                    return;
                }
                let socket = SocketAddr::V6(SocketAddrV6::new(
                    *address,
                    self.port.unwrap_or(0),
                    0,
                    sender.interface_id,
                ));
                if !self.addresses.contains(&socket) {
                    self.addresses.push(socket);
                }
            }
            ResourceData::Txt { strings } => {
                if resource.name != self.instance_full_name {
                    return;
                }
                self.text = strings.clone();
            }
            ResourceData::Ptr { .. } => {}
        }
    }

    fn end_of_message(&mut self, host: &mut dyn Host) {
        if self.callback.is_some() && self.port.is_some() && !self.addresses.is_empty() {
            let result = self.partial_instance();
            self.finish(host, result);
        }
    }

    fn quit(&mut self, _host: &mut dyn Host) {
        // Removed before resolving (engine shutdown): report failure.
        if let Some(callback) = self.callback.take() {
            callback(None);
        }
    }

    fn on_add_local_service_instance(
        &mut self,
        host: &mut dyn Host,
        instance: &ServiceInstance,
        from_proxy: bool,
    ) {
        if instance.service_name != self.service_name
            || instance.instance_name != self.instance_name
        {
            return;
        }
        let include = if from_proxy {
            self.options.include_local_proxies
        } else {
            self.options.include_local
        };
        if include {
            self.finish(host, Some(instance.clone()));
        }
    }
}
