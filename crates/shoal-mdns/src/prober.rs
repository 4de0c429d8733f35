//! Name-conflict probing before claiming a service instance name.

use std::time::Duration;

use shoal_common::names;
use shoal_common::types::ReplyAddress;

use crate::agent::{Agent, Host};
use crate::host::DiscoveryOptions;
use crate::resource::{DnsType, Question, Resource, Section};

/// Probe rounds before the name is declared free.
const PROBE_ROUNDS: u32 = 3;

/// Gap between probe rounds.
const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// TTL on the proposed SRV record carried in probe authority sections.
const PROPOSED_SRV_TTL: u32 = 120;

/// Invoked exactly once: `true` when the name is free to claim,
/// `false` when another responder already owns it.
pub type ProbeCallback = Box<dyn FnOnce(bool) + Send>;

/// Agent that probes whether a service instance name is already in
/// use on the network.
pub struct InstanceProber {
    instance_full_name: String,
    port: u16,
    options: DiscoveryOptions,
    local_host_full_name: String,
    rounds_remaining: u32,
    callback: Option<ProbeCallback>,
}

impl InstanceProber {
    pub fn new(
        service_name: &str,
        instance_name: &str,
        port: u16,
        options: DiscoveryOptions,
        callback: ProbeCallback,
    ) -> Self {
        Self {
            instance_full_name: names::instance_full_name(instance_name, service_name),
            port,
            options,
            local_host_full_name: String::new(),
            rounds_remaining: PROBE_ROUNDS,
            callback: Some(callback),
        }
    }

    /// The name being probed, e.g. `"web._http._tcp.local."`.
    pub fn resource_name(&self) -> &str {
        &self.instance_full_name
    }

    /// The SRV record this device intends to publish, sent in the
    /// authority section of each probe for tiebreaking.
    fn proposed_resource(&self) -> Resource {
        Resource::srv(
            self.instance_full_name.clone(),
            PROPOSED_SRV_TTL,
            0,
            0,
            self.port,
            self.local_host_full_name.clone(),
        )
    }

    fn send_probe(&mut self, host: &mut dyn Host) {
        let reply_address = ReplyAddress::multicast(self.options.media, self.options.ip_versions);
        host.send_question(
            Question {
                name: self.instance_full_name.clone(),
                dns_type: DnsType::Any,
            },
            reply_address,
        );
        host.send_resource(self.proposed_resource(), Section::Authority, reply_address);
    }

    fn finish(&mut self, host: &mut dyn Host, free: bool) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        callback(free);
        host.remove_self();
    }
}

impl Agent for InstanceProber {
    fn start(&mut self, host: &mut dyn Host, local_host_full_name: &str) {
        self.local_host_full_name = local_host_full_name.to_string();
        self.send_probe(host);
        host.post_wake(host.now() + PROBE_INTERVAL);
    }

    fn wake(&mut self, host: &mut dyn Host) {
        self.rounds_remaining -= 1;
        if self.rounds_remaining == 0 {
            self.finish(host, true);
            return;
        }
        self.send_probe(host);
        host.post_wake(host.now() + PROBE_INTERVAL);
    }

    fn receive_resource(
        &mut self,
        host: &mut dyn Host,
        resource: &Resource,
        section: Section,
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
        if section != Section::Answer || resource.name != self.instance_full_name {
            return;
        }
        // Our own probe data coming back is not a conflict.
        if resource.data == self.proposed_resource().data {
            return;
        }
        tracing::debug!(name = %self.instance_full_name, "probe conflict");
        self.finish(host, false);
    }

    fn end_of_message(&mut self, _host: &mut dyn Host) {}

    fn quit(&mut self, _host: &mut dyn Host) {
        // Removed before probing completed: report the name as taken
        // so callers never claim an unprobed name.
        if let Some(callback) = self.callback.take() {
            callback(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_name_is_the_probed_instance_full_name() {
        let prober = InstanceProber::new(
            "_http._tcp.",
            "web",
            8080,
            DiscoveryOptions::default(),
            Box::new(|_| {}),
        );
        assert_eq!(prober.resource_name(), "web._http._tcp.local.");
    }

    #[test]
    fn proposed_record_carries_the_local_host_and_port() {
        let mut prober = InstanceProber::new(
            "_http._tcp.",
            "web",
            8080,
            DiscoveryOptions::default(),
            Box::new(|_| {}),
        );
        prober.local_host_full_name = "device.local.".to_string();
        assert_eq!(
            prober.proposed_resource(),
            Resource::srv("web._http._tcp.local.", 120, 0, 0, 8080, "device.local.")
        );
    }
}
