//! The agent lifecycle contract and the host primitives agents consume.

use std::time::Instant;

use shoal_common::types::{ReplyAddress, ServiceInstance};

use crate::resource::{Question, Resource, Section};

/// Primitives the owning host provides to its agents.
///
/// Every method is synchronous and runs on the host's single serial
/// context. Long-lived behavior is expressed by self-rescheduling
/// through [`post_wake`](Host::post_wake), never by blocking.
pub trait Host {
    /// Current time on the serial context.
    fn now(&self) -> Instant;

    /// Queue a question for the transport.
    fn send_question(&mut self, question: Question, reply_address: ReplyAddress);

    /// Queue a resource for the transport.
    fn send_resource(&mut self, resource: Resource, section: Section, reply_address: ReplyAddress);

    /// Schedule a [`wake`](Agent::wake) for the current agent no
    /// earlier than `when`. Dropped silently if the agent is gone by
    /// the time the task runs.
    fn post_wake(&mut self, when: Instant);

    /// Schedule removal of the current agent. [`quit`](Agent::quit)
    /// runs when the task does, never inline, so an agent is never
    /// deleted from within its own method.
    fn remove_self(&mut self);

    /// Record TTL bookkeeping: keep `resource` fresh with re-queries
    /// and redeliver it with TTL zero if it expires unrefreshed.
    fn renew(&mut self, resource: &Resource);
}

/// One unit of mDNS protocol behavior with a
/// start / receive / end-of-message / quit lifecycle.
///
/// The host calls every method serially; no two agent callbacks ever
/// run concurrently, so agents need no interior locking. After `quit`
/// an agent receives no further calls.
pub trait Agent {
    /// Begin operation. May synchronously send an initial question or
    /// announcement.
    fn start(&mut self, host: &mut dyn Host, local_host_full_name: &str);

    /// One inbound record. Agents re-check `sender` against their own
    /// media and ip-version filters; the host does not pre-filter per
    /// agent.
    fn receive_resource(
        &mut self,
        host: &mut dyn Host,
        resource: &Resource,
        section: Section,
        sender: &ReplyAddress,
    );

    /// Called once after the records of one inbound packet, so agents
    /// can coalesce accumulated state changes into a single
    /// notification pass.
    fn end_of_message(&mut self, host: &mut dyn Host);

    /// Timer callback for a previously posted wake.
    fn wake(&mut self, _host: &mut dyn Host) {}

    /// Terminal. The host drops the agent after this returns.
    fn quit(&mut self, _host: &mut dyn Host) {}

    /// A service instance was published on this device or a local
    /// proxy host. Delivered directly, bypassing the network path.
    fn on_add_local_service_instance(
        &mut self,
        _host: &mut dyn Host,
        _instance: &ServiceInstance,
        _from_proxy: bool,
    ) {
    }

    fn on_change_local_service_instance(
        &mut self,
        _host: &mut dyn Host,
        _instance: &ServiceInstance,
        _from_proxy: bool,
    ) {
    }

    fn on_remove_local_service_instance(
        &mut self,
        _host: &mut dyn Host,
        _service_name: &str,
        _instance_name: &str,
        _from_proxy: bool,
    ) {
    }
}
