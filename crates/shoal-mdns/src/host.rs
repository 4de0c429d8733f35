//! The serial context that owns the agents.
//!
//! `AgentHost` is a deterministic, transport-free state machine: the
//! caller feeds it inbound records and a clock, and drains queued
//! outbound messages. All agent callbacks run inline on the caller's
//! thread, one at a time.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::mem;
use std::time::{Duration, Instant};

use shoal_common::error::{NameError, Result};
use shoal_common::names;
use shoal_common::types::{IpVersions, Media, ReplyAddress, ServiceInstance};

use crate::agent::{Agent, Host};
use crate::events::SharedSubscriber;
use crate::prober::{InstanceProber, ProbeCallback};
use crate::renewer::Renewer;
use crate::requestor::InstanceRequestor;
use crate::resolver::{ResolveCallback, ServiceInstanceResolver};
use crate::resource::{Question, Resource, Section};

pub type AgentId = u64;

/// Filters applied by discovery agents.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryOptions {
    pub media: Media,
    pub ip_versions: IpVersions,
    /// Report instances published by this device.
    pub include_local: bool,
    /// Report instances published on behalf of proxied hosts.
    pub include_local_proxies: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            media: Media::Both,
            ip_versions: IpVersions::Both,
            include_local: true,
            include_local_proxies: true,
        }
    }
}

// ── Outbound queue ───────────────────────────────────────────────────

/// One outbound payload: a question or a record with its section.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundItem {
    Question(Question),
    Resource { resource: Resource, section: Section },
}

/// An outbound payload plus where the transport should send it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub item: OutboundItem,
    pub reply_address: ReplyAddress,
}

// ── Task queue ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Wake,
    Remove,
}

#[derive(Debug, PartialEq, Eq)]
struct Task {
    when: Instant,
    /// Tiebreaker preserving posting order among equal times.
    seq: u64,
    agent: AgentId,
    kind: TaskKind,
}

impl Ord for Task {
    // Reversed, so the BinaryHeap pops the earliest task first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .when
            .cmp(&self.when)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ── Host context ─────────────────────────────────────────────────────

/// The mutable state agents reach through the [`Host`] trait. Split
/// from the agent table so an agent method can hold `&mut` to both.
struct HostContext {
    now: Instant,
    /// The agent whose callback is currently running.
    current_agent: AgentId,
    next_seq: u64,
    tasks: BinaryHeap<Task>,
    outbound: Vec<OutboundMessage>,
    renewer: Renewer,
}

impl HostContext {
    fn push_task(&mut self, when: Instant, kind: TaskKind) {
        self.next_seq += 1;
        self.tasks.push(Task {
            when,
            seq: self.next_seq,
            agent: self.current_agent,
            kind,
        });
    }
}

impl Host for HostContext {
    fn now(&self) -> Instant {
        self.now
    }

    fn send_question(&mut self, question: Question, reply_address: ReplyAddress) {
        self.outbound.push(OutboundMessage {
            item: OutboundItem::Question(question),
            reply_address,
        });
    }

    fn send_resource(&mut self, resource: Resource, section: Section, reply_address: ReplyAddress) {
        self.outbound.push(OutboundMessage {
            item: OutboundItem::Resource { resource, section },
            reply_address,
        });
    }

    fn post_wake(&mut self, when: Instant) {
        self.push_task(when, TaskKind::Wake);
    }

    fn remove_self(&mut self) {
        self.push_task(self.now, TaskKind::Remove);
    }

    fn renew(&mut self, resource: &Resource) {
        self.renewer.renew(self.now, resource);
    }
}

// ── Agent table ──────────────────────────────────────────────────────

enum AgentEntry {
    Requestor(InstanceRequestor),
    Resolver(ServiceInstanceResolver),
    Prober(InstanceProber),
}

impl AgentEntry {
    fn as_agent_mut(&mut self) -> &mut dyn Agent {
        match self {
            AgentEntry::Requestor(agent) => agent,
            AgentEntry::Resolver(agent) => agent,
            AgentEntry::Prober(agent) => agent,
        }
    }
}

struct LocalInstance {
    instance: ServiceInstance,
    from_proxy: bool,
}

// ── AgentHost ────────────────────────────────────────────────────────

/// Owns the agents, the timer queue, the outbound queue, and TTL
/// renewal state.
pub struct AgentHost {
    local_host_full_name: String,
    agents: HashMap<AgentId, AgentEntry>,
    /// Requestors are shared per service name.
    requestors: HashMap<String, AgentId>,
    /// Instances published locally, replayed to newly started agents.
    local_instances: HashMap<(String, String), LocalInstance>,
    next_agent_id: AgentId,
    ctx: HostContext,
}

impl AgentHost {
    pub fn new(host_name: &str) -> Result<Self> {
        Self::new_at(host_name, Instant::now())
    }

    /// Time-injected constructor for deterministic tests.
    pub fn new_at(host_name: &str, now: Instant) -> Result<Self> {
        if !names::is_valid_host_name(host_name) {
            return Err(NameError::InvalidHostName(host_name.to_string()));
        }
        Ok(Self {
            local_host_full_name: names::host_full_name(host_name),
            agents: HashMap::new(),
            requestors: HashMap::new(),
            local_instances: HashMap::new(),
            next_agent_id: 0,
            ctx: HostContext {
                now,
                current_agent: 0,
                next_seq: 0,
                tasks: BinaryHeap::new(),
                outbound: Vec::new(),
                renewer: Renewer::default(),
            },
        })
    }

    pub fn local_host_full_name(&self) -> &str {
        &self.local_host_full_name
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Subscribe to continuous discovery of a service type. Requestors
    /// are shared: a second subscription to the same service joins the
    /// existing agent and is immediately replayed its cache.
    pub fn subscribe_to_service(
        &mut self,
        service_name: &str,
        subscriber: SharedSubscriber,
        options: DiscoveryOptions,
    ) -> Result<()> {
        if !names::is_valid_service_name(service_name) {
            return Err(NameError::InvalidServiceName(service_name.to_string()));
        }
        if let Some(&id) = self.requestors.get(service_name) {
            if let Some(AgentEntry::Requestor(requestor)) = self.agents.get_mut(&id) {
                requestor.add_subscriber(subscriber);
                return Ok(());
            }
        }
        let mut requestor = InstanceRequestor::new(service_name, options);
        requestor.add_subscriber(subscriber);
        let id = self.add_agent(AgentEntry::Requestor(requestor));
        self.requestors.insert(service_name.to_string(), id);
        Ok(())
    }

    /// Drop one subscription. The requestor schedules its own removal
    /// when its last subscriber leaves.
    pub fn unsubscribe_from_service(&mut self, service_name: &str, subscriber: &SharedSubscriber) {
        let Some(&id) = self.requestors.get(service_name) else {
            return;
        };
        self.ctx.current_agent = id;
        if let Some(AgentEntry::Requestor(requestor)) = self.agents.get_mut(&id) {
            requestor.remove_subscriber(&mut self.ctx, subscriber);
        }
    }

    /// Resolve one named instance, delivering the result to `callback`
    /// by `timeout` at the latest.
    pub fn resolve_service_instance(
        &mut self,
        service_name: &str,
        instance_name: &str,
        timeout: Duration,
        options: DiscoveryOptions,
        callback: ResolveCallback,
    ) -> Result<()> {
        if !names::is_valid_service_name(service_name) {
            return Err(NameError::InvalidServiceName(service_name.to_string()));
        }
        if !names::is_valid_instance_name(instance_name) {
            return Err(NameError::InvalidInstanceName(instance_name.to_string()));
        }
        let resolver = ServiceInstanceResolver::new(
            service_name,
            instance_name,
            self.ctx.now + timeout,
            options,
            callback,
        );
        self.add_agent(AgentEntry::Resolver(resolver));
        Ok(())
    }

    /// Probe whether an instance name is free to claim.
    pub fn probe_service_instance(
        &mut self,
        service_name: &str,
        instance_name: &str,
        port: u16,
        options: DiscoveryOptions,
        callback: ProbeCallback,
    ) -> Result<()> {
        if !names::is_valid_service_name(service_name) {
            return Err(NameError::InvalidServiceName(service_name.to_string()));
        }
        if !names::is_valid_instance_name(instance_name) {
            return Err(NameError::InvalidInstanceName(instance_name.to_string()));
        }
        let prober = InstanceProber::new(service_name, instance_name, port, options, callback);
        self.add_agent(AgentEntry::Prober(prober));
        Ok(())
    }

    // ── Local publications ───────────────────────────────────────────

    pub fn on_add_local_service_instance(&mut self, instance: ServiceInstance, from_proxy: bool) {
        let key = (instance.service_name.clone(), instance.instance_name.clone());
        self.local_instances.insert(
            key,
            LocalInstance {
                instance: instance.clone(),
                from_proxy,
            },
        );
        self.for_each_agent(|agent, ctx| {
            agent.on_add_local_service_instance(ctx, &instance, from_proxy);
        });
    }

    pub fn on_change_local_service_instance(
        &mut self,
        instance: ServiceInstance,
        from_proxy: bool,
    ) {
        let key = (instance.service_name.clone(), instance.instance_name.clone());
        self.local_instances.insert(
            key,
            LocalInstance {
                instance: instance.clone(),
                from_proxy,
            },
        );
        self.for_each_agent(|agent, ctx| {
            agent.on_change_local_service_instance(ctx, &instance, from_proxy);
        });
    }

    pub fn on_remove_local_service_instance(
        &mut self,
        service_name: &str,
        instance_name: &str,
        from_proxy: bool,
    ) {
        self.local_instances
            .remove(&(service_name.to_string(), instance_name.to_string()));
        self.for_each_agent(|agent, ctx| {
            agent.on_remove_local_service_instance(ctx, service_name, instance_name, from_proxy);
        });
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Deliver one decoded inbound message: every record to every
    /// agent, then one end-of-message pass so each agent coalesces its
    /// notifications.
    pub fn receive_message(&mut self, records: &[(Resource, Section)], sender: ReplyAddress) {
        self.for_each_agent(|agent, ctx| {
            for (resource, section) in records {
                agent.receive_resource(ctx, resource, *section, &sender);
            }
            agent.end_of_message(ctx);
        });
    }

    // ── Clock ────────────────────────────────────────────────────────

    /// Advance the clock, running every task and renewal due at or
    /// before `now`. The clock steps through each task's due time, so
    /// a task that reschedules itself within the window runs again in
    /// the same advance.
    pub fn advance_to(&mut self, now: Instant) {
        let target = if now > self.ctx.now { now } else { self.ctx.now };
        loop {
            let Some(task) = self.ctx.tasks.peek() else {
                break;
            };
            if task.when > target {
                break;
            }
            if task.when > self.ctx.now {
                self.ctx.now = task.when;
            }
            let task = self.ctx.tasks.pop().unwrap();
            match task.kind {
                TaskKind::Wake => {
                    self.ctx.current_agent = task.agent;
                    if let Some(entry) = self.agents.get_mut(&task.agent) {
                        entry.as_agent_mut().wake(&mut self.ctx);
                    }
                }
                TaskKind::Remove => self.remove_agent(task.agent),
            }
        }
        self.ctx.now = target;
        self.run_renewals();
    }

    /// Advance the clock by a delta. Test convenience.
    pub fn advance(&mut self, by: Duration) {
        let now = self.ctx.now + by;
        self.advance_to(now);
    }

    pub fn now(&self) -> Instant {
        self.ctx.now
    }

    /// Earliest time [`advance_to`](AgentHost::advance_to) has work to
    /// do, for the embedding's timer.
    pub fn next_wake(&self) -> Option<Instant> {
        let task = self.ctx.tasks.peek().map(|task| task.when);
        let renewal = self.ctx.renewer.next_due();
        match (task, renewal) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Drain queued outbound messages for the transport.
    pub fn take_outbound(&mut self) -> Vec<OutboundMessage> {
        mem::take(&mut self.ctx.outbound)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn add_agent(&mut self, entry: AgentEntry) -> AgentId {
        self.next_agent_id += 1;
        let id = self.next_agent_id;
        self.agents.insert(id, entry);
        self.ctx.current_agent = id;

        let entry = self.agents.get_mut(&id).unwrap();
        entry
            .as_agent_mut()
            .start(&mut self.ctx, &self.local_host_full_name);

        // Replay existing local publications so the new agent sees the
        // same world as one started earlier.
        let replays: Vec<(ServiceInstance, bool)> = self
            .local_instances
            .values()
            .map(|local| (local.instance.clone(), local.from_proxy))
            .collect();
        for (instance, from_proxy) in replays {
            if let Some(entry) = self.agents.get_mut(&id) {
                self.ctx.current_agent = id;
                entry
                    .as_agent_mut()
                    .on_add_local_service_instance(&mut self.ctx, &instance, from_proxy);
            }
        }
        id
    }

    fn remove_agent(&mut self, id: AgentId) {
        // A subscriber may have joined between the removal being
        // scheduled and running; if so the requestor lives on.
        if let Some(AgentEntry::Requestor(requestor)) = self.agents.get(&id) {
            if requestor.has_subscribers() {
                return;
            }
        }
        let Some(mut entry) = self.agents.remove(&id) else {
            return;
        };
        self.ctx.current_agent = id;
        entry.as_agent_mut().quit(&mut self.ctx);
        if let AgentEntry::Requestor(requestor) = &entry {
            self.requestors.remove(requestor.service_name());
        }
    }

    fn for_each_agent(&mut self, mut f: impl FnMut(&mut dyn Agent, &mut HostContext)) {
        let mut ids: Vec<AgentId> = self.agents.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.ctx.current_agent = id;
            if let Some(entry) = self.agents.get_mut(&id) {
                f(entry.as_agent_mut(), &mut self.ctx);
            }
        }
    }

    /// Run due TTL bookkeeping: re-queries go out as multicast;
    /// expirations are redelivered to the agents as TTL-zero records.
    fn run_renewals(&mut self) {
        let actions = self.ctx.renewer.process(self.ctx.now);
        for question in actions.questions {
            self.ctx.outbound.push(OutboundMessage {
                item: OutboundItem::Question(question),
                reply_address: ReplyAddress::multicast(Media::Both, IpVersions::Both),
            });
        }
        if actions.expirations.is_empty() {
            return;
        }
        let records: Vec<(Resource, Section)> = actions
            .expirations
            .into_iter()
            .map(|resource| (resource, Section::Answer))
            .collect();
        self.receive_message(&records, ReplyAddress::internal());
    }
}
