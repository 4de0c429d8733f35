//! Multicast-DNS service-discovery resolution engine.
//!
//! The engine is a deterministic, transport-free core ([`AgentHost`])
//! with an async embedding ([`MdnsDriver`]). Protocol behavior lives
//! in three agents: [`InstanceRequestor`] for continuous discovery of
//! a service type, [`ServiceInstanceResolver`] for one-shot resolution
//! of a named instance, and [`InstanceProber`] for name-conflict
//! probing before publication. Wire encoding and socket handling are
//! left to the embedding.

pub mod agent;
pub mod driver;
pub mod events;
pub mod host;
pub mod prober;
pub mod requestor;
pub mod resolver;
pub mod resource;

mod renewer;

pub use agent::{Agent, Host};
pub use driver::MdnsDriver;
pub use events::{ChannelSubscriber, InstanceEvent, SharedSubscriber, Subscriber};
pub use host::{AgentHost, DiscoveryOptions, OutboundItem, OutboundMessage};
pub use prober::{InstanceProber, ProbeCallback};
pub use requestor::InstanceRequestor;
pub use resolver::{ResolveCallback, ServiceInstanceResolver};
pub use resource::{DnsType, Question, Resource, ResourceData, Section};

pub use shoal_common::error::NameError;
pub use shoal_common::types::{
    HostAddress, IpVersions, Media, ReplyAddress, ServiceInstance,
};
