//! DNS resource data model consumed by the agents.
//!
//! These are populate-only types: the engine fills record fields and
//! hands them to the transport. Encoding and parsing the wire format
//! belongs to the external codec, never to this crate.

use std::net::{Ipv4Addr, Ipv6Addr};

/// Record kinds the engine works with. `Any` appears only in probe
/// questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsType {
    Ptr,
    Srv,
    Txt,
    A,
    Aaaa,
    Any,
}

/// Message section a record was seen in, or should be sent in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Answer,
    Authority,
    Additional,
}

/// An outbound question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub dns_type: DnsType,
}

/// One resource record, as decoded by the external codec.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    /// Seconds. Zero signals immediate removal in mDNS usage, not
    /// "expired".
    pub time_to_live: u32,
    pub data: ResourceData,
}

/// Record payload by kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceData {
    Ptr {
        pointer_domain_name: String,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        /// Target host full name, e.g. `"host.local."`.
        target: String,
    },
    Txt {
        strings: Vec<Vec<u8>>,
    },
    A {
        address: Ipv4Addr,
    },
    Aaaa {
        address: Ipv6Addr,
    },
}

impl Resource {
    pub fn dns_type(&self) -> DnsType {
        match self.data {
            ResourceData::Ptr { .. } => DnsType::Ptr,
            ResourceData::Srv { .. } => DnsType::Srv,
            ResourceData::Txt { .. } => DnsType::Txt,
            ResourceData::A { .. } => DnsType::A,
            ResourceData::Aaaa { .. } => DnsType::Aaaa,
        }
    }

    pub fn ptr(
        service_full_name: impl Into<String>,
        instance_full_name: impl Into<String>,
        time_to_live: u32,
    ) -> Self {
        Self {
            name: service_full_name.into(),
            time_to_live,
            data: ResourceData::Ptr {
                pointer_domain_name: instance_full_name.into(),
            },
        }
    }

    pub fn srv(
        name: impl Into<String>,
        time_to_live: u32,
        priority: u16,
        weight: u16,
        port: u16,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            time_to_live,
            data: ResourceData::Srv {
                priority,
                weight,
                port,
                target: target.into(),
            },
        }
    }

    pub fn txt(name: impl Into<String>, time_to_live: u32, strings: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            time_to_live,
            data: ResourceData::Txt { strings },
        }
    }

    pub fn a(name: impl Into<String>, time_to_live: u32, address: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            time_to_live,
            data: ResourceData::A { address },
        }
    }

    pub fn aaaa(name: impl Into<String>, time_to_live: u32, address: Ipv6Addr) -> Self {
        Self {
            name: name.into(),
            time_to_live,
            data: ResourceData::Aaaa { address },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_type_follows_data_variant() {
        assert_eq!(
            Resource::ptr("_http._tcp.local.", "x._http._tcp.local.", 120).dns_type(),
            DnsType::Ptr
        );
        assert_eq!(
            Resource::srv("x._http._tcp.local.", 120, 0, 0, 80, "host.local.").dns_type(),
            DnsType::Srv
        );
        assert_eq!(
            Resource::txt("x._http._tcp.local.", 120, vec![]).dns_type(),
            DnsType::Txt
        );
        assert_eq!(
            Resource::a("host.local.", 120, Ipv4Addr::LOCALHOST).dns_type(),
            DnsType::A
        );
        assert_eq!(
            Resource::aaaa("host.local.", 120, Ipv6Addr::LOCALHOST).dns_type(),
            DnsType::Aaaa
        );
    }
}
