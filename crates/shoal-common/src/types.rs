use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

// ── Media / IP versions ──────────────────────────────────────────────

/// Transport medium a message arrived on, or a filter over media.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Media {
    Wired,
    Wireless,
    #[default]
    Both,
}

impl Media {
    /// `Both` matches everything; concrete media match themselves.
    pub fn matches(self, other: Media) -> bool {
        self == Media::Both || other == Media::Both || self == other
    }
}

/// IP version a message arrived over, or a filter over versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersions {
    V4,
    V6,
    #[default]
    Both,
}

impl IpVersions {
    /// `Both` matches everything; concrete versions match themselves.
    pub fn matches(self, other: IpVersions) -> bool {
        self == IpVersions::Both || other == IpVersions::Both || self == other
    }
}

// ── ReplyAddress ─────────────────────────────────────────────────────

/// Where a message came from, or where one should go: the sender's
/// socket address, the local address it arrived on, the receiving
/// interface, and the medium. Outbound multicast sends use the
/// [`multicast`](ReplyAddress::multicast) constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyAddress {
    pub socket_address: SocketAddr,
    pub local_address: IpAddr,
    pub interface_id: u32,
    pub media: Media,
    pub ip_versions: IpVersions,
}

/// The well-known mDNS IPv4 multicast endpoint.
const MDNS_MULTICAST_V4: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 251), 5353);

impl ReplyAddress {
    /// A multicast placeholder address carrying the given filters. The
    /// transport expands this to the per-interface multicast sends.
    pub fn multicast(media: Media, ip_versions: IpVersions) -> Self {
        Self {
            socket_address: SocketAddr::V4(MDNS_MULTICAST_V4),
            local_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            interface_id: 0,
            media,
            ip_versions,
        }
    }

    /// Matches every agent filter. Used for records the engine
    /// synthesizes itself (TTL expirations), which must never be
    /// dropped by a media or ip-version check.
    pub fn internal() -> Self {
        Self::multicast(Media::Both, IpVersions::Both)
    }

    pub fn matches_media(&self, media: Media) -> bool {
        self.media.matches(media)
    }

    pub fn matches_ip_versions(&self, ip_versions: IpVersions) -> bool {
        self.ip_versions.matches(ip_versions)
    }
}

// ── HostAddress ──────────────────────────────────────────────────────

/// A cache-internal host address: a bare IP plus the interface it was
/// learned on. Ordered, so target caches can hold a set of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddress {
    pub address: IpAddr,
    pub interface_id: u32,
}

impl HostAddress {
    pub fn new(address: IpAddr, interface_id: u32) -> Self {
        Self {
            address,
            interface_id,
        }
    }

    /// Combine with a service port into the socket address reported to
    /// subscribers. The interface id rides along as the v6 scope.
    pub fn to_socket_address(self, port: u16) -> SocketAddr {
        match self.address {
            IpAddr::V4(address) => SocketAddr::V4(SocketAddrV4::new(address, port)),
            IpAddr::V6(address) => {
                SocketAddr::V6(SocketAddrV6::new(address, port, 0, self.interface_id))
            }
        }
    }

    /// The inverse: strip the port, recover the scope where present.
    pub fn from_socket_address(address: SocketAddr) -> Self {
        let interface_id = match address {
            SocketAddr::V6(v6) => v6.scope_id(),
            SocketAddr::V4(_) => 0,
        };
        Self {
            address: address.ip(),
            interface_id,
        }
    }
}

// ── ServiceInstance ──────────────────────────────────────────────────

/// A service instance as known to the engine.
///
/// Used in subscriber events, resolver results, and local-publication
/// notifications. This is THE instance representation across the
/// engine. `addresses` carry the service port; `target` is the host
/// short name the instance's SRV record points at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_name: String,
    pub instance_name: String,
    pub target: String,
    pub port: u16,
    #[serde(default)]
    pub addresses: Vec<SocketAddr>,
    #[serde(default)]
    pub text: Vec<Vec<u8>>,
    #[serde(default)]
    pub srv_priority: u16,
    #[serde(default)]
    pub srv_weight: u16,
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_both_matches_everything() {
        assert!(Media::Both.matches(Media::Wired));
        assert!(Media::Wireless.matches(Media::Both));
        assert!(Media::Wired.matches(Media::Wired));
        assert!(!Media::Wired.matches(Media::Wireless));
    }

    #[test]
    fn ip_versions_both_matches_everything() {
        assert!(IpVersions::Both.matches(IpVersions::V4));
        assert!(IpVersions::V6.matches(IpVersions::Both));
        assert!(!IpVersions::V4.matches(IpVersions::V6));
    }

    #[test]
    fn internal_reply_address_matches_every_filter() {
        let address = ReplyAddress::internal();
        for media in [Media::Wired, Media::Wireless, Media::Both] {
            assert!(address.matches_media(media));
        }
        for versions in [IpVersions::V4, IpVersions::V6, IpVersions::Both] {
            assert!(address.matches_ip_versions(versions));
        }
    }

    #[test]
    fn host_address_v4_socket_round_trip() {
        let address = HostAddress::new("192.168.1.10".parse().unwrap(), 3);
        let socket = address.to_socket_address(8080);
        assert_eq!(socket, "192.168.1.10:8080".parse().unwrap());
        // v4 sockets have nowhere to carry the interface.
        assert_eq!(HostAddress::from_socket_address(socket).interface_id, 0);
    }

    #[test]
    fn host_address_v6_carries_scope() {
        let address = HostAddress::new("fe80::1".parse().unwrap(), 7);
        let socket = address.to_socket_address(443);
        match socket {
            SocketAddr::V6(v6) => {
                assert_eq!(v6.scope_id(), 7);
                assert_eq!(v6.port(), 443);
            }
            SocketAddr::V4(_) => panic!("expected a v6 socket address"),
        }
        assert_eq!(HostAddress::from_socket_address(socket), address);
    }

    #[test]
    fn service_instance_serde_round_trip() {
        let instance = ServiceInstance {
            service_name: "_http._tcp.".into(),
            instance_name: "My Printer".into(),
            target: "printer-host".into(),
            port: 8080,
            addresses: vec!["192.168.1.10:8080".parse().unwrap()],
            text: vec![b"version=2.1".to_vec()],
            srv_priority: 1,
            srv_weight: 5,
        };
        let json = serde_json::to_string(&instance).unwrap();
        let decoded: ServiceInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, instance);
    }

    #[test]
    fn media_serializes_to_lowercase() {
        assert_eq!(serde_json::to_value(Media::Wired).unwrap(), "wired");
        assert_eq!(serde_json::to_value(IpVersions::Both).unwrap(), "both");
    }
}
