use ipnet::{IpNet, Ipv4Net};
use std::net::{IpAddr, Ipv4Addr};

/// Number of scannable host addresses in a network.
///
/// IPv4 networks larger than /31 exclude the network and broadcast address;
/// /31 and /32 count every address. IPv6 counts every address.
pub fn host_count(net: &IpNet) -> u128 {
    match net {
        IpNet::V4(n4) => {
            let size = 1u128 << (32 - u32::from(n4.prefix_len()));
            if size > 2 {
                size - 2
            } else {
                size
            }
        }
        IpNet::V6(n6) => {
            let bits = 128 - u32::from(n6.prefix_len());
            if bits >= 128 {
                u128::MAX
            } else {
                1u128 << bits
            }
        }
    }
}

/// Expand a CIDR into individual host addresses.
///
/// For IPv4, excludes the network and broadcast addresses when the prefix
/// leaves room for them. Callers must bound the size with [`host_count`] first.
pub fn expand_cidr_to_ips(cidr: IpNet) -> Vec<IpAddr> {
    match cidr.trunc() {
        IpNet::V4(n4) => expand_ipv4net_hosts(n4).into_iter().map(IpAddr::V4).collect(),
        IpNet::V6(n6) => n6.hosts().map(IpAddr::V6).collect(),
    }
}

/// The /24 network containing `ip`.
pub fn enclosing_v4_24(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    // A /24 prefix length is always in range, so the fallback is never taken.
    Ipv4Net::new(Ipv4Addr::new(o[0], o[1], o[2], 0), 24).unwrap_or_else(|_| Ipv4Net::from(ip))
}

fn expand_ipv4net_hosts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if net.prefix_len() >= 31 {
        return (start..=end).map(Ipv4Addr::from).collect();
    }
    (start + 1..end).map(Ipv4Addr::from).collect()
}
