//! Endpoint discovery per transport profile
//!
//! The native fabric profile needs a device whose first port is bound to a
//! network interface with an address. `tcp` and `shm` always run against
//! loopback.

use crate::client::{TransportProfile, TransportSelection};
use std::net::IpAddr;
use std::path::Path;

/// Where a profile's run should point its server and clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Available {
        address: IpAddr,
        /// Fabric device the address was discovered through
        device: Option<String>,
    },
    Unavailable {
        reason: String,
    },
}

/// Resolve the endpoint for `selection`. Never fails: a missing device
/// yields [`Endpoint::Unavailable`].
pub fn discover(selection: &TransportSelection, sysfs_root: &Path) -> Endpoint {
    match selection.profile {
        TransportProfile::Tcp | TransportProfile::Shm => Endpoint::Available {
            address: IpAddr::from([127, 0, 0, 1]),
            device: None,
        },
        TransportProfile::Rdma => {
            match find_fabric_device(sysfs_root, selection.device_filter(), interface_address) {
                Some((device, address)) => Endpoint::Available {
                    address,
                    device: Some(device),
                },
                None => Endpoint::Unavailable {
                    reason: "no usable RDMA device".to_string(),
                },
            }
        }
    }
}

/// Walk `<sysfs_root>/class/infiniband/*` and return the first device whose
/// port 1 netdev resolves to an address through `lookup`.
pub fn find_fabric_device<F>(
    sysfs_root: &Path,
    filter: Option<&str>,
    lookup: F,
) -> Option<(String, IpAddr)>
where
    F: Fn(&str) -> Option<IpAddr>,
{
    let class_dir = sysfs_root.join("class").join("infiniband");
    let entries = match std::fs::read_dir(&class_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Cannot read {}: {}", class_dir.display(), e);
            return None;
        }
    };

    let mut devices: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| filter.map_or(true, |f| name.contains(f)))
        .collect();
    devices.sort();

    for device in devices {
        let ndev_path = class_dir
            .join(&device)
            .join("ports/1/gid_attrs/ndevs/0");
        let netdev = match std::fs::read_to_string(&ndev_path) {
            Ok(content) => content.lines().next().unwrap_or("").trim().to_string(),
            Err(_) => continue,
        };
        if netdev.is_empty() {
            continue;
        }
        if let Some(address) = lookup(&netdev) {
            tracing::info!("Fabric device {} via {} <{}>", device, netdev, address);
            return Some((device, address));
        }
        tracing::debug!("Device {} netdev {} has no address", device, netdev);
    }
    None
}

/// First IPv4 address of `ifname`, else its first IPv6 address
pub fn interface_address(ifname: &str) -> Option<IpAddr> {
    let addrs = nix::ifaddrs::getifaddrs().ok()?;

    let mut v4 = None;
    let mut v6 = None;
    for ifaddr in addrs.filter(|a| a.interface_name == ifname) {
        let Some(storage) = ifaddr.address else {
            continue;
        };
        if let Some(sin) = storage.as_sockaddr_in() {
            if v4.is_none() {
                v4 = Some(IpAddr::V4(*std::net::SocketAddrV4::from(*sin).ip()));
            }
        } else if let Some(sin6) = storage.as_sockaddr_in6() {
            if v6.is_none() {
                v6 = Some(IpAddr::V6(*std::net::SocketAddrV6::from(*sin6).ip()));
            }
        }
    }
    v4.or(v6)
}
