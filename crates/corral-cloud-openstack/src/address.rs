//! Public address resolution

use crate::api::Addresses;
use corral_cloud::{CloudError, Result};

const PUBLIC_NETWORK: &str = "public";

/// Pick the address a server should be reached on.
///
/// Prefers the first IPv4 address on the `public` network. Some clouds
/// (HP Cloud, Canonistack) list the public address second on the private
/// network instead. Failing both, the private address is used on the
/// assumption that it is routable from the client.
pub fn instance_address(addresses: &Addresses) -> Result<String> {
    let mut public = None;
    let mut private = None;
    let mut private_net = None;

    for (network, ips) in addresses {
        if let Some(ip) = ips.iter().find(|ip| ip.version == 4) {
            if network == PUBLIC_NETWORK {
                public = Some(ip.addr.clone());
            } else {
                private_net = Some(network);
                private = Some(ip.addr.clone());
            }
        }
    }

    if public.is_none() {
        public = private_net
            .and_then(|net| addresses.get(net))
            .and_then(|ips| ips.get(1))
            .filter(|ip| ip.version == 4)
            .map(|ip| ip.addr.clone());
    }

    public.or(private).ok_or(CloudError::NoDnsName)
}
