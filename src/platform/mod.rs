//! OS collaborator boundaries: firewall rules and loopback-cable
//! provisioning.
//!
//! The engine consults these before binding a listening port and before
//! the first render. Failures here are user-actionable conditions (grant a
//! permission, install a driver), never fatal engine errors, so both traits
//! ship permissive defaults.

use crate::error::Result;

/// IP protocol a firewall rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpProtocol::Tcp => write!(f, "TCP"),
            IpProtocol::Udp => write!(f, "UDP"),
        }
    }
}

/// Host firewall interface, queried before binding the listener.
pub trait FirewallPolicy: Send + Sync {
    fn is_port_allowed(&self, port: u16, protocol: IpProtocol) -> bool;
    fn add_rule(&self, port: u16, protocol: IpProtocol) -> Result<()>;
}

/// Virtual audio cable provisioning, invoked before the first render.
pub trait LoopbackProvisioner: Send + Sync {
    /// Ensure a loopback cable device exists. Returns whether one is
    /// available; `false` means rendering falls back to the default
    /// output device.
    fn ensure_loopback_device(&self) -> bool;
}

/// Default policy: assume the port is reachable and let the bind fail if
/// it is not.
pub struct AllowAllFirewall;

impl FirewallPolicy for AllowAllFirewall {
    fn is_port_allowed(&self, _port: u16, _protocol: IpProtocol) -> bool {
        true
    }

    fn add_rule(&self, _port: u16, _protocol: IpProtocol) -> Result<()> {
        Ok(())
    }
}

/// Default provisioner: never installs anything; the device provider still
/// picks up a cable if one is already present.
pub struct NoProvisioner;

impl LoopbackProvisioner for NoProvisioner {
    fn ensure_loopback_device(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive() {
        assert!(AllowAllFirewall.is_port_allowed(55_555, IpProtocol::Tcp));
        assert!(AllowAllFirewall.add_rule(55_555, IpProtocol::Tcp).is_ok());
        assert!(!NoProvisioner.ensure_loopback_device());
    }

    #[test]
    fn protocol_display() {
        assert_eq!(IpProtocol::Tcp.to_string(), "TCP");
        assert_eq!(IpProtocol::Udp.to_string(), "UDP");
    }
}
