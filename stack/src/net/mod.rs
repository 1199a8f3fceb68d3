/// Link-layer core of the network stack.
///
/// Architecture:
///   Ethernet MAC driver (raw frames)
///       ↓ ↑  EthernetDriver
///   eth: EtherType dispatch, output address resolution, link watch
///       ↓ ↑
///   arp: per-interface IPv4 -> MAC cache
///       ↓ ↑  IpInput / Nd6Resolver
///   IPv4 / IPv6 layers (outside this crate)
///
/// Wire types (addresses, EtherTypes, ARP packet accessors) come from
/// `smoltcp::wire`.
use core::fmt;
use smoltcp::wire::{EthernetAddress, EthernetProtocol};
#[cfg(feature = "ip6")]
use smoltcp::wire::Ipv6Address;

use crate::isr::IsrError;
use crate::netbuf::NetBuf;
use crate::timer::TimerError;

pub mod arp;
pub mod eth;
pub mod mock_device;
pub mod netif;

#[cfg(test)]
pub(crate) mod testing;

pub use netif::{NetIf, NetIfFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// Buffer pool or heap exhausted.
    NoMemory,
    InvalidPacket,
    /// Address not valid for the operation (e.g. joining a unicast group).
    InvalidAddress,
    /// The Ethernet layer of the interface is not up.
    NotInitialized,
    /// No link-layer address and no way to get one.
    Unresolved,
    Driver,
    Isr(IsrError),
    Timer(TimerError),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::NoMemory => write!(f, "out of packet buffers"),
            NetError::InvalidPacket => write!(f, "invalid packet"),
            NetError::InvalidAddress => write!(f, "invalid address"),
            NetError::NotInitialized => write!(f, "interface not initialized"),
            NetError::Unresolved => write!(f, "link-layer address unresolved"),
            NetError::Driver => write!(f, "driver error"),
            NetError::Isr(e) => write!(f, "isr: {}", e),
            NetError::Timer(e) => write!(f, "timer: {}", e),
        }
    }
}

impl From<IsrError> for NetError {
    fn from(e: IsrError) -> Self {
        NetError::Isr(e)
    }
}

impl From<TimerError> for NetError {
    fn from(e: TimerError) -> Self {
        NetError::Timer(e)
    }
}

/// Ethernet MAC driver as seen by the stack.
pub trait EthernetDriver: Send + Sync {
    /// Prepend an Ethernet header and transmit `packet`.
    fn output(
        &self,
        ethertype: EthernetProtocol,
        dest: EthernetAddress,
        packet: NetBuf,
    ) -> Result<(), NetError>;

    fn hw_addr(&self) -> EthernetAddress;

    fn set_hw_addr(&self, addr: EthernetAddress) -> Result<(), NetError>;

    fn is_connected(&self) -> bool;

    /// Accept frames sent to a multicast MAC. Drivers without filtering
    /// receive everything and can ignore this.
    fn multicast_join(&self, _addr: EthernetAddress) {}

    fn multicast_leave(&self, _addr: EthernetAddress) {}
}

/// Upper-layer receive hooks. Payloads arrive with the Ethernet header
/// stripped.
pub trait IpInput: Send + Sync {
    fn ip4_input(&self, netif: &NetIf, packet: NetBuf);

    fn ip6_input(&self, _netif: &NetIf, packet: NetBuf) {
        drop(packet);
    }
}

/// IPv6 neighbor discovery, consulted for unicast IPv6 output.
#[cfg(feature = "ip6")]
pub trait Nd6Resolver: Send + Sync {
    fn lookup(&self, netif: &NetIf, addr: &Ipv6Address) -> Option<EthernetAddress>;

    /// Take ownership of `packet` and send it once `addr` resolves.
    fn resolve(&self, netif: &NetIf, addr: Ipv6Address, packet: NetBuf);
}
