/// In-memory Ethernet driver and upper-layer stand-ins.
///
/// `MockEthernet` records every transmitted frame instead of putting it on a
/// wire; the buffer is released once recorded, as a real driver releases it
/// after DMA. Used by the unit tests and by hosted builds.
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use smoltcp::wire::{EthernetAddress, EthernetProtocol};
#[cfg(feature = "ip6")]
use smoltcp::wire::Ipv6Address;
use spin::Mutex;

use super::{EthernetDriver, IpInput, NetError, NetIf};
#[cfg(feature = "ip6")]
use super::Nd6Resolver;
use crate::netbuf::NetBuf;

/// One frame handed to `EthernetDriver::output`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub ethertype: EthernetProtocol,
    pub dest: EthernetAddress,
    pub payload: Vec<u8>,
}

pub struct MockEthernet {
    mac: Mutex<EthernetAddress>,
    connected: AtomicBool,
    fail_output: AtomicBool,
    sent: Mutex<Vec<SentFrame>>,
    groups: Mutex<Vec<EthernetAddress>>,
}

impl MockEthernet {
    /// A connected interface with hardware address `mac`.
    pub fn new(mac: EthernetAddress) -> Self {
        Self {
            mac: Mutex::new(mac),
            connected: AtomicBool::new(true),
            fail_output: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            groups: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make every following `output` fail with `NetError::Driver`.
    pub fn set_fail_output(&self, fail: bool) {
        self.fail_output.store(fail, Ordering::SeqCst);
    }

    /// Frames sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }

    /// Remove and return the frames sent so far.
    pub fn take_sent(&self) -> Vec<SentFrame> {
        core::mem::take(&mut *self.sent.lock())
    }

    /// Multicast MACs currently joined.
    pub fn groups(&self) -> Vec<EthernetAddress> {
        self.groups.lock().clone()
    }
}

impl EthernetDriver for MockEthernet {
    fn output(
        &self,
        ethertype: EthernetProtocol,
        dest: EthernetAddress,
        packet: NetBuf,
    ) -> Result<(), NetError> {
        if self.fail_output.load(Ordering::SeqCst) {
            return Err(NetError::Driver);
        }
        self.sent.lock().push(SentFrame {
            ethertype,
            dest,
            payload: packet.as_slice().to_vec(),
        });
        Ok(())
    }

    fn hw_addr(&self) -> EthernetAddress {
        *self.mac.lock()
    }

    fn set_hw_addr(&self, addr: EthernetAddress) -> Result<(), NetError> {
        if addr.is_multicast() {
            return Err(NetError::InvalidPacket);
        }
        *self.mac.lock() = addr;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn multicast_join(&self, addr: EthernetAddress) {
        self.groups.lock().push(addr);
    }

    fn multicast_leave(&self, addr: EthernetAddress) {
        let mut groups = self.groups.lock();
        if let Some(pos) = groups.iter().position(|g| *g == addr) {
            groups.remove(pos);
        }
    }
}

/// Which upper-layer hook received a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// Upper layer that records the payloads it is given.
#[derive(Default)]
pub struct RecordingIpInput {
    received: Mutex<Vec<(IpVersion, Vec<u8>)>>,
}

impl RecordingIpInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<(IpVersion, Vec<u8>)> {
        self.received.lock().clone()
    }
}

impl IpInput for RecordingIpInput {
    fn ip4_input(&self, _netif: &NetIf, packet: NetBuf) {
        self.received.lock().push((IpVersion::V4, packet.as_slice().to_vec()));
    }

    fn ip6_input(&self, _netif: &NetIf, packet: NetBuf) {
        self.received.lock().push((IpVersion::V6, packet.as_slice().to_vec()));
    }
}

/// Neighbor cache with fixed contents; misses are queued for inspection.
#[cfg(feature = "ip6")]
#[derive(Default)]
pub struct StaticNd6 {
    neighbors: Mutex<Vec<(Ipv6Address, EthernetAddress)>>,
    queued: Mutex<Vec<(Ipv6Address, Vec<u8>)>>,
}

#[cfg(feature = "ip6")]
impl StaticNd6 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, addr: Ipv6Address, mac: EthernetAddress) {
        self.neighbors.lock().push((addr, mac));
    }

    /// Packets handed over for resolution.
    pub fn queued(&self) -> Vec<(Ipv6Address, Vec<u8>)> {
        self.queued.lock().clone()
    }
}

#[cfg(feature = "ip6")]
impl Nd6Resolver for StaticNd6 {
    fn lookup(&self, _netif: &NetIf, addr: &Ipv6Address) -> Option<EthernetAddress> {
        self.neighbors
            .lock()
            .iter()
            .find(|(ip, _)| ip == addr)
            .map(|(_, mac)| *mac)
    }

    fn resolve(&self, _netif: &NetIf, addr: Ipv6Address, packet: NetBuf) {
        self.queued.lock().push((addr, packet.as_slice().to_vec()));
    }
}
