/// Shared fixture for the ARP and Ethernet tests: a stack on mock hardware
/// with one interface on a mock Ethernet driver.
use alloc::sync::Arc;
use alloc::vec::Vec;
use smoltcp::wire::{
    ArpHardware, ArpOperation, ArpPacket, EthernetAddress, EthernetProtocol, Ipv4Address,
};

use super::arp::ARP_HEADER_LEN;
use super::mock_device::MockEthernet;
use super::NetIf;
use crate::config::StackConfig;
use crate::netbuf::{NetBuf, NetBufPool};
use crate::platform::mock::{MockCpu, MockTicker};
use crate::stack::Stack;

pub const OUR_MAC: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 0x01]);
pub const PEER_MAC: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 0x02]);
pub const OUR_IP: Ipv4Address = Ipv4Address([10, 0, 0, 1]);
pub const PEER_IP: Ipv4Address = Ipv4Address([10, 0, 0, 2]);
pub const NETMASK: Ipv4Address = Ipv4Address([255, 255, 255, 0]);

pub struct Rig {
    pub stack: Stack,
    pub driver: Arc<MockEthernet>,
    pub pool: NetBufPool,
    pub netif: Arc<NetIf>,
}

impl Rig {
    /// Interface up, addressed as `OUR_IP/24`, with the announcement
    /// already consumed from the driver.
    pub fn new() -> Self {
        let rig = Self::unaddressed();
        rig.netif.set_ip4_addr(OUR_IP, NETMASK);
        rig.driver.take_sent();
        rig
    }

    /// Interface up, no IPv4 address yet.
    pub fn unaddressed() -> Self {
        let stack = Stack::init(
            Arc::new(MockCpu::default()),
            Arc::new(MockTicker::new()),
            &StackConfig::default(),
        )
        .unwrap();
        let driver = Arc::new(MockEthernet::new(OUR_MAC));
        let pool = NetBufPool::new(16);
        let netif = NetIf::new("eth0", stack.clone(), driver.clone(), pool.clone());
        netif.eth_init().unwrap();
        Self {
            stack,
            driver,
            pool,
            netif,
        }
    }

    /// Deliver `n` hardware ticks.
    pub fn tick(&self, n: u32) {
        for _ in 0..n {
            self.stack.isr().isr_handler(self.stack.timer_vector());
        }
    }

    /// An IPv4 payload of `len` bytes filled with `fill`.
    pub fn packet(&self, len: usize, fill: u8) -> NetBuf {
        let mut buf = self.pool.alloc(len).unwrap();
        buf.as_mut_slice().fill(fill);
        buf
    }

    pub fn arp_frame(
        &self,
        operation: ArpOperation,
        sender: (EthernetAddress, Ipv4Address),
        target: (EthernetAddress, Ipv4Address),
    ) -> NetBuf {
        self.pool
            .from_slice(&arp_bytes(operation, sender, target))
            .unwrap()
    }
}

/// A 28-byte Ethernet/IPv4 ARP packet.
pub fn arp_bytes(
    operation: ArpOperation,
    sender: (EthernetAddress, Ipv4Address),
    target: (EthernetAddress, Ipv4Address),
) -> Vec<u8> {
    let mut bytes = alloc::vec![0u8; ARP_HEADER_LEN];
    let mut packet = ArpPacket::new_unchecked(&mut bytes[..]);
    packet.set_hardware_type(ArpHardware::Ethernet);
    packet.set_protocol_type(EthernetProtocol::Ipv4);
    packet.set_hardware_len(6);
    packet.set_protocol_len(4);
    packet.set_operation(operation);
    packet.set_source_hardware_addr(sender.0.as_bytes());
    packet.set_source_protocol_addr(sender.1.as_bytes());
    packet.set_target_hardware_addr(target.0.as_bytes());
    packet.set_target_protocol_addr(target.1.as_bytes());
    bytes
}

/// Prepend an Ethernet header.
pub fn eth_frame(dst: EthernetAddress, src: EthernetAddress, ethertype: EthernetProtocol, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(dst.as_bytes());
    frame.extend_from_slice(src.as_bytes());
    frame.extend_from_slice(&u16::from(ethertype).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}
