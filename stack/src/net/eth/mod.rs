/// Ethernet layer: EtherType dispatch, destination MAC selection for
/// outbound IP and link-state tracking.
///
/// Inbound frames are matched against a static protocol table. Outbound IPv4
/// goes to the broadcast MAC, a mapped multicast MAC or through ARP; IPv6
/// uses the mapped multicast MAC or the neighbor-discovery resolver. A timer
/// polls the driver's link flag and re-announces our address whenever the
/// link comes back.
use smoltcp::wire::{EthernetAddress, EthernetFrame, EthernetProtocol, Ipv4Address};
#[cfg(feature = "ip6")]
use smoltcp::wire::Ipv6Address;
use spin::Mutex;

use super::arp::ArpState;
use super::{NetError, NetIf, NetIfFlags};
use crate::config::ETH_LINK_POLL_MS;
use crate::netbuf::NetBuf;
use crate::timer::TimerHandle;


/// Destination MAC, source MAC, EtherType.
pub const ETH_HEADER_LEN: usize = 6 + 6 + 2;

static_assertions::const_assert_eq!(ETH_HEADER_LEN, 14);

/// Per-interface Ethernet state.
pub(crate) struct EthState {
    pub(crate) arp: ArpState,
    link_timer: Mutex<Option<TimerHandle>>,
}

impl EthState {
    pub(crate) fn new(arp: ArpState) -> Self {
        Self {
            arp,
            link_timer: Mutex::new(None),
        }
    }
}

struct EthProtocol {
    ethertype: EthernetProtocol,
    input: fn(&NetIf, NetBuf),
}

#[cfg(feature = "ip6")]
static PROTOCOLS: &[EthProtocol] = &[
    EthProtocol {
        ethertype: EthernetProtocol::Arp,
        input: NetIf::arp_input,
    },
    EthProtocol {
        ethertype: EthernetProtocol::Ipv4,
        input: ip4_input,
    },
    EthProtocol {
        ethertype: EthernetProtocol::Ipv6,
        input: ip6_input,
    },
];

#[cfg(not(feature = "ip6"))]
static PROTOCOLS: &[EthProtocol] = &[
    EthProtocol {
        ethertype: EthernetProtocol::Arp,
        input: NetIf::arp_input,
    },
    EthProtocol {
        ethertype: EthernetProtocol::Ipv4,
        input: ip4_input,
    },
];

fn ip4_input(netif: &NetIf, packet: NetBuf) {
    match netif.upper() {
        Some(upper) => upper.ip4_input(netif, packet),
        None => log::trace!(target: "eth", "[eth] no IPv4 input, dropped"),
    }
}

#[cfg(feature = "ip6")]
fn ip6_input(netif: &NetIf, packet: NetBuf) {
    match netif.upper() {
        Some(upper) => upper.ip6_input(netif, packet),
        None => log::trace!(target: "eth", "[eth] no IPv6 input, dropped"),
    }
}

/// `01:00:5E` followed by the low 23 bits of the group address.
pub fn ip4_multicast_mac(group: Ipv4Address) -> EthernetAddress {
    let b = group.0;
    EthernetAddress([0x01, 0x00, 0x5E, b[1] & 0x7F, b[2], b[3]])
}

/// `33:33` followed by the low 32 bits of the group address.
#[cfg(feature = "ip6")]
pub fn ip6_multicast_mac(group: &Ipv6Address) -> EthernetAddress {
    let b = group.0;
    EthernetAddress([0x33, 0x33, b[12], b[13], b[14], b[15]])
}

impl NetIf {
    fn eth_ready(&self) -> Result<(), NetError> {
        if self.flags().contains(NetIfFlags::ETH_READY) {
            Ok(())
        } else {
            Err(NetError::NotInitialized)
        }
    }

    /// Record the link state, bring ARP up and start the link watcher.
    pub fn eth_init(&self) -> Result<(), NetError> {
        let connected = self.driver().is_connected();
        self.set_flags(NetIfFlags::LINK_UP, connected);

        self.arp_init()?;

        let timers = self.stack().timers();
        let weak = self.weak();
        let watcher = timers.timer_new(timers.ms_to_ticks(ETH_LINK_POLL_MS), move || {
            if let Some(netif) = weak.upgrade() {
                netif.eth_link_check();
            }
        });
        match watcher {
            Ok(timer) => self.guarded(&self.eth.link_timer, |slot| *slot = Some(timer)),
            Err(e) => {
                self.arp_release();
                return Err(e.into());
            }
        }

        self.set_flags(NetIfFlags::ETH_READY, true);
        log::info!(
            target: "eth",
            "[eth] {}: {} link {}",
            self.name(),
            self.hw_addr(),
            if connected { "up" } else { "down" }
        );
        Ok(())
    }

    /// Stop the link watcher and release ARP.
    pub fn eth_release(&self) {
        if let Some(timer) = self.guarded(&self.eth.link_timer, |slot| slot.take()) {
            self.stack().timers().timer_free(timer);
        }
        self.arp_release();
        self.set_flags(NetIfFlags::ETH_READY, false);
        log::info!(target: "eth", "[eth] {}: released", self.name());
    }

    /// Driver receive path: one complete Ethernet frame.
    pub fn eth_input(&self, mut frame: NetBuf) {
        if self.eth_ready().is_err() {
            log::trace!(target: "eth", "[eth] {}: down, frame dropped", self.name());
            return;
        }

        let (dst, ethertype) = match EthernetFrame::new_checked(frame.as_slice()) {
            Ok(eth) => (eth.dst_addr(), eth.ethertype()),
            Err(_) => {
                log::trace!(target: "eth", "[eth] runt frame ({} bytes)", frame.len());
                return;
            }
        };
        if !dst.is_broadcast() && !dst.is_multicast() && dst != self.hw_addr() {
            log::trace!(target: "eth", "[eth] not for us ({})", dst);
            return;
        }

        frame.trim_front(ETH_HEADER_LEN);
        self.eth_prot_input(frame, ethertype);
    }

    /// Hand a payload to the protocol registered for `ethertype`.
    pub fn eth_prot_input(&self, frame: NetBuf, ethertype: EthernetProtocol) {
        match PROTOCOLS.iter().find(|p| p.ethertype == ethertype) {
            Some(protocol) => (protocol.input)(self, frame),
            None => log::trace!(target: "eth", "[eth] unknown ethertype {:?}", ethertype),
        }
    }

    /// Transmit a payload to a known MAC.
    pub fn eth_output(
        &self,
        ethertype: EthernetProtocol,
        dest: EthernetAddress,
        packet: NetBuf,
    ) -> Result<(), NetError> {
        self.eth_ready()?;
        self.driver().output(ethertype, dest, packet)
    }

    /// Send an IPv4 packet to the next hop `dest`.
    ///
    /// A unicast next hop that is not in the ARP cache is resolved first;
    /// the packet then leaves when the reply arrives, and `Ok` only means it
    /// was queued.
    pub fn eth_output_ip4(&self, dest: Ipv4Address, packet: NetBuf) -> Result<(), NetError> {
        self.eth_ready()?;

        if dest.is_broadcast() || self.ip4_broadcast() == Some(dest) {
            return self.eth_output(EthernetProtocol::Ipv4, EthernetAddress::BROADCAST, packet);
        }
        if dest.is_multicast() {
            return self.eth_output(EthernetProtocol::Ipv4, ip4_multicast_mac(dest), packet);
        }
        match self.arp_lookup(dest) {
            Some(mac) => self.eth_output(EthernetProtocol::Ipv4, mac, packet),
            None => self.arp_resolve(dest, packet),
        }
    }

    /// Send an IPv6 packet to the next hop `dest`.
    #[cfg(feature = "ip6")]
    pub fn eth_output_ip6(&self, dest: Ipv6Address, packet: NetBuf) -> Result<(), NetError> {
        self.eth_ready()?;

        if dest.is_multicast() {
            return self.eth_output(EthernetProtocol::Ipv6, ip6_multicast_mac(&dest), packet);
        }
        let Some(nd6) = self.nd6() else {
            log::debug!(target: "eth", "[eth] {}: no neighbor discovery for {}", self.name(), dest);
            return Err(NetError::Unresolved);
        };
        match nd6.lookup(self, &dest) {
            Some(mac) => self.eth_output(EthernetProtocol::Ipv6, mac, packet),
            None => {
                nd6.resolve(self, dest, packet);
                Ok(())
            }
        }
    }

    /// Announce our addresses with a gratuitous ARP request.
    pub fn eth_change_addr_notify(&self) {
        if self.eth_ready().is_err() {
            return;
        }
        let own_ip = self.ip4_addr();
        if own_ip.is_unspecified() {
            return;
        }
        if let Err(e) = self.arp_request(own_ip) {
            log::debug!(target: "eth", "[eth] {}: gratuitous ARP failed: {}", self.name(), e);
        }
    }

    /// Free everything queued in the Ethernet layer.
    pub fn eth_drain(&self) {
        self.arp_drain();
    }

    /// Link watcher tick: re-announce after the link comes back.
    pub(crate) fn eth_link_check(&self) {
        let connected = self.driver().is_connected();
        let was_up = self.flags().contains(NetIfFlags::LINK_UP);
        if connected == was_up {
            return;
        }
        self.set_flags(NetIfFlags::LINK_UP, connected);
        if connected {
            log::info!(target: "eth", "[eth] {}: link up", self.name());
            self.eth_change_addr_notify();
        } else {
            log::info!(target: "eth", "[eth] {}: link down", self.name());
        }
    }
}

#[cfg(feature = "multicast")]
impl NetIf {
    pub fn multicast_join_ip4(&self, group: Ipv4Address) -> Result<(), NetError> {
        if !group.is_multicast() {
            return Err(NetError::InvalidAddress);
        }
        self.driver().multicast_join(ip4_multicast_mac(group));
        Ok(())
    }

    pub fn multicast_leave_ip4(&self, group: Ipv4Address) -> Result<(), NetError> {
        if !group.is_multicast() {
            return Err(NetError::InvalidAddress);
        }
        self.driver().multicast_leave(ip4_multicast_mac(group));
        Ok(())
    }

    #[cfg(feature = "ip6")]
    pub fn multicast_join_ip6(&self, group: &Ipv6Address) -> Result<(), NetError> {
        if !group.is_multicast() {
            return Err(NetError::InvalidAddress);
        }
        self.driver().multicast_join(ip6_multicast_mac(group));
        Ok(())
    }

    #[cfg(feature = "ip6")]
    pub fn multicast_leave_ip6(&self, group: &Ipv6Address) -> Result<(), NetError> {
        if !group.is_multicast() {
            return Err(NetError::InvalidAddress);
        }
        self.driver().multicast_leave(ip6_multicast_mac(group));
        Ok(())
    }
}
