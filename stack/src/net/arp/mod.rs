/// ARP (RFC 826) for Ethernet/IPv4.
///
/// Each interface owns a small `ArpCache`. Outbound IPv4 packets whose
/// next hop is unknown wait in the cache (one per address) while a request is
/// broadcast; the reply resolves the entry and releases the packet. A timer
/// sweeps out stale entries, and an event reports other hosts claiming our
/// address.
///
/// The cache is only touched inside a dispatcher critical section: the sweep
/// runs as a timer bottom half and must never find the table locked.
use alloc::vec::Vec;
use smoltcp::wire::{
    ArpHardware, ArpOperation, ArpPacket, EthernetAddress, EthernetProtocol, Ipv4Address,
};
use spin::Mutex;

use super::{NetError, NetIf};
use crate::config::{ARP_ENTRY_TIMEOUT_MS, ARP_REQUEST_RETRY_MS, ARP_TIMER_PERIOD_MS};
use crate::isr::{BottomHalf, EventId};
use crate::netbuf::NetBuf;
use crate::timer::{get_interval, TimerHandle};

mod cache;

pub use cache::{ArpCache, ArpEntry, ArpEntryState, ResolveAction};


/// Ethernet/IPv4 ARP packet: 8 fixed bytes, two MACs, two IPv4 addresses.
pub const ARP_HEADER_LEN: usize = 8 + 2 * 6 + 2 * 4;

static_assertions::const_assert_eq!(ARP_HEADER_LEN, 28);

/// Per-interface ARP state.
pub(crate) struct ArpState {
    cache: Mutex<ArpCache>,
    timer: Mutex<Option<TimerHandle>>,
    event: Mutex<Option<EventId>>,
}

impl ArpState {
    pub(crate) fn new() -> Self {
        Self {
            cache: Mutex::new(ArpCache::new()),
            timer: Mutex::new(None),
            event: Mutex::new(None),
        }
    }
}

/// Diagnostic view of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpEntryInfo {
    pub ip: Ipv4Address,
    /// `None` while a request is outstanding.
    pub mac: Option<EthernetAddress>,
    /// Ticks since the entry was created or last refreshed.
    pub age: u32,
}

impl NetIf {
    fn arp(&self) -> &ArpState {
        &self.eth.arp
    }

    /// Run `f` on the cache with bottom halves held off.
    fn with_arp_cache<R>(&self, f: impl FnOnce(&mut ArpCache) -> R) -> R {
        self.guarded(&self.arp().cache, f)
    }

    /// Clear the table, register the duplicate-address event and start the
    /// sweep timer.
    pub fn arp_init(&self) -> Result<(), NetError> {
        self.with_arp_cache(|cache| cache.clear());

        let isr = self.stack().isr();
        let timers = self.stack().timers();

        let weak = self.weak();
        let event = isr.event_init(BottomHalf::new(move || {
            if let Some(netif) = weak.upgrade() {
                netif.dupip_detected();
            }
        }))?;

        let weak = self.weak();
        let period = timers.ms_to_ticks(ARP_TIMER_PERIOD_MS);
        let timer = match timers.timer_new(period, move || {
            if let Some(netif) = weak.upgrade() {
                netif.arp_sweep();
            }
        }) {
            Ok(timer) => timer,
            Err(e) => {
                isr.event_release(event);
                return Err(e.into());
            }
        };

        self.guarded(&self.arp().event, |slot| *slot = Some(event));
        self.guarded(&self.arp().timer, |slot| *slot = Some(timer));
        log::debug!(target: "arp", "[arp] {}: up, sweep every {} ticks", self.name(), period);
        Ok(())
    }

    /// Stop the sweep, drop the event and empty the table.
    pub fn arp_release(&self) {
        if let Some(timer) = self.guarded(&self.arp().timer, |slot| slot.take()) {
            self.stack().timers().timer_free(timer);
        }
        if let Some(event) = self.guarded(&self.arp().event, |slot| slot.take()) {
            self.stack().isr().event_release(event);
        }
        self.with_arp_cache(|cache| cache.clear());
        log::debug!(target: "arp", "[arp] {}: released", self.name());
    }

    pub fn arp_lookup(&self, ip: Ipv4Address) -> Option<EthernetAddress> {
        self.with_arp_cache(|cache| cache.lookup(ip))
    }

    /// Send `packet` to `ip` once its MAC is known. The packet waits in the
    /// cache meanwhile; a newer packet for the same address replaces it.
    pub fn arp_resolve(&self, ip: Ipv4Address, packet: NetBuf) -> Result<(), NetError> {
        let timers = self.stack().timers();
        let now = timers.ticks();
        let retry = timers.ms_to_ticks(ARP_REQUEST_RETRY_MS);

        match self.with_arp_cache(|cache| cache.resolve(ip, packet, now, retry)) {
            ResolveAction::Transmit(mac, packet) => {
                self.driver().output(EthernetProtocol::Ipv4, mac, packet)
            }
            ResolveAction::Request => self.arp_request(ip),
            ResolveAction::Queued => {
                log::trace!(target: "arp", "[arp] {} still pending", ip);
                Ok(())
            }
        }
    }

    /// Broadcast a who-has request for `ip`.
    pub fn arp_request(&self, ip: Ipv4Address) -> Result<(), NetError> {
        let mut frame = self.pool().alloc(ARP_HEADER_LEN)?;
        {
            let mut packet = ArpPacket::new_unchecked(frame.as_mut_slice());
            packet.set_hardware_type(ArpHardware::Ethernet);
            packet.set_protocol_type(EthernetProtocol::Ipv4);
            packet.set_hardware_len(6);
            packet.set_protocol_len(4);
            packet.set_operation(ArpOperation::Request);
            packet.set_source_hardware_addr(self.hw_addr().as_bytes());
            packet.set_source_protocol_addr(self.ip4_addr().as_bytes());
            packet.set_target_hardware_addr(&[0; 6]);
            packet.set_target_protocol_addr(ip.as_bytes());
        }
        log::trace!(target: "arp", "[arp] who-has {}", ip);
        self.driver()
            .output(EthernetProtocol::Arp, EthernetAddress::BROADCAST, frame)
    }

    /// Process one received ARP packet (Ethernet header already stripped).
    pub fn arp_input(&self, mut frame: NetBuf) {
        if frame.len() < ARP_HEADER_LEN {
            log::trace!(target: "arp", "[arp] runt ({} bytes)", frame.len());
            return;
        }

        let (operation, sender_mac, sender_ip, target_ip) = {
            let Ok(packet) = ArpPacket::new_checked(frame.as_slice()) else {
                log::trace!(target: "arp", "[arp] truncated packet");
                return;
            };
            if packet.hardware_type() != ArpHardware::Ethernet
                || packet.protocol_type() != EthernetProtocol::Ipv4
                || packet.hardware_len() != 6
                || packet.protocol_len() != 4
            {
                log::trace!(target: "arp", "[arp] not Ethernet/IPv4");
                return;
            }
            (
                packet.operation(),
                EthernetAddress::from_bytes(packet.source_hardware_addr()),
                Ipv4Address::from_bytes(packet.source_protocol_addr()),
                Ipv4Address::from_bytes(packet.target_protocol_addr()),
            )
        };

        let own_mac = self.hw_addr();
        if sender_mac == own_mac || sender_mac.is_broadcast() {
            log::trace!(target: "arp", "[arp] ignoring sender {}", sender_mac);
            return;
        }

        let own_ip = self.ip4_addr();
        let addressed = !own_ip.is_unspecified();

        if addressed && sender_ip == own_ip {
            log::warn!(target: "arp", "[arp] {} is using our address {}", sender_mac, own_ip);
            if let Some(event) = self.guarded(&self.arp().event, |slot| *slot) {
                self.stack().isr().event_raise(event);
            }
            return;
        }

        let targeted = addressed && target_ip == own_ip;
        if !sender_ip.is_unspecified() {
            let now = self.stack().timers().ticks();
            let released = self.with_arp_cache(|cache| {
                if targeted {
                    cache.insert_or_update(sender_ip, sender_mac, now)
                } else {
                    cache.update(sender_ip, sender_mac, now)
                }
            });
            if let Some(pending) = released {
                log::trace!(target: "arp", "[arp] {} is-at {}, sending queued packet", sender_ip, sender_mac);
                if let Err(e) = self.driver().output(EthernetProtocol::Ipv4, sender_mac, pending) {
                    log::debug!(target: "arp", "[arp] queued packet to {} lost: {}", sender_ip, e);
                }
            }
        }

        if targeted && operation == ArpOperation::Request {
            {
                let mut packet = ArpPacket::new_unchecked(frame.as_mut_slice());
                packet.set_operation(ArpOperation::Reply);
                packet.set_target_hardware_addr(sender_mac.as_bytes());
                packet.set_target_protocol_addr(sender_ip.as_bytes());
                packet.set_source_hardware_addr(own_mac.as_bytes());
                packet.set_source_protocol_addr(own_ip.as_bytes());
            }
            frame.truncate(ARP_HEADER_LEN);
            if let Err(e) = self
                .driver()
                .output(EthernetProtocol::Arp, sender_mac, frame)
            {
                log::debug!(target: "arp", "[arp] reply to {} failed: {}", sender_ip, e);
            }
        }
    }

    /// Free every packet waiting on resolution. The entries stay.
    pub fn arp_drain(&self) {
        let freed = self.with_arp_cache(|cache| cache.drain());
        if freed > 0 {
            log::debug!(target: "arp", "[arp] {}: drained {} queued packets", self.name(), freed);
        }
    }

    /// Drop entries not refreshed within the entry lifetime.
    pub fn arp_sweep(&self) -> usize {
        let timers = self.stack().timers();
        let now = timers.ticks();
        let timeout = timers.ms_to_ticks(ARP_ENTRY_TIMEOUT_MS);
        let removed = self.with_arp_cache(|cache| cache.sweep(now, timeout));
        if removed > 0 {
            log::debug!(target: "arp", "[arp] {}: {} entries expired", self.name(), removed);
        }
        removed
    }

    /// Snapshot of the cache, for diagnostics.
    pub fn arp_entries(&self) -> Vec<ArpEntryInfo> {
        let now = self.stack().timers().ticks();
        self.with_arp_cache(|cache| {
            cache
                .iter()
                .map(|entry| ArpEntryInfo {
                    ip: entry.ip,
                    mac: entry.mac(),
                    age: get_interval(entry.created_at, now),
                })
                .collect()
        })
    }

    /// Forget the entry for `ip`. Returns whether there was one.
    pub fn arp_del_entry(&self, ip: Ipv4Address) -> bool {
        self.with_arp_cache(|cache| cache.remove(ip))
    }
}
