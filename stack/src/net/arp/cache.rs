/// Fixed-size IPv4 -> MAC table.
///
/// Pure data structure: no locking, no I/O. Operations that would transmit
/// return what to send and leave the sending to the caller, so the driver is
/// never called with the table locked. All ages are measured in timer ticks
/// with wraparound-safe intervals.
use smoltcp::wire::{EthernetAddress, Ipv4Address};

use crate::config::ARP_TABLE_SIZE;
use crate::netbuf::NetBuf;
use crate::timer::get_interval;

#[derive(Debug)]
pub enum ArpEntryState {
    Empty,
    /// Request sent, no reply yet. Holds at most one outbound packet.
    Incomplete { pending: Option<NetBuf>, since: u32 },
    Resolved { mac: EthernetAddress },
}

#[derive(Debug)]
pub struct ArpEntry {
    pub ip: Ipv4Address,
    pub state: ArpEntryState,
    /// Tick of creation or last refresh.
    pub created_at: u32,
}

impl ArpEntry {
    const fn empty() -> Self {
        Self {
            ip: Ipv4Address::UNSPECIFIED,
            state: ArpEntryState::Empty,
            created_at: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.state, ArpEntryState::Empty)
    }

    pub fn mac(&self) -> Option<EthernetAddress> {
        match self.state {
            ArpEntryState::Resolved { mac } => Some(mac),
            _ => None,
        }
    }

    fn clear(&mut self) {
        *self = Self::empty();
    }

    /// Store `mac`, refresh the timestamp and hand back any queued packet.
    fn resolve_to(&mut self, mac: EthernetAddress, now: u32) -> Option<NetBuf> {
        let previous = core::mem::replace(&mut self.state, ArpEntryState::Resolved { mac });
        self.created_at = now;
        match previous {
            ArpEntryState::Incomplete { pending, .. } => pending,
            _ => None,
        }
    }
}

/// What `ArpCache::resolve` wants the caller to do.
#[derive(Debug)]
pub enum ResolveAction {
    /// Address already known: send the packet now.
    Transmit(EthernetAddress, NetBuf),
    /// Packet queued; broadcast a request for the address.
    Request,
    /// Packet queued behind a request sent less than a retry period ago.
    Queued,
}

pub struct ArpCache {
    entries: [ArpEntry; ARP_TABLE_SIZE],
}

impl ArpCache {
    pub fn new() -> Self {
        Self {
            entries: core::array::from_fn(|_| ArpEntry::empty()),
        }
    }

    pub fn find(&self, ip: Ipv4Address) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| !e.is_empty() && e.ip == ip)
    }

    /// MAC of a resolved entry. Incomplete entries count as misses.
    pub fn lookup(&self, ip: Ipv4Address) -> Option<EthernetAddress> {
        self.find(ip).and_then(|i| self.entries[i].mac())
    }

    /// Index of a free slot, evicting the oldest entry when the table is full.
    /// Ties go to the lowest index.
    fn alloc_slot(&mut self, now: u32) -> usize {
        if let Some(free) = self.entries.iter().position(|e| e.is_empty()) {
            return free;
        }

        let mut victim = 0;
        let mut oldest = 0;
        for (i, entry) in self.entries.iter().enumerate() {
            let age = get_interval(entry.created_at, now);
            if i == 0 || age > oldest {
                victim = i;
                oldest = age;
            }
        }

        let evicted = &mut self.entries[victim];
        log::debug!(target: "arp", "[arp] evict {} (age {} ticks)", evicted.ip, oldest);
        evicted.clear();
        victim
    }

    /// Queue `packet` for `ip`, creating an incomplete entry if needed.
    pub fn resolve(
        &mut self,
        ip: Ipv4Address,
        packet: NetBuf,
        now: u32,
        retry_ticks: u32,
    ) -> ResolveAction {
        let Some(index) = self.find(ip) else {
            let i = self.alloc_slot(now);
            self.entries[i] = ArpEntry {
                ip,
                state: ArpEntryState::Incomplete {
                    pending: Some(packet),
                    since: now,
                },
                created_at: now,
            };
            return ResolveAction::Request;
        };

        match &mut self.entries[index].state {
            ArpEntryState::Resolved { mac } => ResolveAction::Transmit(*mac, packet),
            ArpEntryState::Incomplete { pending, since } => {
                if pending.is_some() && get_interval(*since, now) < retry_ticks {
                    // The older packet is dropped, not sent.
                    *pending = Some(packet);
                    ResolveAction::Queued
                } else {
                    *pending = Some(packet);
                    *since = now;
                    ResolveAction::Request
                }
            }
            ArpEntryState::Empty => unreachable!("find returned an empty slot"),
        }
    }

    /// Refresh an existing entry for `ip`. Returns a packet that was waiting
    /// on it. Never creates an entry.
    pub fn update(&mut self, ip: Ipv4Address, mac: EthernetAddress, now: u32) -> Option<NetBuf> {
        let index = self.find(ip)?;
        self.entries[index].resolve_to(mac, now)
    }

    /// Refresh the entry for `ip`, creating it (with eviction) if absent.
    pub fn insert_or_update(
        &mut self,
        ip: Ipv4Address,
        mac: EthernetAddress,
        now: u32,
    ) -> Option<NetBuf> {
        let index = match self.find(ip) {
            Some(i) => i,
            None => {
                let i = self.alloc_slot(now);
                self.entries[i].ip = ip;
                i
            }
        };
        self.entries[index].resolve_to(mac, now)
    }

    /// Drop entries older than `timeout` ticks. Returns how many went.
    pub fn sweep(&mut self, now: u32, timeout: u32) -> usize {
        let mut removed = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.is_empty()) {
            if get_interval(entry.created_at, now) > timeout {
                log::trace!(target: "arp", "[arp] {} timed out", entry.ip);
                entry.clear();
                removed += 1;
            }
        }
        removed
    }

    /// Free every queued packet. Entries stay. Returns how many were freed.
    pub fn drain(&mut self) -> usize {
        let mut freed = 0;
        for entry in self.entries.iter_mut() {
            if let ArpEntryState::Incomplete { pending, .. } = &mut entry.state {
                if pending.take().is_some() {
                    freed += 1;
                }
            }
        }
        freed
    }

    pub fn remove(&mut self, ip: Ipv4Address) -> bool {
        match self.find(ip) {
            Some(i) => {
                self.entries[i].clear();
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(ArpEntry::clear);
    }

    /// Non-empty entries, in table order.
    pub fn iter(&self) -> impl Iterator<Item = &ArpEntry> {
        self.entries.iter().filter(|e| !e.is_empty())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}
