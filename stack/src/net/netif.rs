/// Network interface: one Ethernet driver plus the link-layer state the stack
/// keeps for it.
///
/// A `NetIf` is always handled through an `Arc`. Timer and event callbacks
/// registered on its behalf hold a `Weak` back-reference, so dropping the
/// last `Arc` never leaks through the dispatcher.
use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU32, Ordering};
use bitflags::bitflags;
use smoltcp::wire::{EthernetAddress, Ipv4Address};
use spin::Mutex;

use super::arp::ArpState;
use super::eth::EthState;
#[cfg(feature = "ip6")]
use super::Nd6Resolver;
use super::{EthernetDriver, IpInput, NetError};
use crate::netbuf::NetBufPool;
use crate::stack::Stack;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NetIfFlags: u32 {
        /// Ethernet layer initialised (`eth_init` succeeded).
        const ETH_READY    = 1 << 0;
        /// Link was up at the last check.
        const LINK_UP      = 1 << 1;
        /// Another host answered ARP for our IPv4 address.
        const IP4_CONFLICT = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ip4Config {
    addr: Ipv4Address,
    netmask: Ipv4Address,
}

type DupIpHandler = Box<dyn FnMut(&NetIf) + Send>;

pub struct NetIf {
    name: &'static str,
    stack: Stack,
    driver: Arc<dyn EthernetDriver>,
    pool: NetBufPool,
    ip4: Mutex<Ip4Config>,
    flags: AtomicU32,
    upper: Mutex<Option<Arc<dyn IpInput>>>,
    #[cfg(feature = "ip6")]
    nd6: Mutex<Option<Arc<dyn Nd6Resolver>>>,
    dupip_handler: Mutex<Option<DupIpHandler>>,
    pub(crate) eth: EthState,
    this: Weak<NetIf>,
}

impl NetIf {
    /// A new, unaddressed interface. Call `eth_init` to bring it up.
    pub fn new(
        name: &'static str,
        stack: Stack,
        driver: Arc<dyn EthernetDriver>,
        pool: NetBufPool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name,
            stack,
            driver,
            pool,
            ip4: Mutex::new(Ip4Config {
                addr: Ipv4Address::UNSPECIFIED,
                netmask: Ipv4Address::UNSPECIFIED,
            }),
            flags: AtomicU32::new(NetIfFlags::empty().bits()),
            upper: Mutex::new(None),
            #[cfg(feature = "ip6")]
            nd6: Mutex::new(None),
            dupip_handler: Mutex::new(None),
            eth: EthState::new(ArpState::new()),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn driver(&self) -> &dyn EthernetDriver {
        &*self.driver
    }

    pub fn pool(&self) -> &NetBufPool {
        &self.pool
    }

    /// Back-reference for callbacks that must not keep the interface alive.
    pub(crate) fn weak(&self) -> Weak<NetIf> {
        self.this.clone()
    }

    /// Run `f` on one of the interface's cells with bottom halves held off.
    ///
    /// Every cell a bottom half may also touch goes through here; the guard
    /// is dropped before the section ends, so pending bottom halves released
    /// by the unlock find it free.
    pub(crate) fn guarded<T, R>(&self, cell: &Mutex<T>, f: impl FnOnce(&mut T) -> R) -> R {
        let cs = self.stack.isr().critical_section();
        let result = f(&mut cell.lock());
        drop(cs);
        result
    }

    pub fn hw_addr(&self) -> EthernetAddress {
        self.driver.hw_addr()
    }

    fn ip4_config(&self) -> Ip4Config {
        self.guarded(&self.ip4, |cfg| *cfg)
    }

    pub fn ip4_addr(&self) -> Ipv4Address {
        self.ip4_config().addr
    }

    pub fn ip4_netmask(&self) -> Ipv4Address {
        self.ip4_config().netmask
    }

    /// Directed broadcast address of the configured subnet, if addressed.
    pub fn ip4_broadcast(&self) -> Option<Ipv4Address> {
        let cfg = self.ip4_config();
        if cfg.addr.is_unspecified() {
            return None;
        }
        let addr = u32::from_be_bytes(cfg.addr.0);
        let mask = u32::from_be_bytes(cfg.netmask.0);
        Some(Ipv4Address((addr | !mask).to_be_bytes()))
    }

    pub fn flags(&self) -> NetIfFlags {
        NetIfFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub(crate) fn set_flags(&self, flags: NetIfFlags, on: bool) {
        if on {
            self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
        }
    }

    /// Configure the IPv4 address and announce it with a gratuitous ARP.
    pub fn set_ip4_addr(&self, addr: Ipv4Address, netmask: Ipv4Address) {
        self.guarded(&self.ip4, |cfg| *cfg = Ip4Config { addr, netmask });
        self.set_flags(NetIfFlags::IP4_CONFLICT, false);
        log::info!(target: "netif", "[netif] {}: {} mask {}", self.name, addr, netmask);
        self.eth_change_addr_notify();
    }

    /// Change the MAC address and announce it with a gratuitous ARP.
    pub fn set_hw_addr(&self, mac: EthernetAddress) -> Result<(), NetError> {
        self.driver.set_hw_addr(mac)?;
        log::info!(target: "netif", "[netif] {}: hw addr {}", self.name, mac);
        self.eth_change_addr_notify();
        Ok(())
    }

    /// Register the IPv4/IPv6 receive hooks.
    pub fn set_upper(&self, upper: Arc<dyn IpInput>) {
        self.guarded(&self.upper, |slot| *slot = Some(upper));
    }

    pub(crate) fn upper(&self) -> Option<Arc<dyn IpInput>> {
        self.guarded(&self.upper, |slot| slot.clone())
    }

    #[cfg(feature = "ip6")]
    pub fn set_nd6(&self, nd6: Arc<dyn Nd6Resolver>) {
        self.guarded(&self.nd6, |slot| *slot = Some(nd6));
    }

    #[cfg(feature = "ip6")]
    pub(crate) fn nd6(&self) -> Option<Arc<dyn Nd6Resolver>> {
        self.guarded(&self.nd6, |slot| slot.clone())
    }

    /// Called after another host is seen using our IPv4 address. What to do
    /// about it is the handler's decision; it may install a replacement
    /// for itself.
    pub fn set_dupip_handler(&self, handler: impl FnMut(&NetIf) + Send + 'static) {
        let handler: DupIpHandler = Box::new(handler);
        self.guarded(&self.dupip_handler, |slot| *slot = Some(handler));
    }

    /// Bottom half of the ARP duplicate-address event.
    pub(crate) fn dupip_detected(&self) {
        log::warn!(target: "netif", "[netif] {}: address conflict on {}", self.name, self.ip4_addr());
        self.set_flags(NetIfFlags::IP4_CONFLICT, true);
        // The handler runs outside the slot so it can replace itself.
        let Some(mut handler) = self.guarded(&self.dupip_handler, |slot| slot.take()) else {
            return;
        };
        handler(self);
        self.guarded(&self.dupip_handler, |slot| {
            if slot.is_none() {
                *slot = Some(handler);
            }
        });
    }
}
