#![no_std]

extern crate alloc;

// Unit tests run on the host and use std for threads and capture buffers.
#[cfg(test)]
extern crate std;

pub mod config;
pub mod isr;
pub mod klog;
pub mod net;
pub mod netbuf;
pub mod platform;
pub mod stack;
pub mod timer;

pub use config::StackConfig;
pub use net::{NetError, NetIf, NetIfFlags};
pub use netbuf::{NetBuf, NetBufPool};
pub use stack::Stack;
