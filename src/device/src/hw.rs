//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Hardware access helpers.
//!
//! Registers are reached through an index/value port pair; the pair must be
//! serialised against code running at device interrupt level, so both
//! accesses happen under the hardware spinlock. FIFO accesses are plain
//! loads/stores against the mapped shared page with acquire/release ordering
//! and take no lock.
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use gasvga_base::reg::*;

/// Port-level access to the device, implemented by the device model.
pub trait Ports: Send + Sync {
    fn io_read(&self, offset: u16) -> u32;
    fn io_write(&self, offset: u16, value: u32);
}

/// The FIFO shared page: a dword array visible to both guest and device.
#[derive(Debug)]
pub struct FifoPage {
    words: Box<[AtomicU32]>,
}

impl FifoPage {
    pub fn new(size_bytes: u32) -> Arc<Self> {
        let num_words = (size_bytes / 4) as usize;
        let words = (0..num_words).map(|_| AtomicU32::new(0)).collect();
        Arc::new(Self { words })
    }

    pub fn size_bytes(&self) -> u32 {
        (self.words.len() * 4) as u32
    }

    pub fn read_index(&self, index: u32) -> u32 {
        self.words[index as usize].load(Ordering::Acquire)
    }

    pub fn write_index(&self, index: u32, value: u32) {
        self.words[index as usize].store(value, Ordering::Release);
    }

    pub fn compare_exchange_index(&self, index: u32, current: u32, new: u32) -> bool {
        self.words[index as usize]
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Store command bytes at a byte offset. Offset and length must be
    /// dword-multiples; the caller handles ring wrap-around.
    pub fn write_bytes(&self, offset: u32, bytes: &[u8]) {
        debug_assert_eq!(offset % 4, 0);
        debug_assert_eq!(bytes.len() % 4, 0);
        let base = (offset / 4) as usize;
        for (i, chunk) in bytes.chunks_exact(4).enumerate() {
            let v = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.words[base + i].store(v, Ordering::Release);
        }
    }

    /// Load command bytes from a byte offset (device side).
    pub fn read_bytes(&self, offset: u32, bytes: &mut [u8]) {
        debug_assert_eq!(offset % 4, 0);
        debug_assert_eq!(bytes.len() % 4, 0);
        let base = (offset / 4) as usize;
        for (i, chunk) in bytes.chunks_exact_mut(4).enumerate() {
            let v = self.words[base + i].load(Ordering::Acquire);
            chunk.copy_from_slice(&v.to_le_bytes());
        }
    }
}

/// Locked access to the device registers plus the mapped FIFO page.
pub struct HwAccess {
    ports: Arc<dyn Ports>,
    hw_lock: Mutex<()>,
    fifo: Arc<FifoPage>,
}

impl std::fmt::Debug for HwAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwAccess")
            .field("fifo_bytes", &self.fifo.size_bytes())
            .finish()
    }
}

impl HwAccess {
    pub fn new(ports: Arc<dyn Ports>, fifo: Arc<FifoPage>) -> Self {
        Self {
            ports,
            hw_lock: Mutex::new(()),
            fifo,
        }
    }

    pub fn fifo_page(&self) -> &Arc<FifoPage> {
        &self.fifo
    }

    pub fn reg_write(&self, index: u32, value: u32) {
        let _guard = self.hw_lock.lock();
        self.ports.io_write(SVGA_INDEX_PORT, index);
        self.ports.io_write(SVGA_VALUE_PORT, value);
    }

    pub fn reg_read(&self, index: u32) -> u32 {
        let _guard = self.hw_lock.lock();
        self.ports.io_write(SVGA_INDEX_PORT, index);
        self.ports.io_read(SVGA_VALUE_PORT)
    }

    /// Paired read of a device capability: select `SVGA_REG_DEV_CAP`, write
    /// the capability index to the value port, read the value back.
    pub fn dev_cap_read(&self, index: u32) -> u32 {
        let _guard = self.hw_lock.lock();
        self.ports.io_write(SVGA_INDEX_PORT, SVGA_REG_DEV_CAP);
        self.ports.io_write(SVGA_VALUE_PORT, index);
        self.ports.io_read(SVGA_VALUE_PORT)
    }

    /// Read the IRQ status port. Runs at device interrupt level; port reads
    /// need no index/value pairing, so no lock is taken.
    pub fn irq_status_read(&self) -> u32 {
        self.ports.io_read(SVGA_IRQSTATUS_PORT)
    }

    /// Dismiss interrupt causes by writing them back.
    pub fn irq_status_ack(&self, bits: u32) {
        self.ports.io_write(SVGA_IRQSTATUS_PORT, bits);
    }

    pub fn fifo_read(&self, index: u32) -> u32 {
        self.fifo.read_index(index)
    }

    pub fn fifo_write(&self, index: u32, value: u32) {
        self.fifo.write_index(index, value);
    }
}
