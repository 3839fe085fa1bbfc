//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The legacy FIFO ring transport.
//!
//! Ring data lives between `[MIN, MAX)` of the shared page. `NEXT_CMD` is the
//! guest producer cursor, `STOP` the device consumer cursor. Only one
//! reserve/commit pair runs at a time per device; the FIFO mutex is held from
//! reserve until commit, and the ring-full retry sleep happens with the mutex
//! held.
use log::trace;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use gasvga_base::reg::*;
use gasvga_base::{ErrorKind, Result, PAGE_SIZE};

use crate::hw::HwAccess;

/// How long to keep retrying when the ring is full before declaring the
/// device lost.
const FULL_RETRY_SLEEP_MS: u64 = 2;
const FULL_RETRY_LIMIT: u32 = 2500;

#[derive(Debug)]
pub struct FifoState {
    mutex: Mutex<()>,
    caps: AtomicU32,
}

impl FifoState {
    /// Configure the FIFO registers of the shared page and enable the
    /// device ring.
    pub fn init(hw: &HwAccess, device_caps: Caps, fifo_size: u32) -> Self {
        trace!(
            "fifo init: resolution {}x{}x{}",
            hw.reg_read(SVGA_REG_WIDTH),
            hw.reg_read(SVGA_REG_HEIGHT),
            hw.reg_read(SVGA_REG_BITS_PER_PIXEL)
        );

        hw.reg_write(SVGA_REG_ENABLE, SVGA_REG_ENABLE_ENABLE | SVGA_REG_ENABLE_HIDE);
        hw.reg_write(SVGA_REG_TRACES, 0);

        let mut off_min = if device_caps.contains(Caps::EXTENDED_FIFO) {
            hw.reg_read(SVGA_REG_MEM_REGS)
        } else {
            4
        };
        // Minimum offset in bytes.
        off_min *= 4;
        if off_min < PAGE_SIZE as u32 {
            off_min = PAGE_SIZE as u32;
        }

        hw.fifo_write(SVGA_FIFO_MIN, off_min);
        hw.fifo_write(SVGA_FIFO_MAX, fifo_size);
        hw.fifo_write(SVGA_FIFO_NEXT_CMD, off_min);
        hw.fifo_write(SVGA_FIFO_STOP, off_min);
        hw.fifo_write(SVGA_FIFO_BUSY, 0);

        hw.reg_write(SVGA_REG_CONFIG_DONE, 1);

        let caps = hw.fifo_read(SVGA_FIFO_CAPABILITIES);
        trace!(
            "fifo init: min 0x{:08x}, max 0x{:08x}, caps 0x{:08x}",
            hw.fifo_read(SVGA_FIFO_MIN),
            hw.fifo_read(SVGA_FIFO_MAX),
            caps
        );

        hw.fifo_write(SVGA_FIFO_FENCE, 0);

        Self {
            mutex: Mutex::new(()),
            caps: AtomicU32::new(caps),
        }
    }

    pub fn caps(&self) -> FifoCaps {
        FifoCaps::from_bits_truncate(self.caps.load(Ordering::Relaxed))
    }

    /// Reserve ring space for `len` command bytes.
    ///
    /// The returned guard exposes the reservation as a scratch buffer and
    /// holds the FIFO mutex until [`FifoReserve::commit`] or drop. Blocks
    /// (with the mutex held) while the ring is full.
    pub fn reserve<'a>(&'a self, hw: &'a HwAccess, len: u32) -> Result<FifoReserve<'a>> {
        assert_eq!(len & 0x3, 0);

        let guard = self.mutex.lock();

        let off_min = hw.fifo_read(SVGA_FIFO_MIN);
        let off_max = hw.fifo_read(SVGA_FIFO_MAX);
        let off_next = hw.fifo_read(SVGA_FIFO_NEXT_CMD);
        trace!(
            "fifo reserve: cb {} min 0x{:08x}, max 0x{:08x}, next 0x{:08x}",
            len,
            off_min,
            off_max,
            off_next
        );

        if len >= off_max - off_min {
            return Err(ErrorKind::InsufficientResources.into());
        }

        let mut retries = 0;
        loop {
            let off_stop = hw.fifo_read(SVGA_FIFO_STOP);

            let fits = if off_next >= off_stop {
                if off_next + len < off_max || (off_next + len == off_max && off_stop > off_min) {
                    // Enough contiguous space up to MAX.
                    true
                } else if (off_max - off_next) + (off_stop - off_min) <= len {
                    // Ring full.
                    false
                } else {
                    // Fits, wrapping across MAX.
                    true
                }
            } else {
                off_next + len < off_stop
            };

            if fits {
                break;
            }

            retries += 1;
            if retries > FULL_RETRY_LIMIT {
                return Err(ErrorKind::Timeout.into());
            }
            thread::sleep(Duration::from_millis(FULL_RETRY_SLEEP_MS));
        }

        if self.caps().contains(FifoCaps::RESERVE) {
            hw.fifo_write(SVGA_FIFO_RESERVED, len);
        }

        Ok(FifoReserve {
            state: self,
            hw,
            _guard: guard,
            len,
            buf: vec![0u8; len as usize],
            committed: false,
        })
    }
}

/// An outstanding FIFO reservation. Commit publishes the bytes and advances
/// `NEXT_CMD`; dropping without commit abandons the reservation.
pub struct FifoReserve<'a> {
    state: &'a FifoState,
    hw: &'a HwAccess,
    _guard: MutexGuard<'a, ()>,
    len: u32,
    buf: Vec<u8>,
    committed: bool,
}

impl<'a> FifoReserve<'a> {
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Publish `actual` bytes (at most the reserved length) to the device and
    /// advance the producer cursor modulo `[MIN, MAX)`.
    pub fn commit(mut self, actual: u32) {
        assert_eq!(actual & 0x3, 0);
        let actual = actual.min(self.len);

        let hw = self.hw;
        let off_min = hw.fifo_read(SVGA_FIFO_MIN);
        let off_max = hw.fifo_read(SVGA_FIFO_MAX);
        let mut off_next = hw.fifo_read(SVGA_FIFO_NEXT_CMD);
        trace!(
            "fifo commit: cb {} min 0x{:08x}, max 0x{:08x}, next 0x{:08x}",
            actual,
            off_min,
            off_max,
            off_next
        );

        // All command bytes must be visible before NEXT_CMD is advanced;
        // write_bytes uses release stores.
        let first = (off_max - off_next).min(actual) as usize;
        hw.fifo_page().write_bytes(off_next, &self.buf[..first]);
        if (actual as usize) > first {
            hw.fifo_page()
                .write_bytes(off_min, &self.buf[first..actual as usize]);
        }

        off_next += actual;
        if off_next >= off_max {
            off_next -= off_max - off_min;
        }
        hw.fifo_write(SVGA_FIFO_NEXT_CMD, off_next);

        if self.state.caps().contains(FifoCaps::RESERVE) {
            hw.fifo_write(SVGA_FIFO_RESERVED, 0);
        }

        ping_host(hw);
        self.committed = true;
    }
}

impl<'a> Drop for FifoReserve<'a> {
    fn drop(&mut self) {
        if !self.committed && self.state.caps().contains(FifoCaps::RESERVE) {
            self.hw.fifo_write(SVGA_FIFO_RESERVED, 0);
        }
    }
}

/// Wake the device if it went idle: 0→1 transition of `BUSY` pokes the sync
/// register.
fn ping_host(hw: &HwAccess) {
    if hw.fifo_page().compare_exchange_index(SVGA_FIFO_BUSY, 0, 1) {
        hw.reg_write(SVGA_REG_SYNC, SVGA_SYNC_GENERIC);
    }
}
