//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Guest memory model.
//!
//! The driver core describes memory to the device by physical address. In the
//! original environment these come from the kernel; here a [`MemPool`] hands
//! out page-aligned allocations with stable fake guest-physical addresses and
//! performs the phys→data translation that the device model needs for its
//! DMA.
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use gasvga_base::{ErrorKind, Result, PAGE_SHIFT, PAGE_SIZE};

/// First physical address handed out. Nothing is ever placed at low
/// addresses so that address 0 stays invalid.
const PHYS_BASE: u64 = 0x0010_0000;

#[derive(Debug)]
struct Region {
    phys: u64,
    bytes: Mutex<Box<[u8]>>,
}

#[derive(Debug, Default)]
struct PoolInner {
    next_phys: u64,
    regions: BTreeMap<u64, Arc<Region>>,
}

/// Allocator and phys→data map for simulated guest-physical memory.
#[derive(Debug)]
pub struct MemPool {
    inner: Mutex<PoolInner>,
}

impl MemPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PoolInner {
                next_phys: PHYS_BASE,
                regions: BTreeMap::new(),
            }),
        })
    }

    /// Allocate `num_pages` zeroed pages of guest memory.
    pub fn alloc_pages(self: &Arc<Self>, num_pages: u32) -> Result<MemObj> {
        if num_pages == 0 {
            return Err(ErrorKind::InvalidParameter.into());
        }
        let len = (num_pages as usize) << PAGE_SHIFT;
        let mut inner = self.inner.lock();
        let phys = inner.next_phys;
        inner.next_phys += len as u64;
        let region = Arc::new(Region {
            phys,
            bytes: Mutex::new(vec![0u8; len].into_boxed_slice()),
        });
        inner.regions.insert(phys, Arc::clone(&region));
        Ok(MemObj {
            pool: Arc::clone(self),
            region,
            len,
        })
    }

    fn region_for(&self, phys: u64, len: usize) -> Result<(Arc<Region>, usize)> {
        let inner = self.inner.lock();
        let (_, region) = inner
            .regions
            .range(..=phys)
            .next_back()
            .ok_or(ErrorKind::InvalidParameter)?;
        let offset = (phys - region.phys) as usize;
        let region_len = region.bytes.lock().len();
        if offset + len > region_len {
            return Err(ErrorKind::InvalidParameter.into());
        }
        Ok((Arc::clone(region), offset))
    }

    /// Device-side DMA read. The range must lie within one allocation.
    pub fn read(&self, phys: u64, buf: &mut [u8]) -> Result<()> {
        let (region, offset) = self.region_for(phys, buf.len())?;
        let bytes = region.bytes.lock();
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }

    /// Device-side DMA write. The range must lie within one allocation.
    pub fn write(&self, phys: u64, buf: &[u8]) -> Result<()> {
        let (region, offset) = self.region_for(phys, buf.len())?;
        let mut bytes = region.bytes.lock();
        bytes[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    pub fn read_u32(&self, phys: u64) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read(phys, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn read_u64(&self, phys: u64) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read(phys, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    pub fn write_u64(&self, phys: u64, value: u64) -> Result<()> {
        self.write(phys, &value.to_le_bytes())
    }

    fn release(&self, phys: u64) {
        self.inner.lock().regions.remove(&phys);
    }
}

/// A page-aligned allocation of guest memory. Deregistered from the pool on
/// drop; any later device access to its range fails.
#[derive(Debug)]
pub struct MemObj {
    pool: Arc<MemPool>,
    region: Arc<Region>,
    len: usize,
}

impl MemObj {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn num_pages(&self) -> u32 {
        (self.len >> PAGE_SHIFT) as u32
    }

    pub fn base_phys(&self) -> u64 {
        self.region.phys
    }

    /// Physical address of page `i`.
    pub fn page_phys(&self, i: u32) -> u64 {
        debug_assert!(i < self.num_pages());
        self.region.phys + ((i as u64) << PAGE_SHIFT)
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) {
        let bytes = self.region.bytes.lock();
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
    }

    pub fn write(&self, offset: usize, buf: &[u8]) {
        let mut bytes = self.region.bytes.lock();
        bytes[offset..offset + buf.len()].copy_from_slice(buf);
    }

    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut b = [0u8; 8];
        self.read(offset, &mut b);
        u64::from_le_bytes(b)
    }

    pub fn write_u64(&self, offset: usize, value: u64) {
        self.write(offset, &value.to_le_bytes());
    }

    /// Run `f` with mutable access to the whole allocation.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.region.bytes.lock();
        f(&mut bytes)
    }
}

impl Drop for MemObj {
    fn drop(&mut self) {
        self.pool.release(self.region.phys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_page_aligned_and_zeroed() {
        let pool = MemPool::new();
        let m = pool.alloc_pages(3).unwrap();
        assert_eq!(m.base_phys() & (PAGE_SIZE as u64 - 1), 0);
        assert_eq!(m.len(), 3 * PAGE_SIZE);
        let mut b = [1u8; 16];
        m.read(PAGE_SIZE, &mut b);
        assert_eq!(b, [0u8; 16]);
    }

    #[test]
    fn pool_translation_round_trips() {
        let pool = MemPool::new();
        let m = pool.alloc_pages(1).unwrap();
        m.write(8, &[1, 2, 3, 4]);
        assert_eq!(pool.read_u32(m.base_phys() + 8).unwrap(), 0x0403_0201);
    }

    #[test]
    fn freed_range_is_inaccessible() {
        let pool = MemPool::new();
        let phys = {
            let m = pool.alloc_pages(1).unwrap();
            m.base_phys()
        };
        assert!(pool.read_u32(phys).is_err());
    }

    #[test]
    fn cross_region_access_is_rejected() {
        let pool = MemPool::new();
        let a = pool.alloc_pages(1).unwrap();
        let _b = pool.alloc_pages(1).unwrap();
        let mut buf = [0u8; 8];
        assert!(pool.read(a.base_phys() + PAGE_SIZE as u64 - 4, &mut buf).is_err());
    }
}
