//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Guest-backed object page tables.
//!
//! A GBO describes a contiguous set of guest pages to the host as a page
//! table of one of three depths, chosen solely from the page count:
//!
//!  - depth 0: one page; `base` is the PPN of that page.
//!  - depth 1: up to `PAGE_SIZE / 8` pages; one level-1 page of 64-bit PPNs.
//!  - depth 2: one level-2 page holding the PPNs of level-1 pages.
//!
//! Until the table is filled from a backing allocation, `base` is all-ones.
use std::sync::Arc;

use gasvga_base::{ErrorKind, MobFormat, Ppn64, Result, PAGE_SHIFT, PAGE_SIZE};

use crate::mem::{MemObj, MemPool};

const ENTRIES_PER_PAGE: u32 = (PAGE_SIZE / 8) as u32;

#[derive(Debug)]
pub struct Gbo {
    /// Page-table pages; `None` for depth 0.
    pt: Option<MemObj>,
    num_pt_pages: u32,
    format: MobFormat,
    base: Ppn64,
    size_bytes: u64,
}

impl Gbo {
    /// Choose a page-table depth for `num_pages` and allocate the table
    /// pages. Level-2 entries are filled immediately; data PPNs arrive with
    /// [`Gbo::fill_from_memobj`].
    pub fn init(mem: &Arc<MemPool>, num_pages: u32) -> Result<Gbo> {
        let (num_pt_pages, format) = if num_pages == 0 {
            return Err(ErrorKind::InvalidParameter.into());
        } else if num_pages == 1 {
            (0, MobFormat::PtDepth64_0)
        } else if num_pages <= ENTRIES_PER_PAGE {
            (1, MobFormat::PtDepth64_1)
        } else if num_pages <= ENTRIES_PER_PAGE * ENTRIES_PER_PAGE {
            let level1_pages = (num_pages + ENTRIES_PER_PAGE - 1) / ENTRIES_PER_PAGE;
            // One level-2 page plus the level-1 pages.
            (1 + level1_pages, MobFormat::PtDepth64_2)
        } else {
            return Err(ErrorKind::InvalidParameter.into());
        };

        let pt = if num_pt_pages != 0 {
            let pt = mem.alloc_pages(num_pt_pages)?;
            if format == MobFormat::PtDepth64_2 {
                // Store the PPNs of the level-1 pages into the level-2 page,
                // which is the page at index 0.
                for i in 1..num_pt_pages {
                    let ppn: Ppn64 = pt.page_phys(i) >> PAGE_SHIFT;
                    pt.write((i as usize - 1) * 8, &ppn.to_le_bytes());
                }
            }
            Some(pt)
        } else {
            None
        };

        Ok(Gbo {
            pt,
            num_pt_pages,
            format,
            // Assigned by fill_from_memobj.
            base: !0u64,
            size_bytes: (num_pages as u64) << PAGE_SHIFT,
        })
    }

    /// Fill the level-1 entries (or `base` directly for depth 0) with the
    /// PPNs of the backing allocation.
    pub fn fill_from_memobj(&mut self, memobj: &MemObj) -> Result<()> {
        let num_pages = (self.size_bytes >> PAGE_SHIFT) as u32;
        if memobj.num_pages() < num_pages {
            return Err(ErrorKind::InvalidParameter.into());
        }

        if self.format == MobFormat::PtDepth64_0 {
            self.base = memobj.page_phys(0) >> PAGE_SHIFT;
            return Ok(());
        }

        let pt = self.pt.as_ref().ok_or(ErrorKind::InvalidParameter)?;
        // The first table page is always the base: either the level-2 page
        // or the single level-1 page.
        self.base = pt.page_phys(0) >> PAGE_SHIFT;

        // Level-1 pages follow the level-2 page.
        let level1_off = match self.format {
            MobFormat::PtDepth64_2 => PAGE_SIZE,
            MobFormat::PtDepth64_1 => 0,
            _ => return Err(ErrorKind::InvalidParameter.into()),
        };

        for i in 0..num_pages {
            let ppn: Ppn64 = memobj.page_phys(i) >> PAGE_SHIFT;
            pt.write(level1_off + i as usize * 8, &ppn.to_le_bytes());
        }
        Ok(())
    }

    pub fn format(&self) -> MobFormat {
        self.format
    }

    /// PPN of the table root (or of the single data page for depth 0).
    pub fn base(&self) -> Ppn64 {
        self.base
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn num_pt_pages(&self) -> u32 {
        self.num_pt_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_selection() {
        let mem = MemPool::new();
        assert_eq!(Gbo::init(&mem, 1).unwrap().format(), MobFormat::PtDepth64_0);
        assert_eq!(Gbo::init(&mem, 512).unwrap().format(), MobFormat::PtDepth64_1);
        assert_eq!(Gbo::init(&mem, 513).unwrap().format(), MobFormat::PtDepth64_2);
        assert!(Gbo::init(&mem, 0).is_err());
    }

    #[test]
    fn base_is_all_ones_until_filled() {
        let mem = MemPool::new();
        let mut gbo = Gbo::init(&mem, 4).unwrap();
        assert_eq!(gbo.base(), !0u64);
        let backing = mem.alloc_pages(4).unwrap();
        gbo.fill_from_memobj(&backing).unwrap();
        assert_ne!(gbo.base(), !0u64);
        assert_eq!(gbo.size_bytes(), 4 * PAGE_SIZE as u64);
    }

    #[test]
    fn depth1_entries_are_data_ppns() {
        let mem = MemPool::new();
        let mut gbo = Gbo::init(&mem, 3).unwrap();
        let backing = mem.alloc_pages(3).unwrap();
        gbo.fill_from_memobj(&backing).unwrap();

        let pt = gbo.pt.as_ref().unwrap();
        for i in 0..3 {
            let mut b = [0u8; 8];
            pt.read(i * 8, &mut b);
            assert_eq!(
                u64::from_le_bytes(b),
                backing.page_phys(i as u32) >> PAGE_SHIFT
            );
        }
    }

    #[test]
    fn depth2_level2_points_at_level1() {
        let mem = MemPool::new();
        let mut gbo = Gbo::init(&mem, 600).unwrap();
        let backing = mem.alloc_pages(600).unwrap();
        gbo.fill_from_memobj(&backing).unwrap();

        let pt = gbo.pt.as_ref().unwrap();
        assert_eq!(gbo.num_pt_pages(), 1 + 2);
        // Level-2 entry 0 points at the first level-1 page.
        let mut b = [0u8; 8];
        pt.read(0, &mut b);
        assert_eq!(u64::from_le_bytes(b), pt.page_phys(1) >> PAGE_SHIFT);
        // First level-1 entry is the first data page.
        pt.read(PAGE_SIZE, &mut b);
        assert_eq!(u64::from_le_bytes(b), backing.page_phys(0) >> PAGE_SHIFT);
    }
}
