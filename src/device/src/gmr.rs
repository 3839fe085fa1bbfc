//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Guest memory regions.
//!
//! A GMR is user-visible guest memory known to both sides: the client gets a
//! mapping address, the device gets `DEFINE_GMR2`/`REMAP_GMR2` (and, with DX,
//! a MOB definition). The region id always equals the id of its MOB, so one
//! identifier space covers both. Regions are owned by a client and can be
//! torn down owner-wide.
use log::trace;
use std::sync::Arc;

use gasvga_base::cmd::{SvgaFifoCmdDefineGMR2, SvgaFifoCmdRemapGMR2, Svga3dCmdDefineGBMob64};
use gasvga_base::reg::Caps;
use gasvga_base::{ErrorKind, Result, SVGA3D_INVALID_ID};

use crate::enc;
use crate::mob::{mob_destroy_cmd_len, Mob};
use crate::svga::{OwnerId, Svga};

/// Base of the simulated ring-3 mapping address space.
const USER_VA_BASE: u64 = 0x0000_7f00_0000_0000;

#[derive(Debug)]
pub(crate) struct GmrRegion {
    pub owner: OwnerId,
    pub mob: Option<Arc<Mob>>,
    pub num_pages: u32,
    pub user_addr: u64,
    /// Host-physical address of each page.
    pub page_phys: Vec<u64>,
}

impl Svga {
    /// Create a region of `num_pages`, map it for the owning client and
    /// report it to the host. Returns the region id and the client mapping
    /// address.
    pub fn region_create(&self, owner: OwnerId, num_pages: u32) -> Result<(u32, u64)> {
        if num_pages == 0 || num_pages > self.gmr_max_pages {
            return Err(ErrorKind::InvalidParameter.into());
        }

        let memobj = self.mem.alloc_pages(num_pages)?;
        let user_addr = USER_VA_BASE + memobj.base_phys();
        let page_phys: Vec<u64> = (0..num_pages).map(|i| memobj.page_phys(i)).collect();

        let mob = self.mob_create(num_pages, 0)?;
        if let Err(e) = self.mob_set_memobj(&mob, memobj) {
            self.mob_free(mob);
            return Err(e);
        }

        let gmr_id = mob.id();
        if gmr_id >= self.gmr_max_ids {
            self.mob_free(mob);
            return Err(ErrorKind::InsufficientResources.into());
        }

        let region = GmrRegion {
            owner,
            mob: Some(mob),
            num_pages,
            user_addr,
            page_phys,
        };

        if let Err(e) = self.region_report_to_host(&region) {
            self.mob_free(region.mob.unwrap());
            return Err(e);
        }

        trace!("gmr create: gmrid {}, {} pages", gmr_id, num_pages);
        self.scope.lock().gmr_tree.insert(gmr_id, region);

        Ok((gmr_id, user_addr))
    }

    /// Issue `DEFINE_GMR2` + `REMAP_GMR2` (+ `DEFINE_GB_MOB64` with DX).
    fn region_report_to_host(&self, region: &GmrRegion) -> Result<()> {
        let mob = region.mob.as_ref().ok_or(ErrorKind::InvalidParameter)?;
        let ppns: Vec<u64> = region.page_phys.iter().map(|&p| p >> 12).collect();

        let mut len = enc::fifo_cmd_len::<SvgaFifoCmdDefineGMR2>()
            + enc::fifo_cmd_len::<SvgaFifoCmdRemapGMR2>()
            + ppns.len() * 8;
        if self.caps.contains(Caps::DX) {
            len += enc::cmd3d_len::<Svga3dCmdDefineGBMob64>();
        }

        let mut reserve = self.reserve(len as u32, SVGA3D_INVALID_ID)?;
        {
            let buf = reserve.body_mut();
            let mut off = enc::cmd_define_gmr2(buf, mob.id(), ppns.len() as u32);
            off += enc::cmd_remap_gmr2_ppn64(&mut buf[off..], mob.id(), &ppns);
            if self.caps.contains(Caps::DX) {
                let (format, base, size) = mob.describe();
                off += enc::cmd3d_define_gb_mob64(&mut buf[off..], mob.id(), format, base, size as u32);
            }
            debug_assert_eq!(off, len);
        }
        reserve.commit(len as u32);
        Ok(())
    }

    /// Tear one region down: undefine the GMR and queue the MOB for deferred
    /// destruction. The backing memory is freed once the host acknowledges.
    /// Without DX the host never knew the MOB, so it is freed right away.
    fn region_teardown(&self, mut region: GmrRegion) -> Result<()> {
        let mob = region.mob.take().ok_or(ErrorKind::InvalidParameter)?;

        let define_len = enc::fifo_cmd_len::<SvgaFifoCmdDefineGMR2>();
        let deferred = self.caps.contains(Caps::DX);
        let required = if deferred {
            define_len + mob_destroy_cmd_len()
        } else {
            define_len
        };

        let mut reserve = self.reserve(required as u32, SVGA3D_INVALID_ID)?;
        {
            let buf = reserve.body_mut();
            // Undefine: DEFINE_GMR2 with zero pages.
            let off = enc::cmd_define_gmr2(buf, mob.id(), 0);
            if deferred {
                let mut cb_cmd = 0u32;
                self.mob_destroy(&mob, &mut buf[off..], &mut cb_cmd)?;
                debug_assert_eq!(off + cb_cmd as usize, required);
            }
        }
        reserve.commit(required as u32);

        trace!("gmr destroy: gmrid {}", mob.id());
        if !deferred {
            self.mob_free(mob);
        }
        // Otherwise the MOB is reclaimed by the deferred-destruction pass.
        Ok(())
    }

    pub fn region_destroy(&self, gmr_id: u32) -> Result<()> {
        if gmr_id > self.gmr_max_ids {
            return Err(ErrorKind::InvalidParameter.into());
        }
        let region = self
            .scope
            .lock()
            .gmr_tree
            .remove(&gmr_id)
            .ok_or(ErrorKind::InvalidParameter)?;
        self.region_teardown(region)
    }

    /// Destroy every region belonging to `owner`, or all regions when
    /// `owner` is `None`.
    pub fn regions_destroy(&self, owner: Option<OwnerId>) {
        let ids: Vec<u32> = {
            let scope = self.scope.lock();
            scope
                .gmr_tree
                .iter()
                .filter(|(_, r)| owner.map_or(true, |o| r.owner == o))
                .map(|(&id, _)| id)
                .collect()
        };

        for id in ids {
            let region = self.scope.lock().gmr_tree.remove(&id);
            if let Some(region) = region {
                let _ = self.region_teardown(region);
            }
        }
    }

    /// Client mapping address and byte size of a region.
    pub fn region_user_address_and_size(&self, gmr_id: u32) -> Result<(u64, u32)> {
        if gmr_id > self.gmr_max_ids {
            return Err(ErrorKind::InvalidParameter.into());
        }
        let scope = self.scope.lock();
        let region = scope
            .gmr_tree
            .get(&gmr_id)
            .ok_or(ErrorKind::InvalidParameter)?;
        Ok((
            region.user_addr,
            region.num_pages * gasvga_base::PAGE_SIZE as u32,
        ))
    }
}
