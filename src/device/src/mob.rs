//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Memory object buffers.
//!
//! A MOB is a guest-backed object plus a device-visible identifier. MOB
//! destruction is a two-step protocol: the destroy command is followed by a
//! fence-write command that asks the host to store a fresh 64-bit fence value
//! into the miniport MOB, and only once the host has written a value at least
//! that large may the guest free the backing memory and release the id. Until
//! then the MOB sits on the deferred-destruction list.
use log::trace;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::mem::size_of;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;

use gasvga_base::cmd::{
    Svga3dCmdDXMobFence64, Svga3dCmdDefineGBMob64, Svga3dCmdDestroyGBMob,
    SVGA_3D_CMD_DEFINE_GB_MOB64,
};
use gasvga_base::{ErrorKind, MobFormat, Ppn64, Result, PAGE_SIZE, SVGA3D_INVALID_ID};
use gasvga_common::fence_cmp64;

use crate::enc;
use crate::gbo::Gbo;
use crate::mem::MemObj;
use crate::svga::Svga;

/// Byte offset of the host-written MOB fence slot inside the miniport MOB.
pub const MINIPORT_MOB_FENCE_OFFSET: u32 = 0;

#[derive(Debug)]
pub(crate) struct MobInner {
    pub gbo: Gbo,
    pub memobj: Option<MemObj>,
    /// Deferred-destruction fence value; 0 while the MOB is live.
    pub fence: u64,
}

/// A guest-backed object registered with the device under a MOB id.
#[derive(Debug)]
pub struct Mob {
    id: u32,
    /// Owning allocation handle, or 0.
    alloc_handle: u64,
    pub(crate) inner: Mutex<MobInner>,
}

impl Mob {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn alloc_handle(&self) -> u64 {
        self.alloc_handle
    }

    /// `(format, base, size)` triple describing the page table.
    pub fn describe(&self) -> (MobFormat, Ppn64, u64) {
        let inner = self.inner.lock();
        (inner.gbo.format(), inner.gbo.base(), inner.gbo.size_bytes())
    }

    pub(crate) fn deferred_fence(&self) -> u64 {
        self.inner.lock().fence
    }

    pub(crate) fn read_u64(&self, offset: usize) -> Option<u64> {
        let inner = self.inner.lock();
        inner.memobj.as_ref().map(|m| m.read_u64(offset))
    }
}

/// Size of the command pair emitted by [`Svga::mob_destroy`].
pub fn mob_destroy_cmd_len() -> usize {
    enc::cmd3d_len::<Svga3dCmdDestroyGBMob>() + enc::cmd3d_len::<Svga3dCmdDXMobFence64>()
}

impl Svga {
    /// Allocate a MOB id, register the MOB and build its page-table shell for
    /// `num_pages` of backing.
    pub fn mob_create(&self, num_pages: u32, alloc_handle: u64) -> Result<Arc<Mob>> {
        let id = self.mob_id_alloc()?;

        let gbo = match Gbo::init(&self.mem, num_pages) {
            Ok(gbo) => gbo,
            Err(e) => {
                self.mob_id_free(id);
                return Err(e);
            }
        };

        let mob = Arc::new(Mob {
            id,
            alloc_handle,
            inner: Mutex::new(MobInner {
                gbo,
                memobj: None,
                fence: 0,
            }),
        });

        self.mobs.lock().insert(id, Arc::clone(&mob));
        trace!("mob create: mobid {}", id);
        Ok(mob)
    }

    /// Back the MOB with memory: fill the page table and take ownership of
    /// the allocation.
    pub fn mob_set_memobj(&self, mob: &Mob, memobj: MemObj) -> Result<()> {
        let mut inner = mob.inner.lock();
        inner.gbo.fill_from_memobj(&memobj)?;
        inner.memobj = Some(memobj);
        Ok(())
    }

    pub fn mob_query(&self, mobid: u32) -> Option<Arc<Mob>> {
        self.mobs.lock().get(&mobid).cloned()
    }

    /// Unregister and free a MOB immediately. Only valid when the host can
    /// no longer reference it (never used, or reclaimed via the deferred
    /// fence).
    pub fn mob_free(&self, mob: Arc<Mob>) {
        trace!("mob free: mobid {}", mob.id);
        self.mobs.lock().remove(&mob.id);
        {
            let mut inner = mob.inner.lock();
            inner.memobj = None;
        }
        self.mob_id_free(mob.id);
    }

    /// Encode the destroy + fence-write command pair into `out` and put the
    /// MOB on the deferred-destruction list.
    ///
    /// On `InsufficientDmaBuffer`, `out_len` receives the required size and
    /// the list is not touched.
    pub fn mob_destroy(&self, mob: &Arc<Mob>, out: &mut [u8], out_len: &mut u32) -> Result<()> {
        let required = mob_destroy_cmd_len();
        *out_len = required as u32;
        if out.len() < required {
            return Err(ErrorKind::InsufficientDmaBuffer.into());
        }

        let miniport_id = {
            let guard = self.miniport_mob.lock();
            guard.as_ref().ok_or(ErrorKind::NotSupported)?.id()
        };

        let fence = self.mob_fence_counter.fetch_add(1, AtomicOrdering::AcqRel) + 1;
        mob.inner.lock().fence = fence;

        let off = enc::cmd3d_destroy_gb_mob(out, mob.id);
        enc::cmd3d_mob_fence64(&mut out[off..], fence, miniport_id, MINIPORT_MOB_FENCE_OFFSET);

        self.mob_deferred.lock().push(Arc::clone(mob));
        trace!("mob destroy queued: mobid {}, fence {}", mob.id, fence);
        Ok(())
    }

    /// Passive-level reclaim: free every deferred MOB whose fence the host
    /// has acknowledged through the miniport MOB.
    pub fn mob_reclaim_pass(&self) {
        let host_fence = {
            let guard = self.miniport_mob.lock();
            match guard.as_ref() {
                Some(mob) => match mob.read_u64(MINIPORT_MOB_FENCE_OFFSET as usize) {
                    Some(v) => v,
                    None => return,
                },
                None => return,
            }
        };

        let reclaimed: Vec<Arc<Mob>> = {
            let mut deferred = self.mob_deferred.lock();
            let mut kept = Vec::new();
            let mut done = Vec::new();
            for mob in deferred.drain(..) {
                if fence_cmp64(mob.deferred_fence(), host_fence) != Ordering::Greater {
                    done.push(mob);
                } else {
                    kept.push(mob);
                }
            }
            *deferred = kept;
            done
        };

        for mob in reclaimed {
            trace!("mob reclaim: mobid {} (host fence {})", mob.id, host_fence);
            self.mob_free(mob);
        }
    }

    /// Allocate and register the miniport MOB: a single page whose first
    /// quadword is the host-written MOB fence slot.
    pub(crate) fn create_miniport_mob(&self) -> Result<()> {
        let pages = (size_of::<u64>() + PAGE_SIZE - 1) / PAGE_SIZE;
        let memobj = self.mem.alloc_pages(pages as u32)?;

        let mob = self.mob_create(pages as u32, 0)?;
        if let Err(e) = self.mob_set_memobj(&mob, memobj) {
            self.mob_free(mob);
            return Err(e);
        }

        let (format, base, size) = mob.describe();
        {
            let len = size_of::<Svga3dCmdDefineGBMob64>() as u32;
            let mut reserve = self.reserve_3d(SVGA_3D_CMD_DEFINE_GB_MOB64, len, SVGA3D_INVALID_ID)?;
            enc::put(
                reserve.body_mut(),
                0,
                Svga3dCmdDefineGBMob64 {
                    mobid: mob.id(),
                    pt_depth: format as u32,
                    base,
                    size_in_bytes: size as u32,
                },
            );
            reserve.commit(len);
        }
        self.flush();

        *self.miniport_mob.lock() = Some(mob);
        Ok(())
    }
}
