//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Object tables and context object tables.
//!
//! An object table is a host-visible array of fixed-size entries backed by a
//! growable guest-backed object; one exists per object kind. Entry counts are
//! zero until first use and then grow by power-of-two doubling, always
//! covering the highest identifier in use. Growth keeps entries `[0, n)`
//! valid from the host's point of view because the grow command carries the
//! previous valid size.
use log::trace;
use std::mem::size_of;
use std::sync::Arc;

use gasvga_base::cmd::*;
use gasvga_base::reg::Caps;
use gasvga_base::{ErrorKind, MobFormat, Result, PAGE_SIZE, SVGA3D_INVALID_ID};

use crate::enc;
use crate::gbo::Gbo;
use crate::mem::MemObj;
use crate::render::SvgaContext;
use crate::svga::Svga;

/// Object table kinds, in device order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum OtKind {
    Mob = 0,
    Surface = 1,
    Context = 2,
    Shader = 3,
    ScreenTarget = 4,
    DxContext = 5,
}

pub const SVGA_OTABLE_COUNT: usize = 6;

struct OtInfo {
    entry_size: u32,
    max_entries: u32,
}

pub const SVGA3D_MAX_MOBS: u32 = 32768;
pub const SVGA3D_MAX_SURFACE_IDS: u32 = 32768;
pub const SVGA3D_MAX_CONTEXT_IDS: u32 = 256;
pub const SVGA_MAX_SCREEN_TARGETS: u32 = 64;

static OT_INFO: [OtInfo; SVGA_OTABLE_COUNT] = [
    OtInfo {
        entry_size: 16,
        max_entries: SVGA3D_MAX_MOBS,
    },
    OtInfo {
        entry_size: 64,
        max_entries: SVGA3D_MAX_SURFACE_IDS,
    },
    OtInfo {
        entry_size: 8,
        max_entries: SVGA3D_MAX_CONTEXT_IDS,
    },
    // Shader table exists in the device interface but is never used.
    OtInfo {
        entry_size: 16,
        max_entries: 0,
    },
    OtInfo {
        entry_size: 64,
        max_entries: SVGA_MAX_SCREEN_TARGETS,
    },
    OtInfo {
        entry_size: 64,
        max_entries: SVGA3D_MAX_CONTEXT_IDS,
    },
];

pub(crate) fn otable_max_entries(kind: OtKind) -> u32 {
    OT_INFO[kind as usize].max_entries
}

/// Backing state of one object table.
#[derive(Debug, Default)]
pub struct Otable {
    pub(crate) gbo: Option<Gbo>,
    pub(crate) memobj: Option<MemObj>,
    pub(crate) entries: u32,
}

/// Context object table kinds, in device order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum CotKind {
    RtView = 0,
    DsView = 1,
    SrView = 2,
    ElementLayout = 3,
    BlendState = 4,
    DepthStencil = 5,
    RasterizerState = 6,
    Sampler = 7,
    StreamOutput = 8,
    Query = 9,
    DxShader = 10,
    UaView = 11,
}

pub const SVGA_COTABLE_COUNT: usize = 12;
pub const SVGA_COTABLE_MAX_IDS: u32 = 65536;

static COT_ENTRY_SIZE: [u32; SVGA_COTABLE_COUNT] = [
    32,   // RtView
    32,   // DsView
    32,   // SrView
    1024, // ElementLayout
    264,  // BlendState
    72,   // DepthStencil
    64,   // RasterizerState
    72,   // Sampler
    1024, // StreamOutput
    16,   // Query
    64,   // DxShader
    32,   // UaView
];

/// Backing state of one context object table.
#[derive(Debug, Default)]
pub struct Cot {
    pub(crate) mob: Option<Arc<crate::mob::Mob>>,
    pub(crate) entries: u32,
}

impl Svga {
    /// Make sure the object table of `kind` covers `id`, growing it if
    /// needed. Serialised by the object-table mutex, which is held across
    /// the command submission so concurrent callers cannot double-grow.
    pub fn otable_notify(&self, kind: OtKind, id: u32) -> Result<()> {
        if !self.caps.contains(Caps::GBOBJECTS) {
            // No otables for such host device.
            return Ok(());
        }

        let mut tables = self.otables.lock();
        let ot = &mut tables[kind as usize];
        if id < ot.entries {
            return Ok(());
        }

        let info = &OT_INFO[kind as usize];
        if id >= info.max_entries {
            return Err(ErrorKind::InvalidParameter.into());
        }

        // Round the required size up to a page, then double the current size
        // until it fits.
        let required = (id + 1) * info.entry_size;
        let required = (required + PAGE_SIZE as u32 - 1) & !(PAGE_SIZE as u32 - 1);
        let mut cb_ot = if ot.entries != 0 {
            ot.entries * info.entry_size
        } else {
            PAGE_SIZE as u32
        };
        while required > cb_ot {
            cb_ot *= 2;
        }

        let memobj = self.mem.alloc_pages(cb_ot / PAGE_SIZE as u32)?;
        let mut gbo = Gbo::init(&self.mem, cb_ot / PAGE_SIZE as u32)?;
        gbo.fill_from_memobj(&memobj)?;

        if ot.entries == 0 {
            let len = size_of::<Svga3dCmdSetOTableBase64>() as u32;
            let mut reserve =
                self.reserve_3d(SVGA_3D_CMD_SET_OTABLE_BASE64, len, SVGA3D_INVALID_ID)?;
            enc::put(
                reserve.body_mut(),
                0,
                Svga3dCmdSetOTableBase64 {
                    otable_type: kind as u32,
                    base_address: gbo.base(),
                    size_in_bytes: gbo.size_bytes() as u32,
                    valid_size_in_bytes: 0,
                    pt_depth: gbo.format() as u32,
                },
            );
            reserve.commit(len);
        } else {
            let len = size_of::<Svga3dCmdGrowOTable>() as u32;
            let mut reserve = self.reserve_3d(SVGA_3D_CMD_GROW_OTABLE, len, SVGA3D_INVALID_ID)?;
            enc::put(
                reserve.body_mut(),
                0,
                Svga3dCmdGrowOTable {
                    otable_type: kind as u32,
                    base_address: gbo.base(),
                    size_in_bytes: gbo.size_bytes() as u32,
                    valid_size_in_bytes: ot.entries * info.entry_size,
                    pt_depth: gbo.format() as u32,
                },
            );
            reserve.commit(len);

            // The old backing may only be freed after the host has copied it
            // into the new table.
            let old_gbo = ot.gbo.take();
            let old_memobj = ot.memobj.take();
            self.cb_add_completion(Box::new(move |_svga| {
                drop(old_gbo);
                drop(old_memobj);
            }))?;
        }

        self.flush();

        trace!(
            "otable {:?}: {} -> {} entries",
            kind,
            ot.entries,
            cb_ot / info.entry_size
        );
        ot.gbo = Some(gbo);
        ot.memobj = Some(memobj);
        ot.entries = cb_ot / info.entry_size;
        Ok(())
    }

    /// Tell the host to drop every object table, then free the backings.
    pub fn otables_destroy(&self) -> Result<()> {
        let mut tables = self.otables.lock();

        for kind in 0..SVGA_OTABLE_COUNT {
            let len = size_of::<Svga3dCmdSetOTableBase64>() as u32;
            let mut reserve =
                self.reserve_3d(SVGA_3D_CMD_SET_OTABLE_BASE64, len, SVGA3D_INVALID_ID)?;
            enc::put(
                reserve.body_mut(),
                0,
                Svga3dCmdSetOTableBase64 {
                    otable_type: kind as u32,
                    base_address: 0,
                    size_in_bytes: 0,
                    valid_size_in_bytes: 0,
                    pt_depth: MobFormat::Invalid as u32,
                },
            );
            reserve.commit(len);
        }

        self.flush();

        for ot in tables.iter_mut() {
            ot.gbo = None;
            ot.memobj = None;
            ot.entries = 0;
        }
        Ok(())
    }

    /// Context-object-table analogue of [`Svga::otable_notify`]. The old
    /// backing MOB goes through the deferred-destruction queue.
    pub fn cot_notify(&self, ctx: &SvgaContext, kind: CotKind, id: u32) -> Result<()> {
        let mut cots = ctx.cots.lock();
        let cot = &mut cots[kind as usize];
        if id < cot.entries {
            return Ok(());
        }
        if id >= SVGA_COTABLE_MAX_IDS {
            return Err(ErrorKind::InvalidParameter.into());
        }

        let entry_size = COT_ENTRY_SIZE[kind as usize];
        let required = (id + 1) * entry_size;
        let required = (required + PAGE_SIZE as u32 - 1) & !(PAGE_SIZE as u32 - 1);
        let mut cb_cot = if cot.entries != 0 {
            cot.entries * entry_size
        } else {
            PAGE_SIZE as u32
        };
        while required > cb_cot {
            cb_cot *= 2;
        }

        let memobj = self.mem.alloc_pages(cb_cot / PAGE_SIZE as u32)?;
        let mob = self.mob_create(cb_cot / PAGE_SIZE as u32, 0)?;
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

        let valid_size = cot.entries * entry_size;
        if cot.entries == 0 {
            let len = size_of::<Svga3dCmdDXSetCOTable>() as u32;
            let mut reserve = self.reserve_3d(SVGA_3D_CMD_DX_SET_COTABLE, len, SVGA3D_INVALID_ID)?;
            enc::put(
                reserve.body_mut(),
                0,
                Svga3dCmdDXSetCOTable {
                    cid: ctx.cid,
                    mobid: mob.id(),
                    cotable_type: kind as u32,
                    valid_size_in_bytes: valid_size,
                },
            );
            reserve.commit(len);
        } else {
            let len = size_of::<Svga3dCmdDXGrowCOTable>() as u32;
            let mut reserve = self.reserve_3d(SVGA_3D_CMD_DX_GROW_COTABLE, len, SVGA3D_INVALID_ID)?;
            enc::put(
                reserve.body_mut(),
                0,
                Svga3dCmdDXGrowCOTable {
                    cid: ctx.cid,
                    mobid: mob.id(),
                    cotable_type: kind as u32,
                    valid_size_in_bytes: valid_size,
                },
            );
            reserve.commit(len);

            if let Some(old_mob) = cot.mob.take() {
                let mut needed = 0u32;
                let required = crate::mob::mob_destroy_cmd_len() as u32;
                let mut reserve = self.reserve(required, SVGA3D_INVALID_ID)?;
                self.mob_destroy(&old_mob, reserve.body_mut(), &mut needed)?;
                reserve.commit(needed);
            }
        }

        self.flush();

        trace!(
            "cotable {:?} of cid {}: {} -> {} entries",
            kind,
            ctx.cid,
            cot.entries,
            cb_cot / entry_size
        );
        cot.mob = Some(mob);
        cot.entries = cb_cot / entry_size;
        Ok(())
    }
}
