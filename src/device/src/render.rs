//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Command stream validation and rewriting.
//!
//! The client hands the driver an opaque command stream. The driver copies
//! it into the DMA buffer command by command, validating as it goes via a
//! per-opcode dispatch table (unknown opcodes reject the stream). Dispatch
//! callbacks grow context object tables for ids about to be used and patch
//! context-id placeholders.
//!
//! A second pass walks the copied commands and, for every surface-id field,
//! takes a reference on the surface object and rewrites redirected (shared)
//! ids in place. The references ride along with the submission as
//! hardware-render metadata and are dropped when the buffer completes.
use arrayvec::ArrayVec;
use lazy_static::lazy_static;
use log::trace;
use parking_lot::Mutex;
use std::sync::Arc;

use gasvga_base::cmd::*;
use gasvga_base::reg::Caps;
use gasvga_base::{ErrorKind, Result, PAGE_SIZE, SVGA3D_INVALID_ID};

use crate::enc;
use crate::hostobj::SurfaceObject;
use crate::otable::{Cot, CotKind, SVGA_COTABLE_COUNT};
use crate::svga::Svga;

/// Clients may leave this placeholder in context-id fields; the rewriter
/// substitutes the submitting context.
pub const SVGA_CID_PLACEHOLDER: u32 = 0xFFFF_FFFE;

/// A rendering context. DX contexts own their context object tables.
#[derive(Debug)]
pub struct SvgaContext {
    pub(crate) cid: u32,
    pub(crate) is_dx: bool,
    pub(crate) cots: Mutex<[Cot; SVGA_COTABLE_COUNT]>,
}

impl SvgaContext {
    pub fn cid(&self) -> u32 {
        self.cid
    }

    pub fn is_dx(&self) -> bool {
        self.is_dx
    }
}

/// The object-reference set attached to a submitted DMA buffer, sized so the
/// record fits in one page.
pub const HW_RENDER_MAX_OBJECTS: usize = (PAGE_SIZE - 16) / 8;

pub struct HwRenderData {
    pub(crate) submission_id: u32,
    pub(crate) objects: ArrayVec<Arc<SurfaceObject>, HW_RENDER_MAX_OBJECTS>,
}

impl HwRenderData {
    fn new() -> Box<Self> {
        Box::new(Self {
            submission_id: 0,
            objects: ArrayVec::new(),
        })
    }

    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }
}

impl std::fmt::Debug for HwRenderData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwRenderData")
            .field("submission_id", &self.submission_id)
            .field("objects", &self.objects.len())
            .finish()
    }
}

/// Whether the rewrite consumed the whole source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Complete,
    /// The output buffer (or the metadata array) filled up; the prefix
    /// described by the lengths is usable, the caller retries with the rest.
    InsufficientDmaBuffer,
}

#[derive(Debug)]
pub struct RenderOutput {
    pub status: RenderStatus,
    /// Bytes written to the target buffer.
    pub target_len: usize,
    /// Bytes consumed from the source buffer.
    pub processed_len: usize,
    /// References captured for the copied commands, if any.
    pub render_data: Option<Box<HwRenderData>>,
}

/// One 3D command record (header plus payload) inside the target buffer.
struct CmdView<'a> {
    buf: &'a mut [u8],
}

impl<'a> CmdView<'a> {
    fn payload_dwords(&self) -> usize {
        (self.buf.len() - 8) / 4
    }

    fn dword(&self, i: usize) -> Result<u32> {
        let off = 8 + i * 4;
        if off + 4 > self.buf.len() {
            return Err(ErrorKind::IllegalInstruction.into());
        }
        Ok(u32::from_le_bytes([
            self.buf[off],
            self.buf[off + 1],
            self.buf[off + 2],
            self.buf[off + 3],
        ]))
    }

    fn set_dword(&mut self, i: usize, v: u32) -> Result<()> {
        let off = 8 + i * 4;
        if off + 4 > self.buf.len() {
            return Err(ErrorKind::IllegalInstruction.into());
        }
        self.buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }
}

type CmdHandler = fn(&Svga, &SvgaContext, &mut CmdView<'_>) -> Result<()>;

fn proc_nop(_: &Svga, _: &SvgaContext, _: &mut CmdView<'_>) -> Result<()> {
    Ok(())
}

fn proc_invalid(_: &Svga, _: &SvgaContext, _: &mut CmdView<'_>) -> Result<()> {
    Err(ErrorKind::IllegalInstruction.into())
}

/// Replace a context-id placeholder in payload dword 0.
fn patch_cid(ctx: &SvgaContext, view: &mut CmdView<'_>) -> Result<()> {
    if view.dword(0)? == SVGA_CID_PLACEHOLDER {
        view.set_dword(0, ctx.cid)?;
    }
    Ok(())
}

fn proc_cid_command(_: &Svga, ctx: &SvgaContext, view: &mut CmdView<'_>) -> Result<()> {
    patch_cid(ctx, view)
}

macro_rules! cot_handler {
    ($name:ident, $kind:expr) => {
        fn $name(svga: &Svga, ctx: &SvgaContext, view: &mut CmdView<'_>) -> Result<()> {
            svga.cot_notify(ctx, $kind, view.dword(0)?)
        }
    };
}

cot_handler!(proc_cot_query, CotKind::Query);
cot_handler!(proc_cot_sr_view, CotKind::SrView);
cot_handler!(proc_cot_rt_view, CotKind::RtView);
cot_handler!(proc_cot_ds_view, CotKind::DsView);
cot_handler!(proc_cot_element_layout, CotKind::ElementLayout);
cot_handler!(proc_cot_blend_state, CotKind::BlendState);
cot_handler!(proc_cot_depth_stencil, CotKind::DepthStencil);
cot_handler!(proc_cot_rasterizer, CotKind::RasterizerState);
cot_handler!(proc_cot_sampler, CotKind::Sampler);
cot_handler!(proc_cot_stream_output, CotKind::StreamOutput);
cot_handler!(proc_cot_shader, CotKind::DxShader);
cot_handler!(proc_cot_ua_view, CotKind::UaView);

fn table_index(cmd_id: u32) -> usize {
    (cmd_id - SVGA_3D_CMD_BASE) as usize
}

lazy_static! {
    static ref COMMAND_DESC: Vec<CmdHandler> = {
        let mut t: Vec<CmdHandler> =
            vec![proc_invalid; (SVGA_3D_CMD_MAX - SVGA_3D_CMD_BASE) as usize];

        let nops = [
            SVGA_3D_CMD_SURFACE_DEFINE,
            SVGA_3D_CMD_SURFACE_DESTROY,
            SVGA_3D_CMD_SURFACE_COPY,
            SVGA_3D_CMD_SURFACE_STRETCHBLT,
            SVGA_3D_CMD_SURFACE_DMA,
            SVGA_3D_CMD_CONTEXT_DEFINE,
            SVGA_3D_CMD_CONTEXT_DESTROY,
            SVGA_3D_CMD_SETTRANSFORM,
            SVGA_3D_CMD_SETZRANGE,
            SVGA_3D_CMD_SETRENDERSTATE,
            SVGA_3D_CMD_SETMATERIAL,
            SVGA_3D_CMD_SETLIGHTDATA,
            SVGA_3D_CMD_SETLIGHTENABLED,
            SVGA_3D_CMD_SETVIEWPORT,
            SVGA_3D_CMD_SETCLIPPLANE,
            SVGA_3D_CMD_CLEAR,
            SVGA_3D_CMD_PRESENT,
            SVGA_3D_CMD_PRESENT_READBACK,
            SVGA_3D_CMD_SHADER_DEFINE,
            SVGA_3D_CMD_SHADER_DESTROY,
            SVGA_3D_CMD_SET_SHADER,
            SVGA_3D_CMD_SET_SHADER_CONST,
            SVGA_3D_CMD_SETSCISSORRECT,
            SVGA_3D_CMD_BEGIN_QUERY,
            SVGA_3D_CMD_END_QUERY,
            SVGA_3D_CMD_WAIT_FOR_QUERY,
            SVGA_3D_CMD_BLIT_SURFACE_TO_SCREEN,
            SVGA_3D_CMD_SURFACE_DEFINE_V2,
            SVGA_3D_CMD_GENERATE_MIPMAPS,
            SVGA_3D_CMD_ACTIVATE_SURFACE,
            SVGA_3D_CMD_DEACTIVATE_SURFACE,
            SVGA_3D_CMD_SCREEN_DMA,
            SVGA_3D_CMD_BIND_GB_SURFACE,
            SVGA_3D_CMD_COND_BIND_GB_SURFACE,
            SVGA_3D_CMD_UPDATE_GB_IMAGE,
            SVGA_3D_CMD_UPDATE_GB_SURFACE,
            SVGA_3D_CMD_READBACK_GB_IMAGE,
            SVGA_3D_CMD_READBACK_GB_SURFACE,
            SVGA_3D_CMD_INVALIDATE_GB_IMAGE,
            SVGA_3D_CMD_INVALIDATE_GB_SURFACE,
            SVGA_3D_CMD_BEGIN_GB_QUERY,
            SVGA_3D_CMD_END_GB_QUERY,
            SVGA_3D_CMD_WAIT_FOR_GB_QUERY,
            SVGA_3D_CMD_DX_DEFINE_CONTEXT,
            SVGA_3D_CMD_DX_DESTROY_CONTEXT,
            SVGA_3D_CMD_DX_BIND_CONTEXT,
            SVGA_3D_CMD_DX_READBACK_CONTEXT,
            SVGA_3D_CMD_DX_INVALIDATE_CONTEXT,
            SVGA_3D_CMD_DX_SET_SINGLE_CONSTANT_BUFFER,
            SVGA_3D_CMD_DX_SET_SHADER_RESOURCES,
            SVGA_3D_CMD_DX_SET_SHADER,
            SVGA_3D_CMD_DX_SET_SAMPLERS,
            SVGA_3D_CMD_DX_DRAW,
            SVGA_3D_CMD_DX_DRAW_INDEXED,
            SVGA_3D_CMD_DX_DRAW_INSTANCED,
            SVGA_3D_CMD_DX_DRAW_INDEXED_INSTANCED,
            SVGA_3D_CMD_DX_DRAW_AUTO,
            SVGA_3D_CMD_DX_SET_INPUT_LAYOUT,
            SVGA_3D_CMD_DX_SET_VERTEX_BUFFERS,
            SVGA_3D_CMD_DX_SET_INDEX_BUFFER,
            SVGA_3D_CMD_DX_SET_TOPOLOGY,
            SVGA_3D_CMD_DX_SET_RENDERTARGETS,
            SVGA_3D_CMD_DX_SET_BLEND_STATE,
            SVGA_3D_CMD_DX_SET_DEPTHSTENCIL_STATE,
            SVGA_3D_CMD_DX_SET_RASTERIZER_STATE,
            SVGA_3D_CMD_DX_BIND_QUERY,
            SVGA_3D_CMD_DX_SET_QUERY_OFFSET,
            SVGA_3D_CMD_DX_BEGIN_QUERY,
            SVGA_3D_CMD_DX_END_QUERY,
            SVGA_3D_CMD_DX_READBACK_QUERY,
            SVGA_3D_CMD_DX_SET_PREDICATION,
            SVGA_3D_CMD_DX_SET_SOTARGETS,
            SVGA_3D_CMD_DX_SET_VIEWPORTS,
            SVGA_3D_CMD_DX_SET_SCISSORRECTS,
            SVGA_3D_CMD_DX_CLEAR_RENDERTARGET_VIEW,
            SVGA_3D_CMD_DX_CLEAR_DEPTHSTENCIL_VIEW,
            SVGA_3D_CMD_DX_PRED_COPY_REGION,
            SVGA_3D_CMD_DX_PRED_COPY,
            SVGA_3D_CMD_DX_PRESENTBLT,
            SVGA_3D_CMD_DX_GENMIPS,
            SVGA_3D_CMD_DX_UPDATE_SUBRESOURCE,
            SVGA_3D_CMD_DX_READBACK_SUBRESOURCE,
            SVGA_3D_CMD_DX_INVALIDATE_SUBRESOURCE,
            SVGA_3D_CMD_DX_BIND_SHADER,
            SVGA_3D_CMD_DX_SET_STREAMOUTPUT,
            SVGA_3D_CMD_DX_SET_COTABLE,
            SVGA_3D_CMD_DX_READBACK_COTABLE,
            SVGA_3D_CMD_DX_MOB_FENCE_64,
            SVGA_3D_CMD_INTRA_SURFACE_COPY,
        ];
        for &id in nops.iter() {
            t[table_index(id)] = proc_nop;
        }

        // Commands carrying a context id in payload dword 0.
        t[table_index(SVGA_3D_CMD_SETRENDERTARGET)] = proc_cid_command;
        t[table_index(SVGA_3D_CMD_SETTEXTURESTATE)] = proc_cid_command;
        t[table_index(SVGA_3D_CMD_DRAW_PRIMITIVES)] = proc_cid_command;

        // DX object definitions grow the context object tables.
        t[table_index(SVGA_3D_CMD_DX_DEFINE_QUERY)] = proc_cot_query;
        t[table_index(SVGA_3D_CMD_DX_DESTROY_QUERY)] = proc_cot_query;
        t[table_index(SVGA_3D_CMD_DX_DEFINE_SHADERRESOURCE_VIEW)] = proc_cot_sr_view;
        t[table_index(SVGA_3D_CMD_DX_DESTROY_SHADERRESOURCE_VIEW)] = proc_cot_sr_view;
        t[table_index(SVGA_3D_CMD_DX_DEFINE_RENDERTARGET_VIEW)] = proc_cot_rt_view;
        t[table_index(SVGA_3D_CMD_DX_DESTROY_RENDERTARGET_VIEW)] = proc_cot_rt_view;
        t[table_index(SVGA_3D_CMD_DX_DEFINE_DEPTHSTENCIL_VIEW)] = proc_cot_ds_view;
        t[table_index(SVGA_3D_CMD_DX_DESTROY_DEPTHSTENCIL_VIEW)] = proc_cot_ds_view;
        t[table_index(SVGA_3D_CMD_DX_DEFINE_ELEMENTLAYOUT)] = proc_cot_element_layout;
        t[table_index(SVGA_3D_CMD_DX_DESTROY_ELEMENTLAYOUT)] = proc_cot_element_layout;
        t[table_index(SVGA_3D_CMD_DX_DEFINE_BLEND_STATE)] = proc_cot_blend_state;
        t[table_index(SVGA_3D_CMD_DX_DESTROY_BLEND_STATE)] = proc_cot_blend_state;
        t[table_index(SVGA_3D_CMD_DX_DEFINE_DEPTHSTENCIL_STATE)] = proc_cot_depth_stencil;
        t[table_index(SVGA_3D_CMD_DX_DESTROY_DEPTHSTENCIL_STATE)] = proc_cot_depth_stencil;
        t[table_index(SVGA_3D_CMD_DX_DEFINE_RASTERIZER_STATE)] = proc_cot_rasterizer;
        t[table_index(SVGA_3D_CMD_DX_DESTROY_RASTERIZER_STATE)] = proc_cot_rasterizer;
        t[table_index(SVGA_3D_CMD_DX_DEFINE_SAMPLER_STATE)] = proc_cot_sampler;
        t[table_index(SVGA_3D_CMD_DX_DESTROY_SAMPLER_STATE)] = proc_cot_sampler;
        t[table_index(SVGA_3D_CMD_DX_DEFINE_SHADER)] = proc_cot_shader;
        t[table_index(SVGA_3D_CMD_DX_DESTROY_SHADER)] = proc_cot_shader;
        t[table_index(SVGA_3D_CMD_DX_DEFINE_STREAMOUTPUT)] = proc_cot_stream_output;
        t[table_index(SVGA_3D_CMD_DX_DESTROY_STREAMOUTPUT)] = proc_cot_stream_output;
        t[table_index(SVGA_3D_CMD_DX_DEFINE_UA_VIEW)] = proc_cot_ua_view;
        t[table_index(SVGA_3D_CMD_DX_DESTROY_UA_VIEW)] = proc_cot_ua_view;

        t
    };
}

impl Svga {
    pub fn context_create(&self, dx: bool) -> Result<Arc<SvgaContext>> {
        let cid = if dx {
            if !self.caps.contains(Caps::DX) {
                return Err(ErrorKind::NotSupported.into());
            }
            self.dx_context_id_alloc()?
        } else {
            self.context_id_alloc()?
        };

        let emit = || -> Result<()> {
            if dx {
                let len = enc::cmd3d_len::<Svga3dCmdDXDefineContext>() as u32;
                let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
                enc::cmd3d_dx_define_context(reserve.body_mut(), cid);
                reserve.commit(len);
            } else {
                let len = enc::cmd3d_len::<Svga3dCmdDefineContext>() as u32;
                let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
                enc::cmd3d_define_context(reserve.body_mut(), cid);
                reserve.commit(len);
            }
            Ok(())
        };
        if let Err(e) = emit() {
            if dx {
                self.dx_context_id_free(cid);
            } else {
                self.context_id_free(cid);
            }
            return Err(e);
        }

        trace!("context create: cid {} (dx: {})", cid, dx);
        Ok(Arc::new(SvgaContext {
            cid,
            is_dx: dx,
            cots: Mutex::new(Default::default()),
        }))
    }

    pub fn context_destroy(&self, ctx: &SvgaContext) -> Result<()> {
        // Queue the context object table backings for deferred destruction
        // before the context itself goes away.
        if ctx.is_dx {
            let mobs: Vec<_> = {
                let mut cots = ctx.cots.lock();
                cots.iter_mut()
                    .filter_map(|cot| {
                        cot.entries = 0;
                        cot.mob.take()
                    })
                    .collect()
            };
            for mob in mobs {
                let required = crate::mob::mob_destroy_cmd_len() as u32;
                let mut reserve = self.reserve(required, SVGA3D_INVALID_ID)?;
                let mut needed = 0u32;
                self.mob_destroy(&mob, reserve.body_mut(), &mut needed)?;
                reserve.commit(needed);
            }
        }

        if ctx.is_dx {
            let len = enc::cmd3d_len::<Svga3dCmdDXDestroyContext>() as u32;
            let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
            enc::cmd3d_dx_destroy_context(reserve.body_mut(), ctx.cid);
            reserve.commit(len);
            self.dx_context_id_free(ctx.cid);
        } else {
            let len = enc::cmd3d_len::<Svga3dCmdDestroyContext>() as u32;
            let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
            enc::cmd3d_destroy_context(reserve.body_mut(), ctx.cid);
            reserve.commit(len);
            self.context_id_free(ctx.cid);
        }
        trace!("context destroy: cid {}", ctx.cid);
        Ok(())
    }

    /// Look the surface up, record the reference in the metadata array and
    /// rewrite the field with the redirect target.
    fn process_surface(
        &self,
        view: &mut CmdView<'_>,
        dword: usize,
        hoa: &mut HwRenderData,
    ) -> Result<()> {
        let sid = view.dword(dword)?;
        if sid == SVGA3D_INVALID_ID {
            return Ok(());
        }

        // One reference per distinct surface per submission.
        let existing = hoa.objects.iter().find(|so| so.sid() == sid).cloned();
        let so = match existing {
            Some(so) => so,
            None => match self.surface_object_query(sid) {
                Some(so) => {
                    if hoa.objects.try_push(Arc::clone(&so)).is_err() {
                        self.surface_object_release(&so, true)?;
                        return Err(ErrorKind::InsufficientDmaBuffer.into());
                    }
                    so
                }
                // Not a tracked surface; most likely an id belonging to a
                // different client class. Leave the field untouched.
                None => return Ok(()),
            },
        };

        view.set_dword(dword, so.shared_sid())
    }

    /// Second-pass rewrite of one copied command.
    fn update_command(&self, view: &mut CmdView<'_>, hoa: &mut HwRenderData) -> Result<()> {
        let cmd_id = u32::from_le_bytes([view.buf[0], view.buf[1], view.buf[2], view.buf[3]]);
        let taken = hoa.objects.len();

        let result = (|| -> Result<()> {
            match cmd_id {
                SVGA_3D_CMD_PRESENT | SVGA_3D_CMD_PRESENT_READBACK => {
                    self.process_surface(view, 0, hoa)
                }
                SVGA_3D_CMD_SETRENDERTARGET => self.process_surface(view, 2, hoa),
                SVGA_3D_CMD_SURFACE_COPY | SVGA_3D_CMD_SURFACE_STRETCHBLT => {
                    self.process_surface(view, 0, hoa)?;
                    self.process_surface(view, 3, hoa)
                }
                SVGA_3D_CMD_SURFACE_DMA => self.process_surface(view, 3, hoa),
                SVGA_3D_CMD_BLIT_SURFACE_TO_SCREEN => self.process_surface(view, 0, hoa),
                SVGA_3D_CMD_GENERATE_MIPMAPS
                | SVGA_3D_CMD_ACTIVATE_SURFACE
                | SVGA_3D_CMD_DEACTIVATE_SURFACE => self.process_surface(view, 0, hoa),
                SVGA_3D_CMD_SETTEXTURESTATE => {
                    // cid, then {stage, name, value} triples.
                    let num_states = view.payload_dwords().saturating_sub(1) / 3;
                    for i in 0..num_states {
                        let base = 1 + i * 3;
                        if view.dword(base + 1)? == SVGA3D_TS_BIND_TEXTURE {
                            self.process_surface(view, base + 2, hoa)?;
                        }
                    }
                    Ok(())
                }
                SVGA_3D_CMD_DRAW_PRIMITIVES => {
                    if view.payload_dwords() < 3 {
                        return Err(ErrorKind::IllegalInstruction.into());
                    }
                    let num_decls = view.dword(1)? as usize;
                    let num_ranges = view.dword(2)? as usize;
                    if num_decls > SVGA3D_MAX_VERTEX_ARRAYS as usize
                        || num_ranges > SVGA3D_MAX_DRAW_PRIMITIVE_RANGES as usize
                    {
                        return Err(ErrorKind::IllegalInstruction.into());
                    }
                    // Each vertex declaration and primitive range is seven
                    // dwords; the surface id sits at +4 and +2 respectively.
                    if view.payload_dwords() < 3 + (num_decls + num_ranges) * 7 {
                        return Err(ErrorKind::IllegalInstruction.into());
                    }
                    for i in 0..num_decls {
                        self.process_surface(view, 3 + i * 7 + 4, hoa)?;
                    }
                    let ranges_base = 3 + num_decls * 7;
                    for i in 0..num_ranges {
                        self.process_surface(view, ranges_base + i * 7 + 2, hoa)?;
                    }
                    Ok(())
                }
                SVGA_3D_CMD_DX_SET_SINGLE_CONSTANT_BUFFER => self.process_surface(view, 2, hoa),
                SVGA_3D_CMD_DX_PRED_COPY_REGION => {
                    // srcSid at 2, dstSid at 0.
                    self.process_surface(view, 2, hoa)?;
                    self.process_surface(view, 0, hoa)
                }
                SVGA_3D_CMD_DX_DEFINE_RENDERTARGET_VIEW
                | SVGA_3D_CMD_DX_DEFINE_SHADERRESOURCE_VIEW => self.process_surface(view, 1, hoa),
                _ => Ok(()),
            }
        })();

        if result.is_err() {
            // Roll back the references this command took.
            while hoa.objects.len() > taken {
                let so = hoa.objects.pop().unwrap();
                self.surface_object_release(&so, true)?;
            }
        }
        result
    }

    /// Copy, validate and rewrite a client command stream into `target`.
    ///
    /// Both passes stop early when the target (or the metadata array) fills
    /// up; the returned lengths then describe the usable prefix and the
    /// status is `InsufficientDmaBuffer`.
    pub fn render_commands(
        &self,
        ctx: &SvgaContext,
        target: &mut [u8],
        source: &[u8],
    ) -> Result<RenderOutput> {
        // All commands consist of 32 bit dwords.
        if source.len() % 4 != 0 {
            return Err(ErrorKind::IllegalInstruction.into());
        }

        let mut status = RenderStatus::Complete;
        let mut src_off = 0usize;
        let mut dst_off = 0usize;

        // First pass: copy command records one by one, dispatching each to
        // its validator.
        while src_off < source.len() {
            let src_left = source.len() - src_off;
            if src_left < 8 {
                return Err(ErrorKind::IllegalInstruction.into());
            }

            let cmd_id = u32::from_le_bytes([
                source[src_off],
                source[src_off + 1],
                source[src_off + 2],
                source[src_off + 3],
            ]);
            // Only 3D commands are expected from the client encoder.
            if cmd_id < SVGA_3D_CMD_BASE || cmd_id >= SVGA_3D_CMD_MAX {
                return Err(ErrorKind::IllegalInstruction.into());
            }
            let size = u32::from_le_bytes([
                source[src_off + 4],
                source[src_off + 5],
                source[src_off + 6],
                source[src_off + 7],
            ]) as usize;
            let cmd_len = 8 + size;
            if cmd_len % 4 != 0 || src_left < cmd_len {
                return Err(ErrorKind::IllegalInstruction.into());
            }

            if target.len() - dst_off < cmd_len {
                status = RenderStatus::InsufficientDmaBuffer;
                break;
            }

            target[dst_off..dst_off + cmd_len]
                .copy_from_slice(&source[src_off..src_off + cmd_len]);

            let mut view = CmdView {
                buf: &mut target[dst_off..dst_off + cmd_len],
            };
            let handler = COMMAND_DESC[table_index(cmd_id)];
            handler(self, ctx, &mut view)?;

            src_off += cmd_len;
            dst_off += cmd_len;
        }

        // Second pass: enumerate surface references, collect them into the
        // render metadata and rewrite shared ids.
        let mut hoa = HwRenderData::new();
        let mut walked = 0usize;
        while walked < dst_off {
            let size = u32::from_le_bytes([
                target[walked + 4],
                target[walked + 5],
                target[walked + 6],
                target[walked + 7],
            ]) as usize;
            let cmd_len = 8 + size;

            let mut view = CmdView {
                buf: &mut target[walked..walked + cmd_len],
            };
            match self.update_command(&mut view, &mut hoa) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::InsufficientDmaBuffer => {
                    // Out of metadata slots: truncate the frame to the
                    // commands processed so far.
                    status = RenderStatus::InsufficientDmaBuffer;
                    dst_off = walked;
                    src_off = walked;
                    break;
                }
                Err(e) => {
                    self.render_release(&mut hoa)?;
                    return Err(e);
                }
            }
            walked += cmd_len;
        }

        trace!(
            "render: {} -> {} bytes, {} refs, {:?}",
            src_off,
            dst_off,
            hoa.objects.len(),
            status
        );

        Ok(RenderOutput {
            status,
            target_len: dst_off,
            processed_len: src_off,
            render_data: if hoa.objects.is_empty() { None } else { Some(hoa) },
        })
    }

    fn render_release(&self, hoa: &mut HwRenderData) -> Result<()> {
        while let Some(so) = hoa.objects.pop() {
            self.surface_object_release(&so, true)?;
        }
        Ok(())
    }

    /// Release the references captured for a completed submission.
    /// `can_block` is false when called from the DPC.
    pub fn render_complete(&self, mut data: Box<HwRenderData>, can_block: bool) {
        while let Some(so) = data.objects.pop() {
            let _ = self.surface_object_release(&so, can_block);
        }
    }
}
