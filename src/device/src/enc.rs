//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Command encoders.
//!
//! Each function writes exactly one well-formed command record into
//! caller-supplied memory and returns the number of bytes written. Encoders
//! are pure: no locking, no allocation, no device access.
//!
//! The `gen_*` variants additionally implement the two-call sizing contract
//! used by DMA-program builders: the matching `*_len` value is the full
//! required size, and a too-small output buffer fails with
//! `InsufficientDmaBuffer` without writing anything.
use std::mem::size_of;

use gasvga_base::cmd::*;
use gasvga_base::reg::SVGA_GMR_FRAMEBUFFER;
use gasvga_base::{ErrorKind, MobFormat, Ppn64, Result};

/// Total record length of a FIFO command with payload `T`.
pub fn fifo_cmd_len<T>() -> usize {
    4 + size_of::<T>()
}

/// Total record length of a 3D command with payload `T`.
pub fn cmd3d_len<T>() -> usize {
    size_of::<Svga3dCmdHeader>() + size_of::<T>()
}

/// Copy a plain-old-data command struct into a byte buffer. Also used by the
/// transport paths that reserve header space separately and write only the
/// command payload.
pub(crate) fn put<T: Copy>(buf: &mut [u8], off: usize, v: T) -> usize {
    let n = size_of::<T>();
    let bytes = unsafe { std::slice::from_raw_parts(&v as *const T as *const u8, n) };
    buf[off..off + n].copy_from_slice(bytes);
    off + n
}

fn put_bytes(buf: &mut [u8], off: usize, v: &[u8]) -> usize {
    buf[off..off + v.len()].copy_from_slice(v);
    off + v.len()
}

fn put_3d_header<T>(buf: &mut [u8], id: u32, extra: usize) -> usize {
    put(
        buf,
        0,
        Svga3dCmdHeader {
            id,
            size: (size_of::<T>() + extra) as u32,
        },
    )
}

/*
 * Legacy FIFO commands.
 */

pub fn cmd_define_screen(
    buf: &mut [u8],
    id: u32,
    activate: bool,
    x_origin: i32,
    y_origin: i32,
    width: u32,
    height: u32,
    primary: bool,
    vram_offset: u32,
    blank: bool,
) -> usize {
    let mut flags = ScreenFlags::MUST_BE_SET;
    if primary {
        flags |= ScreenFlags::IS_PRIMARY;
    }
    if !activate {
        flags |= ScreenFlags::DEACTIVATE;
    }
    if blank {
        flags |= ScreenFlags::BLANKING;
    }
    let off = put(buf, 0, SVGA_CMD_DEFINE_SCREEN);
    put(
        buf,
        off,
        SvgaFifoCmdDefineScreen {
            screen: SvgaScreenObject {
                struct_size: size_of::<SvgaScreenObject>() as u32,
                id,
                flags: flags.bits(),
                width,
                height,
                root_x: x_origin,
                root_y: y_origin,
                backing_ptr: SvgaGuestPtr {
                    gmr_id: SVGA_GMR_FRAMEBUFFER,
                    offset: vram_offset,
                },
                backing_pitch: width * 4,
                clone_count: 1,
            },
        },
    )
}

pub fn cmd_destroy_screen(buf: &mut [u8], id: u32) -> usize {
    let off = put(buf, 0, SVGA_CMD_DESTROY_SCREEN);
    put(buf, off, SvgaFifoCmdDestroyScreen { screen_id: id })
}

pub fn cmd_update(buf: &mut [u8], x: u32, y: u32, width: u32, height: u32) -> usize {
    let off = put(buf, 0, SVGA_CMD_UPDATE);
    put(
        buf,
        off,
        SvgaFifoCmdUpdate {
            x,
            y,
            width,
            height,
        },
    )
}

pub fn cmd_define_cursor(
    buf: &mut [u8],
    hotspot_x: u32,
    hotspot_y: u32,
    width: u32,
    height: u32,
    and_mask_depth: u32,
    xor_mask_depth: u32,
    and_mask: &[u8],
    xor_mask: &[u8],
) -> usize {
    let off = put(buf, 0, SVGA_CMD_DEFINE_CURSOR);
    let off = put(
        buf,
        off,
        SvgaFifoCmdDefineCursor {
            id: 0,
            hotspot_x,
            hotspot_y,
            width,
            height,
            and_mask_depth,
            xor_mask_depth,
        },
    );
    let off = put_bytes(buf, off, and_mask);
    put_bytes(buf, off, xor_mask)
}

pub fn cmd_define_alpha_cursor(
    buf: &mut [u8],
    hotspot_x: u32,
    hotspot_y: u32,
    width: u32,
    height: u32,
    image: &[u8],
) -> usize {
    let off = put(buf, 0, SVGA_CMD_DEFINE_ALPHA_CURSOR);
    let off = put(
        buf,
        off,
        SvgaFifoCmdDefineAlphaCursor {
            id: 0,
            hotspot_x,
            hotspot_y,
            width,
            height,
        },
    );
    put_bytes(buf, off, image)
}

pub fn cmd_fence(buf: &mut [u8], fence: u32) -> usize {
    let off = put(buf, 0, SVGA_CMD_FENCE);
    put(buf, off, SvgaFifoCmdFence { fence })
}

pub fn cmd_define_gmrfb(buf: &mut [u8], offset: u32, bytes_per_line: u32) -> usize {
    let off = put(buf, 0, SVGA_CMD_DEFINE_GMRFB);
    put(
        buf,
        off,
        SvgaFifoCmdDefineGMRFB {
            ptr: SvgaGuestPtr {
                gmr_id: SVGA_GMR_FRAMEBUFFER,
                offset,
            },
            bytes_per_line,
            format: GmrImageFormat::new(32, 24),
        },
    )
}

pub fn cmd_blit_gmrfb_to_screen(
    buf: &mut [u8],
    dest_screen_id: u32,
    src_x: i32,
    src_y: i32,
    dest_rect: &SignedRect,
) -> usize {
    let off = put(buf, 0, SVGA_CMD_BLIT_GMRFB_TO_SCREEN);
    put(
        buf,
        off,
        SvgaFifoCmdBlitGMRFBToScreen {
            src_origin: SignedPoint { x: src_x, y: src_y },
            dest_rect: *dest_rect,
            dest_screen_id,
        },
    )
}

pub fn cmd_blit_screen_to_gmrfb(
    buf: &mut [u8],
    src_screen_id: u32,
    dest_x: i32,
    dest_y: i32,
    src_rect: &SignedRect,
) -> usize {
    let off = put(buf, 0, SVGA_CMD_BLIT_SCREEN_TO_GMRFB);
    put(
        buf,
        off,
        SvgaFifoCmdBlitScreenToGMRFB {
            dest_origin: SignedPoint { x: dest_x, y: dest_y },
            src_rect: *src_rect,
            src_screen_id,
        },
    )
}

pub fn cmd_define_gmr2(buf: &mut [u8], gmr_id: u32, num_pages: u32) -> usize {
    let off = put(buf, 0, SVGA_CMD_DEFINE_GMR2);
    put(buf, off, SvgaFifoCmdDefineGMR2 { gmr_id, num_pages })
}

pub fn cmd_remap_gmr2_ppn64(buf: &mut [u8], gmr_id: u32, ppns: &[Ppn64]) -> usize {
    let off = put(buf, 0, SVGA_CMD_REMAP_GMR2);
    let mut off = put(
        buf,
        off,
        SvgaFifoCmdRemapGMR2 {
            gmr_id,
            flags: SVGA_REMAP_GMR2_PPN64,
            offset_pages: 0,
            num_pages: ppns.len() as u32,
        },
    );
    for &ppn in ppns {
        off = put(buf, off, ppn);
    }
    off
}

/*
 * 3D commands.
 */

pub fn cmd3d_define_context(buf: &mut [u8], cid: u32) -> usize {
    let off = put_3d_header::<Svga3dCmdDefineContext>(buf, SVGA_3D_CMD_CONTEXT_DEFINE, 0);
    put(buf, off, Svga3dCmdDefineContext { cid })
}

pub fn cmd3d_destroy_context(buf: &mut [u8], cid: u32) -> usize {
    let off = put_3d_header::<Svga3dCmdDestroyContext>(buf, SVGA_3D_CMD_CONTEXT_DESTROY, 0);
    put(buf, off, Svga3dCmdDestroyContext { cid })
}

pub fn cmd3d_dx_define_context(buf: &mut [u8], cid: u32) -> usize {
    let off = put_3d_header::<Svga3dCmdDXDefineContext>(buf, SVGA_3D_CMD_DX_DEFINE_CONTEXT, 0);
    put(buf, off, Svga3dCmdDXDefineContext { cid })
}

pub fn cmd3d_dx_destroy_context(buf: &mut [u8], cid: u32) -> usize {
    let off = put_3d_header::<Svga3dCmdDXDestroyContext>(buf, SVGA_3D_CMD_DX_DESTROY_CONTEXT, 0);
    put(buf, off, Svga3dCmdDXDestroyContext { cid })
}

pub fn cmd3d_define_surface(
    buf: &mut [u8],
    sid: u32,
    surface_flags: u32,
    format: u32,
    mip_levels: &[u32; SVGA3D_MAX_SURFACE_FACES],
    sizes: &[Svga3dSize],
) -> usize {
    let extra = sizes.len() * size_of::<Svga3dSize>();
    let off = put_3d_header::<Svga3dCmdDefineSurface>(buf, SVGA_3D_CMD_SURFACE_DEFINE, extra);
    let mut off = put(
        buf,
        off,
        Svga3dCmdDefineSurface {
            sid,
            surface_flags,
            format,
            face_num_mip_levels: *mip_levels,
        },
    );
    for size in sizes {
        off = put(buf, off, *size);
    }
    off
}

pub fn cmd3d_destroy_surface(buf: &mut [u8], sid: u32) -> usize {
    let off = put_3d_header::<Svga3dCmdDestroySurface>(buf, SVGA_3D_CMD_SURFACE_DESTROY, 0);
    put(buf, off, Svga3dCmdDestroySurface { sid })
}

/// Surface → VRAM framebuffer transfer covering `width`×`height` at the
/// given VRAM offset.
pub fn cmd3d_surface_dma_to_fb(
    buf: &mut [u8],
    sid: u32,
    width: u32,
    height: u32,
    vram_offset: u32,
) -> usize {
    cmd3d_surface_dma(
        buf,
        &SvgaGuestImage {
            ptr: SvgaGuestPtr {
                gmr_id: SVGA_GMR_FRAMEBUFFER,
                offset: vram_offset,
            },
            pitch: width * 4,
        },
        &Svga3dSurfaceImageId {
            sid,
            face: 0,
            mipmap: 0,
        },
        SVGA3D_READ_HOST_VRAM,
        0,
        0,
        0,
        0,
        width,
        height,
    )
}

pub fn cmd3d_surface_dma(
    buf: &mut [u8],
    guest: &SvgaGuestImage,
    surf: &Svga3dSurfaceImageId,
    transfer: u32,
    src_x: u32,
    src_y: u32,
    dst_x: u32,
    dst_y: u32,
    width: u32,
    height: u32,
) -> usize {
    let extra = size_of::<Svga3dCopyBox>() + size_of::<Svga3dCmdSurfaceDMASuffix>();
    let off = put_3d_header::<Svga3dCmdSurfaceDMA>(buf, SVGA_3D_CMD_SURFACE_DMA, extra);
    let off = put(
        buf,
        off,
        Svga3dCmdSurfaceDMA {
            guest: *guest,
            host: *surf,
            transfer,
        },
    );

    // The device defines the "source" of each copy box as the guest image
    // and the "destination" as the host image, regardless of direction.
    let (host_x, host_y, guest_x, guest_y) = if transfer == SVGA3D_READ_HOST_VRAM {
        (src_x, src_y, dst_x, dst_y)
    } else {
        (dst_x, dst_y, src_x, src_y)
    };
    let off = put(
        buf,
        off,
        Svga3dCopyBox {
            x: host_x,
            y: host_y,
            z: 0,
            w: width,
            h: height,
            d: 1,
            srcx: guest_x,
            srcy: guest_y,
            srcz: 0,
        },
    );
    put(
        buf,
        off,
        Svga3dCmdSurfaceDMASuffix {
            suffix_size: size_of::<Svga3dCmdSurfaceDMASuffix>() as u32,
            maximum_offset: u32::max_value(),
            flags: 0,
        },
    )
}

pub fn cmd3d_present(buf: &mut [u8], sid: u32, width: u32, height: u32) -> usize {
    let extra = size_of::<Svga3dCopyRect>();
    let off = put_3d_header::<Svga3dCmdPresent>(buf, SVGA_3D_CMD_PRESENT, extra);
    let off = put(buf, off, Svga3dCmdPresent { sid });
    put(
        buf,
        off,
        Svga3dCopyRect {
            x: 0,
            y: 0,
            w: width,
            h: height,
            srcx: 0,
            srcy: 0,
        },
    )
}

/// Clip rectangle coordinates are rewritten relative to the top-left corner
/// of `dest_rect`, as the device requires.
pub fn cmd3d_blit_surface_to_screen(
    buf: &mut [u8],
    sid: u32,
    src_rect: &SignedRect,
    dest_screen_id: u32,
    dest_rect: &SignedRect,
    clip_rects: &[SignedRect],
) -> usize {
    let extra = clip_rects.len() * size_of::<SignedRect>();
    let off = put_3d_header::<Svga3dCmdBlitSurfaceToScreen>(
        buf,
        SVGA_3D_CMD_BLIT_SURFACE_TO_SCREEN,
        extra,
    );
    let mut off = put(
        buf,
        off,
        Svga3dCmdBlitSurfaceToScreen {
            src_image: Svga3dSurfaceImageId {
                sid,
                face: 0,
                mipmap: 0,
            },
            src_rect: *src_rect,
            dest_screen_id,
            dest_rect: *dest_rect,
        },
    );
    for clip in clip_rects {
        off = put(
            buf,
            off,
            SignedRect {
                left: clip.left - dest_rect.left,
                top: clip.top - dest_rect.top,
                right: clip.right - dest_rect.left,
                bottom: clip.bottom - dest_rect.top,
            },
        );
    }
    off
}

pub fn cmd3d_define_gb_mob64(
    buf: &mut [u8],
    mobid: u32,
    format: MobFormat,
    base: Ppn64,
    size_in_bytes: u32,
) -> usize {
    let off = put_3d_header::<Svga3dCmdDefineGBMob64>(buf, SVGA_3D_CMD_DEFINE_GB_MOB64, 0);
    put(
        buf,
        off,
        Svga3dCmdDefineGBMob64 {
            mobid,
            pt_depth: format as u32,
            base,
            size_in_bytes,
        },
    )
}

pub fn cmd3d_destroy_gb_mob(buf: &mut [u8], mobid: u32) -> usize {
    let off = put_3d_header::<Svga3dCmdDestroyGBMob>(buf, SVGA_3D_CMD_DESTROY_GB_MOB, 0);
    put(buf, off, Svga3dCmdDestroyGBMob { mobid })
}

pub fn cmd3d_mob_fence64(buf: &mut [u8], value: u64, mob_id: u32, mob_offset: u32) -> usize {
    let off = put_3d_header::<Svga3dCmdDXMobFence64>(buf, SVGA_3D_CMD_DX_MOB_FENCE_64, 0);
    put(
        buf,
        off,
        Svga3dCmdDXMobFence64 {
            value,
            mob_id,
            mob_offset,
        },
    )
}

/*
 * Device-context (synchronous control queue) commands.
 */

pub fn cmd_dc_start_stop(buf: &mut [u8], enable: bool, context: u32) -> usize {
    let off = put(buf, 0, SVGA_DC_CMD_START_STOP_CONTEXT);
    put(
        buf,
        off,
        SvgaDCCmdStartStop {
            enable: enable as u32,
            context,
        },
    )
}

/*
 * Two-call DMA-program builders.
 */

pub fn gen_present_len() -> usize {
    cmd3d_len::<Svga3dCmdPresent>() + size_of::<Svga3dCopyRect>()
}

pub fn gen_present(out: &mut [u8], sid: u32, width: u32, height: u32) -> Result<usize> {
    let required = gen_present_len();
    if out.len() < required {
        return Err(ErrorKind::InsufficientDmaBuffer.into());
    }
    Ok(cmd3d_present(out, sid, width, height))
}

pub fn gen_present_vram_len() -> usize {
    cmd3d_len::<Svga3dCmdSurfaceDMA>()
        + size_of::<Svga3dCopyBox>()
        + size_of::<Svga3dCmdSurfaceDMASuffix>()
        + fifo_cmd_len::<SvgaFifoCmdUpdate>()
}

/// Surface → VRAM DMA followed by a screen update.
pub fn gen_present_vram(
    out: &mut [u8],
    sid: u32,
    width: u32,
    height: u32,
    vram_offset: u32,
) -> Result<usize> {
    let required = gen_present_vram_len();
    if out.len() < required {
        return Err(ErrorKind::InsufficientDmaBuffer.into());
    }
    let off = cmd3d_surface_dma_to_fb(out, sid, width, height, vram_offset);
    Ok(off + cmd_update(&mut out[off..], 0, 0, width, height))
}

pub fn gen_surface_dma_len() -> usize {
    cmd3d_len::<Svga3dCmdSurfaceDMA>()
        + size_of::<Svga3dCopyBox>()
        + size_of::<Svga3dCmdSurfaceDMASuffix>()
}

pub fn gen_surface_dma(
    out: &mut [u8],
    guest: &SvgaGuestImage,
    surf: &Svga3dSurfaceImageId,
    transfer: u32,
    src_x: u32,
    src_y: u32,
    dst_x: u32,
    dst_y: u32,
    width: u32,
    height: u32,
) -> Result<usize> {
    if out.len() < gen_surface_dma_len() {
        return Err(ErrorKind::InsufficientDmaBuffer.into());
    }
    Ok(cmd3d_surface_dma(
        out, guest, surf, transfer, src_x, src_y, dst_x, dst_y, width, height,
    ))
}

pub fn gen_define_gmrfb_len() -> usize {
    fifo_cmd_len::<SvgaFifoCmdDefineGMRFB>()
}

pub fn gen_define_gmrfb(out: &mut [u8], offset: u32, bytes_per_line: u32) -> Result<usize> {
    if out.len() < gen_define_gmrfb_len() {
        return Err(ErrorKind::InsufficientDmaBuffer.into());
    }
    Ok(cmd_define_gmrfb(out, offset, bytes_per_line))
}

pub fn gen_blit_gmrfb_to_screen_len() -> usize {
    fifo_cmd_len::<SvgaFifoCmdBlitGMRFBToScreen>()
}

pub fn gen_blit_gmrfb_to_screen(
    out: &mut [u8],
    dest_screen_id: u32,
    src_x: i32,
    src_y: i32,
    dest_rect: &SignedRect,
) -> Result<usize> {
    if out.len() < gen_blit_gmrfb_to_screen_len() {
        return Err(ErrorKind::InsufficientDmaBuffer.into());
    }
    Ok(cmd_blit_gmrfb_to_screen(
        out,
        dest_screen_id,
        src_x,
        src_y,
        dest_rect,
    ))
}

pub fn gen_blit_screen_to_gmrfb_len() -> usize {
    fifo_cmd_len::<SvgaFifoCmdBlitScreenToGMRFB>()
}

pub fn gen_blit_screen_to_gmrfb(
    out: &mut [u8],
    src_screen_id: u32,
    dest_x: i32,
    dest_y: i32,
    src_rect: &SignedRect,
) -> Result<usize> {
    if out.len() < gen_blit_screen_to_gmrfb_len() {
        return Err(ErrorKind::InsufficientDmaBuffer.into());
    }
    Ok(cmd_blit_screen_to_gmrfb(
        out,
        src_screen_id,
        dest_x,
        dest_y,
        src_rect,
    ))
}

pub fn gen_define_cursor_len(and_mask: &[u8], xor_mask: &[u8]) -> usize {
    fifo_cmd_len::<SvgaFifoCmdDefineCursor>() + and_mask.len() + xor_mask.len()
}

pub fn gen_define_cursor(
    out: &mut [u8],
    hotspot_x: u32,
    hotspot_y: u32,
    width: u32,
    height: u32,
    and_mask_depth: u32,
    xor_mask_depth: u32,
    and_mask: &[u8],
    xor_mask: &[u8],
) -> Result<usize> {
    if out.len() < gen_define_cursor_len(and_mask, xor_mask) {
        return Err(ErrorKind::InsufficientDmaBuffer.into());
    }
    Ok(cmd_define_cursor(
        out,
        hotspot_x,
        hotspot_y,
        width,
        height,
        and_mask_depth,
        xor_mask_depth,
        and_mask,
        xor_mask,
    ))
}

pub fn gen_define_alpha_cursor_len(image: &[u8]) -> usize {
    fifo_cmd_len::<SvgaFifoCmdDefineAlphaCursor>() + image.len()
}

pub fn gen_define_alpha_cursor(
    out: &mut [u8],
    hotspot_x: u32,
    hotspot_y: u32,
    width: u32,
    height: u32,
    image: &[u8],
) -> Result<usize> {
    if out.len() < gen_define_alpha_cursor_len(image) {
        return Err(ErrorKind::InsufficientDmaBuffer.into());
    }
    Ok(cmd_define_alpha_cursor(
        out, hotspot_x, hotspot_y, width, height, image,
    ))
}

/// Result of [`gen_blit_surface_to_screen`].
pub struct BlitSurfaceOut {
    pub written: usize,
    /// How many of the requested clip rectangles made it into the command.
    pub rects_out: usize,
}

pub fn gen_blit_surface_to_screen_len(num_clip_rects: usize) -> usize {
    cmd3d_len::<Svga3dCmdBlitSurfaceToScreen>() + num_clip_rects * size_of::<SignedRect>()
}

/// Emits the blit with as many clip rectangles as fit. Fails with
/// `InsufficientDmaBuffer` if the command itself does not fit or no
/// rectangle would (the required size reported by the `_len` companion
/// covers all rectangles).
pub fn gen_blit_surface_to_screen(
    out: &mut [u8],
    sid: u32,
    src_rect: &SignedRect,
    dest_screen_id: u32,
    dest_rect: &SignedRect,
    clip_rects: &[SignedRect],
) -> Result<BlitSurfaceOut> {
    let base = gen_blit_surface_to_screen_len(0);
    let max_rects = if out.len() >= base {
        (out.len() - base) / size_of::<SignedRect>()
    } else {
        0
    };
    let rects_out = clip_rects.len().min(max_rects);

    if out.len() < base || (!clip_rects.is_empty() && rects_out == 0) {
        return Err(ErrorKind::InsufficientDmaBuffer.into());
    }

    let written = cmd3d_blit_surface_to_screen(
        out,
        sid,
        src_rect,
        dest_screen_id,
        dest_rect,
        &clip_rects[..rects_out],
    );
    Ok(BlitSurfaceOut { written, rects_out })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_record() {
        let mut buf = [0u8; 8];
        assert_eq!(cmd_fence(&mut buf, 0x1234), 8);
        assert_eq!(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]), SVGA_CMD_FENCE);
        assert_eq!(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]), 0x1234);
    }

    #[test]
    fn present_header_length_matches() {
        let mut buf = vec![0u8; gen_present_len()];
        let n = gen_present(&mut buf, 7, 640, 480).unwrap();
        assert_eq!(n, buf.len());
        let size = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        assert_eq!(size as usize, n - 8);
    }

    #[test]
    fn two_call_contract() {
        let mut small = [0u8; 4];
        assert_eq!(
            gen_present(&mut small, 1, 2, 3).unwrap_err().kind(),
            gasvga_base::ErrorKind::InsufficientDmaBuffer
        );
    }

    #[test]
    fn blit_clip_rects_are_relative_to_dest() {
        let dest = SignedRect {
            left: 100,
            top: 50,
            right: 200,
            bottom: 150,
        };
        let clip = SignedRect {
            left: 110,
            top: 60,
            right: 120,
            bottom: 70,
        };
        let mut buf = vec![0u8; gen_blit_surface_to_screen_len(1)];
        let out = gen_blit_surface_to_screen(&mut buf, 9, &dest, 0, &dest, &[clip]).unwrap();
        assert_eq!(out.rects_out, 1);
        let rect_off = out.written - 16;
        let left = i32::from_le_bytes([
            buf[rect_off],
            buf[rect_off + 1],
            buf[rect_off + 2],
            buf[rect_off + 3],
        ]);
        assert_eq!(left, 10);
    }

    #[test]
    fn blit_truncates_rects_to_fit() {
        let r = SignedRect::default();
        let clips = [r; 4];
        // Room for the command and only two rectangles.
        let mut buf = vec![0u8; gen_blit_surface_to_screen_len(2)];
        let out = gen_blit_surface_to_screen(&mut buf, 1, &r, 0, &r, &clips).unwrap();
        assert_eq!(out.rects_out, 2);
    }
}
