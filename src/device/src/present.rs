//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Present and paging DMA programs.
//!
//! Builders that translate a present/paging request plus a rectangle list
//! into a command sequence in a caller-supplied DMA buffer. Commands whose
//! guest pointers the framework must relocate get a patch-location entry of
//! `{allocation index, command offset within the buffer, byte to patch}`.
//! When the buffer fills up mid-list, the result carries the number of
//! rectangles already emitted so the next call resumes there.
//!
//! SysMem↔VRAM paging transfers have no device command; they are performed
//! in software under the paging lock.
use gasvga_base::cmd::SignedRect;
use gasvga_base::{ErrorKind, Result};

use crate::enc;
use crate::svga::Svga;

/// A guest-address relocation the framework applies before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchEntry {
    /// Index of the allocation the address belongs to.
    pub allocation_index: u32,
    /// Offset of the command within the DMA buffer.
    pub dma_offset: u32,
    /// Offset of the address field within that command.
    pub patch_offset: u32,
}

/// Byte offset of `ptr.offset` inside a `DEFINE_GMRFB` record.
const GMRFB_OFFSET_FIELD: u32 = 8;
/// Byte offset of `guest.ptr.offset` inside a `SURFACE_DMA` record.
const SURFACE_DMA_OFFSET_FIELD: u32 = 12;

/// One present/paging blit program.
#[derive(Debug, Clone, Copy)]
pub enum BltOp {
    /// Shadow surface in VRAM → screen.
    VramToScreen {
        vram_offset: u32,
        pitch: u32,
        screen: u32,
    },
    /// Screen readback into a VRAM staging surface.
    ScreenToVram {
        vram_offset: u32,
        pitch: u32,
        screen: u32,
    },
    /// GPU surface → screen.
    SurfaceToScreen { sid: u32, screen: u32 },
    /// GPU surface → VRAM framebuffer.
    SurfaceToVram {
        sid: u32,
        vram_offset: u32,
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct PresentArgs<'a> {
    pub op: BltOp,
    pub rects: &'a [SignedRect],
    /// Resume point from an earlier partial build.
    pub start_rect: usize,
    /// Allocation index used for VRAM patch entries.
    pub vram_alloc_index: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct BltResult {
    /// Bytes emitted into the DMA buffer.
    pub bytes: usize,
    /// Rectangles processed so far, counting from the start of the list.
    pub rects_done: usize,
}

/// Direction of a software paging transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    SysToVram,
    VramToSys,
}

/// Copy a sub-rectangle between two pixel buffers.
pub fn rect_copy(
    dst: &mut [u8],
    dst_pitch: usize,
    src: &[u8],
    src_pitch: usize,
    bytes_per_pixel: usize,
    rect: &SignedRect,
) {
    let row_bytes = rect.width() as usize * bytes_per_pixel;
    for row in 0..rect.height() as usize {
        let y = rect.top as usize + row;
        let dst_off = y * dst_pitch + rect.left as usize * bytes_per_pixel;
        let src_off = y * src_pitch + rect.left as usize * bytes_per_pixel;
        dst[dst_off..dst_off + row_bytes].copy_from_slice(&src[src_off..src_off + row_bytes]);
    }
}

impl Svga {
    /// Build the DMA program for a present/readback blit.
    ///
    /// Returns the bytes emitted and how far down the rectangle list the
    /// program got; `rects_done < rects.len()` means the caller should
    /// retry with the remaining rectangles (the usual
    /// `InsufficientDmaBuffer` flow). Fails only when not even one step
    /// fits.
    pub fn build_present(
        &self,
        args: &PresentArgs<'_>,
        out: &mut [u8],
        patches: &mut Vec<PatchEntry>,
    ) -> Result<BltResult> {
        let mut off = 0usize;
        let mut rects_done = args.start_rect;

        match args.op {
            BltOp::VramToScreen {
                vram_offset,
                pitch,
                screen,
            } => {
                off += self.emit_gmrfb(out, vram_offset, pitch, args.vram_alloc_index, patches)?;
                for rect in &args.rects[args.start_rect..] {
                    match enc::gen_blit_gmrfb_to_screen(
                        &mut out[off..],
                        screen,
                        rect.left,
                        rect.top,
                        rect,
                    ) {
                        Ok(n) => {
                            off += n;
                            rects_done += 1;
                        }
                        Err(_) => break,
                    }
                }
            }

            BltOp::ScreenToVram {
                vram_offset,
                pitch,
                screen,
            } => {
                off += self.emit_gmrfb(out, vram_offset, pitch, args.vram_alloc_index, patches)?;
                for rect in &args.rects[args.start_rect..] {
                    match enc::gen_blit_screen_to_gmrfb(
                        &mut out[off..],
                        screen,
                        rect.left,
                        rect.top,
                        rect,
                    ) {
                        Ok(n) => {
                            off += n;
                            rects_done += 1;
                        }
                        Err(_) => break,
                    }
                }
            }

            BltOp::SurfaceToScreen { sid, screen } => {
                for rect in &args.rects[args.start_rect..] {
                    match enc::gen_blit_surface_to_screen(&mut out[off..], sid, rect, screen, rect, &[])
                    {
                        Ok(blit) => {
                            off += blit.written;
                            rects_done += 1;
                        }
                        Err(_) => break,
                    }
                }
            }

            BltOp::SurfaceToVram {
                sid,
                vram_offset,
                width,
                height,
            } => {
                let n = enc::gen_present_vram(out, sid, width, height, vram_offset)?;
                patches.push(PatchEntry {
                    allocation_index: args.vram_alloc_index,
                    dma_offset: 0,
                    patch_offset: SURFACE_DMA_OFFSET_FIELD,
                });
                off += n;
                rects_done = args.rects.len();
            }
        }

        if rects_done == args.start_rect && !args.rects.is_empty() {
            // Not a single rectangle fit.
            return Err(ErrorKind::InsufficientDmaBuffer.into());
        }

        Ok(BltResult {
            bytes: off,
            rects_done,
        })
    }

    fn emit_gmrfb(
        &self,
        out: &mut [u8],
        vram_offset: u32,
        pitch: u32,
        alloc_index: u32,
        patches: &mut Vec<PatchEntry>,
    ) -> Result<usize> {
        let n = enc::gen_define_gmrfb(out, vram_offset, pitch)?;
        patches.push(PatchEntry {
            allocation_index: alloc_index,
            dma_offset: 0,
            patch_offset: GMRFB_OFFSET_FIELD,
        });
        Ok(n)
    }

    /// SysMem↔VRAM paging transfer, done in software under the paging lock.
    /// Succeeds without emitting any device command.
    pub fn paging_transfer(
        &self,
        direction: TransferDirection,
        vram_offset: usize,
        sys: &mut [u8],
    ) -> Result<()> {
        if vram_offset + sys.len() > self.vram.len() {
            return Err(ErrorKind::InvalidParameter.into());
        }

        let _guard = self.paging_lock.lock();
        match direction {
            TransferDirection::SysToVram => self.vram.write(vram_offset, sys),
            TransferDirection::VramToSys => self.vram.read(vram_offset, sys),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_copy_copies_only_the_rect() {
        let src = vec![0xAAu8; 16 * 16 * 4];
        let mut dst = vec![0u8; 16 * 16 * 4];
        let rect = SignedRect {
            left: 2,
            top: 3,
            right: 6,
            bottom: 5,
        };
        rect_copy(&mut dst, 16 * 4, &src, 16 * 4, 4, &rect);

        // Inside.
        assert_eq!(dst[3 * 64 + 2 * 4], 0xAA);
        // Outside.
        assert_eq!(dst[0], 0);
        assert_eq!(dst[2 * 64 + 2 * 4], 0);
        assert_eq!(dst[5 * 64 + 2 * 4], 0);
    }
}
