//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Device registers, capability bits and the FIFO shared page layout.
//!
//! Registers are accessed through an index/value port pair; the FIFO shared
//! page is a dword array whose reserved prefix holds device-maintained
//! registers, followed by the command ring `[MIN, MAX)`.
use bitflags::bitflags;

/*
 * Port offsets relative to the I/O base.
 */
pub const SVGA_INDEX_PORT: u16 = 0;
pub const SVGA_VALUE_PORT: u16 = 1;
pub const SVGA_IRQSTATUS_PORT: u16 = 8;

/*
 * Register indices (written to the index port).
 */
pub const SVGA_REG_ID: u32 = 0;
pub const SVGA_REG_ENABLE: u32 = 1;
pub const SVGA_REG_WIDTH: u32 = 2;
pub const SVGA_REG_HEIGHT: u32 = 3;
pub const SVGA_REG_MAX_WIDTH: u32 = 4;
pub const SVGA_REG_MAX_HEIGHT: u32 = 5;
pub const SVGA_REG_BITS_PER_PIXEL: u32 = 7;
pub const SVGA_REG_FB_START: u32 = 13;
pub const SVGA_REG_FB_OFFSET: u32 = 14;
pub const SVGA_REG_VRAM_SIZE: u32 = 15;
pub const SVGA_REG_FB_SIZE: u32 = 16;
pub const SVGA_REG_CAPABILITIES: u32 = 17;
pub const SVGA_REG_MEM_START: u32 = 18;
pub const SVGA_REG_MEM_SIZE: u32 = 19;
pub const SVGA_REG_CONFIG_DONE: u32 = 20;
pub const SVGA_REG_SYNC: u32 = 21;
pub const SVGA_REG_BUSY: u32 = 22;
pub const SVGA_REG_MEM_REGS: u32 = 30;
pub const SVGA_REG_IRQMASK: u32 = 33;
pub const SVGA_REG_GMR_MAX_IDS: u32 = 43;
pub const SVGA_REG_TRACES: u32 = 45;
pub const SVGA_REG_GMRS_MAX_PAGES: u32 = 46;
pub const SVGA_REG_MEMORY_SIZE: u32 = 47;
pub const SVGA_REG_COMMAND_LOW: u32 = 48;
pub const SVGA_REG_COMMAND_HIGH: u32 = 49;
pub const SVGA_REG_DEV_CAP: u32 = 52;

/// Version negotiation id: write to `SVGA_REG_ID`, read back to probe.
pub const SVGA_ID_2: u32 = 0x9000_0002;

/// `SVGA_REG_ENABLE` bits.
pub const SVGA_REG_ENABLE_DISABLE: u32 = 0;
pub const SVGA_REG_ENABLE_ENABLE: u32 = 1 << 0;
pub const SVGA_REG_ENABLE_HIDE: u32 = 1 << 1;

/// Reason value written to `SVGA_REG_SYNC`.
pub const SVGA_SYNC_GENERIC: u32 = 1;

bitflags! {
    /// `SVGA_REG_CAPABILITIES` bits.
    pub struct Caps: u32 {
        const RECT_COPY         = 1 << 1;
        const CURSOR            = 1 << 5;
        const ALPHA_CURSOR      = 1 << 9;
        const EXTENDED_FIFO     = 1 << 15;
        const PITCHLOCK         = 1 << 17;
        const IRQMASK           = 1 << 18;
        const GMR               = 1 << 20;
        const TRACES            = 1 << 21;
        const GMR2              = 1 << 22;
        const SCREEN_OBJECT_2   = 1 << 23;
        const COMMAND_BUFFERS   = 1 << 24;
        const CMD_BUFFERS_2     = 1 << 26;
        const GBOBJECTS         = 1 << 27;
        const DX                = 1 << 28;
    }
}

bitflags! {
    /// Interrupt cause bits (`SVGA_REG_IRQMASK` / the IRQ status port).
    pub struct IrqFlags: u32 {
        const ANY_FENCE      = 1 << 0;
        const COMMAND_BUFFER = 1 << 1;
        const ERROR          = 1 << 2;
    }
}

/*
 * FIFO shared page: dword indices of the reserved prefix.
 */
pub const SVGA_FIFO_MIN: u32 = 0;
pub const SVGA_FIFO_MAX: u32 = 1;
pub const SVGA_FIFO_NEXT_CMD: u32 = 2;
pub const SVGA_FIFO_STOP: u32 = 3;
pub const SVGA_FIFO_CAPABILITIES: u32 = 4;
pub const SVGA_FIFO_FLAGS: u32 = 5;
pub const SVGA_FIFO_FENCE: u32 = 6;
pub const SVGA_FIFO_RESERVED: u32 = 14;
pub const SVGA_FIFO_BUSY: u32 = 28;

/// Number of reserved dwords at the start of the FIFO page.
pub const SVGA_FIFO_NUM_REGS: u32 = 293;

bitflags! {
    /// `SVGA_FIFO_CAPABILITIES` bits.
    pub struct FifoCaps: u32 {
        const FENCE           = 1 << 0;
        const PITCHLOCK       = 1 << 2;
        const CURSOR_BYPASS_3 = 1 << 4;
        const ESCAPE          = 1 << 5;
        const RESERVE         = 1 << 6;
        const SCREEN_OBJECT   = 1 << 7;
        const GMR2            = 1 << 8;
        const SCREEN_OBJECT_2 = 1 << 9;
    }
}

/// GMR id addressing the legacy VRAM framebuffer.
pub const SVGA_GMR_FRAMEBUFFER: u32 = 0xFFFF_FFFF;
