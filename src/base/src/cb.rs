//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The command-buffer header and related constants.
//!
//! A command buffer is submitted by writing the 64-byte-aligned physical
//! address of its header into `SVGA_REG_COMMAND_HIGH`/`LOW`; the lower 6 bits
//! of the low word select the command-buffer context (queue).
use bitflags::bitflags;

/// Command-buffer context selector encoded in the low address bits.
pub const SVGA_CB_CONTEXT_MASK: u64 = 0x3F;
pub const SVGA_CB_CONTEXT_0: u32 = 0;
pub const SVGA_CB_CONTEXT_DEVICE: u32 = 0x3F;

/// Maximum buffers queued per command-buffer context.
pub const SVGA_CB_MAX_QUEUED_PER_CONTEXT: u32 = 8;

/// Upper bound of a single command buffer.
pub const SVGA_CB_MAX_COMMAND_SIZE: u32 = 32 * 1024 * 1024;

/// Header status values, written back by the device.
pub const SVGA_CB_STATUS_NONE: u32 = 0;
pub const SVGA_CB_STATUS_COMPLETED: u32 = 1;
pub const SVGA_CB_STATUS_QUEUE_FULL: u32 = 2;
pub const SVGA_CB_STATUS_COMMAND_ERROR: u32 = 3;
pub const SVGA_CB_STATUS_CB_HEADER_ERROR: u32 = 4;
pub const SVGA_CB_STATUS_PREEMPTED: u32 = 5;
pub const SVGA_CB_STATUS_SUBMISSION_ERROR: u32 = 6;
pub const SVGA_CB_STATUS_PARTIAL_COMPLETE: u32 = 7;

bitflags! {
    /// Header flags.
    pub struct CbFlags: u32 {
        const NONE       = 0;
        /// `dx_context` selects the DX context of the commands.
        const DX_CONTEXT = 1 << 0;
    }
}

/// The page-aligned 64-byte command buffer header.
#[derive(Clone, Copy)]
#[repr(C, packed)]
pub struct SvgaCbHeader {
    pub status: u32,
    pub error_offset: u32,
    /// `0` for driver buffers, non-zero for preemptible client buffers.
    pub id: u64,
    pub flags: u32,
    /// Length of the command data in bytes.
    pub length: u32,
    /// Physical address of the command data.
    pub ptr: u64,
    pub offset: u32,
    pub dx_context: u32,
    pub must_be_zero: [u32; 6],
}

impl Default for SvgaCbHeader {
    fn default() -> Self {
        SvgaCbHeader {
            status: SVGA_CB_STATUS_NONE,
            error_offset: 0,
            id: 0,
            flags: 0,
            length: 0,
            ptr: 0,
            offset: 0,
            dx_context: 0,
            must_be_zero: [0; 6],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_64_bytes() {
        assert_eq!(std::mem::size_of::<SvgaCbHeader>(), 64);
    }
}
