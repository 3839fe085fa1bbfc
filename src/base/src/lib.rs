//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! This crate is a part of GaSVGA and defines the wire-level protocol of the
//! VMSVGA paravirtual display device: registers, capability bits, the FIFO
//! shared page layout, command records, and the command-buffer header.
//!
//! Nothing in this crate talks to a device; it is shared by the driver core
//! (`gasvga_device`) and by device models used in tests.
pub mod cb;
pub mod cmd;
pub mod error;
pub mod reg;

pub use self::error::{Error, ErrorKind, Result};

/// Size of a guest page in bytes.
pub const PAGE_SIZE: usize = 4096;
/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 12;

/// Sentinel for "no identifier".
pub const SVGA3D_INVALID_ID: u32 = !0u32;

/// 64-bit physical page number (physical address right-shifted by
/// [`PAGE_SHIFT`]).
pub type Ppn64 = u64;

/// Page-table depth of a guest-backed object, as reported to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MobFormat {
    Invalid = 0,
    PtDepth64_0 = 1,
    PtDepth64_1 = 2,
    PtDepth64_2 = 3,
}
