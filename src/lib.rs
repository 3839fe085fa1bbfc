//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! # GaSVGA — VMSVGA guest command submission and resource accounting
//!
//! GaSVGA is the kernel-side core of a guest graphics driver for the VMSVGA
//! paravirtual display device, reworked as a host-testable library. It
//! mediates between a user-mode command producer and the device: commands
//! are marshalled through either the legacy FIFO ring or physically
//! addressed command buffers, host-resident resources are kept alive while
//! referenced by in-flight work, and guest-backed objects describe guest
//! memory to the host through multi-level page tables.
//!
//! The crates:
//!
//! - [`gasvga_base`] — the device wire protocol: registers, commands, the
//!   command-buffer header, error types.
//! - [`gasvga_common`] — small self-contained utilities.
//! - [`gasvga_device`] — the driver core itself.
pub use gasvga_base as base;
pub use gasvga_common as common;
pub use gasvga_device as device;

pub use gasvga_base::{Error, ErrorKind, Result};
pub use gasvga_device::{DeviceConfig, NotifySink, Svga};
