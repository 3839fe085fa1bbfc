//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! This crate is a part of GaSVGA and implements the driver core for the
//! VMSVGA paravirtual display device: command submission over the legacy
//! FIFO ring or the command-buffer transport, host-object and guest-memory
//! accounting, command-stream rewriting, and the fence/preemption engine.
//!
//! The kernel environment of the original driver is modelled explicitly so
//! the whole core runs in user space: guest-physical memory comes from a
//! [`mem::MemPool`], port I/O goes through the [`hw::Ports`] trait and
//! interrupt/DPC entry points are plain methods on [`svga::Svga`].
pub mod cb;
pub mod enc;
pub mod fence;
pub mod fifo;
pub mod gbo;
pub mod gmr;
pub mod hostobj;
pub mod hw;
pub mod mem;
pub mod mob;
pub mod otable;
pub mod present;
pub mod render;
pub mod svga;

pub use self::fence::FenceStatus;
pub use self::hostobj::{GbSurfaceCreateParams, SurfaceCreateParams, SurfaceObject};
pub use self::hw::{FifoPage, Ports};
pub use self::mem::{MemObj, MemPool};
pub use self::mob::Mob;
pub use self::present::{BltOp, BltResult, PatchEntry, PresentArgs, TransferDirection};
pub use self::render::{HwRenderData, RenderOutput, RenderStatus, SvgaContext};
pub use self::svga::{
    new_owner_id, DeviceConfig, DmaBuf, HwInfo, NotifySink, OwnerId, Reserve, SubmitArgs, Svga,
};
