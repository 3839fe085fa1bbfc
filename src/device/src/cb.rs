//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The command-buffer transport.
//!
//! When the device advertises `COMMAND_BUFFERS`, work is submitted as
//! physically-addressed buffers instead of through the FIFO ring. A buffer is
//! described by a 64-byte header from a small pool of page-aligned header
//! pages; writing the header's physical address into the command registers
//! hands it to the device.
//!
//! Three kinds of buffer exist: synchronous device-scope control commands,
//! driver-built miniport buffers, and client-supplied (preemptible) buffers.
//! Each command-buffer context is a queue with a bounded number of
//! outstanding submissions; overflow parks buffers on a pending queue that
//! the completion scan drains.
use log::{trace, warn};
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::mem::size_of;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gasvga_base::cb::*;
use gasvga_base::cmd::{SVGA_CMD_INVALID_CMD};
use gasvga_base::reg::{SVGA_REG_COMMAND_HIGH, SVGA_REG_COMMAND_LOW};
use gasvga_base::{ErrorKind, Result, PAGE_SIZE, SVGA3D_INVALID_ID};
use gasvga_common::IdBitmap;

use crate::mem::{MemObj, MemPool};
use crate::svga::Svga;

/// Number of pages backing the header pool.
const CB_HEADER_POOL_PAGES: u32 = 2;
const CB_HEADERS_PER_PAGE: u32 = (PAGE_SIZE / size_of::<SvgaCbHeader>()) as u32;

/// Callback run when the buffer carrying it completes.
pub type CompletionFn = Box<dyn FnOnce(&Svga) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CbKind {
    /// Synchronous control commands on the device queue.
    DeviceContext,
    /// Driver-owned kernel memory, asynchronous.
    Miniport,
    /// Client-supplied physical range, asynchronous and preemptible.
    Umd,
}

/// A pool of command-buffer headers. The physical address of a header is the
/// page's physical base plus the header's index within the page.
pub(crate) struct HeaderPool {
    pages: Vec<MemObj>,
    bits: Mutex<IdBitmap>,
}

impl HeaderPool {
    fn new(mem: &Arc<MemPool>) -> Result<Self> {
        let mut pages = Vec::with_capacity(CB_HEADER_POOL_PAGES as usize);
        for _ in 0..CB_HEADER_POOL_PAGES {
            pages.push(mem.alloc_pages(1)?);
        }
        Ok(Self {
            pages,
            bits: Mutex::new(IdBitmap::new(CB_HEADER_POOL_PAGES * CB_HEADERS_PER_PAGE)),
        })
    }

    fn location(&self, handle: u32) -> (&MemObj, usize) {
        let page = &self.pages[(handle / CB_HEADERS_PER_PAGE) as usize];
        let offset = (handle % CB_HEADERS_PER_PAGE) as usize * size_of::<SvgaCbHeader>();
        (page, offset)
    }

    fn alloc(&self) -> Result<(u32, u64)> {
        let handle = self
            .bits
            .lock()
            .alloc()
            .ok_or(ErrorKind::InsufficientResources)?;
        let (page, offset) = self.location(handle);
        Ok((handle, page.base_phys() + offset as u64))
    }

    fn free(&self, handle: u32) {
        let freed = self.bits.lock().free(handle);
        debug_assert!(freed);
    }

    fn write(&self, handle: u32, header: &SvgaCbHeader) {
        let (page, offset) = self.location(handle);
        let bytes = unsafe {
            std::slice::from_raw_parts(
                header as *const SvgaCbHeader as *const u8,
                size_of::<SvgaCbHeader>(),
            )
        };
        page.write(offset, bytes);
    }

    fn read_status(&self, handle: u32) -> u32 {
        let (page, offset) = self.location(handle);
        let mut b = [0u8; 4];
        page.read(offset, &mut b);
        u32::from_le_bytes(b)
    }
}

/// One queued work unit.
pub(crate) struct CmdBuf {
    pub kind: CbKind,
    pub dx_context: u32,
    /// Buffer capacity in bytes.
    pub capacity: u32,
    /// Bytes of commands written so far.
    pub len: u32,
    /// Command bytes for non-client buffers; copied to `page` at submit.
    pub staging: Vec<u8>,
    /// DMA page(s) of a driver-built buffer.
    pub page: Option<MemObj>,
    /// Physical base of a client-supplied buffer.
    pub umd_phys: u64,
    // Reserve/commit scratchpad.
    pub reserved_header: u32,
    pub reserved_len: u32,
    pub reserved_id: u32,
    /// Header-pool handle once submitted.
    pub header: Option<u32>,
    pub header_phys: u64,
    pub completion: Vec<CompletionFn>,
}

impl std::fmt::Debug for CmdBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmdBuf")
            .field("kind", &self.kind)
            .field("dx_context", &self.dx_context)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[derive(Debug, Default)]
pub(crate) struct CbQueue {
    pub submitted: VecDeque<Box<CmdBuf>>,
    pub pending: VecDeque<Box<CmdBuf>>,
    pub submitted_count: u32,
}

/// State of the command-buffer transport.
pub(crate) struct CbState {
    pub header_pool: HeaderPool,
    /// The buffer currently accepting reservations. The mutex is held from
    /// reserve until the matching commit.
    pub current: Mutex<Option<Box<CmdBuf>>>,
    /// Asynchronous command-buffer contexts; index = context id.
    pub queues: Mutex<Vec<CbQueue>>,
    pub max_queued: u32,
}

impl CbState {
    pub fn new(mem: &Arc<MemPool>, max_queued: u32) -> Result<Self> {
        Ok(Self {
            header_pool: HeaderPool::new(mem)?,
            current: Mutex::new(None),
            queues: Mutex::new(vec![CbQueue::default()]),
            max_queued,
        })
    }
}

/// An open reservation in the current miniport buffer. Holds the
/// current-buffer mutex until commit or drop.
pub struct CbReserve<'a> {
    guard: MutexGuard<'a, Option<Box<CmdBuf>>>,
    committed: bool,
}

impl<'a> CbReserve<'a> {
    pub fn body_mut(&mut self) -> &mut [u8] {
        let cb = self.guard.as_mut().unwrap();
        let start = (cb.len + cb.reserved_header) as usize;
        let end = start + cb.reserved_len as usize;
        &mut cb.staging[start..end]
    }

    /// Write the command header (if any) and advance the buffer cursor by
    /// the actual command size.
    pub fn commit(mut self, actual: u32) {
        let cb = self.guard.as_mut().unwrap();
        debug_assert!(actual <= cb.reserved_len);
        let actual = actual.min(cb.reserved_len);

        let at = cb.len as usize;
        match cb.reserved_header {
            8 => {
                cb.staging[at..at + 4].copy_from_slice(&cb.reserved_id.to_le_bytes());
                cb.staging[at + 4..at + 8].copy_from_slice(&actual.to_le_bytes());
            }
            4 => {
                cb.staging[at..at + 4].copy_from_slice(&cb.reserved_id.to_le_bytes());
            }
            _ => debug_assert_eq!(cb.reserved_header, 0),
        }

        cb.len += cb.reserved_header + actual;
        cb.reserved_header = 0;
        cb.reserved_len = 0;
        cb.reserved_id = 0;
        self.committed = true;
    }
}

impl<'a> Drop for CbReserve<'a> {
    fn drop(&mut self) {
        if !self.committed {
            if let Some(cb) = self.guard.as_mut() {
                cb.reserved_header = 0;
                cb.reserved_len = 0;
                cb.reserved_id = 0;
            }
        }
    }
}

impl Svga {
    pub(crate) fn cb_state(&self) -> Result<&CbState> {
        self.cb.as_ref().ok_or_else(|| ErrorKind::NotSupported.into())
    }

    fn cb_alloc(&self, kind: CbKind, dx_context: u32, required: u32) -> Result<Box<CmdBuf>> {
        debug_assert!(kind != CbKind::Umd);
        let capacity =
            (required.max(1) + PAGE_SIZE as u32 - 1) & !(PAGE_SIZE as u32 - 1);
        let page = self.mem.alloc_pages(capacity / PAGE_SIZE as u32)?;
        Ok(Box::new(CmdBuf {
            kind,
            dx_context,
            capacity,
            len: 0,
            staging: vec![0u8; capacity as usize],
            page: Some(page),
            umd_phys: 0,
            reserved_header: 0,
            reserved_len: 0,
            reserved_id: 0,
            header: None,
            header_phys: 0,
            completion: Vec::new(),
        }))
    }

    /// Wrap a client-supplied DMA range as a preemptible command buffer.
    pub(crate) fn cb_alloc_umd(
        &self,
        phys: u64,
        buffer_size: u32,
        command_bytes: u32,
        dx_context: u32,
    ) -> Result<Box<CmdBuf>> {
        self.cb_state()?;
        trace!("cb umd: phys 0x{:x}, cb {}", phys, command_bytes);
        Ok(Box::new(CmdBuf {
            kind: CbKind::Umd,
            dx_context,
            capacity: buffer_size,
            len: command_bytes,
            staging: Vec::new(),
            page: None,
            umd_phys: phys,
            reserved_header: 0,
            reserved_len: 0,
            reserved_id: 0,
            header: None,
            header_phys: 0,
            completion: Vec::new(),
        }))
    }

    fn cb_free(&self, cb: Box<CmdBuf>) {
        if let Some(handle) = cb.header {
            if let Ok(state) = self.cb_state() {
                state.header_pool.free(handle);
            }
        }
        // The DMA page (if any) is dropped with the buffer.
    }

    /// Write the header's physical address to the command registers. The
    /// caller holds the queue lock.
    fn cb_submit_header_locked(&self, header_phys: u64, context: u32) {
        debug_assert_eq!(header_phys & SVGA_CB_CONTEXT_MASK, 0);
        self.hw
            .reg_write(SVGA_REG_COMMAND_HIGH, (header_phys >> 32) as u32);
        self.hw
            .reg_write(SVGA_REG_COMMAND_LOW, (header_phys as u32) | context);
    }

    fn cb_init_header(&self, cb: &mut CmdBuf) -> Result<()> {
        let state = self.cb_state()?;
        let (handle, phys) = state.header_pool.alloc()?;
        cb.header = Some(handle);
        cb.header_phys = phys;

        if cb.kind != CbKind::Umd {
            let page = cb.page.as_ref().unwrap();
            page.write(0, &cb.staging[..cb.len as usize]);
        }

        let mut header = SvgaCbHeader::default();
        header.status = SVGA_CB_STATUS_NONE;
        // Non-zero ids mark client buffers so a device-level preempt can
        // single them out.
        header.id = if cb.kind == CbKind::Umd { 1 } else { 0 };
        header.flags = if cb.dx_context != SVGA3D_INVALID_ID {
            CbFlags::DX_CONTEXT.bits()
        } else {
            CbFlags::NONE.bits()
        };
        header.length = cb.len;
        header.ptr = if cb.kind == CbKind::Umd {
            cb.umd_phys
        } else {
            cb.page.as_ref().unwrap().base_phys()
        };
        header.offset = 0;
        header.dx_context = cb.dx_context;
        debug_assert!(header.ptr != 0);
        state.header_pool.write(handle, &header);
        Ok(())
    }

    /// Queue an asynchronous buffer on context 0, or park it on the pending
    /// queue when the context is at capacity.
    pub(crate) fn cb_submit_queued(&self, mut cb: Box<CmdBuf>) -> Result<()> {
        debug_assert!(cb.kind != CbKind::DeviceContext);
        self.cb_init_header(&mut cb)?;
        let header_phys = cb.header_phys;

        let state = self.cb_state()?;
        let mut queues = state.queues.lock();
        let context = SVGA_CB_CONTEXT_0;
        let queue = &mut queues[context as usize];

        if queue.submitted_count >= state.max_queued - 1 {
            // Can't submit now; the completion scan will pick it up.
            trace!("cb pending: {:?}", cb);
            queue.pending.push_back(cb);
            return Ok(());
        }

        queue.submitted.push_back(cb);
        queue.submitted_count += 1;
        self.cb_submit_header_locked(header_phys, context);
        Ok(())
    }

    /// Run a synchronous command on the device queue and wait for its
    /// completion status.
    pub fn cb_device_command(&self, cmd: &[u8]) -> Result<()> {
        let mut cb = self.cb_alloc(CbKind::DeviceContext, SVGA3D_INVALID_ID, cmd.len() as u32)?;
        cb.staging[..cmd.len()].copy_from_slice(cmd);
        cb.len = cmd.len() as u32;

        self.cb_init_header(&mut cb)?;
        {
            let state = self.cb_state()?;
            let _queues = state.queues.lock();
            self.cb_submit_header_locked(cb.header_phys, SVGA_CB_CONTEXT_DEVICE);
        }

        // Device-context submissions complete synchronously from the
        // driver's point of view: poll the status the device writes back.
        let handle = cb.header.unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let status = loop {
            let status = self.cb_state()?.header_pool.read_status(handle);
            if status != SVGA_CB_STATUS_NONE {
                break status;
            }
            if Instant::now() >= deadline {
                self.cb_free(cb);
                return Err(ErrorKind::Timeout.into());
            }
            thread::yield_now();
        };

        self.cb_free(cb);
        if status != SVGA_CB_STATUS_COMPLETED {
            return Err(ErrorKind::InvalidParameter.into());
        }
        Ok(())
    }

    /// Submit a one-off driver command asynchronously.
    pub fn cb_submit_miniport_command(&self, cmd: &[u8]) -> Result<()> {
        let mut cb = self.cb_alloc(CbKind::Miniport, SVGA3D_INVALID_ID, cmd.len() as u32)?;
        cb.staging[..cmd.len()].copy_from_slice(cmd);
        cb.len = cmd.len() as u32;
        self.cb_submit_queued(cb)
    }

    /// Submit a client buffer previously wrapped by [`Svga::cb_alloc_umd`].
    pub(crate) fn cb_submit_umd(&self, cb: Box<CmdBuf>) -> Result<()> {
        if cb.kind != CbKind::Umd {
            return Err(ErrorKind::InvalidParameter.into());
        }
        self.cb_submit_queued(cb)
    }

    /// Reserve space in the current miniport buffer. The current buffer is
    /// submitted first if the command does not fit or belongs to a different
    /// DX context.
    pub(crate) fn cb_reserve(
        &self,
        cmd_id: u32,
        header_bytes: u32,
        body_bytes: u32,
        dx_context: u32,
    ) -> Result<CbReserve<'_>> {
        let state = self.cb_state()?;
        let required = header_bytes + body_bytes;

        let mut guard = state.current.lock();

        if let Some(cb) = guard.as_ref() {
            if cb.capacity - cb.len < required || dx_context != cb.dx_context {
                let cb = guard.take().unwrap();
                self.cb_submit_queued(cb)?;
            }
        }

        if guard.is_none() {
            *guard = Some(self.cb_alloc(CbKind::Miniport, dx_context, required)?);
        }

        let cb = guard.as_mut().unwrap();
        debug_assert!(cb.capacity - cb.len >= required);
        cb.reserved_header = header_bytes;
        cb.reserved_len = body_bytes;
        cb.reserved_id = cmd_id;

        Ok(CbReserve {
            guard,
            committed: false,
        })
    }

    pub(crate) fn cb_reserve_3d(
        &self,
        cmd_id: u32,
        body_bytes: u32,
        dx_context: u32,
    ) -> Result<CbReserve<'_>> {
        self.cb_reserve(cmd_id, 8, body_bytes, dx_context)
    }

    pub(crate) fn cb_reserve_fifo_cmd(&self, cmd_id: u32, body_bytes: u32) -> Result<CbReserve<'_>> {
        self.cb_reserve(cmd_id, 4, body_bytes, SVGA3D_INVALID_ID)
    }

    pub(crate) fn cb_reserve_raw(&self, body_bytes: u32, dx_context: u32) -> Result<CbReserve<'_>> {
        self.cb_reserve(SVGA_CMD_INVALID_CMD, 0, body_bytes, dx_context)
    }

    /// Submit the current miniport buffer if it holds any commands.
    pub fn cb_flush(&self) -> Result<()> {
        let state = self.cb_state()?;
        let mut guard = state.current.lock();
        if guard.as_ref().map_or(false, |cb| cb.len != 0) {
            let cb = guard.take().unwrap();
            self.cb_submit_queued(cb)?;
        }
        Ok(())
    }

    /// Attach a completion callback to the current miniport buffer.
    pub(crate) fn cb_add_completion(&self, f: CompletionFn) -> Result<()> {
        let state = self.cb_state()?;
        let mut guard = state.current.lock();
        match guard.as_mut() {
            Some(cb) => {
                cb.completion.push(f);
                Ok(())
            }
            None => Err(ErrorKind::InvalidParameter.into()),
        }
    }

    /// Completion scan, run from the DPC.
    ///
    /// Buffers are processed by the device in submission order, so the scan
    /// stops at the first still-unprocessed buffer. Completed buffers free
    /// their resources outside the queue lock; freed capacity re-submits
    /// pending buffers.
    pub fn cb_process(&self) {
        let state = match self.cb_state() {
            Ok(state) => state,
            Err(_) => return,
        };

        let mut completed: SmallVec<[Box<CmdBuf>; 8]> = SmallVec::new();
        {
            let mut queues = state.queues.lock();
            for (context, queue) in queues.iter_mut().enumerate() {
                loop {
                    let done = match queue.submitted.front() {
                        Some(front) => {
                            state.header_pool.read_status(front.header.unwrap())
                                != SVGA_CB_STATUS_NONE
                        }
                        None => false,
                    };
                    if !done {
                        break;
                    }
                    completed.push(queue.submitted.pop_front().unwrap());
                    queue.submitted_count -= 1;
                }

                while queue.submitted_count < state.max_queued - 1 {
                    let cb = match queue.pending.pop_front() {
                        Some(cb) => cb,
                        None => break,
                    };
                    let header_phys = cb.header_phys;
                    trace!("submitting pending {:?}", cb);
                    queue.submitted.push_back(cb);
                    queue.submitted_count += 1;
                    self.cb_submit_header_locked(header_phys, context as u32);
                }
            }
        }

        for mut cb in completed {
            let status = state.header_pool.read_status(cb.header.unwrap());
            match status {
                SVGA_CB_STATUS_COMPLETED => {
                    let callbacks = std::mem::replace(&mut cb.completion, Vec::new());
                    for callback in callbacks {
                        callback(self);
                    }
                    self.cb_free(cb);
                }
                SVGA_CB_STATUS_PREEMPTED => {
                    trace!("cb preempted: {:?}", cb);
                    self.cb_free(cb);
                }
                _ => {
                    warn!("cb failed with status {}: {:?}", status, cb);
                    self.cb_free(cb);
                }
            }
        }
    }

    /// `(submitted, pending)` depth of command-buffer context 0.
    pub fn cb_queue_depths(&self) -> (u32, usize) {
        match self.cb_state() {
            Ok(state) => {
                let queues = state.queues.lock();
                let queue = &queues[SVGA_CB_CONTEXT_0 as usize];
                (queue.submitted_count, queue.pending.len())
            }
            Err(_) => (0, 0),
        }
    }

    /// Whether every command-buffer context has drained.
    pub fn cb_is_idle(&self) -> bool {
        match self.cb_state() {
            Ok(state) => state
                .queues
                .lock()
                .iter()
                .all(|queue| queue.submitted_count == 0),
            Err(_) => true,
        }
    }

    /// Drop all transport state at adapter stop.
    pub(crate) fn cb_teardown(&self) {
        let state = match self.cb_state() {
            Ok(state) => state,
            Err(_) => return,
        };

        let mut bufs: Vec<Box<CmdBuf>> = Vec::new();
        {
            let mut queues = state.queues.lock();
            for queue in queues.iter_mut() {
                bufs.extend(queue.submitted.drain(..));
                bufs.extend(queue.pending.drain(..));
                queue.submitted_count = 0;
            }
        }
        if let Some(cb) = state.current.lock().take() {
            bufs.push(cb);
        }
        for cb in bufs {
            self.cb_free(cb);
        }
    }
}
