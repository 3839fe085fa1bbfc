//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The adapter context and the submission/completion engine.
//!
//! `Svga` is the per-device singleton. It owns the hardware access paths,
//! the identifier spaces, the two command transports, the resource
//! registries and the fence/preemption engine. Lifecycle is
//! start → run → stop; everything hangs off the adapter, there are no
//! process-wide globals.
//!
//! Lock order (outer to inner): adapter scope mutex and object-table mutex,
//! FIFO mutex / current-buffer mutex, command-buffer queue lock, host-object
//! lock, MOB lock, identifier lock, hardware lock. Reference counts use
//! atomics; removal from a registry takes the registry's lock.
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::mem::size_of;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use gasvga_base::cmd::*;
use gasvga_base::reg::*;
use gasvga_base::{ErrorKind, Result, PAGE_SIZE, SVGA3D_INVALID_ID};
use gasvga_common::{fence_cmp32, IdBitmap};

use crate::cb::{CbReserve, CbState};
use crate::enc;
use crate::fence::FenceList;
use crate::fifo::{FifoReserve, FifoState};
use crate::gmr::GmrRegion;
use crate::hostobj::HostObjState;
use crate::hw::{FifoPage, HwAccess, Ports};
use crate::mem::{MemObj, MemPool};
use crate::mob::Mob;
use crate::otable::{otable_max_entries, OtKind, Otable, SVGA_OTABLE_COUNT};
use crate::render::{HwRenderData, SvgaContext};

/// Opaque identity of a user-mode client.
pub type OwnerId = snowflake::ProcessUniqueId;

/// Mint a fresh client identity.
pub fn new_owner_id() -> OwnerId {
    OwnerId::new()
}

/// Notifications delivered to the display framework at interrupt level.
pub trait NotifySink: Send + Sync {
    fn dma_completed(&self, fence_id: u32);
    fn dma_preempted(&self, fence_id: u32, last_completed: u32);
}

/// Adapter configuration validated at start.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Maximum number of live fence objects.
    pub fence_limit: u32,
    /// Maximum buffers outstanding per command-buffer context.
    pub max_queued_per_context: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            fence_limit: 1024,
            max_queued_per_context: gasvga_base::cb::SVGA_CB_MAX_QUEUED_PER_CONTEXT,
        }
    }
}

#[derive(Debug)]
pub(crate) struct IdSpaces {
    pub surface: IdBitmap,
    pub context: IdBitmap,
    pub dx_context: IdBitmap,
    pub mob: IdBitmap,
}

#[derive(Debug)]
pub(crate) struct ScopeState {
    pub gmr_tree: BTreeMap<u32, GmrRegion>,
    /// The last GMRFB definition; re-definitions with identical parameters
    /// are skipped.
    pub last_gmrfb: Option<(u32, u32)>,
}

/// The per-device singleton.
pub struct Svga {
    pub(crate) hw: HwAccess,
    pub(crate) mem: Arc<MemPool>,
    pub(crate) notify: Arc<dyn NotifySink>,
    pub(crate) config: DeviceConfig,

    pub(crate) caps: Caps,
    pub(crate) fifo_size: u32,
    pub(crate) vram_size: u32,
    pub(crate) max_width: u32,
    pub(crate) max_height: u32,
    pub(crate) gmr_max_ids: u32,
    pub(crate) gmr_max_pages: u32,
    pub(crate) memory_size: u32,
    pub(crate) max_texture_levels: u32,

    pub(crate) ids: Mutex<IdSpaces>,
    pub(crate) fifo: FifoState,
    pub(crate) cb: Option<CbState>,
    pub(crate) otables: Mutex<[Otable; SVGA_OTABLE_COUNT]>,
    pub(crate) scope: Mutex<ScopeState>,
    pub(crate) mobs: Mutex<BTreeMap<u32, Arc<Mob>>>,
    pub(crate) hostobj: Mutex<HostObjState>,
    pub(crate) mob_deferred: Mutex<Vec<Arc<Mob>>>,
    pub(crate) hw_render: Mutex<Vec<Box<HwRenderData>>>,
    pub(crate) fences: Mutex<FenceList>,

    pub(crate) last_completed_seq_no: AtomicU32,
    pub(crate) last_completed_fence_id: AtomicU32,
    pub(crate) last_submitted_fence_id: AtomicU32,
    pub(crate) preemption_fence_id: AtomicU32,
    pub(crate) mob_fence_counter: AtomicU64,
    pub(crate) miniport_mob: Mutex<Option<Arc<Mob>>>,
    pub(crate) cb_irq: AtomicBool,

    pub(crate) vram: MemObj,
    pub(crate) paging_lock: Mutex<()>,

    reclaim_tx: Mutex<Option<mpsc::Sender<()>>>,
    reclaim_join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for Svga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Svga")
            .field("caps", &self.caps)
            .field("fifo_size", &self.fifo_size)
            .field("vram_size", &self.vram_size)
            .finish()
    }
}

impl Svga {
    /// Probe the device, configure the transports and bring the adapter up.
    pub fn start(
        ports: Arc<dyn Ports>,
        fifo_page: Arc<FifoPage>,
        mem: Arc<MemPool>,
        notify: Arc<dyn NotifySink>,
        config: DeviceConfig,
    ) -> Result<Arc<Svga>> {
        let hw = HwAccess::new(ports, fifo_page);

        // Version negotiation: the device must accept SVGA_ID_2.
        hw.reg_write(SVGA_REG_ID, SVGA_ID_2);
        if hw.reg_read(SVGA_REG_ID) != SVGA_ID_2 {
            warn!("device does not support SVGA_ID_2");
            return Err(ErrorKind::NotSupported.into());
        }

        let caps = Caps::from_bits_truncate(hw.reg_read(SVGA_REG_CAPABILITIES));
        let vram_size = hw.reg_read(SVGA_REG_VRAM_SIZE);
        let fifo_size = hw.reg_read(SVGA_REG_MEM_SIZE);
        let max_width = hw.reg_read(SVGA_REG_MAX_WIDTH);
        let max_height = hw.reg_read(SVGA_REG_MAX_HEIGHT);

        let (gmr_max_ids, gmr_max_pages, memory_size) = if caps.contains(Caps::GMR2) {
            let ids = hw.reg_read(SVGA_REG_GMR_MAX_IDS);
            let pages = hw.reg_read(SVGA_REG_GMRS_MAX_PAGES);
            let mem_size = hw.reg_read(SVGA_REG_MEMORY_SIZE).saturating_sub(vram_size);
            (ids, pages, mem_size)
        } else {
            // All HWV8 hardware supports GMR2; fall back to an arbitrary
            // surface-memory limit.
            (0, 0, 512 * 1024 * 1024)
        };

        let max_texture_width = 8192u32;
        let max_texture_height = 8192u32;
        // 1 + floor(log2(max texture dimension)): in Direct3D each mip level
        // is floor(prev / 2), so only the highest set bit matters.
        let max_texture_levels =
            32 - max_texture_width.max(max_texture_height).leading_zeros();

        let fifo = FifoState::init(&hw, caps, fifo_size);

        let cb = if caps.contains(Caps::COMMAND_BUFFERS) {
            Some(CbState::new(&mem, config.max_queued_per_context)?)
        } else {
            None
        };

        let mut ids = IdSpaces {
            surface: IdBitmap::new(otable_max_entries(OtKind::Surface)),
            context: IdBitmap::new(otable_max_entries(OtKind::Context)),
            dx_context: IdBitmap::new(otable_max_entries(OtKind::DxContext)),
            mob: IdBitmap::new(otable_max_entries(OtKind::Mob)),
        };
        // Identifier 0 means "none" in every space.
        ids.surface.set(0);
        ids.context.set(0);
        ids.dx_context.set(0);
        ids.mob.set(0);

        let vram_pages = ((vram_size as usize + PAGE_SIZE - 1) / PAGE_SIZE).max(1);
        let vram = mem.alloc_pages(vram_pages as u32)?;

        let svga = Arc::new(Svga {
            hw,
            mem,
            notify,
            config: config.clone(),
            caps,
            fifo_size,
            vram_size,
            max_width,
            max_height,
            gmr_max_ids,
            gmr_max_pages,
            memory_size,
            max_texture_levels,
            ids: Mutex::new(ids),
            fifo,
            cb,
            otables: Mutex::new(Default::default()),
            scope: Mutex::new(ScopeState {
                gmr_tree: BTreeMap::new(),
                last_gmrfb: None,
            }),
            mobs: Mutex::new(BTreeMap::new()),
            hostobj: Mutex::new(HostObjState::default()),
            mob_deferred: Mutex::new(Vec::new()),
            hw_render: Mutex::new(Vec::new()),
            fences: Mutex::new(FenceList::new(config.fence_limit)),
            last_completed_seq_no: AtomicU32::new(0),
            last_completed_fence_id: AtomicU32::new(0),
            last_submitted_fence_id: AtomicU32::new(0),
            preemption_fence_id: AtomicU32::new(0),
            mob_fence_counter: AtomicU64::new(0),
            miniport_mob: Mutex::new(None),
            cb_irq: AtomicBool::new(false),
            vram,
            paging_lock: Mutex::new(()),
            reclaim_tx: Mutex::new(None),
            reclaim_join: Mutex::new(None),
        });

        // Enable the device and the asynchronous command-buffer context.
        svga.hw.reg_write(SVGA_REG_ENABLE, SVGA_REG_ENABLE_ENABLE);
        if svga.cb.is_some() {
            svga.cb_context_enable(gasvga_base::cb::SVGA_CB_CONTEXT_0, true)?;
        }

        let mut irq_mask = IrqFlags::ANY_FENCE;
        if svga.cb.is_some() {
            irq_mask |= IrqFlags::COMMAND_BUFFER;
        }
        svga.hw.reg_write(SVGA_REG_IRQMASK, irq_mask.bits());

        if svga.caps.contains(Caps::DX) {
            svga.create_miniport_mob()?;
        }

        Self::spawn_reclaim_worker(&svga);

        debug!(
            "adapter started: caps {:?}, vram {} KiB, fifo {} KiB",
            svga.caps,
            vram_size / 1024,
            fifo_size / 1024
        );
        Ok(svga)
    }

    fn spawn_reclaim_worker(this: &Arc<Svga>) {
        let (tx, rx) = mpsc::channel::<()>();
        let weak = Arc::downgrade(this);
        let join = thread::Builder::new()
            .name("gasvga-reclaim".into())
            .spawn(move || {
                // Passive-level work item: reap deferred host objects and
                // host-acknowledged MOBs.
                for _ in rx.iter() {
                    match weak.upgrade() {
                        Some(svga) => {
                            let _ = svga.host_objects_process_pending();
                            svga.mob_reclaim_pass();
                        }
                        None => break,
                    }
                }
            })
            .unwrap();
        *this.reclaim_tx.lock() = Some(tx);
        *this.reclaim_join.lock() = Some(join);
    }

    /// Tear the adapter down in the reverse order of `start`.
    pub fn stop(&self) -> Result<()> {
        self.host_objects_cleanup()?;

        // Normally all regions are already gone by now.
        if !self.scope.lock().gmr_tree.is_empty() {
            warn!("regions still registered at stop");
            self.regions_destroy(None);
        }

        // The miniport MOB cannot go through the deferred protocol (the
        // host would write the acknowledge fence into the MOB being
        // destroyed); use the plain destroy command.
        if self.caps.contains(Caps::DX) {
            let mobid = self.miniport_mob.lock().as_ref().map(|m| m.id());
            if let Some(mobid) = mobid {
                let len = size_of::<Svga3dCmdDestroyGBMob>() as u32;
                let mut reserve =
                    self.reserve_3d(SVGA_3D_CMD_DESTROY_GB_MOB, len, SVGA3D_INVALID_ID)?;
                enc::put(reserve.body_mut(), 0, Svga3dCmdDestroyGBMob { mobid });
                reserve.commit(len);
            }
        }

        if self.caps.contains(Caps::GBOBJECTS) {
            self.otables_destroy()?;
        }

        // Give the host some time to drain the queues. Up to five seconds,
        // arbitrary.
        for _ in 0..50 {
            if self.cb_is_idle() {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }

        self.hw.reg_write(SVGA_REG_IRQMASK, 0);

        if self.cb.is_some() {
            let _ = self.cb_context_enable(gasvga_base::cb::SVGA_CB_CONTEXT_0, false);
            self.cb_teardown();
        }

        self.hw.reg_write(SVGA_REG_ENABLE, SVGA_REG_ENABLE_DISABLE);

        if let Some(mob) = self.miniport_mob.lock().take() {
            self.mob_free(mob);
        }

        self.reclaim_tx.lock().take();
        if let Some(join) = self.reclaim_join.lock().take() {
            let _ = join.join();
        }

        debug!("adapter stopped");
        Ok(())
    }

    pub fn caps(&self) -> Caps {
        self.caps
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn mem_pool(&self) -> &Arc<MemPool> {
        &self.mem
    }

    /// Largest supported display mode.
    pub fn max_display_size(&self) -> (u32, u32) {
        (self.max_width, self.max_height)
    }

    /// Device memory available for surfaces, excluding VRAM.
    pub fn surface_memory_size(&self) -> u32 {
        self.memory_size
    }

    /*
     * Identifier allocation. The per-table variants ensure the matching
     * object table covers the new identifier before it is handed out.
     */

    pub fn surface_id_alloc(&self) -> Result<u32> {
        let id = self
            .ids
            .lock()
            .surface
            .alloc()
            .ok_or(ErrorKind::InsufficientResources)?;
        if let Err(e) = self.otable_notify(OtKind::Surface, id) {
            self.ids.lock().surface.free(id);
            return Err(e);
        }
        Ok(id)
    }

    pub fn surface_id_free(&self, id: u32) {
        self.ids.lock().surface.free(id);
    }

    pub fn context_id_alloc(&self) -> Result<u32> {
        let id = self
            .ids
            .lock()
            .context
            .alloc()
            .ok_or(ErrorKind::InsufficientResources)?;
        if let Err(e) = self.otable_notify(OtKind::Context, id) {
            self.ids.lock().context.free(id);
            return Err(e);
        }
        Ok(id)
    }

    pub fn context_id_free(&self, id: u32) {
        self.ids.lock().context.free(id);
    }

    pub fn dx_context_id_alloc(&self) -> Result<u32> {
        let id = self
            .ids
            .lock()
            .dx_context
            .alloc()
            .ok_or(ErrorKind::InsufficientResources)?;
        if let Err(e) = self.otable_notify(OtKind::DxContext, id) {
            self.ids.lock().dx_context.free(id);
            return Err(e);
        }
        Ok(id)
    }

    pub fn dx_context_id_free(&self, id: u32) {
        self.ids.lock().dx_context.free(id);
    }

    pub fn mob_id_alloc(&self) -> Result<u32> {
        let id = self
            .ids
            .lock()
            .mob
            .alloc()
            .ok_or(ErrorKind::InsufficientResources)?;
        if let Err(e) = self.otable_notify(OtKind::Mob, id) {
            self.ids.lock().mob.free(id);
            return Err(e);
        }
        Ok(id)
    }

    pub fn mob_id_free(&self, id: u32) {
        self.ids.lock().mob.free(id);
    }

    /*
     * Transport adapter: callers must not assume which transport backs a
     * reservation.
     */

    /// Reserve space for raw command bytes (records written complete with
    /// their headers).
    pub fn reserve(&self, len: u32, dx_context: u32) -> Result<Reserve<'_>> {
        if self.cb.is_some() {
            Ok(Reserve {
                inner: ReserveInner::Cb(self.cb_reserve_raw(len, dx_context)?),
                header: ReserveHeader::None,
            })
        } else {
            Ok(Reserve {
                inner: ReserveInner::Fifo(self.fifo.reserve(&self.hw, len)?),
                header: ReserveHeader::None,
            })
        }
    }

    /// Reserve space for the payload of one 3D command; the `{id, size}`
    /// header is written at commit.
    pub fn reserve_3d(&self, cmd_id: u32, len: u32, dx_context: u32) -> Result<Reserve<'_>> {
        if self.cb.is_some() {
            Ok(Reserve {
                inner: ReserveInner::Cb(self.cb_reserve_3d(cmd_id, len, dx_context)?),
                header: ReserveHeader::None,
            })
        } else {
            Ok(Reserve {
                inner: ReserveInner::Fifo(self.fifo.reserve(&self.hw, 8 + len)?),
                header: ReserveHeader::ThreeD(cmd_id),
            })
        }
    }

    /// Reserve space for the payload of one legacy FIFO command; the id
    /// dword is written at commit.
    pub fn reserve_fifo_cmd(&self, cmd_id: u32, len: u32) -> Result<Reserve<'_>> {
        if self.cb.is_some() {
            Ok(Reserve {
                inner: ReserveInner::Cb(self.cb_reserve_fifo_cmd(cmd_id, len)?),
                header: ReserveHeader::None,
            })
        } else {
            Ok(Reserve {
                inner: ReserveInner::Fifo(self.fifo.reserve(&self.hw, 4 + len)?),
                header: ReserveHeader::FifoCmd(cmd_id),
            })
        }
    }

    /// Push buffered work to the device.
    pub fn flush(&self) {
        if self.cb.is_some() {
            if let Err(e) = self.cb_flush() {
                warn!("flush failed: {}", e);
            }
        }
        // The FIFO path publishes at commit.
    }

    /*
     * Device-queue control commands.
     */

    pub(crate) fn cb_context_enable(&self, context: u32, enable: bool) -> Result<()> {
        let mut cmd = [0u8; 4 + size_of::<SvgaDCCmdStartStop>()];
        enc::cmd_dc_start_stop(&mut cmd, enable, context);
        self.cb_device_command(&cmd)
    }

    /*
     * Fence / interrupt / DPC engine.
     */

    /// Emit a fence command through the active transport.
    pub fn fence(&self, value: u32) -> Result<()> {
        let len = size_of::<SvgaFifoCmdFence>() as u32;
        let mut reserve = self.reserve_fifo_cmd(SVGA_CMD_FENCE, len)?;
        enc::put(reserve.body_mut(), 0, SvgaFifoCmdFence { fence: value });
        reserve.commit(len);
        self.flush();
        Ok(())
    }

    /// The interrupt service routine. Returns `false` when the interrupt
    /// was not raised by this device.
    pub fn interrupt(&self) -> bool {
        let status = self.hw.irq_status_read();
        if status == 0 {
            return false;
        }
        // Dismiss the interrupt on the adapter.
        self.hw.irq_status_ack(status);

        let flags = IrqFlags::from_bits_truncate(status);
        if flags.contains(IrqFlags::ANY_FENCE) {
            // A fence command has been processed by the device.
            self.report_fence();
        }
        if flags.intersects(IrqFlags::COMMAND_BUFFER | IrqFlags::ERROR) {
            self.cb_irq.store(true, Ordering::SeqCst);
        }
        true
    }

    fn report_fence(&self) {
        let fence = self.hw.fifo_read(SVGA_FIFO_FENCE);

        let preemption = self.preemption_fence_id.load(Ordering::SeqCst);
        if preemption != 0 && fence == preemption {
            // The preemption marker completed: everything submitted before
            // it is done.
            self.preemption_fence_id.store(0, Ordering::SeqCst);
            let last_submitted = self.last_submitted_fence_id.load(Ordering::SeqCst);
            self.last_completed_fence_id
                .store(last_submitted, Ordering::SeqCst);
            self.notify.dma_preempted(fence, last_submitted);
        } else {
            let last_completed = self.last_completed_fence_id.load(Ordering::SeqCst);
            if fence_cmp32(last_completed, fence) == std::cmp::Ordering::Less {
                self.last_completed_fence_id.store(fence, Ordering::SeqCst);
                self.notify.dma_completed(fence);
            }
        }
    }

    /// The dispatch-level completion routine.
    pub fn dpc(&self) {
        let last_completed = self.last_completed_fence_id.load(Ordering::SeqCst);

        // Promote fences the device has passed.
        self.fence_process_completions(last_completed);

        // Release the object references of completed frames.
        let done: Vec<Box<HwRenderData>> = {
            let mut list = self.hw_render.lock();
            let mut kept = Vec::new();
            let mut done = Vec::new();
            for data in list.drain(..) {
                if fence_cmp32(data.submission_id, last_completed) != std::cmp::Ordering::Greater {
                    done.push(data);
                } else {
                    kept.push(data);
                }
            }
            *list = kept;
            done
        };
        for data in done {
            self.render_complete(data, false);
        }

        if self.cb_irq.swap(false, Ordering::SeqCst) && self.cb.is_some() {
            self.cb_process();
        }

        // Deferred MOB destruction happens at passive level.
        if !self.mob_deferred.lock().is_empty() || !self.hostobj.lock().deleted.is_empty() {
            self.queue_reclaim();
        }
    }

    fn queue_reclaim(&self) {
        if let Some(tx) = self.reclaim_tx.lock().as_ref() {
            let _ = tx.send(());
        }
    }

    /// Framework preemption request.
    pub fn preempt(&self, preemption_fence_id: u32) -> Result<()> {
        let last_completed = self.last_completed_fence_id.load(Ordering::SeqCst);
        let last_submitted = self.last_submitted_fence_id.load(Ordering::SeqCst);

        if last_completed == last_submitted {
            // The hardware already finished everything submitted.
            self.notify
                .dma_preempted(preemption_fence_id, last_completed);
            return Ok(());
        }

        debug_assert_eq!(self.preemption_fence_id.load(Ordering::SeqCst), 0);
        self.preemption_fence_id
            .store(preemption_fence_id, Ordering::SeqCst);

        if self.cb.is_some() {
            let mut cmd = [0u8; 8];
            enc::cmd_fence(&mut cmd, preemption_fence_id);
            self.cb_submit_miniport_command(&cmd)
        } else {
            // Submitted FIFO data cannot be recalled; let the host finish
            // it and recognise the marker.
            self.fence(preemption_fence_id)
        }
    }

    /// Dispatch one prepared frame to the device and stamp it with its
    /// submission identifier. The fence command is always emitted, even for
    /// a zero-length submission.
    pub fn submit_frame(&self, args: SubmitArgs<'_>) -> Result<()> {
        let id = args.submission_fence_id;

        if args.fence_handle != 0 {
            self.fence_submit(args.fence_handle, id)?;
        }

        if let Some(mut data) = args.render_data {
            data.submission_id = id;
            self.hw_render.lock().push(data);
        }

        match args.dma {
            Some(DmaBuf::Phys {
                base,
                buffer_size,
                command_bytes,
            }) if command_bytes != 0 => {
                if self.cb.is_none() {
                    return Err(ErrorKind::InvalidParameter.into());
                }
                let cid = match args.context {
                    Some(ctx) if ctx.is_dx() => ctx.cid(),
                    _ => SVGA3D_INVALID_ID,
                };
                let cb = self.cb_alloc_umd(base, buffer_size, command_bytes, cid)?;
                self.cb_submit_umd(cb)?;
            }
            Some(DmaBuf::Bytes(bytes)) if !bytes.is_empty() => {
                if self.cb.is_some() {
                    return Err(ErrorKind::InvalidParameter.into());
                }
                let mut reserve = self.reserve(bytes.len() as u32, SVGA3D_INVALID_ID)?;
                reserve.body_mut().copy_from_slice(bytes);
                reserve.commit(bytes.len() as u32);
            }
            _ => {}
        }

        self.last_submitted_fence_id.store(id, Ordering::SeqCst);

        // Submit the fence.
        if self.cb.is_some() {
            let mut cmd = [0u8; 8];
            enc::cmd_fence(&mut cmd, id);
            self.cb_submit_miniport_command(&cmd)?;
        } else {
            self.fence(id)?;
        }
        Ok(())
    }

    /*
     * Screen, cursor and presentation helpers.
     */

    pub fn screen_define(
        &self,
        vram_offset: u32,
        screen_id: u32,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        blank: bool,
    ) -> Result<()> {
        let len = enc::fifo_cmd_len::<SvgaFifoCmdDefineScreen>() as u32;
        let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
        enc::cmd_define_screen(
            reserve.body_mut(),
            screen_id,
            true,
            x,
            y,
            width,
            height,
            false,
            vram_offset,
            blank,
        );
        reserve.commit(len);
        Ok(())
    }

    pub fn screen_destroy(&self, screen_id: u32) -> Result<()> {
        let len = enc::fifo_cmd_len::<SvgaFifoCmdDestroyScreen>() as u32;
        let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
        enc::cmd_destroy_screen(reserve.body_mut(), screen_id);
        reserve.commit(len);
        Ok(())
    }

    pub fn update(&self, x: u32, y: u32, width: u32, height: u32) -> Result<()> {
        let len = enc::fifo_cmd_len::<SvgaFifoCmdUpdate>() as u32;
        let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
        enc::cmd_update(reserve.body_mut(), x, y, width, height);
        reserve.commit(len);
        self.flush();
        Ok(())
    }

    pub fn define_cursor(
        &self,
        hotspot_x: u32,
        hotspot_y: u32,
        width: u32,
        height: u32,
        and_mask_depth: u32,
        xor_mask_depth: u32,
        and_mask: &[u8],
        xor_mask: &[u8],
    ) -> Result<()> {
        let len = enc::gen_define_cursor_len(and_mask, xor_mask) as u32;
        let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
        enc::gen_define_cursor(
            reserve.body_mut(),
            hotspot_x,
            hotspot_y,
            width,
            height,
            and_mask_depth,
            xor_mask_depth,
            and_mask,
            xor_mask,
        )?;
        reserve.commit(len);
        self.flush();
        Ok(())
    }

    pub fn define_alpha_cursor(
        &self,
        hotspot_x: u32,
        hotspot_y: u32,
        width: u32,
        height: u32,
        image: &[u8],
    ) -> Result<()> {
        let len = enc::gen_define_alpha_cursor_len(image) as u32;
        let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
        enc::gen_define_alpha_cursor(reserve.body_mut(), hotspot_x, hotspot_y, width, height, image)?;
        reserve.commit(len);
        self.flush();
        Ok(())
    }

    /// Define the GMRFB. Skipped when offset and pitch are unchanged, unless
    /// `force` is set.
    pub fn define_gmrfb(&self, offset: u32, bytes_per_line: u32, force: bool) -> Result<()> {
        {
            let scope = self.scope.lock();
            if !force && scope.last_gmrfb == Some((offset, bytes_per_line)) {
                return Ok(());
            }
        }

        let len = enc::gen_define_gmrfb_len() as u32;
        let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
        enc::gen_define_gmrfb(reserve.body_mut(), offset, bytes_per_line)?;
        reserve.commit(len);

        self.scope.lock().last_gmrfb = Some((offset, bytes_per_line));
        Ok(())
    }

    pub fn present(&self, sid: u32, width: u32, height: u32) -> Result<()> {
        let len = enc::gen_present_len() as u32;
        let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
        enc::gen_present(reserve.body_mut(), sid, width, height)?;
        reserve.commit(len);
        self.flush();
        Ok(())
    }

    pub fn present_vram(&self, sid: u32, width: u32, height: u32, vram_offset: u32) -> Result<()> {
        let len = enc::gen_present_vram_len() as u32;
        let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
        enc::gen_present_vram(reserve.body_mut(), sid, width, height, vram_offset)?;
        reserve.commit(len);
        self.flush();
        Ok(())
    }

    /*
     * Diagnostics.
     */

    /// Snapshot of registers, device capabilities and the FIFO prefix.
    pub fn query_info(&self) -> HwInfo {
        let regs = (0..64).map(|i| self.hw.reg_read(i)).collect();
        let dev_caps = if self.caps.contains(Caps::GBOBJECTS) {
            (0..32).map(|i| self.hw.dev_cap_read(i)).collect()
        } else {
            Vec::new()
        };
        let fifo = (0..32).map(|i| self.hw.fifo_read(i)).collect();
        HwInfo {
            regs,
            dev_caps,
            fifo,
        }
    }

    /// Number of MOBs awaiting host acknowledgement.
    pub fn deferred_mob_count(&self) -> usize {
        self.mob_deferred.lock().len()
    }

    /// Number of in-flight submissions still holding object references.
    pub fn pending_render_count(&self) -> usize {
        self.hw_render.lock().len()
    }

    /// Number of host objects awaiting passive-level destruction.
    pub fn pending_host_object_count(&self) -> usize {
        self.hostobj.lock().deleted.len()
    }

    pub fn last_completed_fence_id(&self) -> u32 {
        self.last_completed_fence_id.load(Ordering::SeqCst)
    }

    pub fn last_submitted_fence_id(&self) -> u32 {
        self.last_submitted_fence_id.load(Ordering::SeqCst)
    }

    pub fn preemption_fence_id(&self) -> u32 {
        self.preemption_fence_id.load(Ordering::SeqCst)
    }
}

/// Register/capability snapshot returned by [`Svga::query_info`].
#[derive(Debug, Clone)]
pub struct HwInfo {
    pub regs: Vec<u32>,
    pub dev_caps: Vec<u32>,
    pub fifo: Vec<u32>,
}

/// A frame dispatched by [`Svga::submit_frame`].
pub struct SubmitArgs<'a> {
    pub context: Option<&'a SvgaContext>,
    /// Fence object handle to stamp, or 0.
    pub fence_handle: u32,
    /// Object references captured by the command rewriter.
    pub render_data: Option<Box<HwRenderData>>,
    pub dma: Option<DmaBuf<'a>>,
    /// The monotonically increasing submission identifier of this frame.
    pub submission_fence_id: u32,
}

/// The DMA payload of a frame.
pub enum DmaBuf<'a> {
    /// Client-built buffer submitted by physical address (command-buffer
    /// transport).
    Phys {
        base: u64,
        buffer_size: u32,
        command_bytes: u32,
    },
    /// Command bytes copied into the FIFO ring (legacy transport).
    Bytes(&'a [u8]),
}

enum ReserveHeader {
    None,
    FifoCmd(u32),
    ThreeD(u32),
}

enum ReserveInner<'a> {
    Fifo(FifoReserve<'a>),
    Cb(CbReserve<'a>),
}

/// A transport-independent reservation; see [`Svga::reserve`].
pub struct Reserve<'a> {
    inner: ReserveInner<'a>,
    header: ReserveHeader,
}

impl<'a> Reserve<'a> {
    fn header_len(&self) -> usize {
        match self.header {
            ReserveHeader::None => 0,
            ReserveHeader::FifoCmd(_) => 4,
            ReserveHeader::ThreeD(_) => 8,
        }
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        match self.inner {
            ReserveInner::Fifo(ref mut guard) => &mut guard.body_mut()[header_len..],
            ReserveInner::Cb(ref mut reserve) => reserve.body_mut(),
        }
    }

    /// Commit `actual` payload bytes (plus the reserved header, if any).
    pub fn commit(self, actual: u32) {
        match self.inner {
            ReserveInner::Fifo(mut guard) => {
                let total = match self.header {
                    ReserveHeader::None => actual,
                    ReserveHeader::FifoCmd(id) => {
                        guard.body_mut()[..4].copy_from_slice(&id.to_le_bytes());
                        4 + actual
                    }
                    ReserveHeader::ThreeD(id) => {
                        let buf = guard.body_mut();
                        buf[..4].copy_from_slice(&id.to_le_bytes());
                        buf[4..8].copy_from_slice(&actual.to_le_bytes());
                        8 + actual
                    }
                };
                guard.commit(total);
            }
            ReserveInner::Cb(reserve) => reserve.commit(actual),
        }
    }
}
