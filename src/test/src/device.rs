//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! A behavioural model of the VMSVGA device.
//!
//! The model implements the port interface, consumes the FIFO ring and the
//! command-buffer queues, executes fence and MOB bookkeeping commands and
//! records everything else for assertions. Interrupt causes latch into the
//! IRQ status register (gated by the IRQ mask); the test drives the
//! interrupt/DPC entry points of the driver explicitly.
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use gasvga_base::cb::*;
use gasvga_base::cmd::*;
use gasvga_base::reg::*;
use gasvga_base::{PAGE_SHIFT, PAGE_SIZE};
use gasvga_device::hw::{FifoPage, Ports};
use gasvga_device::mem::MemPool;

/// Capabilities and limits the model advertises.
#[derive(Debug, Clone)]
pub struct TestDeviceConfig {
    pub caps: Caps,
    pub fifo_caps: FifoCaps,
    pub vram_size: u32,
    pub fifo_size: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub gmr_max_ids: u32,
    pub gmr_max_pages: u32,
    pub memory_size: u32,
}

impl Default for TestDeviceConfig {
    fn default() -> Self {
        Self {
            caps: Caps::EXTENDED_FIFO
                | Caps::IRQMASK
                | Caps::GMR
                | Caps::TRACES
                | Caps::GMR2
                | Caps::SCREEN_OBJECT_2
                | Caps::COMMAND_BUFFERS
                | Caps::GBOBJECTS
                | Caps::DX,
            fifo_caps: FifoCaps::FENCE
                | FifoCaps::RESERVE
                | FifoCaps::SCREEN_OBJECT
                | FifoCaps::GMR2
                | FifoCaps::SCREEN_OBJECT_2,
            vram_size: 1024 * 1024,
            fifo_size: 64 * 1024,
            max_width: 2560,
            max_height: 1600,
            gmr_max_ids: 64,
            gmr_max_pages: 2048,
            memory_size: 8 * 1024 * 1024,
        }
    }
}

impl TestDeviceConfig {
    /// A device generation without command buffers or guest-backed objects.
    pub fn fifo_only() -> Self {
        let mut config = Self::default();
        config.caps = Caps::EXTENDED_FIFO | Caps::IRQMASK | Caps::GMR | Caps::GMR2;
        config
    }
}

/// One command the model executed, with its raw payload.
#[derive(Debug, Clone)]
pub struct ExecutedCmd {
    pub id: u32,
    pub payload: Vec<u8>,
}

impl ExecutedCmd {
    pub fn dword(&self, i: usize) -> u32 {
        let off = i * 4;
        u32::from_le_bytes([
            self.payload[off],
            self.payload[off + 1],
            self.payload[off + 2],
            self.payload[off + 3],
        ])
    }
}

#[derive(Debug, Clone, Copy)]
struct MobDesc {
    pt_depth: u32,
    base: u64,
}

#[derive(Debug)]
struct DevState {
    config: TestDeviceConfig,
    index: u32,
    devcap_index: u32,
    svga_id: u32,
    enable: u32,
    config_done: u32,
    traces: u32,
    irq_mask: u32,
    irq_status: u32,
    command_high: u32,
    /// Asynchronous command buffers awaiting `process()`.
    pending_cb: VecDeque<(u64, u32)>,
    /// Enabled command-buffer contexts.
    started_contexts: Vec<u32>,
    stopped_contexts: Vec<u32>,
    /// Guest-backed objects the guest defined.
    mobs: HashMap<u32, MobDesc>,
    executed: Vec<ExecutedCmd>,
}

enum PortAction {
    None,
    DeviceContextCb(u64),
}

/// The device model. Shares the FIFO page and the guest-memory pool with
/// the driver under test.
pub struct TestDevice {
    fifo: Arc<FifoPage>,
    mem: Arc<MemPool>,
    state: Mutex<DevState>,
}

impl TestDevice {
    pub fn new(config: TestDeviceConfig, mem: Arc<MemPool>) -> Arc<Self> {
        let fifo = FifoPage::new(config.fifo_size);
        // The device model publishes its FIFO capabilities up front.
        fifo.write_index(SVGA_FIFO_CAPABILITIES, config.fifo_caps.bits());

        Arc::new(Self {
            fifo,
            mem,
            state: Mutex::new(DevState {
                config,
                index: 0,
                devcap_index: 0,
                svga_id: 0,
                enable: 0,
                config_done: 0,
                traces: 0,
                irq_mask: 0,
                irq_status: 0,
                command_high: 0,
                pending_cb: VecDeque::new(),
                started_contexts: Vec::new(),
                stopped_contexts: Vec::new(),
                mobs: HashMap::new(),
                executed: Vec::new(),
            }),
        })
    }

    pub fn fifo_page(&self) -> Arc<FifoPage> {
        Arc::clone(&self.fifo)
    }

    pub fn mem_pool(&self) -> Arc<MemPool> {
        Arc::clone(&self.mem)
    }

    /*
     * Assertion helpers.
     */

    pub fn executed(&self) -> Vec<ExecutedCmd> {
        self.state.lock().executed.clone()
    }

    pub fn executed_ids(&self) -> Vec<u32> {
        self.state.lock().executed.iter().map(|c| c.id).collect()
    }

    pub fn take_executed(&self) -> Vec<ExecutedCmd> {
        std::mem::replace(&mut self.state.lock().executed, Vec::new())
    }

    pub fn count_of(&self, id: u32) -> usize {
        self.state
            .lock()
            .executed
            .iter()
            .filter(|c| c.id == id)
            .count()
    }

    pub fn last_of(&self, id: u32) -> Option<ExecutedCmd> {
        self.state
            .lock()
            .executed
            .iter()
            .rev()
            .find(|c| c.id == id)
            .cloned()
    }

    pub fn started_contexts(&self) -> Vec<u32> {
        self.state.lock().started_contexts.clone()
    }

    pub fn stopped_contexts(&self) -> Vec<u32> {
        self.state.lock().stopped_contexts.clone()
    }

    pub fn knows_mob(&self, mobid: u32) -> bool {
        self.state.lock().mobs.contains_key(&mobid)
    }

    /// Force a raw fence value into the FIFO page and latch the interrupt,
    /// as if the device had just executed a fence command.
    pub fn raise_fence(&self, value: u32) {
        self.fifo.write_index(SVGA_FIFO_FENCE, value);
        let mut st = self.state.lock();
        if st.irq_mask & IrqFlags::ANY_FENCE.bits() != 0 {
            st.irq_status |= IrqFlags::ANY_FENCE.bits();
        }
    }

    /*
     * Work processing.
     */

    /// Consume everything the guest has published: the FIFO ring and the
    /// queued command buffers.
    pub fn process(&self) {
        self.process_fifo();

        loop {
            let next = self.state.lock().pending_cb.pop_front();
            match next {
                Some((header_phys, _context)) => self.process_cb(header_phys, false),
                None => break,
            }
        }
    }

    fn process_fifo(&self) {
        let min = self.fifo.read_index(SVGA_FIFO_MIN);
        let max = self.fifo.read_index(SVGA_FIFO_MAX);
        if min == 0 || max <= min {
            return;
        }

        loop {
            let next_cmd = self.fifo.read_index(SVGA_FIFO_NEXT_CMD);
            let stop = self.fifo.read_index(SVGA_FIFO_STOP);
            if next_cmd == stop {
                break;
            }

            let avail = if next_cmd >= stop {
                next_cmd - stop
            } else {
                (max - stop) + (next_cmd - min)
            };

            let consumed = self.execute_one(stop, min, max, avail);
            let mut stop = stop + consumed;
            if stop >= max {
                stop -= max - min;
            }
            self.fifo.write_index(SVGA_FIFO_STOP, stop);
        }

        self.fifo.write_index(SVGA_FIFO_BUSY, 0);
    }

    fn read_ring(&self, min: u32, max: u32, offset: u32, len: u32) -> Vec<u8> {
        let mut out = vec![0u8; len as usize];
        let first = (max - offset).min(len);
        self.fifo.read_bytes(offset, &mut out[..first as usize]);
        if len > first {
            self.fifo.read_bytes(min, &mut out[first as usize..]);
        }
        out
    }

    /// Execute the command at ring offset `stop`; returns the bytes
    /// consumed.
    fn execute_one(&self, stop: u32, min: u32, max: u32, avail: u32) -> u32 {
        let head = self.read_ring(min, max, stop, 8.min(avail));
        let id = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);

        if id >= SVGA_3D_CMD_BASE && id < SVGA_3D_CMD_MAX {
            let size = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
            let record = self.read_ring(min, max, stop, 8 + size);
            self.execute_command(id, &record[8..]);
            return 8 + size;
        }

        let payload_len = self.fifo_payload_len(id, stop, min, max);
        let record = self.read_ring(min, max, stop, 4 + payload_len);
        self.execute_command(id, &record[4..]);
        4 + payload_len
    }

    /// Payload size of a legacy FIFO command, in bytes.
    fn fifo_payload_len(&self, id: u32, stop: u32, min: u32, max: u32) -> u32 {
        let dword_at = |index: u32| -> u32 {
            let bytes = self.read_ring(min, max, stop, 4 + (index + 1) * 4);
            let off = (4 + index * 4) as usize;
            u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };

        match id {
            SVGA_CMD_UPDATE => 16,
            SVGA_CMD_FENCE => 4,
            SVGA_CMD_DESTROY_SCREEN => 4,
            SVGA_CMD_DEFINE_SCREEN => dword_at(0),
            SVGA_CMD_DEFINE_GMRFB => 16,
            SVGA_CMD_BLIT_GMRFB_TO_SCREEN | SVGA_CMD_BLIT_SCREEN_TO_GMRFB => 28,
            SVGA_CMD_DEFINE_GMR2 => 8,
            SVGA_CMD_REMAP_GMR2 => {
                let flags = dword_at(1);
                let num_pages = dword_at(3);
                let entry = if flags & SVGA_REMAP_GMR2_PPN64 != 0 { 8 } else { 4 };
                16 + num_pages * entry
            }
            SVGA_CMD_DEFINE_CURSOR => {
                let width = dword_at(3);
                let height = dword_at(4);
                let and_depth = dword_at(5);
                let xor_depth = dword_at(6);
                let row = |depth: u32| ((width * depth + 31) / 32) * 4;
                28 + (row(and_depth) + row(xor_depth)) * height
            }
            SVGA_CMD_DEFINE_ALPHA_CURSOR => {
                let width = dword_at(3);
                let height = dword_at(4);
                20 + width * height * 4
            }
            _ => panic!("device model: unknown FIFO command {}", id),
        }
    }

    fn execute_command(&self, id: u32, payload: &[u8]) {
        let dword = |i: usize| -> u32 {
            u32::from_le_bytes([
                payload[i * 4],
                payload[i * 4 + 1],
                payload[i * 4 + 2],
                payload[i * 4 + 3],
            ])
        };

        match id {
            SVGA_CMD_FENCE => {
                let value = dword(0);
                self.fifo.write_index(SVGA_FIFO_FENCE, value);
                let mut st = self.state.lock();
                if st.irq_mask & IrqFlags::ANY_FENCE.bits() != 0 {
                    st.irq_status |= IrqFlags::ANY_FENCE.bits();
                }
            }
            SVGA_3D_CMD_DEFINE_GB_MOB64 | SVGA_3D_CMD_REDEFINE_GB_MOB64 => {
                let mobid = dword(0);
                let pt_depth = dword(1);
                let base = u64::from(dword(2)) | (u64::from(dword(3)) << 32);
                self.state.lock().mobs.insert(mobid, MobDesc { pt_depth, base });
            }
            SVGA_3D_CMD_DESTROY_GB_MOB => {
                let mobid = dword(0);
                self.state.lock().mobs.remove(&mobid);
            }
            SVGA_3D_CMD_DX_MOB_FENCE_64 => {
                let value = u64::from(dword(0)) | (u64::from(dword(1)) << 32);
                let mob_id = dword(2);
                let mob_offset = dword(3);
                if let Some(phys) = self.translate_mob(mob_id, mob_offset) {
                    self.mem.write_u64(phys, value).unwrap();
                }
            }
            _ => {}
        }

        self.state.lock().executed.push(ExecutedCmd {
            id,
            payload: payload.to_vec(),
        });
    }

    /// Resolve a MOB offset to a physical address by walking the guest page
    /// tables the driver built.
    fn translate_mob(&self, mobid: u32, offset: u32) -> Option<u64> {
        let desc = *self.state.lock().mobs.get(&mobid)?;
        let page_index = u64::from(offset >> PAGE_SHIFT);
        let page_offset = u64::from(offset & (PAGE_SIZE as u32 - 1));

        match desc.pt_depth {
            // PTDEPTH64_0: base is the PPN of the single data page.
            1 => Some((desc.base << PAGE_SHIFT) + u64::from(offset)),
            // PTDEPTH64_1: base is the PPN of the level-1 table.
            2 => {
                let entry = (desc.base << PAGE_SHIFT) + page_index * 8;
                let ppn = self.mem.read_u64(entry).ok()?;
                Some((ppn << PAGE_SHIFT) + page_offset)
            }
            // PTDEPTH64_2: base is the PPN of the level-2 table.
            3 => {
                let entries_per_page = (PAGE_SIZE / 8) as u64;
                let l2_entry = (desc.base << PAGE_SHIFT) + (page_index / entries_per_page) * 8;
                let l1_ppn = self.mem.read_u64(l2_entry).ok()?;
                let l1_entry = (l1_ppn << PAGE_SHIFT) + (page_index % entries_per_page) * 8;
                let ppn = self.mem.read_u64(l1_entry).ok()?;
                Some((ppn << PAGE_SHIFT) + page_offset)
            }
            _ => None,
        }
    }

    /// Execute a submitted command buffer and write its completion status
    /// back into the header.
    fn process_cb(&self, header_phys: u64, device_context: bool) {
        let mut header = [0u8; 64];
        self.mem.read(header_phys, &mut header).unwrap();

        let length = u32::from_le_bytes([header[20], header[21], header[22], header[23]]);
        let ptr = u64::from_le_bytes([
            header[24], header[25], header[26], header[27], header[28], header[29], header[30],
            header[31],
        ]);

        let mut commands = vec![0u8; length as usize];
        if length != 0 {
            self.mem.read(ptr, &mut commands).unwrap();
        }

        if device_context {
            self.execute_dc_commands(&commands);
        } else {
            self.execute_stream(&commands);
        }

        // Write back SVGA_CB_STATUS_COMPLETED.
        self.mem
            .write(header_phys, &SVGA_CB_STATUS_COMPLETED.to_le_bytes())
            .unwrap();

        if !device_context {
            let mut st = self.state.lock();
            if st.irq_mask & IrqFlags::COMMAND_BUFFER.bits() != 0 {
                st.irq_status |= IrqFlags::COMMAND_BUFFER.bits();
            }
        }
    }

    /// Execute a mixed FIFO/3D command stream from a command buffer.
    fn execute_stream(&self, mut stream: &[u8]) {
        while stream.len() >= 4 {
            let id = u32::from_le_bytes([stream[0], stream[1], stream[2], stream[3]]);
            if id >= SVGA_3D_CMD_BASE && id < SVGA_3D_CMD_MAX {
                let size =
                    u32::from_le_bytes([stream[4], stream[5], stream[6], stream[7]]) as usize;
                self.execute_command(id, &stream[8..8 + size]);
                stream = &stream[8 + size..];
            } else {
                // The only headerless commands the driver places in command
                // buffers are fixed-size FIFO commands.
                let payload_len = match id {
                    SVGA_CMD_FENCE | SVGA_CMD_DESTROY_SCREEN => 4,
                    SVGA_CMD_UPDATE => 16,
                    SVGA_CMD_DEFINE_GMRFB => 16,
                    SVGA_CMD_DEFINE_GMR2 => 8,
                    SVGA_CMD_BLIT_GMRFB_TO_SCREEN | SVGA_CMD_BLIT_SCREEN_TO_GMRFB => 28,
                    SVGA_CMD_DEFINE_SCREEN => {
                        u32::from_le_bytes([stream[4], stream[5], stream[6], stream[7]]) as usize
                    }
                    SVGA_CMD_REMAP_GMR2 => {
                        let flags =
                            u32::from_le_bytes([stream[8], stream[9], stream[10], stream[11]]);
                        let num_pages = u32::from_le_bytes([
                            stream[16], stream[17], stream[18], stream[19],
                        ]) as usize;
                        let entry = if flags & SVGA_REMAP_GMR2_PPN64 != 0 { 8 } else { 4 };
                        16 + num_pages * entry
                    }
                    _ => panic!("device model: unknown buffered command {}", id),
                };
                self.execute_command(id, &stream[4..4 + payload_len]);
                stream = &stream[4 + payload_len..];
            }
        }
    }

    fn execute_dc_commands(&self, mut stream: &[u8]) {
        while stream.len() >= 4 {
            let id = u32::from_le_bytes([stream[0], stream[1], stream[2], stream[3]]);
            match id {
                SVGA_DC_CMD_START_STOP_CONTEXT => {
                    let enable =
                        u32::from_le_bytes([stream[4], stream[5], stream[6], stream[7]]);
                    let context =
                        u32::from_le_bytes([stream[8], stream[9], stream[10], stream[11]]);
                    let mut st = self.state.lock();
                    if enable != 0 {
                        st.started_contexts.push(context);
                    } else {
                        st.stopped_contexts.push(context);
                    }
                    stream = &stream[12..];
                }
                SVGA_DC_CMD_NOP => stream = &stream[4..],
                SVGA_DC_CMD_PREEMPT => stream = &stream[12..],
                _ => panic!("device model: unknown device-context command {}", id),
            }
        }
    }

    fn reg_write(&self, index: u32, value: u32) -> PortAction {
        let mut st = self.state.lock();
        match index {
            SVGA_REG_ID => {
                if value == SVGA_ID_2 {
                    st.svga_id = value;
                }
            }
            SVGA_REG_ENABLE => st.enable = value,
            SVGA_REG_CONFIG_DONE => st.config_done = value,
            SVGA_REG_TRACES => st.traces = value,
            SVGA_REG_IRQMASK => st.irq_mask = value,
            SVGA_REG_SYNC => {}
            SVGA_REG_DEV_CAP => st.devcap_index = value,
            SVGA_REG_COMMAND_HIGH => st.command_high = value,
            SVGA_REG_COMMAND_LOW => {
                let context = value & SVGA_CB_CONTEXT_MASK as u32;
                let phys =
                    (u64::from(st.command_high) << 32) | u64::from(value & !(SVGA_CB_CONTEXT_MASK as u32));
                if context == SVGA_CB_CONTEXT_DEVICE {
                    return PortAction::DeviceContextCb(phys);
                }
                st.pending_cb.push_back((phys, context));
            }
            _ => {}
        }
        PortAction::None
    }

    fn reg_read(&self, index: u32) -> u32 {
        let st = self.state.lock();
        match index {
            SVGA_REG_ID => st.svga_id,
            SVGA_REG_ENABLE => st.enable,
            SVGA_REG_CONFIG_DONE => st.config_done,
            SVGA_REG_TRACES => st.traces,
            SVGA_REG_IRQMASK => st.irq_mask,
            SVGA_REG_CAPABILITIES => st.config.caps.bits(),
            SVGA_REG_VRAM_SIZE => st.config.vram_size,
            SVGA_REG_FB_SIZE => st.config.vram_size,
            SVGA_REG_MEM_SIZE => st.config.fifo_size,
            SVGA_REG_MEM_REGS => SVGA_FIFO_NUM_REGS,
            SVGA_REG_MAX_WIDTH => st.config.max_width,
            SVGA_REG_MAX_HEIGHT => st.config.max_height,
            SVGA_REG_WIDTH => st.config.max_width,
            SVGA_REG_HEIGHT => st.config.max_height,
            SVGA_REG_BITS_PER_PIXEL => 32,
            SVGA_REG_GMR_MAX_IDS => st.config.gmr_max_ids,
            SVGA_REG_GMRS_MAX_PAGES => st.config.gmr_max_pages,
            SVGA_REG_MEMORY_SIZE => st.config.memory_size + st.config.vram_size,
            SVGA_REG_BUSY => 0,
            SVGA_REG_DEV_CAP => 0xCA90_0000 | st.devcap_index,
            _ => 0,
        }
    }
}

impl Ports for TestDevice {
    fn io_read(&self, offset: u16) -> u32 {
        match offset {
            SVGA_VALUE_PORT => {
                let index = self.state.lock().index;
                self.reg_read(index)
            }
            SVGA_IRQSTATUS_PORT => self.state.lock().irq_status,
            _ => 0,
        }
    }

    fn io_write(&self, offset: u16, value: u32) {
        let action = match offset {
            SVGA_INDEX_PORT => {
                self.state.lock().index = value;
                PortAction::None
            }
            SVGA_VALUE_PORT => {
                let index = self.state.lock().index;
                self.reg_write(index, value)
            }
            SVGA_IRQSTATUS_PORT => {
                self.state.lock().irq_status &= !value;
                PortAction::None
            }
            _ => PortAction::None,
        };

        // Device-context buffers complete synchronously from the guest's
        // point of view.
        if let PortAction::DeviceContextCb(phys) = action {
            self.process_cb(phys, true);
        }
    }
}
