//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Shared helpers for driving the core against the device model.
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gasvga_device::{DeviceConfig, MemPool, NotifySink, Svga};

use crate::device::{TestDevice, TestDeviceConfig};

/// A framework notification observed by the test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Completed(u32),
    Preempted { fence: u32, last_completed: u32 },
}

/// Records every notification the core delivers.
#[derive(Debug, Default)]
pub struct TestNotify {
    events: Mutex<Vec<Notification>>,
}

impl TestNotify {
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }

    pub fn last(&self) -> Option<Notification> {
        self.events.lock().last().copied()
    }

    pub fn completed_ids(&self) -> Vec<u32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Notification::Completed(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

impl NotifySink for TestNotify {
    fn dma_completed(&self, fence_id: u32) {
        self.events.lock().push(Notification::Completed(fence_id));
    }

    fn dma_preempted(&self, fence_id: u32, last_completed: u32) {
        self.events.lock().push(Notification::Preempted {
            fence: fence_id,
            last_completed,
        });
    }
}

/// A started adapter wired to the device model.
pub struct TestBench {
    pub device: Arc<TestDevice>,
    pub svga: Arc<Svga>,
    pub notify: Arc<TestNotify>,
    pub mem: Arc<MemPool>,
}

impl TestBench {
    pub fn new() -> Self {
        Self::with_config(TestDeviceConfig::default(), DeviceConfig::default())
    }

    /// A bench against a device generation without command buffers.
    pub fn fifo_only() -> Self {
        Self::with_config(TestDeviceConfig::fifo_only(), DeviceConfig::default())
    }

    pub fn with_config(device_config: TestDeviceConfig, driver_config: DeviceConfig) -> Self {
        let mem = MemPool::new();
        let device = TestDevice::new(device_config, Arc::clone(&mem));
        let notify = Arc::new(TestNotify::default());

        let ports: Arc<dyn gasvga_device::Ports> = Arc::clone(&device) as Arc<dyn gasvga_device::Ports>;
        let sink: Arc<dyn NotifySink> = Arc::clone(&notify) as Arc<dyn NotifySink>;
        let svga = Svga::start(
            ports,
            device.fifo_page(),
            Arc::clone(&mem),
            sink,
            driver_config,
        )
        .expect("adapter start");

        Self {
            device,
            svga,
            notify,
            mem,
        }
    }

    /// One device round-trip: flush buffered work, let the device process
    /// it, then service the interrupt and the DPC if the device raised
    /// anything.
    pub fn tick(&self) {
        self.svga.flush();
        self.device.process();
        if self.svga.interrupt() {
            self.svga.dpc();
        }
    }

    /// Wait for the passive-level reclaim worker to drain the deferred MOB
    /// and host-object lists.
    pub fn wait_reclaim(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if self.svga.deferred_mob_count() == 0 && self.svga.pending_host_object_count() == 0 {
                return;
            }
            assert!(Instant::now() < deadline, "reclaim did not drain");
            thread::sleep(Duration::from_millis(1));
        }
    }
}
