//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Fence objects.
//!
//! A fence object is the opaque handle a client polls or waits on. Lookup
//! and wait are reference-counted so that they never race with an explicit
//! delete. The submission path stamps a fence with the frame's submission
//! identifier; the DPC promotes it to `SIGNALED` once the device has passed
//! that identifier and wakes any waiter.
use log::trace;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex};
use std::time::{Duration, Instant};

use gasvga_base::{ErrorKind, Result};
use gasvga_common::{fence_cmp32, IdBitmap};

use crate::svga::{OwnerId, Svga};

const FENCE_STATE_IDLE: u32 = 0;
const FENCE_STATE_SUBMITTED: u32 = 1;
const FENCE_STATE_SIGNALED: u32 = 2;

const FENCE_FLAG_WAITED: u32 = 1 << 0;
const FENCE_FLAG_DELETED: u32 = 1 << 1;

/// Externally visible fence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The handle does not name a fence.
    Null,
    Idle,
    Submitted,
    Signaled,
}

/// The event a waiter blocks on.
#[derive(Debug, Default)]
struct FenceEvent {
    done: StdMutex<bool>,
    cv: Condvar,
}

impl FenceEvent {
    fn set(&self) {
        let mut done = self.done.lock().unwrap();
        *done = true;
        self.cv.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock().unwrap();
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cv.wait_timeout(done, deadline - now).unwrap();
            done = guard;
        }
        true
    }
}

#[derive(Debug)]
pub struct FenceObject {
    handle: u32,
    /// Driver-wide monotonic sequence number, stamped at creation.
    seq_no: u32,
    owner: OwnerId,
    refs: AtomicU32,
    state: AtomicU32,
    flags: AtomicU32,
    submission_id: AtomicU32,
    event: FenceEvent,
}

impl FenceObject {
    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    pub fn submission_id(&self) -> u32 {
        self.submission_id.load(Ordering::SeqCst)
    }

    fn status(&self) -> FenceStatus {
        match self.state.load(Ordering::SeqCst) {
            FENCE_STATE_SUBMITTED => FenceStatus::Submitted,
            FENCE_STATE_SIGNALED => FenceStatus::Signaled,
            _ => FenceStatus::Idle,
        }
    }

    fn has_flag(&self, flag: u32) -> bool {
        self.flags.load(Ordering::SeqCst) & flag != 0
    }
}

#[derive(Debug)]
pub(crate) struct FenceList {
    pub map: BTreeMap<u32, Arc<FenceObject>>,
    pub bits: IdBitmap,
    pub seq_source: u32,
}

impl FenceList {
    pub fn new(limit: u32) -> Self {
        let mut bits = IdBitmap::new(limit);
        // Handle 0 means "no fence".
        bits.set(0);
        Self {
            map: BTreeMap::new(),
            bits,
            seq_source: 0,
        }
    }
}

impl Svga {
    /// Create a fence object. The handle is returned to the client; the
    /// object holds one creation reference until explicitly deleted.
    pub fn fence_create(&self, owner: OwnerId) -> Result<u32> {
        let mut list = self.fences.lock();

        let handle = list
            .bits
            .alloc()
            .ok_or(ErrorKind::InsufficientResources)?;
        list.seq_source = list.seq_source.wrapping_add(1);

        let fo = Arc::new(FenceObject {
            handle,
            seq_no: list.seq_source,
            owner,
            refs: AtomicU32::new(1),
            state: AtomicU32::new(FENCE_STATE_IDLE),
            flags: AtomicU32::new(0),
            submission_id: AtomicU32::new(0),
            event: FenceEvent::default(),
        });
        list.map.insert(handle, fo);

        trace!("fence create: handle {}", handle);
        Ok(handle)
    }

    /// Look a fence up under the list lock, taking a reference.
    pub(crate) fn fence_lookup(&self, handle: u32) -> Option<Arc<FenceObject>> {
        let list = self.fences.lock();
        let fo = list.map.get(&handle)?;
        fo.refs.fetch_add(1, Ordering::SeqCst);
        Some(Arc::clone(fo))
    }

    pub(crate) fn fence_unref(&self, fo: &Arc<FenceObject>) {
        let prev = fo.refs.fetch_sub(1, Ordering::SeqCst);
        assert!(prev != 0 && prev < u32::max_value() / 2);
        if prev == 1 {
            let mut list = self.fences.lock();
            list.map.remove(&fo.handle);
            list.bits.free(fo.handle);
            trace!("fence delete: handle {}", fo.handle);
        }
    }

    /// `(submitted_seq_no, last_completed_seq_no, status)` of a handle.
    pub fn fence_query(&self, handle: u32) -> (u32, u32, FenceStatus) {
        let processed = self.last_completed_seq_no.load(Ordering::SeqCst);
        match self.fence_lookup(handle) {
            Some(fo) => {
                let result = (fo.seq_no, processed, fo.status());
                self.fence_unref(&fo);
                result
            }
            None => (0, processed, FenceStatus::Null),
        }
    }

    /// Block until the fence signals or the timeout elapses. A zero timeout
    /// reports the current state without waiting.
    pub fn fence_wait(&self, handle: u32, timeout_us: u32) -> Result<FenceStatus> {
        let fo = self
            .fence_lookup(handle)
            .ok_or(ErrorKind::InvalidParameter)?;

        if fo.status() == FenceStatus::Signaled || timeout_us == 0 {
            let status = fo.status();
            self.fence_unref(&fo);
            return Ok(status);
        }

        {
            let _list = self.fences.lock();
            // Arm the event once; later waiters reuse it.
            if !fo.has_flag(FENCE_FLAG_WAITED) {
                *fo.event.done.lock().unwrap() = false;
                fo.flags.fetch_or(FENCE_FLAG_WAITED, Ordering::SeqCst);
            }
            // The promotion may have happened between the status check and
            // arming the event; it runs under the list lock, so re-check
            // here.
            if fo.status() == FenceStatus::Signaled {
                fo.event.set();
            }
        }

        trace!("fence wait: handle {}", handle);
        let signaled = fo
            .event
            .wait_timeout(Duration::from_micros(timeout_us as u64));

        let status = fo.status();
        self.fence_unref(&fo);
        if signaled {
            Ok(status)
        } else {
            Err(ErrorKind::Timeout.into())
        }
    }

    /// Mark the fence deleted and drop the creation reference. Any waiter is
    /// woken.
    pub fn fence_delete(&self, handle: u32) -> Result<()> {
        let fo = self
            .fence_lookup(handle)
            .ok_or(ErrorKind::InvalidParameter)?;

        if fo.has_flag(FENCE_FLAG_DELETED) {
            self.fence_unref(&fo);
            return Err(ErrorKind::InvalidParameter.into());
        }
        fo.flags.fetch_or(FENCE_FLAG_DELETED, Ordering::SeqCst);

        if fo.has_flag(FENCE_FLAG_WAITED) {
            fo.event.set();
            fo.flags.fetch_and(!FENCE_FLAG_WAITED, Ordering::SeqCst);
        }

        // Undo the lookup reference, then the creation reference.
        self.fence_unref(&fo);
        self.fence_unref(&fo);
        Ok(())
    }

    /// Drop every fence belonging to `owner` (or all of them).
    pub fn fence_objects_destroy(&self, owner: Option<OwnerId>) {
        let victims: Vec<Arc<FenceObject>> = {
            let mut list = self.fences.lock();
            let victims: Vec<Arc<FenceObject>> = list
                .map
                .values()
                .filter(|fo| owner.map_or(true, |o| fo.owner == o))
                .cloned()
                .collect();
            for fo in &victims {
                list.map.remove(&fo.handle);
                list.bits.free(fo.handle);
            }
            victims
        };
        for fo in &victims {
            trace!("deallocate fence handle {}", fo.handle);
            if fo.has_flag(FENCE_FLAG_WAITED) {
                fo.event.set();
            }
        }
    }

    /// Stamp a fence with the frame's submission identifier.
    pub(crate) fn fence_submit(&self, handle: u32, submission_id: u32) -> Result<()> {
        let _list = self.fences.lock();
        let fo = {
            // Under the list lock already; plain map access.
            let list = &*_list;
            list.map
                .get(&handle)
                .cloned()
                .ok_or(ErrorKind::InvalidParameter)?
        };
        debug_assert_eq!(fo.state.load(Ordering::SeqCst), FENCE_STATE_IDLE);
        fo.submission_id.store(submission_id, Ordering::SeqCst);
        fo.state.store(FENCE_STATE_SUBMITTED, Ordering::SeqCst);
        trace!("fence submit: handle {} id {}", handle, submission_id);
        Ok(())
    }

    /// DPC half: promote every submitted fence the device has passed.
    pub(crate) fn fence_process_completions(&self, last_completed: u32) {
        let promoted: Vec<Arc<FenceObject>> = {
            let list = self.fences.lock();
            list.map
                .values()
                .filter(|fo| {
                    fo.state.load(Ordering::SeqCst) == FENCE_STATE_SUBMITTED
                        && fence_cmp32(fo.submission_id(), last_completed)
                            != CmpOrdering::Greater
                })
                .cloned()
                .collect()
        };

        for fo in promoted {
            trace!(
                "fence signaled: handle {} (submission {})",
                fo.handle,
                fo.submission_id()
            );
            self.last_completed_seq_no.store(fo.seq_no, Ordering::SeqCst);
            fo.state.store(FENCE_STATE_SIGNALED, Ordering::SeqCst);
            if fo.has_flag(FENCE_FLAG_WAITED) {
                fo.event.set();
            }
            // The signaled object stays registered so a late wait or query
            // still observes the state; the explicit delete (or the owner
            // cleanup) drops the creation reference.
        }
    }
}
