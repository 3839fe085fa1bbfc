//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Fence and preemption behaviour against the device model.
use gasvga_device::{new_owner_id, FenceStatus, SubmitArgs};
use gasvga_test::{Notification, TestBench};

fn submit_empty(bench: &TestBench, fence_handle: u32, id: u32) {
    bench
        .svga
        .submit_frame(SubmitArgs {
            context: None,
            fence_handle,
            render_data: None,
            dma: None,
            submission_fence_id: id,
        })
        .unwrap();
}

#[test]
fn basic_fence_round_trip() {
    let bench = TestBench::new();
    let owner = new_owner_id();

    println!("- Creating a fence object");
    let handle = bench.svga.fence_create(owner).unwrap();

    let (_, _, status) = bench.svga.fence_query(handle);
    assert_eq!(status, FenceStatus::Idle);
    assert_eq!(bench.svga.fence_wait(handle, 0).unwrap(), FenceStatus::Idle);

    println!("- Submitting an empty frame carrying the fence");
    submit_empty(&bench, handle, 7);
    let status = bench.svga.fence_wait(handle, 0).unwrap();
    assert!(status == FenceStatus::Submitted || status == FenceStatus::Signaled);

    println!("- Letting the device process the fence");
    bench.tick();

    assert_eq!(bench.svga.last_completed_fence_id(), 7);
    assert_eq!(bench.notify.completed_ids(), vec![7]);
    assert_eq!(
        bench.svga.fence_wait(handle, 1_000_000).unwrap(),
        FenceStatus::Signaled
    );

    println!("- Deleting the fence");
    bench.svga.fence_delete(handle).unwrap();
    let (_, _, status) = bench.svga.fence_query(handle);
    assert_eq!(status, FenceStatus::Null);
}

#[test]
fn fence_round_trip_on_fifo_device() {
    let bench = TestBench::fifo_only();
    let owner = new_owner_id();

    let handle = bench.svga.fence_create(owner).unwrap();
    submit_empty(&bench, handle, 3);
    bench.tick();

    assert_eq!(
        bench.svga.fence_wait(handle, 1_000_000).unwrap(),
        FenceStatus::Signaled
    );
    assert_eq!(bench.notify.completed_ids(), vec![3]);
}

#[test]
fn fence_query_reports_sequence_numbers() {
    let bench = TestBench::new();
    let owner = new_owner_id();

    let first = bench.svga.fence_create(owner).unwrap();
    let second = bench.svga.fence_create(owner).unwrap();
    let (seq_first, _, _) = bench.svga.fence_query(first);
    let (seq_second, _, _) = bench.svga.fence_query(second);
    assert!(seq_second > seq_first);

    submit_empty(&bench, second, 9);
    bench.tick();

    let (_, processed, status) = bench.svga.fence_query(second);
    assert_eq!(status, FenceStatus::Signaled);
    assert_eq!(processed, seq_second);
}

#[test]
fn wait_times_out_when_device_is_silent() {
    let bench = TestBench::new();
    let handle = bench.svga.fence_create(new_owner_id()).unwrap();
    submit_empty(&bench, handle, 11);

    // No device processing: the wait must elapse.
    let err = bench.svga.fence_wait(handle, 10_000).unwrap_err();
    assert_eq!(err.kind(), gasvga_base::ErrorKind::Timeout);
}

#[test]
fn owner_scoped_fence_cleanup() {
    let bench = TestBench::new();
    let ours = new_owner_id();
    let theirs = new_owner_id();

    let a = bench.svga.fence_create(ours).unwrap();
    let b = bench.svga.fence_create(theirs).unwrap();

    bench.svga.fence_objects_destroy(Some(ours));

    let (_, _, status) = bench.svga.fence_query(a);
    assert_eq!(status, FenceStatus::Null);
    let (_, _, status) = bench.svga.fence_query(b);
    assert_eq!(status, FenceStatus::Idle);
}

#[test]
fn preemption_of_in_flight_work() {
    let bench = TestBench::new();

    println!("- Submitting frames 1..5 without processing them");
    for id in 1..=5 {
        submit_empty(&bench, 0, id);
    }
    assert_eq!(bench.svga.last_submitted_fence_id(), 5);
    assert_eq!(bench.svga.last_completed_fence_id(), 0);

    println!("- Requesting preemption with marker 6");
    bench.svga.preempt(6).unwrap();
    assert_eq!(bench.svga.preemption_fence_id(), 6);

    println!("- Device processes everything, then the marker");
    // The marker may sit on the pending queue behind a full context.
    for _ in 0..4 {
        bench.tick();
    }

    assert_eq!(
        bench.notify.last(),
        Some(Notification::Preempted {
            fence: 6,
            last_completed: 5
        })
    );
    // The preemption identifier is cleared exactly once.
    assert_eq!(bench.svga.preemption_fence_id(), 0);
    assert_eq!(bench.svga.last_completed_fence_id(), 5);
}

#[test]
fn preempt_when_already_idle_notifies_synchronously() {
    let bench = TestBench::new();
    bench.svga.preempt(42).unwrap();

    assert_eq!(
        bench.notify.last(),
        Some(Notification::Preempted {
            fence: 42,
            last_completed: 0
        })
    );
    // No marker was recorded.
    assert_eq!(bench.svga.preemption_fence_id(), 0);
}

#[test]
fn fence_comparison_wraps_at_the_32_bit_boundary() {
    let bench = TestBench::new();

    // Pretend a long uptime: walk the completed id towards the top of the
    // 32-bit space in window-sized steps.
    let near_max = u32::max_value() - 3;
    for value in &[0x7000_0000, 0xE000_0000, near_max] {
        bench.device.raise_fence(*value);
        bench.svga.interrupt();
        assert_eq!(bench.svga.last_completed_fence_id(), *value);
    }

    // A small value after the wrap is newer, not older.
    bench.device.raise_fence(3);
    bench.svga.interrupt();
    assert_eq!(bench.svga.last_completed_fence_id(), 3);

    // A stale interrupt with an old value must not move it back.
    bench.device.raise_fence(near_max);
    bench.svga.interrupt();
    assert_eq!(bench.svga.last_completed_fence_id(), 3);
}
