//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Host objects, MOBs, GMRs and object tables against the device model.
use gasvga_base::cmd::*;
use gasvga_base::SVGA3D_INVALID_ID;
use gasvga_device::{new_owner_id, GbSurfaceCreateParams, SurfaceCreateParams};
use gasvga_test::TestBench;

fn plain_surface_params() -> SurfaceCreateParams {
    SurfaceCreateParams {
        flags: 0,
        format: 23,
        mip_levels: [1, 0, 0, 0, 0, 0],
    }
}

fn one_size() -> Vec<Svga3dSize> {
    vec![Svga3dSize {
        width: 64,
        height: 64,
        depth: 1,
    }]
}

#[test]
fn registry_reference_counting() {
    let bench = TestBench::new();

    let sid = bench
        .svga
        .surface_create(&plain_surface_params(), &one_size())
        .unwrap();

    // Creation leaves one reference; a lookup adds one.
    let so = bench.svga.surface_object_query(sid).unwrap();
    assert_eq!(so.ref_count(), 2);

    let again = bench.svga.surface_object_query(sid).unwrap();
    assert_eq!(again.ref_count(), 3);
    bench.svga.surface_object_release(&again, true).unwrap();
    assert_eq!(so.ref_count(), 2);
    bench.svga.surface_object_release(&so, true).unwrap();

    // Dropping the creation reference destroys the host object.
    bench.svga.surface_unref(sid).unwrap();
    assert!(bench.svga.surface_object_query(sid).is_none());

    bench.tick();
    let destroy = bench.device.last_of(SVGA_3D_CMD_SURFACE_DESTROY).unwrap();
    assert_eq!(destroy.dword(0), sid);
}

#[test]
fn surface_create_validates_faces_and_sizes() {
    let bench = TestBench::new();

    // No sizes.
    assert!(bench
        .svga
        .surface_create(&plain_surface_params(), &[])
        .is_err());

    // Mip level counts must be uniform across faces.
    let params = SurfaceCreateParams {
        flags: SurfaceFlags::CUBEMAP.bits(),
        format: 23,
        mip_levels: [2, 1, 2, 2, 2, 2],
    };
    let sizes = vec![Svga3dSize::default(); 11];
    assert!(bench.svga.surface_create(&params, &sizes).is_err());

    // A cubemap needs all six faces.
    let params = SurfaceCreateParams {
        flags: SurfaceFlags::CUBEMAP.bits(),
        format: 23,
        mip_levels: [1, 1, 1, 0, 0, 0],
    };
    let sizes = vec![Svga3dSize::default(); 3];
    assert!(bench.svga.surface_create(&params, &sizes).is_err());

    // Every size must be accounted for.
    let sizes = vec![Svga3dSize::default(); 3];
    assert!(bench
        .svga
        .surface_create(&plain_surface_params(), &sizes)
        .is_err());

    // A well-formed cubemap.
    let params = SurfaceCreateParams {
        flags: SurfaceFlags::CUBEMAP.bits(),
        format: 23,
        mip_levels: [2, 2, 2, 2, 2, 2],
    };
    let sizes = vec![Svga3dSize::default(); 12];
    let sid = bench.svga.surface_create(&params, &sizes).unwrap();
    bench.svga.surface_unref(sid).unwrap();
}

#[test]
fn shared_surface_redirect() {
    let bench = TestBench::new();

    // Process A registers the real surface, process B its alias.
    let real = bench
        .svga
        .surface_create(&plain_surface_params(), &one_size())
        .unwrap();
    let alias = bench
        .svga
        .surface_create(&plain_surface_params(), &one_size())
        .unwrap();

    bench.svga.shared_sid_insert(alias, real).unwrap();

    // The redirect holds a reference on the real surface.
    let so = bench.svga.surface_object_query(real).unwrap();
    assert_eq!(so.ref_count(), 3);
    bench.svga.surface_object_release(&so, true).unwrap();

    let alias_so = bench.svga.surface_object_query(alias).unwrap();
    assert_eq!(alias_so.shared_sid(), real);
    bench.svga.surface_object_release(&alias_so, true).unwrap();

    // Double insert is a caller error.
    assert!(bench.svga.shared_sid_insert(alias, real).is_err());

    bench.svga.shared_sid_remove(alias).unwrap();
    let so = bench.svga.surface_object_query(real).unwrap();
    assert_eq!(so.ref_count(), 2);
    bench.svga.surface_object_release(&so, true).unwrap();

    bench.svga.surface_unref(alias).unwrap();
    bench.svga.surface_unref(real).unwrap();
}

#[test]
fn mob_deferred_destruction() {
    let bench = TestBench::new();
    let owner = new_owner_id();

    println!("- Creating a region (allocates the MOB)");
    let (gmr_id, _user_addr) = bench.svga.region_create(owner, 3).unwrap();
    bench.tick();
    assert!(bench.device.knows_mob(gmr_id));
    assert!(bench.svga.mob_query(gmr_id).is_some());

    println!("- Destroying it: the MOB must linger until the host acknowledges");
    bench.svga.region_destroy(gmr_id).unwrap();
    assert_eq!(bench.svga.deferred_mob_count(), 1);
    assert!(bench.svga.mob_query(gmr_id).is_some());

    println!("- Host processes destroy + fence write, DPC reaps");
    bench.tick();
    bench.wait_reclaim();

    assert!(bench.svga.mob_query(gmr_id).is_none());
    assert!(!bench.device.knows_mob(gmr_id));

    println!("- The id is re-allocatable");
    let (gmr_id2, _) = bench.svga.region_create(owner, 1).unwrap();
    assert_eq!(gmr_id2, gmr_id);
    bench.svga.region_destroy(gmr_id2).unwrap();
    bench.tick();
    bench.wait_reclaim();
}

#[test]
fn gmr_reports_page_table_to_host() {
    let bench = TestBench::new();
    let owner = new_owner_id();

    let (gmr_id, user_addr) = bench.svga.region_create(owner, 2).unwrap();
    assert_ne!(user_addr, 0);

    let (addr, size) = bench.svga.region_user_address_and_size(gmr_id).unwrap();
    assert_eq!(addr, user_addr);
    assert_eq!(size, 2 * 4096);

    bench.tick();
    let define = bench.device.last_of(SVGA_CMD_DEFINE_GMR2).unwrap();
    assert_eq!(define.dword(0), gmr_id);
    assert_eq!(define.dword(1), 2);
    let remap = bench.device.last_of(SVGA_CMD_REMAP_GMR2).unwrap();
    assert_eq!(remap.dword(0), gmr_id);
    assert_eq!(remap.dword(1), SVGA_REMAP_GMR2_PPN64);
    assert_eq!(remap.dword(3), 2);
    assert!(bench.device.last_of(SVGA_3D_CMD_DEFINE_GB_MOB64).is_some());

    bench.svga.region_destroy(gmr_id).unwrap();
    bench.tick();
    bench.wait_reclaim();
}

#[test]
fn owner_scoped_region_cleanup() {
    let bench = TestBench::new();
    let ours = new_owner_id();
    let theirs = new_owner_id();

    let (a, _) = bench.svga.region_create(ours, 1).unwrap();
    let (b, _) = bench.svga.region_create(theirs, 1).unwrap();

    bench.svga.regions_destroy(Some(ours));
    assert!(bench.svga.region_user_address_and_size(a).is_err());
    assert!(bench.svga.region_user_address_and_size(b).is_ok());

    bench.svga.regions_destroy(None);
    assert!(bench.svga.region_user_address_and_size(b).is_err());
    bench.tick();
    bench.wait_reclaim();
}

#[test]
fn otable_grows_by_doubling() {
    let bench = TestBench::new();

    let surface_type = 1u32; // OTable kind of surfaces

    println!("- First surface id sets the table base");
    let mut ids = Vec::new();
    ids.push(bench.svga.surface_id_alloc().unwrap());
    bench.tick();
    let set_cmds: Vec<_> = bench
        .device
        .executed()
        .iter()
        .filter(|c| c.id == SVGA_3D_CMD_SET_OTABLE_BASE64 && c.dword(0) == surface_type)
        .cloned()
        .collect();
    assert_eq!(set_cmds.len(), 1);

    println!("- Ids below the initial 64-entry table do not grow it");
    while ids.len() < 63 {
        ids.push(bench.svga.surface_id_alloc().unwrap());
    }
    assert_eq!(*ids.last().unwrap(), 63);
    bench.tick();
    assert_eq!(bench.device.count_of(SVGA_3D_CMD_GROW_OTABLE), 0);

    println!("- Id 64 doubles the table");
    ids.push(bench.svga.surface_id_alloc().unwrap());
    assert_eq!(*ids.last().unwrap(), 64);
    bench.tick();
    let grow = bench.device.last_of(SVGA_3D_CMD_GROW_OTABLE).unwrap();
    assert_eq!(grow.dword(0), surface_type);
    // The previously valid bytes: 64 entries of 64 bytes.
    assert_eq!(grow.dword(4), 64 * 64);

    println!("- The doubled table covers ids up to 127 without regrowing");
    while *ids.last().unwrap() < 127 {
        ids.push(bench.svga.surface_id_alloc().unwrap());
    }
    bench.tick();
    assert_eq!(bench.device.count_of(SVGA_3D_CMD_GROW_OTABLE), 1);

    for id in ids {
        bench.svga.surface_id_free(id);
    }
}

#[test]
fn gb_surface_create_binds_a_region() {
    let bench = TestBench::new();
    let owner = new_owner_id();

    let mut params = GbSurfaceCreateParams {
        flags: 0,
        format: 23,
        num_mip_levels: 1,
        sample_count: 0,
        size: Svga3dSize {
            width: 16,
            height: 16,
            depth: 1,
        },
        num_faces: 1,
        gmrid: SVGA3D_INVALID_ID,
        size_bytes: 16 * 16 * 4,
        user_addr: 0,
        sid: 0,
    };
    bench.svga.gb_surface_create(owner, &mut params).unwrap();

    assert_ne!(params.gmrid, SVGA3D_INVALID_ID);
    assert_ne!(params.user_addr, 0);
    assert_eq!(params.size_bytes, 4096);

    bench.tick();
    let define = bench.device.last_of(SVGA_3D_CMD_DEFINE_GB_SURFACE_V4).unwrap();
    assert_eq!(define.dword(0), params.sid);
    let bind = bench.device.last_of(SVGA_3D_CMD_BIND_GB_SURFACE).unwrap();
    assert_eq!(bind.dword(0), params.sid);
    assert_eq!(bind.dword(1), params.gmrid);

    println!("- Destruction unbinds the MOB first");
    bench.svga.surface_unref(params.sid).unwrap();
    bench.tick();
    let unbind = bench.device.last_of(SVGA_3D_CMD_BIND_GB_SURFACE).unwrap();
    assert_eq!(unbind.dword(0), params.sid);
    assert_eq!(unbind.dword(1), SVGA3D_INVALID_ID);

    bench.svga.region_destroy(params.gmrid).unwrap();
    bench.tick();
    bench.wait_reclaim();
}

#[test]
fn gbo_depth_is_observable_through_the_device_walk() {
    // A multi-page region forces a level-1 page table; the device model
    // resolves the MOB fence write through it, which fails loudly if the
    // table is malformed.
    let bench = TestBench::new();
    let owner = new_owner_id();

    let (gmr_id, _) = bench.svga.region_create(owner, 8).unwrap();
    bench.tick();

    bench.svga.region_destroy(gmr_id).unwrap();
    bench.tick();
    bench.wait_reclaim();
    assert_eq!(bench.svga.deferred_mob_count(), 0);
}
