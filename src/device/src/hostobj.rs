//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Host object accounting.
//!
//! Host objects are resources the guest created on the host. The registry
//! keeps them alive while referenced: a client can submit a command buffer
//! that uses a surface and then delete the surface immediately, so the core
//! takes a reference per in-flight use and the host resource is destroyed
//! only when the last reference goes away.
//!
//! Destruction writes to the command transport, which may block, so releases
//! from dispatch-level context park the object on a deferred list that a
//! passive-level pass reaps.
use log::trace;
use std::collections::BTreeMap;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use gasvga_base::cmd::*;
use gasvga_base::{ErrorKind, Result, PAGE_SIZE, SVGA3D_INVALID_ID};

use crate::enc;
use crate::svga::{OwnerId, Svga};

/// Kind discriminant of a host object. Only surfaces exist today; the
/// registry accommodates more kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostObjectKind {
    Surface,
}

/// A host-resident surface tracked by the registry.
#[derive(Debug)]
pub struct SurfaceObject {
    kind: HostObjectKind,
    sid: u32,
    refs: AtomicU32,
    /// For shared surfaces: the "real" surface id registered by another
    /// process. Equals `sid` when not redirected.
    shared_sid: AtomicU32,
    /// Bound MOB id, or `SVGA3D_INVALID_ID`.
    mobid: AtomicU32,
}

impl SurfaceObject {
    pub fn kind(&self) -> HostObjectKind {
        self.kind
    }

    pub fn sid(&self) -> u32 {
        self.sid
    }

    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn shared_sid(&self) -> u32 {
        self.shared_sid.load(Ordering::SeqCst)
    }

    pub fn mobid(&self) -> u32 {
        self.mobid.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub(crate) struct HostObjState {
    pub surfaces: BTreeMap<u32, Arc<SurfaceObject>>,
    /// Objects whose last reference went away at dispatch level; destroyed
    /// by the next passive-level pass.
    pub deleted: Vec<Arc<SurfaceObject>>,
}

/// Validated parameters of a legacy surface definition.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceCreateParams {
    pub flags: u32,
    pub format: u32,
    pub mip_levels: [u32; SVGA3D_MAX_SURFACE_FACES],
}

/// Parameters of a guest-backed surface creation.
#[derive(Debug, Clone, Copy)]
pub struct GbSurfaceCreateParams {
    pub flags: u64,
    pub format: u32,
    pub num_mip_levels: u32,
    pub sample_count: u32,
    pub size: Svga3dSize,
    pub num_faces: u32,
    /// In: backing region id, or `SVGA3D_INVALID_ID` to allocate one.
    /// Out: the region actually used.
    pub gmrid: u32,
    /// In: requested backing size. Out: actual backing size.
    pub size_bytes: u32,
    /// Out: client mapping address of the backing region.
    pub user_addr: u64,
    /// Out: the new surface id.
    pub sid: u32,
}

impl Svga {
    /// Look a surface up by id, taking a reference on success.
    pub fn surface_object_query(&self, sid: u32) -> Option<Arc<SurfaceObject>> {
        let state = self.hostobj.lock();
        let so = state.surfaces.get(&sid)?;
        so.refs.fetch_add(1, Ordering::SeqCst);
        Some(Arc::clone(so))
    }

    /// Drop a reference. When the count reaches zero the object leaves the
    /// registry; destruction happens inline when the caller may block
    /// (`can_block`), otherwise it is deferred to the pending list.
    pub fn surface_object_release(&self, so: &Arc<SurfaceObject>, can_block: bool) -> Result<()> {
        let prev = so.refs.fetch_sub(1, Ordering::SeqCst);
        assert!(prev != 0);
        if prev != 1 {
            return Ok(());
        }

        let removed = {
            let mut state = self.hostobj.lock();
            let removed = state.surfaces.remove(&so.sid);
            match removed {
                Some(ref r) if Arc::ptr_eq(r, so) => {}
                _ => return Err(ErrorKind::InvalidParameter.into()),
            }
            if !can_block {
                trace!("pending destroy sid={}", so.sid);
                state.deleted.push(Arc::clone(so));
                None
            } else {
                removed
            }
        };

        if let Some(so) = removed {
            self.surface_object_destroy(&so)?;
        }
        Ok(())
    }

    /// Release a surface by id: undo the lookup reference and drop the
    /// creation reference.
    pub fn surface_unref(&self, sid: u32) -> Result<()> {
        trace!("unref sid={}", sid);
        let so = self
            .surface_object_query(sid)
            .ok_or(ErrorKind::InvalidParameter)?;
        // Undo the query reference, then release once more to destroy.
        so.refs.fetch_sub(1, Ordering::SeqCst);
        self.surface_object_release(&so, true)
    }

    /// Destroy objects that could not be destroyed at dispatch level.
    /// Must run at passive level.
    pub fn host_objects_process_pending(&self) -> Result<()> {
        let deleted: Vec<Arc<SurfaceObject>> = {
            let mut state = self.hostobj.lock();
            std::mem::replace(&mut state.deleted, Vec::new())
        };

        if deleted.is_empty() {
            return Ok(());
        }

        trace!("deleting {} pending objects", deleted.len());
        for so in deleted {
            assert_eq!(so.ref_count(), 0, "deleted host object still in use");
            self.surface_object_destroy(&so)?;
        }
        Ok(())
    }

    /// The surface destructor: unbind its MOB if bound, tell the host to
    /// destroy the surface, then release the id.
    fn surface_object_destroy(&self, so: &SurfaceObject) -> Result<()> {
        trace!("destroy sid={}", so.sid);

        if so.mobid() != SVGA3D_INVALID_ID {
            let len = size_of::<Svga3dCmdBindGBSurface>() as u32;
            if let Ok(mut reserve) = self.reserve_3d(SVGA_3D_CMD_BIND_GB_SURFACE, len, SVGA3D_INVALID_ID)
            {
                enc::put(
                    reserve.body_mut(),
                    0,
                    Svga3dCmdBindGBSurface {
                        sid: so.sid,
                        mobid: SVGA3D_INVALID_ID,
                    },
                );
                reserve.commit(len);
            }
        }

        self.surface_destroy(so.sid)?;
        // Keep the id when the host-side deletion failed.
        self.surface_id_free(so.sid);
        Ok(())
    }

    /// Emit `SURFACE_DEFINE` for an already-allocated surface id.
    pub fn surface_define(
        &self,
        sid: u32,
        params: &SurfaceCreateParams,
        sizes: &[Svga3dSize],
    ) -> Result<()> {
        let len = enc::cmd3d_len::<Svga3dCmdDefineSurface>() + sizes.len() * size_of::<Svga3dSize>();
        let mut reserve = self.reserve(len as u32, SVGA3D_INVALID_ID)?;
        enc::cmd3d_define_surface(
            reserve.body_mut(),
            sid,
            params.flags,
            params.format,
            &params.mip_levels,
            sizes,
        );
        reserve.commit(len as u32);
        Ok(())
    }

    /// Emit `SURFACE_DESTROY`.
    pub fn surface_destroy(&self, sid: u32) -> Result<()> {
        let len = enc::cmd3d_len::<Svga3dCmdDestroySurface>() as u32;
        let mut reserve = self.reserve(len, SVGA3D_INVALID_ID)?;
        enc::cmd3d_destroy_surface(reserve.body_mut(), sid);
        reserve.commit(len);
        Ok(())
    }

    fn surface_validate_faces(
        &self,
        params: &SurfaceCreateParams,
        num_sizes: u32,
    ) -> Result<()> {
        // A surface must have dimensions.
        if num_sizes < 1 {
            return Err(ErrorKind::InvalidParameter.into());
        }

        // The face count is the number of leading non-zero elements of
        // `mip_levels`. Only plain surfaces (1 face) and cubemaps (6 faces)
        // exist.
        let mut remaining = num_sizes;
        let mut faces = 0usize;
        for i in 0..SVGA3D_MAX_SURFACE_FACES {
            let levels = params.mip_levels[i];
            if levels == 0 {
                break;
            }
            if levels > self.max_texture_levels {
                return Err(ErrorKind::InvalidParameter.into());
            }
            // Every face must carry the same number of mip levels.
            if levels != params.mip_levels[0] {
                return Err(ErrorKind::InvalidParameter.into());
            }
            if levels > remaining {
                return Err(ErrorKind::InvalidParameter.into());
            }
            remaining -= levels;
            faces += 1;
        }
        for i in faces..SVGA3D_MAX_SURFACE_FACES {
            if params.mip_levels[i] != 0 {
                return Err(ErrorKind::InvalidParameter.into());
            }
        }

        let expected = if params.flags & SurfaceFlags::CUBEMAP.bits() != 0 {
            6
        } else {
            1
        };
        if faces != expected {
            return Err(ErrorKind::InvalidParameter.into());
        }

        // Every supplied size must be accounted for.
        if remaining != 0 {
            return Err(ErrorKind::InvalidParameter.into());
        }
        Ok(())
    }

    /// Validate the creation parameters, allocate a surface id, define the
    /// surface on the host and register the host object. The object starts
    /// with one reference.
    pub fn surface_create(
        &self,
        params: &SurfaceCreateParams,
        sizes: &[Svga3dSize],
    ) -> Result<u32> {
        self.host_objects_process_pending()?;
        self.surface_validate_faces(params, sizes.len() as u32)?;

        let sid = self.surface_id_alloc()?;
        if let Err(e) = self.surface_define(sid, params, sizes) {
            self.surface_id_free(sid);
            return Err(e);
        }

        self.surface_object_insert(sid, SVGA3D_INVALID_ID);
        trace!("created sid={}", sid);
        Ok(sid)
    }

    fn surface_object_insert(&self, sid: u32, mobid: u32) {
        let so = Arc::new(SurfaceObject {
            kind: HostObjectKind::Surface,
            sid,
            refs: AtomicU32::new(1),
            // Initially not redirected; the client changes this for shared
            // surfaces.
            shared_sid: AtomicU32::new(sid),
            mobid: AtomicU32::new(mobid),
        });
        self.hostobj.lock().surfaces.insert(sid, so);
    }

    /// Create a guest-backed surface, allocating a backing region unless the
    /// caller supplies one. The region id doubles as the bound MOB id.
    pub fn gb_surface_create(
        &self,
        owner: OwnerId,
        params: &mut GbSurfaceCreateParams,
    ) -> Result<()> {
        self.host_objects_process_pending()?;

        let (user_addr, size_bytes) = if params.gmrid == SVGA3D_INVALID_ID {
            let num_pages =
                (params.size_bytes as usize + PAGE_SIZE - 1) / PAGE_SIZE;
            let (gmrid, user_addr) = self.region_create(owner, num_pages as u32)?;
            params.gmrid = gmrid;
            (user_addr, (num_pages * PAGE_SIZE) as u32)
        } else {
            self.region_user_address_and_size(params.gmrid)?
        };

        let sid = self.surface_id_alloc()?;
        if let Err(e) = self.gb_surface_define(sid, params) {
            // The surface may be half-defined on the host; destroy it before
            // releasing the id.
            let _ = self.surface_destroy(sid);
            self.surface_id_free(sid);
            return Err(e);
        }

        self.surface_object_insert(sid, params.gmrid);

        params.size_bytes = size_bytes;
        params.user_addr = user_addr;
        params.sid = sid;
        trace!("created gb sid={} (gmrid {})", sid, params.gmrid);
        Ok(())
    }

    fn gb_surface_define(&self, sid: u32, params: &GbSurfaceCreateParams) -> Result<()> {
        {
            let len = size_of::<Svga3dCmdDefineGBSurfaceV4>() as u32;
            let mut reserve =
                self.reserve_3d(SVGA_3D_CMD_DEFINE_GB_SURFACE_V4, len, SVGA3D_INVALID_ID)?;
            enc::put(
                reserve.body_mut(),
                0,
                Svga3dCmdDefineGBSurfaceV4 {
                    sid,
                    surface_flags: params.flags,
                    format: params.format,
                    num_mip_levels: params.num_mip_levels,
                    multisample_count: params.sample_count,
                    autogen_filter: 0,
                    size: params.size,
                    array_size: params.num_faces,
                    buffer_byte_stride: 0,
                },
            );
            reserve.commit(len);
        }
        {
            let len = size_of::<Svga3dCmdBindGBSurface>() as u32;
            let mut reserve = self.reserve_3d(SVGA_3D_CMD_BIND_GB_SURFACE, len, SVGA3D_INVALID_ID)?;
            enc::put(
                reserve.body_mut(),
                0,
                Svga3dCmdBindGBSurface {
                    sid,
                    mobid: params.gmrid,
                },
            );
            reserve.commit(len);
        }
        Ok(())
    }

    /// Redirect `sid` to `shared_sid`. The shared object gains a reference
    /// so it outlives the redirect.
    pub fn shared_sid_insert(&self, sid: u32, shared_sid: u32) -> Result<()> {
        if sid == shared_sid {
            return Err(ErrorKind::InvalidParameter.into());
        }

        let so = self
            .surface_object_query(sid)
            .ok_or(ErrorKind::InvalidParameter)?;

        // The surface must not be redirected yet.
        if so.shared_sid() != so.sid() {
            self.surface_object_release(&so, true)?;
            return Err(ErrorKind::InvalidParameter.into());
        }

        // Reference the target. Its absence is tolerated: the id most likely
        // belongs to another client class that the registry does not track.
        self.surface_object_query(shared_sid);

        so.shared_sid.store(shared_sid, Ordering::SeqCst);

        // Release only the redirected object; the shared one keeps the
        // reference taken above.
        self.surface_object_release(&so, true)
    }

    /// Undo a redirect and drop the reference it held.
    pub fn shared_sid_remove(&self, sid: u32) -> Result<()> {
        let so = self
            .surface_object_query(sid)
            .ok_or(ErrorKind::InvalidParameter)?;

        // The surface must be redirected.
        if so.shared_sid() == so.sid() {
            self.surface_object_release(&so, true)?;
            return Err(ErrorKind::InvalidParameter.into());
        }

        let shared = self.surface_object_query(so.shared_sid());

        so.shared_sid.store(so.sid(), Ordering::SeqCst);

        if let Some(ref shared) = shared {
            // The reference added by shared_sid_insert.
            self.surface_object_release(shared, true)?;
            // The query reference from this call.
            self.surface_object_release(shared, true)?;
        }
        self.surface_object_release(&so, true)
    }

    /// Adapter-stop cleanup: destroy everything that is still registered,
    /// then reap the deferred list.
    pub fn host_objects_cleanup(&self) -> Result<()> {
        let all: Vec<Arc<SurfaceObject>> = {
            let mut state = self.hostobj.lock();
            let all = state.surfaces.values().cloned().collect();
            state.surfaces.clear();
            all
        };
        for so in all {
            self.surface_object_destroy(&so)?;
        }
        self.host_objects_process_pending()
    }
}
