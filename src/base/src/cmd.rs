//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Command identifiers and command record layouts.
//!
//! Commands come from two disjoint identifier spaces. A legacy FIFO record is
//! a `u32` identifier followed by an identifier-specific payload. A 3D record
//! is a [`Svga3dCmdHeader`] (`{id, size}`) followed by `size` payload bytes.
//!
//! The structs here are wire layouts (little-endian dwords). Structs that
//! contain 64-bit fields are `packed` because the device format has no
//! padding before them.
use bitflags::bitflags;

use crate::Ppn64;

/*
 * Legacy FIFO command identifiers.
 */
pub const SVGA_CMD_INVALID_CMD: u32 = 0;
pub const SVGA_CMD_UPDATE: u32 = 1;
pub const SVGA_CMD_DEFINE_CURSOR: u32 = 19;
pub const SVGA_CMD_DEFINE_ALPHA_CURSOR: u32 = 22;
pub const SVGA_CMD_FENCE: u32 = 30;
pub const SVGA_CMD_DEFINE_SCREEN: u32 = 34;
pub const SVGA_CMD_DESTROY_SCREEN: u32 = 35;
pub const SVGA_CMD_DEFINE_GMRFB: u32 = 36;
pub const SVGA_CMD_BLIT_GMRFB_TO_SCREEN: u32 = 37;
pub const SVGA_CMD_BLIT_SCREEN_TO_GMRFB: u32 = 38;
pub const SVGA_CMD_DEFINE_GMR2: u32 = 41;
pub const SVGA_CMD_REMAP_GMR2: u32 = 42;

/*
 * 3D command identifiers. The dispatch table of the command rewriter is
 * indexed by `id - SVGA_3D_CMD_BASE`.
 */
pub const SVGA_3D_CMD_BASE: u32 = 1040;
pub const SVGA_3D_CMD_MAX: u32 = 1280;

pub const SVGA_3D_CMD_SURFACE_DEFINE: u32 = 1040;
pub const SVGA_3D_CMD_SURFACE_DESTROY: u32 = 1041;
pub const SVGA_3D_CMD_SURFACE_COPY: u32 = 1042;
pub const SVGA_3D_CMD_SURFACE_STRETCHBLT: u32 = 1043;
pub const SVGA_3D_CMD_SURFACE_DMA: u32 = 1044;
pub const SVGA_3D_CMD_CONTEXT_DEFINE: u32 = 1045;
pub const SVGA_3D_CMD_CONTEXT_DESTROY: u32 = 1046;
pub const SVGA_3D_CMD_SETTRANSFORM: u32 = 1047;
pub const SVGA_3D_CMD_SETZRANGE: u32 = 1048;
pub const SVGA_3D_CMD_SETRENDERSTATE: u32 = 1049;
pub const SVGA_3D_CMD_SETRENDERTARGET: u32 = 1050;
pub const SVGA_3D_CMD_SETTEXTURESTATE: u32 = 1051;
pub const SVGA_3D_CMD_SETMATERIAL: u32 = 1052;
pub const SVGA_3D_CMD_SETLIGHTDATA: u32 = 1053;
pub const SVGA_3D_CMD_SETLIGHTENABLED: u32 = 1054;
pub const SVGA_3D_CMD_SETVIEWPORT: u32 = 1055;
pub const SVGA_3D_CMD_SETCLIPPLANE: u32 = 1056;
pub const SVGA_3D_CMD_CLEAR: u32 = 1057;
pub const SVGA_3D_CMD_PRESENT: u32 = 1058;
pub const SVGA_3D_CMD_SHADER_DEFINE: u32 = 1059;
pub const SVGA_3D_CMD_SHADER_DESTROY: u32 = 1060;
pub const SVGA_3D_CMD_SET_SHADER: u32 = 1061;
pub const SVGA_3D_CMD_SET_SHADER_CONST: u32 = 1062;
pub const SVGA_3D_CMD_DRAW_PRIMITIVES: u32 = 1063;
pub const SVGA_3D_CMD_SETSCISSORRECT: u32 = 1064;
pub const SVGA_3D_CMD_BEGIN_QUERY: u32 = 1065;
pub const SVGA_3D_CMD_END_QUERY: u32 = 1066;
pub const SVGA_3D_CMD_WAIT_FOR_QUERY: u32 = 1067;
pub const SVGA_3D_CMD_PRESENT_READBACK: u32 = 1068;
pub const SVGA_3D_CMD_BLIT_SURFACE_TO_SCREEN: u32 = 1069;
pub const SVGA_3D_CMD_SURFACE_DEFINE_V2: u32 = 1070;
pub const SVGA_3D_CMD_GENERATE_MIPMAPS: u32 = 1071;
pub const SVGA_3D_CMD_ACTIVATE_SURFACE: u32 = 1080;
pub const SVGA_3D_CMD_DEACTIVATE_SURFACE: u32 = 1081;
pub const SVGA_3D_CMD_SCREEN_DMA: u32 = 1082;

pub const SVGA_3D_CMD_SET_OTABLE_BASE: u32 = 1091;
pub const SVGA_3D_CMD_READBACK_OTABLE: u32 = 1092;
pub const SVGA_3D_CMD_DEFINE_GB_MOB: u32 = 1093;
pub const SVGA_3D_CMD_DESTROY_GB_MOB: u32 = 1094;
pub const SVGA_3D_CMD_DEFINE_GB_SURFACE: u32 = 1097;
pub const SVGA_3D_CMD_DESTROY_GB_SURFACE: u32 = 1098;
pub const SVGA_3D_CMD_BIND_GB_SURFACE: u32 = 1099;
pub const SVGA_3D_CMD_COND_BIND_GB_SURFACE: u32 = 1100;
pub const SVGA_3D_CMD_UPDATE_GB_IMAGE: u32 = 1101;
pub const SVGA_3D_CMD_UPDATE_GB_SURFACE: u32 = 1102;
pub const SVGA_3D_CMD_READBACK_GB_IMAGE: u32 = 1103;
pub const SVGA_3D_CMD_READBACK_GB_SURFACE: u32 = 1104;
pub const SVGA_3D_CMD_INVALIDATE_GB_IMAGE: u32 = 1105;
pub const SVGA_3D_CMD_INVALIDATE_GB_SURFACE: u32 = 1106;
pub const SVGA_3D_CMD_SET_OTABLE_BASE64: u32 = 1117;
pub const SVGA_3D_CMD_BEGIN_GB_QUERY: u32 = 1118;
pub const SVGA_3D_CMD_END_GB_QUERY: u32 = 1119;
pub const SVGA_3D_CMD_WAIT_FOR_GB_QUERY: u32 = 1120;
pub const SVGA_3D_CMD_DEFINE_GB_SCREENTARGET: u32 = 1126;
pub const SVGA_3D_CMD_DESTROY_GB_SCREENTARGET: u32 = 1127;
pub const SVGA_3D_CMD_BIND_GB_SCREENTARGET: u32 = 1128;
pub const SVGA_3D_CMD_UPDATE_GB_SCREENTARGET: u32 = 1129;
pub const SVGA_3D_CMD_DEFINE_GB_MOB64: u32 = 1137;
pub const SVGA_3D_CMD_REDEFINE_GB_MOB64: u32 = 1138;

pub const SVGA_3D_CMD_DX_DEFINE_CONTEXT: u32 = 1143;
pub const SVGA_3D_CMD_DX_DESTROY_CONTEXT: u32 = 1144;
pub const SVGA_3D_CMD_DX_BIND_CONTEXT: u32 = 1145;
pub const SVGA_3D_CMD_DX_READBACK_CONTEXT: u32 = 1146;
pub const SVGA_3D_CMD_DX_INVALIDATE_CONTEXT: u32 = 1147;
pub const SVGA_3D_CMD_DX_SET_SINGLE_CONSTANT_BUFFER: u32 = 1148;
pub const SVGA_3D_CMD_DX_SET_SHADER_RESOURCES: u32 = 1149;
pub const SVGA_3D_CMD_DX_SET_SHADER: u32 = 1150;
pub const SVGA_3D_CMD_DX_SET_SAMPLERS: u32 = 1151;
pub const SVGA_3D_CMD_DX_DRAW: u32 = 1152;
pub const SVGA_3D_CMD_DX_DRAW_INDEXED: u32 = 1153;
pub const SVGA_3D_CMD_DX_DRAW_INSTANCED: u32 = 1154;
pub const SVGA_3D_CMD_DX_DRAW_INDEXED_INSTANCED: u32 = 1155;
pub const SVGA_3D_CMD_DX_DRAW_AUTO: u32 = 1156;
pub const SVGA_3D_CMD_DX_SET_INPUT_LAYOUT: u32 = 1157;
pub const SVGA_3D_CMD_DX_SET_VERTEX_BUFFERS: u32 = 1158;
pub const SVGA_3D_CMD_DX_SET_INDEX_BUFFER: u32 = 1159;
pub const SVGA_3D_CMD_DX_SET_TOPOLOGY: u32 = 1160;
pub const SVGA_3D_CMD_DX_SET_RENDERTARGETS: u32 = 1161;
pub const SVGA_3D_CMD_DX_SET_BLEND_STATE: u32 = 1162;
pub const SVGA_3D_CMD_DX_SET_DEPTHSTENCIL_STATE: u32 = 1163;
pub const SVGA_3D_CMD_DX_SET_RASTERIZER_STATE: u32 = 1164;
pub const SVGA_3D_CMD_DX_DEFINE_QUERY: u32 = 1165;
pub const SVGA_3D_CMD_DX_DESTROY_QUERY: u32 = 1166;
pub const SVGA_3D_CMD_DX_BIND_QUERY: u32 = 1167;
pub const SVGA_3D_CMD_DX_SET_QUERY_OFFSET: u32 = 1168;
pub const SVGA_3D_CMD_DX_BEGIN_QUERY: u32 = 1169;
pub const SVGA_3D_CMD_DX_END_QUERY: u32 = 1170;
pub const SVGA_3D_CMD_DX_READBACK_QUERY: u32 = 1171;
pub const SVGA_3D_CMD_DX_SET_PREDICATION: u32 = 1172;
pub const SVGA_3D_CMD_DX_SET_SOTARGETS: u32 = 1173;
pub const SVGA_3D_CMD_DX_SET_VIEWPORTS: u32 = 1174;
pub const SVGA_3D_CMD_DX_SET_SCISSORRECTS: u32 = 1175;
pub const SVGA_3D_CMD_DX_CLEAR_RENDERTARGET_VIEW: u32 = 1176;
pub const SVGA_3D_CMD_DX_CLEAR_DEPTHSTENCIL_VIEW: u32 = 1177;
pub const SVGA_3D_CMD_DX_PRED_COPY_REGION: u32 = 1178;
pub const SVGA_3D_CMD_DX_PRED_COPY: u32 = 1179;
pub const SVGA_3D_CMD_DX_PRESENTBLT: u32 = 1180;
pub const SVGA_3D_CMD_DX_GENMIPS: u32 = 1181;
pub const SVGA_3D_CMD_DX_UPDATE_SUBRESOURCE: u32 = 1182;
pub const SVGA_3D_CMD_DX_READBACK_SUBRESOURCE: u32 = 1183;
pub const SVGA_3D_CMD_DX_INVALIDATE_SUBRESOURCE: u32 = 1184;
pub const SVGA_3D_CMD_DX_DEFINE_SHADERRESOURCE_VIEW: u32 = 1185;
pub const SVGA_3D_CMD_DX_DESTROY_SHADERRESOURCE_VIEW: u32 = 1186;
pub const SVGA_3D_CMD_DX_DEFINE_RENDERTARGET_VIEW: u32 = 1187;
pub const SVGA_3D_CMD_DX_DESTROY_RENDERTARGET_VIEW: u32 = 1188;
pub const SVGA_3D_CMD_DX_DEFINE_DEPTHSTENCIL_VIEW: u32 = 1189;
pub const SVGA_3D_CMD_DX_DESTROY_DEPTHSTENCIL_VIEW: u32 = 1190;
pub const SVGA_3D_CMD_DX_DEFINE_ELEMENTLAYOUT: u32 = 1191;
pub const SVGA_3D_CMD_DX_DESTROY_ELEMENTLAYOUT: u32 = 1192;
pub const SVGA_3D_CMD_DX_DEFINE_BLEND_STATE: u32 = 1193;
pub const SVGA_3D_CMD_DX_DESTROY_BLEND_STATE: u32 = 1194;
pub const SVGA_3D_CMD_DX_DEFINE_DEPTHSTENCIL_STATE: u32 = 1195;
pub const SVGA_3D_CMD_DX_DESTROY_DEPTHSTENCIL_STATE: u32 = 1196;
pub const SVGA_3D_CMD_DX_DEFINE_RASTERIZER_STATE: u32 = 1197;
pub const SVGA_3D_CMD_DX_DESTROY_RASTERIZER_STATE: u32 = 1198;
pub const SVGA_3D_CMD_DX_DEFINE_SAMPLER_STATE: u32 = 1199;
pub const SVGA_3D_CMD_DX_DESTROY_SAMPLER_STATE: u32 = 1200;
pub const SVGA_3D_CMD_DX_DEFINE_SHADER: u32 = 1201;
pub const SVGA_3D_CMD_DX_DESTROY_SHADER: u32 = 1202;
pub const SVGA_3D_CMD_DX_BIND_SHADER: u32 = 1203;
pub const SVGA_3D_CMD_DX_DEFINE_STREAMOUTPUT: u32 = 1204;
pub const SVGA_3D_CMD_DX_DESTROY_STREAMOUTPUT: u32 = 1205;
pub const SVGA_3D_CMD_DX_SET_STREAMOUTPUT: u32 = 1206;
pub const SVGA_3D_CMD_DX_SET_COTABLE: u32 = 1207;
pub const SVGA_3D_CMD_DX_READBACK_COTABLE: u32 = 1208;
pub const SVGA_3D_CMD_DX_MOB_FENCE_64: u32 = 1222;
pub const SVGA_3D_CMD_GROW_OTABLE: u32 = 1236;
pub const SVGA_3D_CMD_DX_GROW_COTABLE: u32 = 1237;
pub const SVGA_3D_CMD_INTRA_SURFACE_COPY: u32 = 1238;
pub const SVGA_3D_CMD_DX_DEFINE_UA_VIEW: u32 = 1244;
pub const SVGA_3D_CMD_DX_DESTROY_UA_VIEW: u32 = 1245;
pub const SVGA_3D_CMD_DEFINE_GB_SURFACE_V4: u32 = 1267;

/*
 * Device-context (synchronous) command identifiers.
 */
pub const SVGA_DC_CMD_NOP: u32 = 0;
pub const SVGA_DC_CMD_START_STOP_CONTEXT: u32 = 1;
pub const SVGA_DC_CMD_PREEMPT: u32 = 2;

/// Texture state name whose value is a surface id.
pub const SVGA3D_TS_BIND_TEXTURE: u32 = 1;

/// DMA transfer directions.
pub const SVGA3D_WRITE_HOST_VRAM: u32 = 1;
pub const SVGA3D_READ_HOST_VRAM: u32 = 2;

pub const SVGA3D_MAX_SURFACE_FACES: usize = 6;
pub const SVGA3D_MAX_VERTEX_ARRAYS: u32 = 32;
pub const SVGA3D_MAX_DRAW_PRIMITIVE_RANGES: u32 = 32;

/// `SVGAFifoCmdRemapGMR2::flags`: page table entries are 64-bit PPNs.
pub const SVGA_REMAP_GMR2_PPN64: u32 = 1 << 1;

bitflags! {
    /// Screen object flags.
    pub struct ScreenFlags: u32 {
        const MUST_BE_SET = 1 << 0;
        const IS_PRIMARY  = 1 << 1;
        const DEACTIVATE  = 1 << 3;
        const BLANKING    = 1 << 4;
    }
}

bitflags! {
    /// Surface creation flags (the subset the core interprets).
    pub struct SurfaceFlags: u32 {
        const CUBEMAP = 1 << 0;
    }
}

/*
 * Shared wire primitives.
 */

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SvgaGuestPtr {
    pub gmr_id: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaGuestImage {
    pub ptr: SvgaGuestPtr,
    pub pitch: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Svga3dSurfaceImageId {
    pub sid: u32,
    pub face: u32,
    pub mipmap: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SignedPoint {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SignedRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl SignedRect {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }
    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Svga3dSize {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCopyBox {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub w: u32,
    pub h: u32,
    pub d: u32,
    pub srcx: u32,
    pub srcy: u32,
    pub srcz: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCopyRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub srcx: u32,
    pub srcy: u32,
}

/// GMRFB pixel format: `bitsPerPixel | colorDepth << 8`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct GmrImageFormat(pub u32);

impl GmrImageFormat {
    pub fn new(bits_per_pixel: u32, color_depth: u32) -> Self {
        GmrImageFormat(bits_per_pixel | (color_depth << 8))
    }
}

/*
 * Legacy FIFO command payloads.
 */

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaScreenObject {
    pub struct_size: u32,
    pub id: u32,
    pub flags: u32,
    pub width: u32,
    pub height: u32,
    pub root_x: i32,
    pub root_y: i32,
    pub backing_ptr: SvgaGuestPtr,
    pub backing_pitch: u32,
    pub clone_count: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaFifoCmdDefineScreen {
    pub screen: SvgaScreenObject,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaFifoCmdDestroyScreen {
    pub screen_id: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaFifoCmdUpdate {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Followed by the AND mask and then the XOR mask.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaFifoCmdDefineCursor {
    pub id: u32,
    pub hotspot_x: u32,
    pub hotspot_y: u32,
    pub width: u32,
    pub height: u32,
    pub and_mask_depth: u32,
    pub xor_mask_depth: u32,
}

/// Followed by the 32bpp image.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaFifoCmdDefineAlphaCursor {
    pub id: u32,
    pub hotspot_x: u32,
    pub hotspot_y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaFifoCmdFence {
    pub fence: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaFifoCmdDefineGMRFB {
    pub ptr: SvgaGuestPtr,
    pub bytes_per_line: u32,
    pub format: GmrImageFormat,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaFifoCmdBlitGMRFBToScreen {
    pub src_origin: SignedPoint,
    pub dest_rect: SignedRect,
    pub dest_screen_id: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaFifoCmdBlitScreenToGMRFB {
    pub dest_origin: SignedPoint,
    pub src_rect: SignedRect,
    pub src_screen_id: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaFifoCmdDefineGMR2 {
    pub gmr_id: u32,
    pub num_pages: u32,
}

/// Followed by `num_pages` PPN64 entries when `SVGA_REMAP_GMR2_PPN64` is set.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaFifoCmdRemapGMR2 {
    pub gmr_id: u32,
    pub flags: u32,
    pub offset_pages: u32,
    pub num_pages: u32,
}

/*
 * 3D command payloads.
 */

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Svga3dCmdHeader {
    pub id: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdDefineContext {
    pub cid: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdDestroyContext {
    pub cid: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdDXDefineContext {
    pub cid: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdDXDestroyContext {
    pub cid: u32,
}

/// Followed by `SVGA3dSize` entries, one per mip level per face.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdDefineSurface {
    pub sid: u32,
    pub surface_flags: u32,
    pub format: u32,
    pub face_num_mip_levels: [u32; SVGA3D_MAX_SURFACE_FACES],
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdDestroySurface {
    pub sid: u32,
}

/// Followed by one `Svga3dCopyBox` and a `Svga3dCmdSurfaceDMASuffix`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdSurfaceDMA {
    pub guest: SvgaGuestImage,
    pub host: Svga3dSurfaceImageId,
    pub transfer: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdSurfaceDMASuffix {
    pub suffix_size: u32,
    pub maximum_offset: u32,
    pub flags: u32,
}

/// Followed by one `Svga3dCopyRect`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdPresent {
    pub sid: u32,
}

/// Followed by `SignedRect` clip rectangles relative to `dest_rect`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdBlitSurfaceToScreen {
    pub src_image: Svga3dSurfaceImageId,
    pub src_rect: SignedRect,
    pub dest_screen_id: u32,
    pub dest_rect: SignedRect,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdBindGBSurface {
    pub sid: u32,
    pub mobid: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdDestroyGBMob {
    pub mobid: u32,
}

#[derive(Clone, Copy, Default)]
#[repr(C, packed)]
pub struct Svga3dCmdDefineGBMob64 {
    pub mobid: u32,
    pub pt_depth: u32,
    pub base: Ppn64,
    pub size_in_bytes: u32,
}

#[derive(Clone, Copy, Default)]
#[repr(C, packed)]
pub struct Svga3dCmdSetOTableBase64 {
    pub otable_type: u32,
    pub base_address: Ppn64,
    pub size_in_bytes: u32,
    pub valid_size_in_bytes: u32,
    pub pt_depth: u32,
}

#[derive(Clone, Copy, Default)]
#[repr(C, packed)]
pub struct Svga3dCmdGrowOTable {
    pub otable_type: u32,
    pub base_address: Ppn64,
    pub size_in_bytes: u32,
    pub valid_size_in_bytes: u32,
    pub pt_depth: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdDXSetCOTable {
    pub cid: u32,
    pub mobid: u32,
    pub cotable_type: u32,
    pub valid_size_in_bytes: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Svga3dCmdDXGrowCOTable {
    pub cid: u32,
    pub mobid: u32,
    pub cotable_type: u32,
    pub valid_size_in_bytes: u32,
}

#[derive(Clone, Copy, Default)]
#[repr(C, packed)]
pub struct Svga3dCmdDXMobFence64 {
    pub value: u64,
    pub mob_id: u32,
    pub mob_offset: u32,
}

#[derive(Clone, Copy, Default)]
#[repr(C, packed)]
pub struct Svga3dCmdDefineGBSurfaceV4 {
    pub sid: u32,
    pub surface_flags: u64,
    pub format: u32,
    pub num_mip_levels: u32,
    pub multisample_count: u32,
    pub autogen_filter: u32,
    pub size: Svga3dSize,
    pub array_size: u32,
    pub buffer_byte_stride: u32,
}

/*
 * Device-context command payloads.
 */

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaDCCmdStartStop {
    pub enable: u32,
    pub context: u32,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SvgaDCCmdPreempt {
    pub context: u32,
    pub ignore_id_zero: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn packed_layouts_have_no_padding() {
        assert_eq!(size_of::<Svga3dCmdDefineGBMob64>(), 20);
        assert_eq!(size_of::<Svga3dCmdSetOTableBase64>(), 24);
        assert_eq!(size_of::<Svga3dCmdGrowOTable>(), 24);
        assert_eq!(size_of::<Svga3dCmdDXMobFence64>(), 16);
    }

    #[test]
    fn screen_object_is_11_dwords() {
        assert_eq!(size_of::<SvgaScreenObject>(), 11 * 4);
    }

    #[test]
    fn header_is_two_dwords() {
        assert_eq!(size_of::<Svga3dCmdHeader>(), 8);
    }
}
