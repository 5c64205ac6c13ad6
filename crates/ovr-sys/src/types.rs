use core::ffi::c_void;

// ---- Eye ----

pub type EVREye = i32;

pub const Eye_Left: EVREye = 0;
pub const Eye_Right: EVREye = 1;

// ---- Texture type ----

pub type ETextureType = i32;

pub const TextureType_Invalid: ETextureType = -1;
pub const TextureType_DirectX: ETextureType = 0;
pub const TextureType_OpenGL: ETextureType = 1;
pub const TextureType_Vulkan: ETextureType = 2;
pub const TextureType_IOSurface: ETextureType = 3;
pub const TextureType_DirectX12: ETextureType = 4;
pub const TextureType_DXGISharedHandle: ETextureType = 5;
pub const TextureType_Metal: ETextureType = 6;

// ---- Color space ----

pub type EColorSpace = i32;

pub const ColorSpace_Auto: EColorSpace = 0;
pub const ColorSpace_Gamma: EColorSpace = 1;
pub const ColorSpace_Linear: EColorSpace = 2;

// ---- Submit flags (bitflags, kept as i32 so combined values are valid) ----

pub type EVRSubmitFlags = i32;

pub const Submit_Default: EVRSubmitFlags = 0x00;
pub const Submit_LensDistortionAlreadyApplied: EVRSubmitFlags = 0x01;
pub const Submit_GlRenderBuffer: EVRSubmitFlags = 0x02;
pub const Submit_Reserved: EVRSubmitFlags = 0x04;
pub const Submit_TextureWithPose: EVRSubmitFlags = 0x08;
pub const Submit_TextureWithDepth: EVRSubmitFlags = 0x10;
pub const Submit_FrameDiscontinuty: EVRSubmitFlags = 0x20;
pub const Submit_VulkanTextureWithArrayData: EVRSubmitFlags = 0x40;
pub const Submit_GlArrayTexture: EVRSubmitFlags = 0x80;

// ---- Error codes ----

pub type EVRCompositorError = i32;

pub const VRCompositorError_None: EVRCompositorError = 0;
pub const VRCompositorError_RequestFailed: EVRCompositorError = 1;
pub const VRCompositorError_IncompatibleVersion: EVRCompositorError = 100;
pub const VRCompositorError_DoNotHaveFocus: EVRCompositorError = 101;
pub const VRCompositorError_InvalidTexture: EVRCompositorError = 102;
pub const VRCompositorError_IsNotSceneApplication: EVRCompositorError = 103;
pub const VRCompositorError_TextureIsOnWrongDevice: EVRCompositorError = 104;
pub const VRCompositorError_TextureUsesUnsupportedFormat: EVRCompositorError = 105;

pub type EVRInitError = i32;

pub const VRInitError_None: EVRInitError = 0;

// ---- Math ----

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HmdMatrix34_t {
    pub m: [[f32; 4]; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HmdMatrix44_t {
    pub m: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HmdVector2_t {
    pub v: [f32; 2],
}

// ---- Textures ----

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Texture_t {
    /// `ID3D11Texture2D*` when `eType == TextureType_DirectX`.
    pub handle: *mut c_void,
    pub eType: ETextureType,
    pub eColorSpace: EColorSpace,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VRTextureBounds_t {
    pub uMin: f32,
    pub vMin: f32,
    pub uMax: f32,
    pub vMax: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VRTextureDepthInfo_t {
    pub handle: *mut c_void,
    pub mProjection: HmdMatrix44_t,
    pub vRange: HmdVector2_t,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VRTextureWithPose_t {
    pub texture: Texture_t,
    pub mDeviceToAbsoluteTracking: HmdMatrix34_t,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VRTextureWithDepth_t {
    pub texture: Texture_t,
    pub depth: VRTextureDepthInfo_t,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VRTextureWithPoseAndDepth_t {
    pub pose: VRTextureWithPose_t,
    pub depth: VRTextureDepthInfo_t,
}

/// Depth image handle carried by a submission payload, if the flags say there is one.
///
/// # Safety
/// `texture` must point to the payload type implied by `flags`.
pub unsafe fn depth_handle(texture: *const Texture_t, flags: EVRSubmitFlags) -> *mut c_void {
    if texture.is_null() || flags & Submit_TextureWithDepth == 0 {
        return core::ptr::null_mut();
    }
    if flags & Submit_TextureWithPose != 0 {
        (*(texture as *const VRTextureWithPoseAndDepth_t)).depth.handle
    } else {
        (*(texture as *const VRTextureWithDepth_t)).depth.handle
    }
}
