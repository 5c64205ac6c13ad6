use std::ffi::c_void;

use oxr_upscale_core::{BindDecision, ContextKind, LogOnce, OriginalFn, Viewport};
use tracing::debug;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11DeviceContext, D3D11_VIEWPORT, D3D11_VIEWPORT_AND_SCISSORRECT_OBJECT_COUNT_PER_PIPELINE,
};

use super::{patch, session};
use crate::gpu::RenderTarget;

/// `ID3D11DeviceContext::OMSetRenderTargets`
pub const SLOT_OM_SET_RENDER_TARGETS: usize = 33;
/// `ID3D11DeviceContext::RSSetViewports`
pub const SLOT_RS_SET_VIEWPORTS: usize = 44;

type OMSetRenderTargetsFn = unsafe extern "system" fn(*mut c_void, u32, *const *mut c_void, *mut c_void);
type RSSetViewportsFn = unsafe extern "system" fn(*mut c_void, u32, *const D3D11_VIEWPORT);

// Immediate and deferred contexts are different classes with different
// tables, so each kind gets its own substitutes and forwarding targets.
static IMMEDIATE_OM_SET_RENDER_TARGETS: OriginalFn<OMSetRenderTargetsFn> = OriginalFn::new();
static IMMEDIATE_RS_SET_VIEWPORTS: OriginalFn<RSSetViewportsFn> = OriginalFn::new();
static DEFERRED_OM_SET_RENDER_TARGETS: OriginalFn<OMSetRenderTargetsFn> = OriginalFn::new();
static DEFERRED_RS_SET_VIEWPORTS: OriginalFn<RSSetViewportsFn> = OriginalFn::new();

static SUBSTITUTED: LogOnce = LogOnce::new();

const fn kind(deferred: bool) -> ContextKind {
    if deferred {
        ContextKind::Deferred
    } else {
        ContextKind::Immediate
    }
}

fn originals(deferred: bool) -> (&'static OriginalFn<OMSetRenderTargetsFn>, &'static OriginalFn<RSSetViewportsFn>) {
    if deferred {
        (&DEFERRED_OM_SET_RENDER_TARGETS, &DEFERRED_RS_SET_VIEWPORTS)
    } else {
        (&IMMEDIATE_OM_SET_RENDER_TARGETS, &IMMEDIATE_RS_SET_VIEWPORTS)
    }
}

/// Hook the render-target and viewport entry points of `context`.
pub fn install(context: &ID3D11DeviceContext, deferred: bool) -> bool {
    let (om, rs) = originals(deferred);
    let raw = context.as_raw();
    unsafe {
        let om_ok = if deferred {
            patch(raw, SLOT_OM_SET_RENDER_TARGETS, om_set_render_targets::<true> as *const c_void, om, "OMSetRenderTargets")
        } else {
            patch(raw, SLOT_OM_SET_RENDER_TARGETS, om_set_render_targets::<false> as *const c_void, om, "OMSetRenderTargets")
        };
        let rs_ok = if deferred {
            patch(raw, SLOT_RS_SET_VIEWPORTS, rs_set_viewports::<true> as *const c_void, rs, "RSSetViewports")
        } else {
            patch(raw, SLOT_RS_SET_VIEWPORTS, rs_set_viewports::<false> as *const c_void, rs, "RSSetViewports")
        };
        om_ok && rs_ok
    }
}

fn to_viewport(v: &D3D11_VIEWPORT) -> Viewport {
    Viewport {
        top_left_x: v.TopLeftX,
        top_left_y: v.TopLeftY,
        width: v.Width,
        height: v.Height,
        min_depth: v.MinDepth,
        max_depth: v.MaxDepth,
    }
}

fn to_d3d(v: &Viewport) -> D3D11_VIEWPORT {
    D3D11_VIEWPORT {
        TopLeftX: v.top_left_x,
        TopLeftY: v.top_left_y,
        Width: v.width,
        Height: v.height,
        MinDepth: v.min_depth,
        MaxDepth: v.max_depth,
    }
}

unsafe fn current_viewports(this: *mut c_void) -> Vec<Viewport> {
    let Some(ctx) = ID3D11DeviceContext::from_raw_borrowed(&this) else {
        return Vec::new();
    };
    let mut count = D3D11_VIEWPORT_AND_SCISSORRECT_OBJECT_COUNT_PER_PIPELINE;
    let mut raw = [D3D11_VIEWPORT::default(); D3D11_VIEWPORT_AND_SCISSORRECT_OBJECT_COUNT_PER_PIPELINE as usize];
    ctx.RSGetViewports(&mut count, Some(raw.as_mut_ptr()));
    raw[..count as usize].iter().map(to_viewport).collect()
}

unsafe extern "system" fn om_set_render_targets<const DEFERRED: bool>(
    this: *mut c_void,
    count: u32,
    views: *const *mut c_void,
    depth: *mut c_void,
) {
    let (om, rs) = originals(DEFERRED);
    let Some(forward) = om.get() else {
        return;
    };

    let session = match session() {
        Some(s) if !s.is_busy() && count > 0 && !views.is_null() && !(*views).is_null() => s,
        _ => return forward(this, count, views, depth),
    };
    let Some(first) = RenderTarget::from_raw_borrowed(*views) else {
        return forward(this, count, views, depth);
    };

    let viewports = current_viewports(this);
    match session.on_bind_targets(kind(DEFERRED), Some(&first), &viewports) {
        BindDecision::Forward => forward(this, count, views, depth),
        BindDecision::Substitute { target, viewports } => {
            let mut substituted = std::slice::from_raw_parts(views, count as usize).to_vec();
            substituted[0] = target.0.as_raw();
            forward(this, count, substituted.as_ptr(), depth);

            if !viewports.is_empty() {
                if let Some(set_viewports) = rs.get() {
                    let raw: Vec<D3D11_VIEWPORT> = viewports.iter().map(to_d3d).collect();
                    set_viewports(this, raw.len() as u32, raw.as_ptr());
                }
            }
            if SUBSTITUTED.fire() {
                debug!(deferred = DEFERRED, "scene target substituted");
            }
        }
    }
}

unsafe extern "system" fn rs_set_viewports<const DEFERRED: bool>(
    this: *mut c_void,
    count: u32,
    viewports: *const D3D11_VIEWPORT,
) {
    let (_, rs) = originals(DEFERRED);
    let Some(forward) = rs.get() else {
        return;
    };

    let session = match session() {
        Some(s) if !s.is_busy() && count > 0 && !viewports.is_null() => s,
        _ => return forward(this, count, viewports),
    };
    let requested: Vec<Viewport> = std::slice::from_raw_parts(viewports, count as usize)
        .iter()
        .map(to_viewport)
        .collect();
    match session.on_set_viewports(&requested) {
        Some(clamped) => {
            let raw: Vec<D3D11_VIEWPORT> = clamped.iter().map(to_d3d).collect();
            forward(this, raw.len() as u32, raw.as_ptr())
        }
        None => forward(this, count, viewports),
    }
}
