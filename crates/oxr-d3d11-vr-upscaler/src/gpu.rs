use std::ffi::c_void;
use std::sync::{Mutex, PoisonError};

use oxr_upscale_core::{BindFlags, Format, GpuDevice, GpuError, ImageDesc, ImageKey, Rect, UvWindow};
use tracing::{debug, error};
use windows::core::{Interface, PCSTR};
use windows::Win32::Foundation::{FALSE, TRUE};
use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
use windows::Win32::Graphics::Direct3D::{
    ID3DBlob, D3D11_SRV_DIMENSION_TEXTURE2D, D3D11_SRV_DIMENSION_TEXTURE2DARRAY,
    D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
};
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT, DXGI_SAMPLE_DESC};

const BLIT_VS: &[u8] = include_bytes!("shaders/blit_vs.hlsl");
const BLIT_PS: &[u8] = include_bytes!("shaders/blit_ps.hlsl");

// ---- Handles ----

/// Owned reference to a host or engine texture.
#[derive(Clone)]
pub struct Texture(pub ID3D11Texture2D);

// D3D11 device objects are free-threaded.
unsafe impl Send for Texture {}
unsafe impl Sync for Texture {}

impl Texture {
    /// Take a new reference on a raw `ID3D11Texture2D*` handed in by the host.
    ///
    /// # Safety
    /// `raw` must be null or a live `ID3D11Texture2D`.
    pub unsafe fn from_raw_borrowed(raw: *mut c_void) -> Option<Texture> {
        ID3D11Texture2D::from_raw_borrowed(&raw).cloned().map(Texture)
    }

    pub fn desc(&self) -> D3D11_TEXTURE2D_DESC {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { self.0.GetDesc(&mut desc) };
        desc
    }
}

#[derive(Clone)]
pub struct RenderTarget(pub ID3D11RenderTargetView);

unsafe impl Send for RenderTarget {}
unsafe impl Sync for RenderTarget {}

impl RenderTarget {
    /// # Safety
    /// `raw` must be null or a live `ID3D11RenderTargetView`.
    pub unsafe fn from_raw_borrowed(raw: *mut c_void) -> Option<RenderTarget> {
        ID3D11RenderTargetView::from_raw_borrowed(&raw)
            .cloned()
            .map(RenderTarget)
    }
}

// ---- Descriptor conversion ----

pub fn image_desc(d: &D3D11_TEXTURE2D_DESC) -> ImageDesc {
    ImageDesc {
        width: d.Width,
        height: d.Height,
        mip_levels: d.MipLevels,
        array_size: d.ArraySize,
        format: Format(d.Format.0 as u32),
        sample_count: d.SampleDesc.Count,
        bind: BindFlags(d.BindFlags),
        misc: d.MiscFlags,
    }
}

fn texture_desc(d: &ImageDesc) -> D3D11_TEXTURE2D_DESC {
    D3D11_TEXTURE2D_DESC {
        Width: d.width,
        Height: d.height,
        MipLevels: d.mip_levels.max(1),
        ArraySize: d.array_size.max(1),
        Format: dxgi(d.format),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: d.sample_count.max(1),
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: d.bind.0,
        CPUAccessFlags: 0,
        MiscFlags: 0,
    }
}

fn dxgi(format: Format) -> DXGI_FORMAT {
    DXGI_FORMAT(format.0 as i32)
}

/// Upper bound per pixel; only used to size zero-fill buffers.
fn bytes_per_pixel(format: Format) -> u32 {
    match format {
        Format::R32G32B32A32_FLOAT => 16,
        Format::R16G16B16A16_FLOAT
        | Format::R16G16B16A16_TYPELESS
        | Format::R32G8X24_TYPELESS
        | Format::D32_FLOAT_S8X24_UINT => 8,
        Format::R16_FLOAT | Format::R16_TYPELESS | Format::D16_UNORM => 2,
        _ => 4,
    }
}

fn subresource(mip: u32, slice: u32, mip_levels: u32) -> u32 {
    mip + slice * mip_levels.max(1)
}

// ---- Shaders ----

unsafe fn compile_shader(source: &[u8], entry: &[u8], target: &[u8]) -> Result<ID3DBlob, String> {
    let mut code: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;

    let hr = D3DCompile(
        source.as_ptr() as *const _,
        source.len(),
        None,
        None,
        None,
        PCSTR(entry.as_ptr()),
        PCSTR(target.as_ptr()),
        0,
        0,
        &mut code,
        Some(&mut errors),
    );

    if let Some(err_blob) = &errors {
        let bytes = std::slice::from_raw_parts(
            err_blob.GetBufferPointer() as *const u8,
            err_blob.GetBufferSize(),
        );
        let msg = String::from_utf8_lossy(bytes);
        if hr.is_err() {
            error!("blit shader compile error: {}", msg.trim_end_matches('\0'));
            return Err(format!("D3DCompile failed: {}", msg.trim_end_matches('\0')));
        }
    }

    if let Err(e) = hr {
        return Err(format!("D3DCompile failed: {}", e));
    }

    code.ok_or_else(|| "D3DCompile produced no code".to_string())
}

unsafe fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
}

// ---- Blit pipeline ----

#[repr(C)]
#[derive(Clone, Copy)]
struct BlitConstants {
    uv_offset: [f32; 2],
    uv_scale: [f32; 2],
}

/// Fullscreen-triangle copy recorded on a private deferred context, so
/// executing it leaves the host's immediate-context state untouched.
struct BlitPipeline {
    vs: ID3D11VertexShader,
    ps: ID3D11PixelShader,
    sampler: ID3D11SamplerState,
    constants: ID3D11Buffer,
    deferred: ID3D11DeviceContext,
}

impl BlitPipeline {
    unsafe fn new(device: &ID3D11Device) -> Result<Self, String> {
        let vs_blob = compile_shader(BLIT_VS, b"VS\0", b"vs_5_0\0")?;
        let ps_blob = compile_shader(BLIT_PS, b"PS\0", b"ps_5_0\0")?;

        let mut vs: Option<ID3D11VertexShader> = None;
        device
            .CreateVertexShader(blob_bytes(&vs_blob), None, Some(&mut vs))
            .map_err(|e| format!("CreateVertexShader failed: {}", e))?;
        let mut ps: Option<ID3D11PixelShader> = None;
        device
            .CreatePixelShader(blob_bytes(&ps_blob), None, Some(&mut ps))
            .map_err(|e| format!("CreatePixelShader failed: {}", e))?;

        let sampler_desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
            MipLODBias: 0.0,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D11_COMPARISON_NEVER,
            BorderColor: [0.0, 0.0, 0.0, 0.0],
            MinLOD: 0.0,
            MaxLOD: f32::MAX,
        };
        let mut sampler: Option<ID3D11SamplerState> = None;
        device
            .CreateSamplerState(&sampler_desc, Some(&mut sampler))
            .map_err(|e| format!("CreateSamplerState failed: {}", e))?;

        let cb_desc = D3D11_BUFFER_DESC {
            ByteWidth: std::mem::size_of::<BlitConstants>() as u32,
            Usage: D3D11_USAGE_DYNAMIC,
            BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
            CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
            MiscFlags: 0,
            StructureByteStride: 0,
        };
        let mut constants: Option<ID3D11Buffer> = None;
        device
            .CreateBuffer(&cb_desc, None, Some(&mut constants))
            .map_err(|e| format!("CreateBuffer failed: {}", e))?;

        let mut deferred: Option<ID3D11DeviceContext> = None;
        device
            .CreateDeferredContext(0, Some(&mut deferred))
            .map_err(|e| format!("CreateDeferredContext failed: {}", e))?;

        Ok(Self {
            vs: vs.ok_or("CreateVertexShader returned null")?,
            ps: ps.ok_or("CreatePixelShader returned null")?,
            sampler: sampler.ok_or("CreateSamplerState returned null")?,
            constants: constants.ok_or("CreateBuffer returned null")?,
            deferred: deferred.ok_or("CreateDeferredContext returned null")?,
        })
    }

    unsafe fn draw(
        &self,
        immediate: &ID3D11DeviceContext,
        srv: &ID3D11ShaderResourceView,
        rtv: &ID3D11RenderTargetView,
        rect: Rect,
        window: UvWindow,
    ) -> Result<(), String> {
        let ctx = &self.deferred;

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        ctx.Map(&self.constants, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))
            .map_err(|e| format!("Map failed: {}", e))?;
        *(mapped.pData as *mut BlitConstants) = BlitConstants {
            uv_offset: [window.u0, window.v0],
            uv_scale: [window.u1 - window.u0, window.v1 - window.v0],
        };
        ctx.Unmap(&self.constants, 0);

        let viewport = D3D11_VIEWPORT {
            TopLeftX: rect.x as f32,
            TopLeftY: rect.y as f32,
            Width: rect.width as f32,
            Height: rect.height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };

        ctx.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
        ctx.VSSetShader(&self.vs, None);
        ctx.VSSetConstantBuffers(0, Some(&[Some(self.constants.clone())]));
        ctx.PSSetShader(&self.ps, None);
        ctx.PSSetShaderResources(0, Some(&[Some(srv.clone())]));
        ctx.PSSetSamplers(0, Some(&[Some(self.sampler.clone())]));
        ctx.OMSetRenderTargets(Some(&[Some(rtv.clone())]), None);
        ctx.RSSetViewports(Some(&[viewport]));
        ctx.Draw(3, 0);

        let mut list: Option<ID3D11CommandList> = None;
        ctx.FinishCommandList(FALSE, Some(&mut list))
            .map_err(|e| format!("FinishCommandList failed: {}", e))?;
        let list = list.ok_or("FinishCommandList returned null")?;
        immediate.ExecuteCommandList(&list, TRUE);
        Ok(())
    }
}

// ---- Device ----

/// [`GpuDevice`] over the host's D3D11 device and immediate context.
pub struct D3d11Gpu {
    device: ID3D11Device,
    immediate: ID3D11DeviceContext,
    blit: Mutex<Option<BlitPipeline>>,
}

unsafe impl Send for D3d11Gpu {}
unsafe impl Sync for D3d11Gpu {}

impl D3d11Gpu {
    pub fn new(device: ID3D11Device) -> Result<Self, GpuError> {
        let immediate = unsafe { device.GetImmediateContext() }
            .map_err(|e| GpuError::Create(format!("GetImmediateContext failed: {}", e)))?;
        Ok(Self {
            device,
            immediate,
            blit: Mutex::new(None),
        })
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn immediate(&self) -> &ID3D11DeviceContext {
        &self.immediate
    }

    fn create_texture(&self, desc: &D3D11_TEXTURE2D_DESC, init: Option<*const D3D11_SUBRESOURCE_DATA>) -> Result<Texture, GpuError> {
        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(desc, init, Some(&mut texture)) }.map_err(|e| {
            GpuError::Create(format!("CreateTexture2D {}x{} failed: {}", desc.Width, desc.Height, e))
        })?;
        texture
            .map(Texture)
            .ok_or_else(|| GpuError::Create("CreateTexture2D returned null".into()))
    }

    /// Single-sample, shader-readable copy of one slice of `src`, or `src`
    /// itself when it already is one.
    fn sampleable(&self, src: &Texture, slice: u32) -> Result<(Texture, u32), GpuError> {
        let desc = src.desc();
        let readable = desc.BindFlags & D3D11_BIND_SHADER_RESOURCE.0 as u32 != 0;
        if desc.SampleDesc.Count == 1 && readable {
            return Ok((src.clone(), slice));
        }

        let typed = Format(desc.Format.0 as u32).typed();
        let tmp_desc = D3D11_TEXTURE2D_DESC {
            MipLevels: 1,
            ArraySize: 1,
            Format: if desc.SampleDesc.Count > 1 { dxgi(typed) } else { desc.Format },
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
            ..desc
        };
        let tmp = self.create_texture(&tmp_desc, None)?;
        let sub = subresource(0, slice, desc.MipLevels);
        unsafe {
            if desc.SampleDesc.Count > 1 {
                self.immediate.ResolveSubresource(&tmp.0, 0, &src.0, sub, dxgi(typed));
            } else {
                self.immediate.CopySubresourceRegion(&tmp.0, 0, 0, 0, 0, &src.0, sub, None);
            }
        }
        Ok((tmp, 0))
    }

    fn source_view(&self, src: &Texture, slice: u32) -> Result<ID3D11ShaderResourceView, GpuError> {
        let desc = src.desc();
        let format = dxgi(Format(desc.Format.0 as u32).typed());
        let view_desc = if desc.ArraySize > 1 {
            D3D11_SHADER_RESOURCE_VIEW_DESC {
                Format: format,
                ViewDimension: D3D11_SRV_DIMENSION_TEXTURE2DARRAY,
                Anonymous: D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                    Texture2DArray: D3D11_TEX2D_ARRAY_SRV {
                        MostDetailedMip: 0,
                        MipLevels: 1,
                        FirstArraySlice: slice,
                        ArraySize: 1,
                    },
                },
            }
        } else {
            D3D11_SHADER_RESOURCE_VIEW_DESC {
                Format: format,
                ViewDimension: D3D11_SRV_DIMENSION_TEXTURE2D,
                Anonymous: D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                    Texture2D: D3D11_TEX2D_SRV {
                        MostDetailedMip: 0,
                        MipLevels: 1,
                    },
                },
            }
        };
        let mut srv: Option<ID3D11ShaderResourceView> = None;
        unsafe {
            self.device
                .CreateShaderResourceView(&src.0, Some(&view_desc), Some(&mut srv))
        }
        .map_err(|e| GpuError::View(format!("CreateShaderResourceView failed: {}", e)))?;
        srv.ok_or_else(|| GpuError::View("CreateShaderResourceView returned null".into()))
    }
}

impl GpuDevice for D3d11Gpu {
    type Image = Texture;
    type TargetView = RenderTarget;

    fn image_key(&self, image: &Texture) -> ImageKey {
        image.0.as_raw() as ImageKey
    }

    fn describe(&self, image: &Texture) -> ImageDesc {
        image_desc(&image.desc())
    }

    fn view_image(&self, view: &RenderTarget) -> Option<Texture> {
        let resource = unsafe { view.0.GetResource() }.ok()?;
        resource.cast::<ID3D11Texture2D>().ok().map(Texture)
    }

    fn create_image(&self, desc: &ImageDesc, zeroed: bool) -> Result<Texture, GpuError> {
        let d3d_desc = texture_desc(desc);
        if !zeroed {
            return self.create_texture(&d3d_desc, None);
        }

        let pitch = d3d_desc.Width * bytes_per_pixel(desc.format);
        let zeros = vec![0u8; pitch as usize * d3d_desc.Height as usize];
        let init: Vec<D3D11_SUBRESOURCE_DATA> = (0..d3d_desc.ArraySize * d3d_desc.MipLevels)
            .map(|_| D3D11_SUBRESOURCE_DATA {
                pSysMem: zeros.as_ptr() as *const _,
                SysMemPitch: pitch,
                SysMemSlicePitch: 0,
            })
            .collect();
        self.create_texture(&d3d_desc, Some(init.as_ptr()))
    }

    fn create_target_view(&self, image: &Texture, slice: u32) -> Result<RenderTarget, GpuError> {
        let desc = image.desc();
        let format = dxgi(Format(desc.Format.0 as u32).typed());
        let multisampled = desc.SampleDesc.Count > 1;
        let view_desc = match (multisampled, desc.ArraySize > 1) {
            (false, false) => D3D11_RENDER_TARGET_VIEW_DESC {
                Format: format,
                ViewDimension: D3D11_RTV_DIMENSION_TEXTURE2D,
                Anonymous: D3D11_RENDER_TARGET_VIEW_DESC_0 {
                    Texture2D: D3D11_TEX2D_RTV { MipSlice: 0 },
                },
            },
            (false, true) => D3D11_RENDER_TARGET_VIEW_DESC {
                Format: format,
                ViewDimension: D3D11_RTV_DIMENSION_TEXTURE2DARRAY,
                Anonymous: D3D11_RENDER_TARGET_VIEW_DESC_0 {
                    Texture2DArray: D3D11_TEX2D_ARRAY_RTV {
                        MipSlice: 0,
                        FirstArraySlice: slice,
                        ArraySize: 1,
                    },
                },
            },
            (true, false) => D3D11_RENDER_TARGET_VIEW_DESC {
                Format: format,
                ViewDimension: D3D11_RTV_DIMENSION_TEXTURE2DMS,
                Anonymous: D3D11_RENDER_TARGET_VIEW_DESC_0 {
                    Texture2DMS: D3D11_TEX2DMS_RTV {
                        UnusedField_NothingToDefine: 0,
                    },
                },
            },
            (true, true) => D3D11_RENDER_TARGET_VIEW_DESC {
                Format: format,
                ViewDimension: D3D11_RTV_DIMENSION_TEXTURE2DMSARRAY,
                Anonymous: D3D11_RENDER_TARGET_VIEW_DESC_0 {
                    Texture2DMSArray: D3D11_TEX2DMS_ARRAY_RTV {
                        FirstArraySlice: slice,
                        ArraySize: 1,
                    },
                },
            },
        };

        let mut rtv: Option<ID3D11RenderTargetView> = None;
        unsafe {
            self.device
                .CreateRenderTargetView(&image.0, Some(&view_desc), Some(&mut rtv))
        }
        .map_err(|e| GpuError::View(format!("CreateRenderTargetView failed: {}", e)))?;
        rtv.map(RenderTarget)
            .ok_or_else(|| GpuError::View("CreateRenderTargetView returned null".into()))
    }

    fn blit(
        &self,
        src: &Texture,
        src_slice: u32,
        window: UvWindow,
        dst: &RenderTarget,
        dst_rect: Rect,
    ) -> Result<(), GpuError> {
        let (source, slice) = self.sampleable(src, src_slice)?;
        let srv = self.source_view(&source, slice)?;

        let mut pipeline = self.blit.lock().unwrap_or_else(PoisonError::into_inner);
        if pipeline.is_none() {
            let built = unsafe { BlitPipeline::new(&self.device) }.map_err(GpuError::Blit)?;
            debug!("blit pipeline created");
            *pipeline = Some(built);
        }
        let Some(pipeline) = pipeline.as_ref() else {
            return Err(GpuError::Blit("pipeline unavailable".into()));
        };
        unsafe { pipeline.draw(&self.immediate, &srv, &dst.0, dst_rect, window) }.map_err(GpuError::Blit)
    }

    fn copy_region(
        &self,
        dst: &Texture,
        dst_slice: u32,
        x: u32,
        y: u32,
        src: &Texture,
        src_rect: Rect,
    ) -> Result<(), GpuError> {
        let dst_desc = dst.desc();
        if x + src_rect.width > dst_desc.Width || y + src_rect.height > dst_desc.Height {
            return Err(GpuError::Copy(format!(
                "{}x{} at ({}, {}) exceeds destination {}x{}",
                src_rect.width, src_rect.height, x, y, dst_desc.Width, dst_desc.Height
            )));
        }
        let src_box = D3D11_BOX {
            left: src_rect.x,
            top: src_rect.y,
            front: 0,
            right: src_rect.x + src_rect.width,
            bottom: src_rect.y + src_rect.height,
            back: 1,
        };
        let sub = subresource(0, dst_slice, dst_desc.MipLevels);
        unsafe {
            self.immediate
                .CopySubresourceRegion(&dst.0, sub, x, y, 0, &src.0, 0, Some(&src_box));
        }
        Ok(())
    }
}
