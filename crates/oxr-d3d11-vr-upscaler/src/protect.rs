use std::ffi::c_void;

use oxr_upscale_core::{HookError, MemoryProtection};
use windows::Win32::System::Memory::{VirtualProtect, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS};

/// `VirtualProtect`-backed page permissions for call-table patching.
#[derive(Debug, Default, Clone, Copy)]
pub struct VirtualProtectMemory;

impl MemoryProtection for VirtualProtectMemory {
    unsafe fn unprotect(&self, addr: *mut c_void, len: usize) -> Result<u32, HookError> {
        let mut previous = PAGE_PROTECTION_FLAGS::default();
        VirtualProtect(addr, len, PAGE_EXECUTE_READWRITE, &mut previous)
            .map_err(|e| HookError::Protection(format!("VirtualProtect({:p}) failed: {}", addr, e)))?;
        Ok(previous.0)
    }

    unsafe fn restore(&self, addr: *mut c_void, len: usize, previous: u32) -> Result<(), HookError> {
        let mut ignored = PAGE_PROTECTION_FLAGS::default();
        VirtualProtect(addr, len, PAGE_PROTECTION_FLAGS(previous), &mut ignored)
            .map_err(|e| HookError::Protection(format!("VirtualProtect({:p}) restore failed: {}", addr, e)))
    }
}
