use std::collections::HashMap;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::HookError;
use crate::lock;

/// Page-permission port used while a call-table entry is rewritten.
pub trait MemoryProtection {
    /// Make `len` bytes at `addr` writable, returning the previous protection.
    ///
    /// # Safety
    /// `addr` must point into mapped memory.
    unsafe fn unprotect(&self, addr: *mut c_void, len: usize) -> Result<u32, HookError>;

    /// Put back the protection returned by [`MemoryProtection::unprotect`].
    ///
    /// # Safety
    /// `addr`/`len` must match the preceding `unprotect` call.
    unsafe fn restore(&self, addr: *mut c_void, len: usize, previous: u32) -> Result<(), HookError>;
}

/// For tables that live in ordinary writable memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unprotected;

impl MemoryProtection for Unprotected {
    unsafe fn unprotect(&self, _addr: *mut c_void, _len: usize) -> Result<u32, HookError> {
        Ok(0)
    }

    unsafe fn restore(&self, _addr: *mut c_void, _len: usize, _previous: u32) -> Result<(), HookError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookBinding {
    pub table: usize,
    pub slot: usize,
    pub substitute: usize,
    pub original: usize,
}

impl HookBinding {
    /// Reinterpret the displaced entry as a typed function pointer.
    ///
    /// # Safety
    /// `F` must be the exact signature of the patched slot.
    pub unsafe fn original_as<F: Copy>(&self) -> F {
        debug_assert_eq!(size_of::<F>(), size_of::<usize>());
        std::mem::transmute_copy(&self.original)
    }
}

/// Replaces single entries of live call tables and remembers what it displaced.
///
/// Bindings are keyed by (table, slot). COM objects of one class share a table,
/// so patching a second instance of the same class returns the existing binding.
pub struct CallTableInterceptor<P> {
    protection: P,
    bindings: Mutex<HashMap<(usize, usize), HookBinding>>,
}

impl<P: MemoryProtection> CallTableInterceptor<P> {
    pub fn new(protection: P) -> Self {
        Self {
            protection,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Patch `slot` of the call table behind `object` with `substitute`.
    ///
    /// Installing the same substitute twice is a no-op that returns the first binding.
    ///
    /// # Safety
    /// `object` must be null or point to a live object whose first field is a
    /// call-table pointer with more than `slot` entries.
    pub unsafe fn install(
        &self,
        object: *mut c_void,
        slot: usize,
        substitute: *const c_void,
    ) -> Result<HookBinding, HookError> {
        if object.is_null() {
            return Err(HookError::NullObject);
        }
        let table = *(object as *const *mut *const c_void);
        if table.is_null() {
            return Err(HookError::NullTable);
        }

        let mut bindings = lock(&self.bindings);
        let key = (table as usize, slot);
        if let Some(existing) = bindings.get(&key) {
            if existing.substitute == substitute as usize {
                return Ok(*existing);
            }
            return Err(HookError::SlotConflict { slot });
        }

        let entry = table.add(slot);
        let previous = self
            .protection
            .unprotect(entry as *mut c_void, size_of::<usize>())?;
        let cell = &*(entry as *const AtomicPtr<c_void>);
        let original = cell.swap(substitute as *mut c_void, Ordering::AcqRel);
        if let Err(e) = self
            .protection
            .restore(entry as *mut c_void, size_of::<usize>(), previous)
        {
            warn!(slot, "call table protection not restored: {}", e);
        }

        let binding = HookBinding {
            table: table as usize,
            slot,
            substitute: substitute as usize,
            original: original as usize,
        };
        debug!(
            table = format_args!("{:#x}", binding.table),
            slot,
            original = format_args!("{:#x}", binding.original),
            "call table entry patched"
        );
        bindings.insert(key, binding);
        Ok(binding)
    }

    pub fn binding(&self, table: usize, slot: usize) -> Option<HookBinding> {
        lock(&self.bindings).get(&(table, slot)).copied()
    }

    pub fn len(&self) -> usize {
        lock(&self.bindings).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Forwarding target of one hooked entry point, shared by every table patched
/// with the same substitute.
pub struct OriginalFn<F> {
    addr: AtomicUsize,
    _f: PhantomData<F>,
}

// Holds only an address.
unsafe impl<F> Sync for OriginalFn<F> {}

impl<F: Copy> OriginalFn<F> {
    pub const fn new() -> Self {
        Self {
            addr: AtomicUsize::new(0),
            _f: PhantomData,
        }
    }

    /// Record the binding's original entry unless one is already recorded.
    pub fn set(&self, binding: &HookBinding) {
        let _ = self
            .addr
            .compare_exchange(0, binding.original, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_set(&self) -> bool {
        self.addr.load(Ordering::Acquire) != 0
    }

    pub fn get(&self) -> Option<F> {
        let addr = self.addr.load(Ordering::Acquire);
        if addr == 0 {
            return None;
        }
        debug_assert_eq!(size_of::<F>(), size_of::<usize>());
        // SAFETY: only ever populated from a binding of the matching slot.
        Some(unsafe { std::mem::transmute_copy(&addr) })
    }
}

impl<F: Copy> Default for OriginalFn<F> {
    fn default() -> Self {
        Self::new()
    }
}
