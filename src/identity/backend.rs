//! Subid backend abstraction and the dynamically loaded implementation.
//!
//! A backend module must export all four capabilities. Construction either
//! yields a fully populated [`DynamicBackend`] or drops (unloads) the module.

use super::nsswitch::{Degradation, NsswitchDirective};
use crate::config::types::{LoginkitError, Result, SubidRange, SubidStatus, SubidType};
use libc::{c_char, c_int, c_ulong, c_void};
use std::ffi::CString;
use std::sync::Arc;

pub const HAS_RANGE_SYMBOL: &[u8] = b"shadow_subid_has_range\0";
pub const LIST_OWNER_RANGES_SYMBOL: &[u8] = b"shadow_subid_list_owner_ranges\0";
pub const FIND_SUBID_OWNERS_SYMBOL: &[u8] = b"shadow_subid_find_subid_owners\0";
pub const FREE_SYMBOL: &[u8] = b"shadow_subid_free\0";

pub type HasRangeFn =
    unsafe extern "C" fn(*const c_char, c_ulong, c_ulong, c_int, *mut bool) -> c_int;
pub type ListOwnerRangesFn =
    unsafe extern "C" fn(*const c_char, c_int, *mut *mut SubidRange, *mut c_int) -> c_int;
pub type FindSubidOwnersFn =
    unsafe extern "C" fn(c_ulong, c_int, *mut *mut libc::uid_t, *mut c_int) -> c_int;
pub type FreeFn = unsafe extern "C" fn(*mut c_void);

/// Queries answered by a subid backend
pub trait SubidBackend: Send + Sync {
    fn name(&self) -> &str;
    fn has_range(&self, owner: &str, start: u64, count: u64, kind: SubidType) -> Result<bool>;
    fn list_owner_ranges(&self, owner: &str, kind: SubidType) -> Result<Vec<SubidRange>>;
    fn find_subid_owners(&self, id: u64, kind: SubidType) -> Result<Vec<u32>>;
}

pub type SharedBackend = Arc<dyn SubidBackend>;

/// A loaded module that hands out entry points by symbol name
pub trait CapabilityModule: Send + Sync + 'static {
    /// Address of a NUL-terminated `symbol`, `None` when not exported
    fn lookup(&self, symbol: &[u8]) -> Option<*const c_void>;
}

impl CapabilityModule for libloading::Library {
    fn lookup(&self, symbol: &[u8]) -> Option<*const c_void> {
        // SAFETY: the symbol is read as a bare address; callers cast it to
        // the ABI type documented for that name.
        let address = unsafe { self.get::<*const c_void>(symbol) }.ok().map(|s| *s)?;
        (!address.is_null()).then_some(address)
    }
}

fn symbol_name(symbol: &[u8]) -> &str {
    let bare = symbol.strip_suffix(b"\0").unwrap_or(symbol);
    let bare = bare.strip_prefix(b"shadow_subid_").unwrap_or(bare);
    std::str::from_utf8(bare).unwrap_or("?")
}

fn require(module: &dyn CapabilityModule, library: &str, symbol: &[u8]) -> Result<*const c_void> {
    module
        .lookup(symbol)
        .ok_or_else(|| LoginkitError::BackendIncompatible {
            library: library.to_string(),
            capability: symbol_name(symbol).to_string(),
        })
}

fn check_status(raw: c_int) -> Result<()> {
    match SubidStatus::from_raw(raw) {
        SubidStatus::Success => Ok(()),
        status => Err(LoginkitError::Backend(status)),
    }
}

fn owner_cstring(owner: &str) -> Result<CString> {
    // A name carrying NUL cannot belong to any account.
    CString::new(owner).map_err(|_| LoginkitError::Backend(SubidStatus::UnknownUser))
}

/// Backend served by a shared object exporting the four capabilities
pub struct DynamicBackend {
    name: String,
    has_range: HasRangeFn,
    list_owner_ranges: ListOwnerRangesFn,
    find_subid_owners: FindSubidOwnersFn,
    free: FreeFn,
    // Keeps the entry points above mapped.
    _module: Box<dyn CapabilityModule>,
}

impl std::fmt::Debug for DynamicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicBackend").field("name", &self.name).finish()
    }
}

impl DynamicBackend {
    /// Resolve every capability or give the module back to be unloaded.
    pub fn from_module(name: &str, module: Box<dyn CapabilityModule>) -> Result<Self> {
        let has_range = require(module.as_ref(), name, HAS_RANGE_SYMBOL)?;
        let list_owner_ranges = require(module.as_ref(), name, LIST_OWNER_RANGES_SYMBOL)?;
        let find_subid_owners = require(module.as_ref(), name, FIND_SUBID_OWNERS_SYMBOL)?;
        let free = require(module.as_ref(), name, FREE_SYMBOL)?;

        // SAFETY: each address was exported under a name whose C signature
        // is fixed by the backend ABI; the module outlives the pointers
        // because it is owned by the same struct.
        unsafe {
            Ok(Self {
                name: name.to_string(),
                has_range: std::mem::transmute::<*const c_void, HasRangeFn>(has_range),
                list_owner_ranges: std::mem::transmute::<*const c_void, ListOwnerRangesFn>(
                    list_owner_ranges,
                ),
                find_subid_owners: std::mem::transmute::<*const c_void, FindSubidOwnersFn>(
                    find_subid_owners,
                ),
                free: std::mem::transmute::<*const c_void, FreeFn>(free),
                _module: module,
            })
        }
    }

    /// Copy a backend-allocated array and hand it back to the backend.
    ///
    /// # Safety
    /// `items` must be null or point to `count` initialized values allocated
    /// by this backend.
    unsafe fn take_array<T: Copy>(&self, items: *mut T, count: c_int) -> Vec<T> {
        if items.is_null() {
            return Vec::new();
        }
        let owned = if count > 0 {
            std::slice::from_raw_parts(items, count as usize).to_vec()
        } else {
            Vec::new()
        };
        (self.free)(items as *mut c_void);
        owned
    }
}

impl SubidBackend for DynamicBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_range(&self, owner: &str, start: u64, count: u64, kind: SubidType) -> Result<bool> {
        let owner = owner_cstring(owner)?;
        let mut result = false;
        // SAFETY: owner is a valid C string and result a valid out pointer
        // for the duration of the call.
        let status = unsafe {
            (self.has_range)(
                owner.as_ptr(),
                start as c_ulong,
                count as c_ulong,
                kind.as_raw(),
                &mut result,
            )
        };
        check_status(status)?;
        Ok(result)
    }

    fn list_owner_ranges(&self, owner: &str, kind: SubidType) -> Result<Vec<SubidRange>> {
        let owner = owner_cstring(owner)?;
        let mut ranges: *mut SubidRange = std::ptr::null_mut();
        let mut count: c_int = 0;
        // SAFETY: out pointers are valid; on return the backend owns `ranges`
        // until it is released through take_array.
        let (status, ranges) = unsafe {
            let status = (self.list_owner_ranges)(owner.as_ptr(), kind.as_raw(), &mut ranges, &mut count);
            (status, self.take_array(ranges, count))
        };
        check_status(status)?;
        Ok(ranges)
    }

    fn find_subid_owners(&self, id: u64, kind: SubidType) -> Result<Vec<u32>> {
        let mut uids: *mut libc::uid_t = std::ptr::null_mut();
        let mut count: c_int = 0;
        // SAFETY: as for list_owner_ranges.
        let (status, uids) = unsafe {
            let status = (self.find_subid_owners)(id as c_ulong, kind.as_raw(), &mut uids, &mut count);
            (status, self.take_array(uids, count))
        };
        check_status(status)?;
        Ok(uids.into_iter().map(|uid| uid as u32).collect())
    }
}

/// Turns a directive into a live backend
pub trait BackendLoader: Send + Sync {
    fn load(&self, directive: &NsswitchDirective) -> std::result::Result<SharedBackend, Degradation>;
}

/// Loads `libsubid_<token>.so` through the dynamic linker
fn open_library(library_name: &str) -> Result<libloading::Library> {
    // SAFETY: opening runs the library's initializers. The name comes
    // from the administrator-owned service-switch configuration.
    unsafe { libloading::Library::new(library_name) }.map_err(|e| {
        LoginkitError::BackendLoadFailed(format!("Error opening {}: {}", library_name, e))
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLoader;

impl BackendLoader for DynamicLoader {
    fn load(&self, directive: &NsswitchDirective) -> std::result::Result<SharedBackend, Degradation> {
        let library_name = directive.library_name();
        let library =
            open_library(&library_name).map_err(|e| Degradation::LoadFailed(e.to_string()))?;

        let backend = DynamicBackend::from_module(&library_name, Box::new(library))
            .map_err(|e| Degradation::Incompatible(e.to_string()))?;
        Ok(Arc::new(backend))
    }
}
