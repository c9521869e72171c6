//! In-process implementation of [`NativeLibrary`].
//!
//! `MemoryLibrary` keeps every session in a heap-allocated engine and hands
//! out pointers into it, exactly like a C library would. It understands a
//! small set of modules (`begin`, `end`, `gmtset`, `basemap`, `coast`,
//! `plot`, `text`, `grdimage`, `colorbar`, `logo`, `gmtconvert`, `select`,
//! `grdcut`, `grdconvert`), reads ESRI ASCII grids and text tables, and
//! draws figures as plain PostScript. It backs the test suites and the
//! `memory` library kind of the CLI.

mod canvas;
mod engine;
mod objects;
mod resource;

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_int};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use gmt_sys::consts::NOERROR;
use log::debug;

use self::engine::Engine;
use crate::bridge::{ArrayDescriptor, ElementType};
use crate::config::SessionMode;
use crate::library::{
    ApiPtr, DataPtr, Direction, Family, Geometry, LibraryVersion, NativeLayout, NativeLibrary,
    ReadFailure,
};

/// Call counters of a [`MemoryLibrary`], shared by all its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStats {
    pub create_attempts: usize,
    pub sessions_created: usize,
    pub sessions_destroyed: usize,
    /// Every entry point except `create_session`.
    pub native_calls: usize,
    pub module_calls: usize,
    /// Data objects currently allocated across all sessions.
    pub live_objects: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    create_attempts: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_destroyed: AtomicUsize,
    native_calls: AtomicUsize,
    module_calls: AtomicUsize,
    pub(crate) live_objects: AtomicUsize,
}

#[derive(Debug, Default)]
pub(crate) struct Shared {
    resources: Mutex<HashMap<String, Arc<[u8]>>>,
    pub(crate) counters: Counters,
    fail_next_create: AtomicBool,
}

impl Shared {
    pub(crate) fn resource(&self, name: &str) -> Option<Arc<[u8]>> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

/// The in-process engine.
///
/// Clones share registered resources and counters, so a test can keep one
/// clone for inspection while a session owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryLibrary {
    shared: Arc<Shared>,
    reentrant: bool,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow several sessions of this library to coexist.
    pub fn reentrant(mut self, reentrant: bool) -> Self {
        self.reentrant = reentrant;
        self
    }

    /// Make `bytes` readable under `name`, shadowing any file of that name.
    pub fn register_resource(&self, name: &str, bytes: impl Into<Vec<u8>>) {
        let bytes: Arc<[u8]> = bytes.into().into();
        self.shared
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), bytes);
    }

    /// Make the next `create_session` return null.
    pub fn fail_next_create(&self) {
        self.shared.fail_next_create.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> MemoryStats {
        let c = &self.shared.counters;
        MemoryStats {
            create_attempts: c.create_attempts.load(Ordering::SeqCst),
            sessions_created: c.sessions_created.load(Ordering::SeqCst),
            sessions_destroyed: c.sessions_destroyed.load(Ordering::SeqCst),
            native_calls: c.native_calls.load(Ordering::SeqCst),
            module_calls: c.module_calls.load(Ordering::SeqCst),
            live_objects: c.live_objects.load(Ordering::SeqCst),
        }
    }

    fn count(&self) {
        self.shared.counters.native_calls.fetch_add(1, Ordering::SeqCst);
    }

    /// # Safety
    ///
    /// `api` must come from `create_session` and not be destroyed yet.
    #[allow(clippy::mut_from_ref)]
    unsafe fn engine<'e>(&self, api: ApiPtr) -> &'e mut Engine {
        self.count();
        // SAFETY: forwarded from the caller; sessions are not shared across
        // threads, so no other reference is live during a call.
        unsafe { &mut *(api.as_ptr() as *mut Engine) }
    }
}

fn text(value: &CStr) -> String {
    value.to_string_lossy().into_owned()
}

impl NativeLibrary for MemoryLibrary {
    fn name(&self) -> &str {
        "memory"
    }

    fn reentrant(&self) -> bool {
        self.reentrant
    }

    fn create_session(&self, tag: &CStr, pad: u32, mode: SessionMode) -> Option<ApiPtr> {
        let counters = &self.shared.counters;
        counters.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_next_create.swap(false, Ordering::SeqCst) {
            debug!("memory: refusing session {}", text(tag));
            return None;
        }
        debug!("memory: create session {} (pad {pad}, mode {mode:?})", text(tag));
        let engine = Box::new(Engine::new(&text(tag), pad as usize, self.shared.clone()));
        counters.sessions_created.fetch_add(1, Ordering::SeqCst);
        Some(ApiPtr::from_non_null(NonNull::from(Box::leak(engine)).cast()))
    }

    unsafe fn destroy_session(&self, api: ApiPtr) -> c_int {
        self.count();
        // SAFETY: allocated by `create_session`; the caller destroys once.
        drop(unsafe { Box::from_raw(api.as_ptr() as *mut Engine) });
        self.shared
            .counters
            .sessions_destroyed
            .fetch_add(1, Ordering::SeqCst);
        NOERROR
    }

    unsafe fn call_module(&self, api: ApiPtr, module: &CStr, args: &CStr) -> c_int {
        self.shared.counters.module_calls.fetch_add(1, Ordering::SeqCst);
        unsafe { self.engine(api) }.call(&text(module), &text(args))
    }

    unsafe fn error_text(&self, api: ApiPtr) -> String {
        unsafe { self.engine(api) }.error_text()
    }

    unsafe fn version(&self, _api: ApiPtr) -> LibraryVersion {
        self.count();
        LibraryVersion {
            major: 6,
            minor: 5,
            patch: 0,
            text: "6.5.0 (gmtnb memory)".into(),
        }
    }

    unsafe fn create_data(
        &self,
        api: ApiPtr,
        family: Family,
        geometry: Geometry,
        rows: usize,
        columns: usize,
        element: ElementType,
    ) -> Option<DataPtr> {
        unsafe { self.engine(api) }.create_data(family, geometry, rows, columns, element)
    }

    unsafe fn put_vector(
        &self,
        api: ApiPtr,
        data: DataPtr,
        column: usize,
        array: &ArrayDescriptor,
    ) -> c_int {
        unsafe { self.engine(api) }.put_vector(data, column, array)
    }

    unsafe fn put_matrix(&self, api: ApiPtr, data: DataPtr, array: &ArrayDescriptor) -> c_int {
        unsafe { self.engine(api) }.put_matrix(data, array)
    }

    unsafe fn open_virtual_file(
        &self,
        api: ApiPtr,
        family: Family,
        _geometry: Geometry,
        direction: Direction,
        data: Option<DataPtr>,
    ) -> Result<CString, c_int> {
        let name = unsafe { self.engine(api) }.open_file(family, direction, data)?;
        // generated names never contain NUL
        CString::new(name).map_err(|_| engine::STATUS_OBJECT)
    }

    unsafe fn close_virtual_file(&self, api: ApiPtr, name: &CStr) -> c_int {
        unsafe { self.engine(api) }.close_file(&text(name))
    }

    unsafe fn read_virtual_file(&self, api: ApiPtr, name: &CStr) -> Option<DataPtr> {
        unsafe { self.engine(api) }.read_file(&text(name))
    }

    unsafe fn read_data(
        &self,
        api: ApiPtr,
        family: Family,
        resource: &CStr,
    ) -> Result<DataPtr, ReadFailure> {
        unsafe { self.engine(api) }.read_data(family, &text(resource))
    }

    unsafe fn describe_data(
        &self,
        api: ApiPtr,
        family: Family,
        data: DataPtr,
    ) -> Result<NativeLayout, c_int> {
        unsafe { self.engine(api) }.describe(family, data)
    }

    unsafe fn destroy_data(&self, api: ApiPtr, data: DataPtr) -> c_int {
        unsafe { self.engine(api) }.destroy_data(data)
    }

    unsafe fn end_figure(&self, api: ApiPtr, name: &CStr) -> Result<Vec<u8>, c_int> {
        unsafe { self.engine(api) }.end_figure(&text(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters_and_resources() {
        let library = MemoryLibrary::new();
        let other = library.clone();
        library.register_resource("pts", "1 2\n");
        assert!(other.shared.resource("pts").is_some());

        let tag = c"clones";
        let api = library
            .create_session(tag, 2, SessionMode::default())
            .unwrap();
        assert_eq!(unsafe { library.destroy_session(api) }, NOERROR);
        let stats = other.stats();
        assert_eq!(stats.sessions_created, 1);
        assert_eq!(stats.sessions_destroyed, 1);
        assert_eq!(stats.native_calls, 1);
    }

    #[test]
    fn failed_create_is_counted() {
        let library = MemoryLibrary::new();
        library.fail_next_create();
        assert!(library.create_session(c"x", 2, SessionMode::default()).is_none());
        let stats = library.stats();
        assert_eq!(stats.create_attempts, 1);
        assert_eq!(stats.sessions_created, 0);
    }

    #[test]
    fn destroy_frees_leftover_objects() {
        let library = MemoryLibrary::new();
        let api = library.create_session(c"x", 2, SessionMode::default()).unwrap();
        unsafe {
            library
                .create_data(api, Family::Vector, Geometry::Point, 3, 2, ElementType::F64)
                .unwrap();
            assert_eq!(library.stats().live_objects, 1);
            library.destroy_session(api);
        }
        assert_eq!(library.stats().live_objects, 0);
    }
}
