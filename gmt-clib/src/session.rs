//! Native session lifecycle.
//!
//! A [`Session`] owns exactly one native session pointer. It is the only type
//! that calls [`NativeLibrary`] entry points directly; virtual files and data
//! handles borrow it and route their native calls through it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ffi::{CString, c_int};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use gmt_sys::consts;
use log::{debug, error, warn};

use crate::config::{SessionConfig, SessionMode};
use crate::data::DataHandle;
use crate::error::{Error, Result};
use crate::guard::ProcessGuard;
use crate::library::{ApiPtr, DataPtr, Direction, Family, LibraryVersion, NativeLibrary};
use crate::virtualfile::VirtualFile;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// A virtual file registered with its session, innermost last.
#[derive(Debug)]
pub(crate) struct OpenFile {
    pub(crate) id: u64,
    pub(crate) name: CString,
    /// Container created for the file and destroyed with it.
    pub(crate) container: Option<DataPtr>,
}

impl OpenFile {
    fn display_name(&self) -> String {
        self.name.to_string_lossy().into_owned()
    }
}

/// An owned native session.
pub struct Session {
    library: Box<dyn NativeLibrary>,
    api: Option<ApiPtr>,
    id: u64,
    config: SessionConfig,
    files: RefCell<Vec<OpenFile>>,
    next_file: Cell<u64>,
    // Dropped after the native session is destroyed.
    _guard: Option<ProcessGuard>,
}

impl Session {
    /// Create a session on the library named by `config`.
    pub fn create(config: &SessionConfig) -> Result<Self> {
        let library = config.library.open()?;
        Self::with_library(library, config)
    }

    /// Create a session with default configuration.
    pub fn new() -> Result<Self> {
        Self::create(&SessionConfig::default())
    }

    /// Create a session on an explicitly supplied library.
    pub fn with_library(library: Box<dyn NativeLibrary>, config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let tag = CString::new(config.tag.as_str())
            .map_err(|_| Error::Config(format!("invalid session tag {:?}", config.tag)))?;
        let name = library.name().to_string();

        let guard = if library.reentrant() {
            None
        } else {
            Some(ProcessGuard::acquire()?)
        };

        let api = library
            .create_session(&tag, config.pad, config.mode)
            .ok_or_else(|| Error::Initialization {
                library: name.clone(),
                reason: "native create call returned a null session".into(),
            })?;

        let session = Self {
            library,
            api: Some(api),
            id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            config: config.clone(),
            files: RefCell::new(Vec::new()),
            next_file: Cell::new(1),
            _guard: guard,
        };
        debug!("session {} created on {name} (tag {})", session.id, config.tag);

        if let Some(args) = config.defaults_args() {
            if let Err(e) = session.invoke("gmtset", &args) {
                drop(session);
                return Err(Error::Initialization {
                    library: name,
                    reason: format!("applying defaults failed: {e}"),
                });
            }
        }
        Ok(session)
    }

    /// Run a module with a plain argument string.
    pub fn invoke(&self, operation: &str, args: &str) -> Result<()> {
        let api = self.raw()?;
        let module = to_cstring(operation, "operation name")?;
        let cargs = to_cstring(args, "argument string")?;
        debug!("session {}: {operation} {args}", self.id);
        // SAFETY: `api` is live until `destroy`, which needs `&mut self`.
        let status = unsafe { self.library.call_module(api, &module, &cargs) };
        self.check(operation, status)
    }

    /// Run a module whose data arguments are virtual files.
    ///
    /// Input files are passed first, then `args`, then output files
    /// (`-G<name>` for grids, `-><name>` for tables).
    pub fn invoke_with(&self, operation: &str, args: &str, files: &[&VirtualFile<'_>]) -> Result<()> {
        let mut parts = Vec::with_capacity(files.len() + 1);
        for file in files {
            if file.session_id() != self.id {
                return Err(Error::ForeignHandle(format!("virtual file `{}`", file.name())));
            }
        }
        parts.extend(
            files
                .iter()
                .filter(|f| f.direction() == Direction::In)
                .map(|f| f.name().to_string()),
        );
        if !args.is_empty() {
            parts.push(args.to_string());
        }
        parts.extend(
            files
                .iter()
                .filter(|f| f.direction() == Direction::Out)
                .map(|f| match f.family() {
                    Family::Grid => format!("-G{}", f.name()),
                    _ => format!("->{}", f.name()),
                }),
        );
        self.invoke(operation, &parts.join(" "))
    }

    /// Library name, version and creation parameters.
    pub fn info(&self) -> Result<SessionInfo> {
        let api = self.raw()?;
        // SAFETY: live session pointer.
        let version = unsafe { self.library.version(api) };
        Ok(SessionInfo {
            library: self.library.name().to_string(),
            version,
            tag: self.config.tag.clone(),
            pad: self.config.pad,
            mode: self.config.mode,
        })
    }

    /// Read a resource into a typed data handle.
    pub fn read_data(&self, family: Family, resource: &str) -> Result<DataHandle<'_>> {
        DataHandle::open(self, family, resource)
    }

    /// Finish the named figure and return its raw PostScript.
    pub fn extract_figure(&self, name: &str) -> Result<Vec<u8>> {
        let api = self.raw()?;
        let cname = to_cstring(name, "figure name")?;
        // SAFETY: live session pointer.
        match unsafe { self.library.end_figure(api, &cname) } {
            Ok(postscript) => Ok(postscript),
            Err(status) => {
                self.check("end", status)?;
                Err(Error::EmptyOutput(name.to_string()))
            }
        }
    }

    pub fn open_file_count(&self) -> usize {
        self.files.borrow().len()
    }

    /// Names of the open virtual files, outermost first.
    pub fn open_file_names(&self) -> Vec<String> {
        self.files.borrow().iter().map(OpenFile::display_name).collect()
    }

    /// Fail with [`Error::VirtualFileLeak`] if any virtual file is open.
    pub fn check_no_open_files(&self, operation: &str) -> Result<()> {
        self.check_files_closed(operation, 0)
    }

    /// Fail if files opened after `mark` (an earlier
    /// [`open_file_count`](Self::open_file_count)) are still open.
    pub fn check_files_closed(&self, operation: &str, mark: usize) -> Result<()> {
        let files = self.files.borrow();
        if files.len() <= mark {
            return Ok(());
        }
        Err(Error::VirtualFileLeak {
            operation: operation.to_string(),
            names: files[mark..].iter().map(OpenFile::display_name).collect(),
        })
    }

    /// Destroy the native session, reporting failures.
    ///
    /// Virtual files that were leaked (e.g. with `mem::forget`) are closed
    /// first and reported as [`Error::VirtualFileLeak`].
    pub fn close(mut self) -> Result<()> {
        let leaked = self.release_all_files();
        self.destroy()?;
        if !leaked.is_empty() {
            return Err(Error::VirtualFileLeak {
                operation: "close".into(),
                names: leaked,
            });
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.api.is_some()
    }

    /// Process-unique session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn library_name(&self) -> &str {
        self.library.name()
    }

    pub(crate) fn library(&self) -> &dyn NativeLibrary {
        self.library.as_ref()
    }

    pub(crate) fn raw(&self) -> Result<ApiPtr> {
        self.api.ok_or_else(|| Error::Initialization {
            library: self.library.name().to_string(),
            reason: "session has been destroyed".into(),
        })
    }

    /// Turn a native status into a result, fetching the library's message.
    pub(crate) fn check(&self, operation: &str, status: c_int) -> Result<()> {
        if status == consts::NOERROR {
            return Ok(());
        }
        Err(self.failure(operation, status))
    }

    /// An [`Error::Operation`] carrying the library's own message.
    pub(crate) fn failure(&self, operation: &str, status: c_int) -> Error {
        Error::Operation {
            operation: operation.to_string(),
            status,
            message: self.last_error(),
        }
    }

    /// The library's text for its most recent failure.
    pub(crate) fn last_error(&self) -> String {
        match self.api {
            // SAFETY: live session pointer.
            Some(api) => unsafe { self.library.error_text(api) },
            None => String::new(),
        }
    }

    pub(crate) fn register_file(&self, name: CString, container: Option<DataPtr>) -> u64 {
        let id = self.next_file.get();
        self.next_file.set(id + 1);
        self.files.borrow_mut().push(OpenFile {
            id,
            name,
            container,
        });
        id
    }

    /// Close a registered file natively and destroy its container.
    ///
    /// The file is released even when it is not the innermost one; the
    /// ordering mistake is still reported as [`Error::NestingViolation`].
    pub(crate) fn release_file(&self, id: u64) -> Result<()> {
        let (entry, innermost) = {
            let mut files = self.files.borrow_mut();
            let Some(pos) = files.iter().position(|f| f.id == id) else {
                return Ok(());
            };
            let innermost = files.last().map(OpenFile::display_name);
            let last = pos + 1 == files.len();
            (files.remove(pos), if last { None } else { innermost })
        };
        self.release_native(&entry)?;
        match innermost {
            None => Ok(()),
            Some(expected) => Err(Error::NestingViolation {
                expected,
                found: entry.display_name(),
            }),
        }
    }

    fn release_native(&self, entry: &OpenFile) -> Result<()> {
        let api = self.raw()?;
        debug!("session {}: close virtual file {:?}", self.id, entry.name);
        // SAFETY: the name and container were produced by this session.
        let status = unsafe { self.library.close_virtual_file(api, &entry.name) };
        let destroyed = match entry.container {
            Some(data) => unsafe { self.library.destroy_data(api, data) },
            None => consts::NOERROR,
        };
        self.check("close_virtual_file", status)?;
        self.check("destroy_data", destroyed)
    }

    fn release_all_files(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(entry) = self.files.get_mut().pop() {
            names.push(entry.display_name());
            if let Err(e) = self.release_native(&entry) {
                warn!("session {}: releasing leaked {:?}: {e}", self.id, entry.name);
            }
        }
        names
    }

    fn destroy(&mut self) -> Result<()> {
        let Some(api) = self.api.take() else {
            return Ok(());
        };
        // SAFETY: `take` guarantees this is the only destroy call.
        let status = unsafe { self.library.destroy_session(api) };
        debug!("session {} destroyed (status {status})", self.id);
        if status != consts::NOERROR {
            return Err(Error::Operation {
                operation: "destroy_session".into(),
                status,
                message: format!("{} could not destroy the session", self.library.name()),
            });
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let leaked = self.release_all_files();
        if !leaked.is_empty() {
            warn!(
                "session {} dropped with open virtual files: {}",
                self.id,
                leaked.join(", ")
            );
        }
        if let Err(e) = self.destroy() {
            error!("session {}: {e}", self.id);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("library", &self.library.name())
            .field("active", &self.is_active())
            .field("open_files", &self.open_file_names())
            .finish()
    }
}

fn to_cstring(text: &str, what: &str) -> Result<CString> {
    CString::new(text).map_err(|_| Error::InvalidArgument(format!("{what} contains a NUL byte")))
}

/// What [`Session::info`] reports.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub library: String,
    pub version: LibraryVersion,
    pub tag: String,
    pub pad: u32,
    pub mode: SessionMode,
}

impl SessionInfo {
    /// Flat string map with the `gmt_version*` keys.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("library".into(), self.library.clone());
        map.insert("gmt_version".into(), self.version.text.clone());
        map.insert("gmt_version_major".into(), self.version.major.to_string());
        map.insert("gmt_version_minor".into(), self.version.minor.to_string());
        map.insert("gmt_version_patch".into(), self.version.patch.to_string());
        map.insert("tag".into(), self.tag.clone());
        map.insert("pad".into(), self.pad.to_string());
        map.insert("mode".into(), format!("{:#x}", self.mode.bits()));
        map
    }
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "library: {}", self.library)?;
        writeln!(f, "version: {}", self.version)?;
        writeln!(f, "tag:     {}", self.tag)?;
        writeln!(f, "pad:     {}", self.pad)?;
        f.write_str("mode:    ")?;
        bitflags::parser::to_writer(&self.mode, &mut *f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLibrary;

    fn memory_session() -> (MemoryLibrary, Session) {
        let library = MemoryLibrary::new();
        let session =
            Session::with_library(Box::new(library.clone()), &SessionConfig::default()).unwrap();
        (library, session)
    }

    #[test]
    fn nul_in_arguments_is_rejected_before_native_call() {
        let _serial = crate::tests::serial();
        let (library, session) = memory_session();
        let before = library.stats().module_calls;
        let err = session.invoke("gmtset", "A=\0").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(library.stats().module_calls, before);
    }

    #[test]
    fn info_reports_version_keys() {
        let _serial = crate::tests::serial();
        let (_, session) = memory_session();
        let map = session.info().unwrap().to_map();
        assert_eq!(map["library"], "memory");
        assert!(map.contains_key("gmt_version"));
        assert!(map.contains_key("gmt_version_major"));
        assert_eq!(map["pad"], "2");
    }

    #[test]
    fn close_destroys_exactly_once() {
        let _serial = crate::tests::serial();
        let (library, session) = memory_session();
        session.close().unwrap();
        let stats = library.stats();
        assert_eq!(stats.sessions_created, 1);
        assert_eq!(stats.sessions_destroyed, 1);
        assert!(!crate::guard::session_active());
    }
}
