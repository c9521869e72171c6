//! Safe bindings for a stateful GMT-style C library.
//!
//! A [`Session`] owns one native session. Host arrays are lent to it through
//! [`VirtualFile`]s, modules run by name with [`Session::invoke`] /
//! [`Session::invoke_with`], and native results come back as
//! [`DataHandle`]s. Every native resource is released exactly once, either
//! explicitly or on drop.
//!
//! Two libraries implement the native seam: [`MemoryLibrary`], an in-process
//! engine that is always available, and `GmtLibrary` (feature `gmt`), which
//! binds the real `libgmt`.

pub mod bridge;
pub mod config;
pub mod data;
pub mod error;
pub mod guard;
pub mod library;
pub mod memory;
pub mod session;
pub mod virtualfile;

#[cfg(feature = "gmt")]
pub mod gmt;

pub use bridge::{ArrayDescriptor, BridgedArray, Element, ElementType, MAX_RANK, describe};
pub use config::{LibraryKind, SessionConfig, SessionMode};
pub use data::{DataHandle, Layout};
pub use error::{Error, Result};
pub use guard::session_active;
pub use library::{
    ApiPtr, DataPtr, Direction, Family, Geometry, LibraryVersion, NativeLibrary, Region,
    Registration,
};
pub use memory::{MemoryLibrary, MemoryStats};
pub use session::{Session, SessionInfo};
pub use virtualfile::VirtualFile;

#[cfg(feature = "gmt")]
pub use gmt::GmtLibrary;
