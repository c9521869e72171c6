//! Raw bindings for the GMT C API.
//!
//! The declarations under the crate root are generated by `bindgen` from
//! `gmt.h` and only exist with the `link` feature. [`consts`] is always
//! available and carries the handful of values that are fixed by the GMT
//! API contract and needed before a session exists.

#![allow(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    dead_code
)]

#[cfg(feature = "link")]
include!(concat!(env!("OUT_DIR"), "/bindings.rs"));

/// Stable values from `gmt_resources.h`.
pub mod consts {
    use std::ffi::c_int;

    /// Return code of every successful API call.
    pub const NOERROR: c_int = 0;

    /// Session creation mode bits (`GMT_SESSION_*`).
    pub const SESSION_NOEXIT: u32 = 1;
    pub const SESSION_EXTERNAL: u32 = 2;
    pub const SESSION_COLMAJOR: u32 = 4;
    pub const SESSION_LOGERRORS: u32 = 8;
    pub const SESSION_RUNMODE: u32 = 16;

    /// Default number of padding rows/columns around grids.
    pub const PAD_DEFAULT: u32 = 2;

    /// Size of the buffer that receives a virtual file name, NUL included.
    pub const VF_LEN: usize = 16;

    /// Grid registrations.
    pub const GRID_NODE_REG: u32 = 0;
    pub const GRID_PIXEL_REG: u32 = 1;
}
