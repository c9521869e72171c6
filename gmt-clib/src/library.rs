//! The seam between the safe layer and a native GMT-style library.
//!
//! [`NativeLibrary`] mirrors the handful of C entry points the binding needs.
//! Handles cross it as raw, non-owning pointers ([`ApiPtr`], [`DataPtr`]);
//! ownership lives in [`Session`](crate::Session) and
//! [`DataHandle`](crate::DataHandle), which are the only callers.

use std::ffi::{CStr, CString, c_int, c_void};
use std::fmt;
use std::ptr::NonNull;
use std::str::FromStr;

use crate::bridge::{ArrayDescriptor, ElementType};
use crate::config::SessionMode;
use crate::error::{Error, Result};

/// Raw pointer to a native session object.
///
/// Non-owning: the owning [`Session`](crate::Session) destroys it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiPtr(NonNull<c_void>);

impl ApiPtr {
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn from_non_null(ptr: NonNull<c_void>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Raw pointer to a native data object (grid, dataset, matrix, vector).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataPtr(NonNull<c_void>);

impl DataPtr {
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn from_non_null(ptr: NonNull<c_void>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Kind of data a native object or virtual file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Tables of double columns split into segments.
    Dataset,
    /// Regular 2-D float grid with a region and increment.
    Grid,
    /// Generic 2-D array of one element type.
    Matrix,
    /// Set of equal-length 1-D columns.
    Vector,
}

impl Family {
    /// Whether this family can carry data of the given geometry.
    pub fn accepts(self, geometry: Geometry) -> bool {
        match self {
            Family::Grid => geometry == Geometry::Surface,
            Family::Dataset | Family::Vector => geometry != Geometry::Surface,
            Family::Matrix => true,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Family::Dataset => "dataset",
            Family::Grid => "grid",
            Family::Matrix => "matrix",
            Family::Vector => "vector",
        })
    }
}

impl FromStr for Family {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dataset" => Ok(Family::Dataset),
            "grid" => Ok(Family::Grid),
            "matrix" => Ok(Family::Matrix),
            "vector" => Ok(Family::Vector),
            other => Err(Error::InvalidArgument(format!("unknown data family `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Geometry {
    Point,
    Line,
    Polygon,
    Surface,
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Geometry::Point => "point",
            Geometry::Line => "line",
            Geometry::Polygon => "polygon",
            Geometry::Surface => "surface",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Data flows into the library.
    In,
    /// The library writes data the caller reads back.
    Out,
}

/// Node (gridline) or cell-centre (pixel) registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Registration {
    #[default]
    Gridline,
    Pixel,
}

/// Geographic or Cartesian extent `west/east/south/north`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub west: f64,
    pub east: f64,
    pub south: f64,
    pub north: f64,
}

impl Region {
    pub const fn new(west: f64, east: f64, south: f64, north: f64) -> Self {
        Self {
            west,
            east,
            south,
            north,
        }
    }

    /// The whole globe, `-180/180/-90/90`.
    pub const GLOBAL: Region = Region::new(-180.0, 180.0, -90.0, 90.0);

    pub fn wesn(&self) -> [f64; 4] {
        [self.west, self.east, self.south, self.north]
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.west && x <= self.east && y >= self.south && y <= self.north
    }

    /// Whether the bounds are finite and strictly increasing.
    pub fn is_valid(&self) -> bool {
        self.wesn().iter().all(|v| v.is_finite())
            && self.west < self.east
            && self.south < self.north
    }
}

impl From<[f64; 4]> for Region {
    fn from(wesn: [f64; 4]) -> Self {
        Region::new(wesn[0], wesn[1], wesn[2], wesn[3])
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.west, self.east, self.south, self.north)
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 4 {
            return Err(Error::InvalidArgument(format!(
                "region `{s}` is not west/east/south/north"
            )));
        }
        let mut wesn = [0.0; 4];
        for (slot, part) in wesn.iter_mut().zip(&parts) {
            *slot = part.trim().parse().map_err(|_| {
                Error::InvalidArgument(format!("region `{s}` has a non-numeric bound `{part}`"))
            })?;
        }
        let region = Region::from(wesn);
        if !region.is_valid() {
            return Err(Error::InvalidArgument(format!("region `{s}` is empty or inverted")));
        }
        Ok(region)
    }
}

/// Native library version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Free-form version text as reported by the library.
    pub text: String,
}

impl fmt::Display for LibraryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Memory layout of a native data object, as reported by
/// [`NativeLibrary::describe_data`].
#[derive(Debug, Clone)]
pub struct NativeLayout {
    pub rows: usize,
    pub columns: usize,
    pub region: Option<Region>,
    pub increment: Option<[f64; 2]>,
    pub registration: Registration,
    /// Padding west/east/south/north around grid planes.
    pub pad: [usize; 4],
    pub buffer: NativeBuffer,
}

/// Where the numbers of a native object live.
#[derive(Debug, Clone)]
pub enum NativeBuffer {
    /// One `rows × columns` plane (grids, matrices).
    Plane(ArrayDescriptor),
    /// Segments of 1-D columns (datasets; vectors have one segment).
    Columns(Vec<Vec<ArrayDescriptor>>),
}

/// Why [`NativeLibrary::read_data`] produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFailure {
    NotFound,
    Malformed,
}

/// Entry points of a native GMT-style library.
///
/// # Safety
///
/// Every `unsafe` method requires that `api` was returned by this library's
/// [`create_session`](Self::create_session) and has not been destroyed, and
/// that any `data` pointer was produced through that same `api` and not yet
/// destroyed. Descriptors handed to [`put_vector`](Self::put_vector) and
/// [`put_matrix`](Self::put_matrix) are stored by reference: their buffers
/// must stay valid until the container is destroyed.
pub trait NativeLibrary {
    /// Short library name used in diagnostics.
    fn name(&self) -> &str;

    /// Whether several sessions may coexist in one process.
    fn reentrant(&self) -> bool {
        false
    }

    fn create_session(&self, tag: &CStr, pad: u32, mode: SessionMode) -> Option<ApiPtr>;

    unsafe fn destroy_session(&self, api: ApiPtr) -> c_int;

    unsafe fn call_module(&self, api: ApiPtr, module: &CStr, args: &CStr) -> c_int;

    /// Text of the most recent failure(s), verbatim.
    unsafe fn error_text(&self, api: ApiPtr) -> String;

    unsafe fn version(&self, api: ApiPtr) -> LibraryVersion;

    /// Allocate an empty container whose columns are attached later.
    unsafe fn create_data(
        &self,
        api: ApiPtr,
        family: Family,
        geometry: Geometry,
        rows: usize,
        columns: usize,
        element: ElementType,
    ) -> Option<DataPtr>;

    unsafe fn put_vector(
        &self,
        api: ApiPtr,
        data: DataPtr,
        column: usize,
        array: &ArrayDescriptor,
    ) -> c_int;

    unsafe fn put_matrix(&self, api: ApiPtr, data: DataPtr, array: &ArrayDescriptor) -> c_int;

    /// Bind `data` (IN) or an empty slot (OUT) to a generated name.
    unsafe fn open_virtual_file(
        &self,
        api: ApiPtr,
        family: Family,
        geometry: Geometry,
        direction: Direction,
        data: Option<DataPtr>,
    ) -> std::result::Result<CString, c_int>;

    unsafe fn close_virtual_file(&self, api: ApiPtr, name: &CStr) -> c_int;

    /// Take the object a module wrote to an OUT virtual file.
    unsafe fn read_virtual_file(&self, api: ApiPtr, name: &CStr) -> Option<DataPtr>;

    unsafe fn read_data(
        &self,
        api: ApiPtr,
        family: Family,
        resource: &CStr,
    ) -> std::result::Result<DataPtr, ReadFailure>;

    unsafe fn describe_data(
        &self,
        api: ApiPtr,
        family: Family,
        data: DataPtr,
    ) -> std::result::Result<NativeLayout, c_int>;

    unsafe fn destroy_data(&self, api: ApiPtr, data: DataPtr) -> c_int;

    /// Finish the named figure and hand back its PostScript.
    unsafe fn end_figure(&self, api: ApiPtr, name: &CStr) -> std::result::Result<Vec<u8>, c_int>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parses_and_displays() {
        let r: Region = "0/10/-5/5.5".parse().unwrap();
        assert_eq!(r, Region::new(0.0, 10.0, -5.0, 5.5));
        assert_eq!(r.to_string(), "0/10/-5/5.5");
    }

    #[test]
    fn region_rejects_inverted_bounds() {
        assert!("10/0/0/10".parse::<Region>().is_err());
        assert!("0/10/0".parse::<Region>().is_err());
        assert!("a/10/0/10".parse::<Region>().is_err());
    }

    #[test]
    fn family_geometry_compatibility() {
        assert!(Family::Grid.accepts(Geometry::Surface));
        assert!(!Family::Grid.accepts(Geometry::Point));
        assert!(Family::Vector.accepts(Geometry::Line));
        assert!(!Family::Dataset.accepts(Geometry::Surface));
        assert!(Family::Matrix.accepts(Geometry::Surface));
        assert!(Family::Matrix.accepts(Geometry::Polygon));
    }
}
