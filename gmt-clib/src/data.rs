//! Owning handles to native data objects.

use std::ffi::CString;
use std::fmt;

use log::{debug, warn};
use ndarray::{Array2, ArrayView1, ArrayView2, Ix1, Ix2};

use crate::bridge::{self, ArrayDescriptor, Element, ElementType};
use crate::error::{Error, Result};
use crate::library::{DataPtr, Family, NativeBuffer, ReadFailure, Region, Registration};
use crate::session::Session;

/// Memory layout captured when a handle is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub registration: Registration,
    /// Node spacing `[x, y]` (grids only).
    pub increment: Option<[f64; 2]>,
    pub element: ElementType,
    /// Padding west/east/south/north around the grid plane.
    pub pad: [usize; 4],
    /// Number of table segments (1 for planes and vectors).
    pub segments: usize,
}

/// A native grid, dataset, matrix or vector owned by the caller.
///
/// Metadata is cached at open time. Views borrow the handle, so the native
/// object cannot be destroyed while one is alive.
pub struct DataHandle<'s> {
    session: &'s Session,
    data: DataPtr,
    family: Family,
    shape: (usize, usize),
    region: Option<Region>,
    layout: Layout,
    buffer: NativeBuffer,
    destroyed: bool,
}

impl<'s> DataHandle<'s> {
    /// Read a resource (file path or registered name) through the session.
    pub fn open(session: &'s Session, family: Family, resource: &str) -> Result<Self> {
        let api = session.raw()?;
        let cname = CString::new(resource)
            .map_err(|_| Error::InvalidArgument(format!("resource name {resource:?} contains NUL")))?;
        debug!("session {}: read {family} from {resource}", session.id());
        // SAFETY: live session pointer.
        match unsafe { session.library().read_data(api, family, &cname) } {
            Ok(data) => Self::adopt(session, family, data),
            Err(ReadFailure::NotFound) => Err(Error::ResourceNotFound {
                resource: resource.to_string(),
                message: session.last_error(),
            }),
            Err(ReadFailure::Malformed) => Err(Error::Format {
                resource: resource.to_string(),
                message: session.last_error(),
            }),
        }
    }

    /// Take ownership of a native object produced by `session`.
    pub(crate) fn adopt(session: &'s Session, family: Family, data: DataPtr) -> Result<Self> {
        let api = session.raw()?;
        // SAFETY: `data` is a live object of this session.
        let described = unsafe { session.library().describe_data(api, family, data) };
        let native = match described {
            Ok(native) => native,
            Err(status) => {
                let err = session.failure("describe_data", status);
                unsafe { session.library().destroy_data(api, data) };
                return Err(err);
            }
        };

        let (element, segments) = match &native.buffer {
            NativeBuffer::Plane(desc) => (desc.element(), 1),
            NativeBuffer::Columns(segments) => (
                segments
                    .iter()
                    .flatten()
                    .map(ArrayDescriptor::element)
                    .next()
                    .unwrap_or(ElementType::F64),
                segments.len(),
            ),
        };
        Ok(Self {
            session,
            data,
            family,
            shape: (native.rows, native.columns),
            region: native.region,
            layout: Layout {
                registration: native.registration,
                increment: native.increment,
                element,
                pad: native.pad,
                segments,
            },
            buffer: native.buffer,
            destroyed: false,
        })
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Zero-copy view of a grid or matrix plane, north row first.
    pub fn view<T: Element>(&self) -> Result<ArrayView2<'_, T>> {
        let NativeBuffer::Plane(desc) = &self.buffer else {
            return Err(Error::FamilyMismatch {
                family: self.family,
                what: "a 2-D plane".into(),
            });
        };
        // SAFETY: the object lives until `self` is dropped, which the
        // returned borrow prevents.
        let view = unsafe { bridge::view::<T>(desc) }?;
        view.into_dimensionality::<Ix2>()
            .map_err(|e| Error::Shape(e.to_string()))
    }

    /// Zero-copy views of the columns of a single-segment table.
    pub fn columns<T: Element>(&self) -> Result<Vec<ArrayView1<'_, T>>> {
        match self.layout.segments {
            1 => self.segment(0),
            n => Err(Error::Shape(format!(
                "{} has {n} segments; use segment() or to_array()",
                self.family
            ))),
        }
    }

    /// Zero-copy views of the columns of one table segment.
    pub fn segment<T: Element>(&self, index: usize) -> Result<Vec<ArrayView1<'_, T>>> {
        let NativeBuffer::Columns(segments) = &self.buffer else {
            return Err(Error::FamilyMismatch {
                family: self.family,
                what: "a table".into(),
            });
        };
        let columns = segments.get(index).ok_or_else(|| {
            Error::InvalidArgument(format!("segment {index} out of {}", segments.len()))
        })?;
        columns
            .iter()
            .map(|desc| {
                // SAFETY: as in `view`.
                let view = unsafe { bridge::view::<T>(desc) }?;
                view.into_dimensionality::<Ix1>()
                    .map_err(|e| Error::Shape(e.to_string()))
            })
            .collect()
    }

    /// Copy the data into a host array; table segments are concatenated.
    pub fn to_array<T: Element>(&self) -> Result<Array2<T>> {
        match &self.buffer {
            NativeBuffer::Plane(desc) => {
                // SAFETY: live buffer for the duration of the copy.
                let array = unsafe { bridge::materialize::<T>(desc) }?;
                array
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| Error::Shape(e.to_string()))
            }
            NativeBuffer::Columns(segments) => {
                let (rows, cols) = self.shape;
                let mut columns: Vec<Vec<T>> = vec![Vec::with_capacity(rows); cols];
                for segment in segments {
                    for (column, desc) in columns.iter_mut().zip(segment) {
                        // SAFETY: as above.
                        let values = unsafe { bridge::materialize::<T>(desc) }?;
                        column.extend(values.iter().copied());
                    }
                }
                if columns.iter().any(|c| c.len() != rows) {
                    return Err(Error::Shape(format!(
                        "{} columns do not all hold {rows} rows",
                        self.family
                    )));
                }
                Ok(Array2::from_shape_fn((rows, cols), |(i, j)| columns[j][i]))
            }
        }
    }

    /// Destroy the native object, reporting failure.
    pub fn close(mut self) -> Result<()> {
        self.destroy()
    }

    pub(crate) fn session_id(&self) -> u64 {
        self.session.id()
    }

    pub(crate) fn data_ptr(&self) -> DataPtr {
        self.data
    }

    fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        let api = self.session.raw()?;
        // SAFETY: owned object, destroyed once.
        let status = unsafe { self.session.library().destroy_data(api, self.data) };
        self.session.check("destroy_data", status)
    }
}

impl Drop for DataHandle<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            warn!("dropping {} handle: {e}", self.family);
        }
    }
}

impl fmt::Debug for DataHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataHandle")
            .field("family", &self.family)
            .field("shape", &self.shape)
            .field("region", &self.region)
            .field("layout", &self.layout)
            .finish()
    }
}
