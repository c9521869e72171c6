//! Virtual files: in-memory data bound to a name the library accepts in place
//! of a file path.
//!
//! Files are opened through [`Session`] and must be closed innermost first.
//! Input files borrow the host arrays they expose (columns are handed to the
//! library by reference), so the arrays cannot change or disappear while the
//! library may read them.

use std::ffi::CString;
use std::fmt;

use log::{debug, warn};
use ndarray::{ArrayBase, Data, Dimension};

use crate::bridge::{self, BridgedArray, Element};
use crate::data::DataHandle;
use crate::error::{Error, Result};
use crate::library::{DataPtr, Direction, Family, Geometry};
use crate::session::Session;

/// Anything whose memory must outlive the native container referencing it.
trait Pinned {}

impl<T: Element> Pinned for BridgedArray<'_, T> {}

/// An open virtual file.
pub struct VirtualFile<'a> {
    session: &'a Session,
    id: u64,
    name: String,
    family: Family,
    geometry: Geometry,
    direction: Direction,
    released: bool,
    // Dropped after the native file is closed.
    _pinned: Vec<Box<dyn Pinned + 'a>>,
}

/// Destroys a freshly created container unless disarmed.
struct Container<'s> {
    session: &'s Session,
    data: DataPtr,
    armed: bool,
}

impl Container<'_> {
    fn disarm(mut self) -> DataPtr {
        self.armed = false;
        self.data
    }
}

impl Drop for Container<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(api) = self.session.raw() {
            // SAFETY: created on this session and never handed out.
            unsafe { self.session.library().destroy_data(api, self.data) };
        }
    }
}

fn check_geometry(family: Family, geometry: Geometry) -> Result<()> {
    if family.accepts(geometry) {
        Ok(())
    } else {
        Err(Error::FamilyMismatch {
            family,
            what: format!("{geometry} geometry"),
        })
    }
}

impl Session {
    /// Expose equal-length 1-D columns as a vector virtual file.
    pub fn open_vectors<'a, T, S, D>(
        &'a self,
        columns: &[&'a ArrayBase<S, D>],
        geometry: Geometry,
    ) -> Result<VirtualFile<'a>>
    where
        T: Element,
        S: Data<Elem = T>,
        D: Dimension,
    {
        check_geometry(Family::Vector, geometry)?;
        if columns.is_empty() {
            return Err(Error::Shape("at least one column is required".into()));
        }
        let mut bridged = Vec::with_capacity(columns.len());
        for column in columns {
            let array = bridge::describe(*column)?;
            if array.descriptor().rank() != 1 {
                return Err(Error::Shape(format!(
                    "vector columns must be 1-D, got shape {:?}",
                    array.descriptor().extents()
                )));
            }
            bridged.push(array);
        }
        let rows = bridged[0].descriptor().len();
        if let Some(other) = bridged.iter().find(|b| b.descriptor().len() != rows) {
            return Err(Error::Shape(format!(
                "columns differ in length ({rows} and {})",
                other.descriptor().len()
            )));
        }

        let api = self.raw()?;
        let container = self.create_container(Family::Vector, geometry, rows, bridged.len(), T::TYPE)?;
        for (index, array) in bridged.iter().enumerate() {
            // SAFETY: the descriptor's buffer is pinned by the returned file.
            let status = unsafe {
                self.library()
                    .put_vector(api, container.data, index, array.descriptor())
            };
            self.check("put_vector", status)?;
        }
        let pinned = bridged
            .into_iter()
            .map(|b| Box::new(b) as Box<dyn Pinned + 'a>)
            .collect();
        self.open_in(Family::Vector, geometry, container, pinned)
    }

    /// Expose a 2-D array as a matrix virtual file.
    ///
    /// With [`Geometry::Surface`] modules read it as a grid, otherwise as a
    /// table whose columns are the matrix columns.
    pub fn open_matrix<'a, T, S, D>(
        &'a self,
        matrix: &'a ArrayBase<S, D>,
        geometry: Geometry,
    ) -> Result<VirtualFile<'a>>
    where
        T: Element,
        S: Data<Elem = T>,
        D: Dimension,
    {
        check_geometry(Family::Matrix, geometry)?;
        let array = bridge::describe(matrix)?;
        let desc = array.descriptor();
        if desc.rank() != 2 {
            return Err(Error::Shape(format!(
                "matrix must be 2-D, got shape {:?}",
                desc.extents()
            )));
        }
        let (rows, cols) = (desc.extents()[0], desc.extents()[1]);

        let api = self.raw()?;
        let container = self.create_container(Family::Matrix, geometry, rows, cols, T::TYPE)?;
        // SAFETY: the buffer is pinned by the returned file.
        let status = unsafe { self.library().put_matrix(api, container.data, desc) };
        self.check("put_matrix", status)?;
        let pinned: Vec<Box<dyn Pinned + 'a>> = vec![Box::new(array)];
        self.open_in(Family::Matrix, geometry, container, pinned)
    }

    /// Expose an existing native object as an input virtual file.
    pub fn open_data<'a>(
        &'a self,
        handle: &'a DataHandle<'_>,
        geometry: Geometry,
    ) -> Result<VirtualFile<'a>> {
        if handle.session_id() != self.id() {
            return Err(Error::ForeignHandle(format!("{} data handle", handle.family())));
        }
        check_geometry(handle.family(), geometry)?;
        let api = self.raw()?;
        // SAFETY: the handle owns a live object of this session and is
        // borrowed for the life of the file.
        let name = unsafe {
            self.library().open_virtual_file(
                api,
                handle.family(),
                geometry,
                Direction::In,
                Some(handle.data_ptr()),
            )
        }
        .map_err(|status| self.failure("open_virtual_file", status))?;
        Ok(self.register(name, None, handle.family(), geometry, Direction::In, Vec::new()))
    }

    /// Open an empty virtual file a module writes its result to.
    ///
    /// Read the result back with [`VirtualFile::finish`].
    pub fn open_output(&self, family: Family, geometry: Geometry) -> Result<VirtualFile<'_>> {
        if !matches!(family, Family::Dataset | Family::Grid) {
            return Err(Error::FamilyMismatch {
                family,
                what: "an output virtual file".into(),
            });
        }
        check_geometry(family, geometry)?;
        let api = self.raw()?;
        // SAFETY: live session pointer.
        let name = unsafe {
            self.library()
                .open_virtual_file(api, family, geometry, Direction::Out, None)
        }
        .map_err(|status| self.failure("open_virtual_file", status))?;
        Ok(self.register(name, None, family, geometry, Direction::Out, Vec::new()))
    }

    fn create_container(
        &self,
        family: Family,
        geometry: Geometry,
        rows: usize,
        columns: usize,
        element: bridge::ElementType,
    ) -> Result<Container<'_>> {
        let api = self.raw()?;
        // SAFETY: live session pointer.
        let data = unsafe {
            self.library()
                .create_data(api, family, geometry, rows, columns, element)
        }
        .ok_or_else(|| self.failure("create_data", -1))?;
        Ok(Container {
            session: self,
            data,
            armed: true,
        })
    }

    fn open_in<'a>(
        &'a self,
        family: Family,
        geometry: Geometry,
        container: Container<'a>,
        pinned: Vec<Box<dyn Pinned + 'a>>,
    ) -> Result<VirtualFile<'a>> {
        let api = self.raw()?;
        // SAFETY: the container is live and owned by this session.
        let name = unsafe {
            self.library().open_virtual_file(
                api,
                family,
                geometry,
                Direction::In,
                Some(container.data),
            )
        }
        .map_err(|status| self.failure("open_virtual_file", status))?;
        let data = container.disarm();
        Ok(self.register(name, Some(data), family, geometry, Direction::In, pinned))
    }

    fn register<'a>(
        &'a self,
        name: CString,
        container: Option<DataPtr>,
        family: Family,
        geometry: Geometry,
        direction: Direction,
        pinned: Vec<Box<dyn Pinned + 'a>>,
    ) -> VirtualFile<'a> {
        let display = name.to_string_lossy().into_owned();
        debug!(
            "session {}: open {direction:?} {family}/{geometry} virtual file {display}",
            self.id()
        );
        let id = self.register_file(name, container);
        VirtualFile {
            session: self,
            id,
            name: display,
            family,
            geometry,
            direction,
            released: false,
            _pinned: pinned,
        }
    }
}

impl<'a> VirtualFile<'a> {
    /// The name modules accept in place of a file path.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn session_id(&self) -> u64 {
        self.session.id()
    }

    /// The file as a module argument (`name`, `-Gname` or `->name`).
    pub fn as_arg(&self) -> String {
        match (self.direction, self.family) {
            (Direction::In, _) => self.name.clone(),
            (Direction::Out, Family::Grid) => format!("-G{}", self.name),
            (Direction::Out, _) => format!("->{}", self.name),
        }
    }

    /// Close the file natively.
    ///
    /// Closing a file that is not the innermost open one still releases it
    /// but fails with [`Error::NestingViolation`].
    pub fn close(mut self) -> Result<()> {
        self.released = true;
        self.session.release_file(self.id)
    }

    /// Take the object a module wrote to this output file, then close it.
    pub fn finish(mut self) -> Result<DataHandle<'a>> {
        if self.direction != Direction::Out {
            return Err(Error::InvalidArgument(format!(
                "virtual file `{}` is an input file",
                self.name
            )));
        }
        let session = self.session;
        let api = session.raw()?;
        let cname = CString::new(self.name.as_str())
            .map_err(|_| Error::InvalidArgument(format!("bad virtual file name {:?}", self.name)))?;
        // SAFETY: the name belongs to this live session.
        let data = unsafe { session.library().read_virtual_file(api, &cname) };
        self.released = true;
        let closed = session.release_file(self.id);
        let handle = match data {
            Some(data) => DataHandle::adopt(session, self.family, data)?,
            None => return closed.and(Err(Error::EmptyOutput(self.name.clone()))),
        };
        closed?;
        Ok(handle)
    }
}

impl Drop for VirtualFile<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.session.release_file(self.id) {
            warn!("dropping virtual file {}: {e}", self.name);
        }
    }
}

impl fmt::Debug for VirtualFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualFile")
            .field("name", &self.name)
            .field("family", &self.family)
            .field("geometry", &self.geometry)
            .field("direction", &self.direction)
            .finish()
    }
}
