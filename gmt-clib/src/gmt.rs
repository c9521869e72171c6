//! [`NativeLibrary`] over the real `libgmt`, through `gmt-sys`.
//!
//! GMT prints its diagnostics through a callback; the lines are captured so
//! [`error_text`](NativeLibrary::error_text) can return them verbatim. Figures
//! are drawn by GMT in modern mode into its session directory, from which
//! [`end_figure`](NativeLibrary::end_figure) collects the newest half-written
//! `.ps-` page.

use std::ffi::{CStr, CString, c_char, c_int, c_uint, c_void};
use std::fs;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use gmt_sys as sys;
use gmt_sys::consts::{self, NOERROR};
use log::debug;

use crate::bridge::{ArrayDescriptor, ElementType};
use crate::config::SessionMode;
use crate::library::{
    ApiPtr, DataPtr, Direction, Family, Geometry, LibraryVersion, NativeBuffer, NativeLayout,
    NativeLibrary, ReadFailure, Region, Registration,
};

/// Status reported for failures detected on this side of the FFI.
const STATUS_LOCAL: c_int = -1;

static MESSAGES: Mutex<Vec<String>> = Mutex::new(Vec::new());

fn messages() -> std::sync::MutexGuard<'static, Vec<String>> {
    MESSAGES.lock().unwrap_or_else(PoisonError::into_inner)
}

unsafe extern "C" fn capture(_stream: *mut sys::FILE, message: *const c_char) -> c_int {
    if message.is_null() {
        return 0;
    }
    // SAFETY: GMT passes a NUL-terminated string valid for this call.
    let text = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    let text = text.trim_end();
    debug!("gmt: {text}");
    messages().push(text.to_string());
    0
}

fn family_code(family: Family) -> c_uint {
    (match family {
        Family::Dataset => sys::GMT_IS_DATASET,
        Family::Grid => sys::GMT_IS_GRID,
        Family::Matrix => sys::GMT_IS_MATRIX,
        Family::Vector => sys::GMT_IS_VECTOR,
    }) as c_uint
}

fn geometry_code(geometry: Geometry) -> c_uint {
    (match geometry {
        Geometry::Point => sys::GMT_IS_POINT,
        Geometry::Line => sys::GMT_IS_LINE,
        Geometry::Polygon => sys::GMT_IS_POLY,
        Geometry::Surface => sys::GMT_IS_SURFACE,
    }) as c_uint
}

fn type_code(element: ElementType) -> c_uint {
    (match element {
        ElementType::F64 => sys::GMT_DOUBLE,
        ElementType::F32 => sys::GMT_FLOAT,
        ElementType::I32 => sys::GMT_INT,
    }) as c_uint
}

fn element_of(code: c_uint) -> Option<ElementType> {
    match code {
        c if c == sys::GMT_DOUBLE as c_uint => Some(ElementType::F64),
        c if c == sys::GMT_FLOAT as c_uint => Some(ElementType::F32),
        c if c == sys::GMT_INT as c_uint => Some(ElementType::I32),
        _ => None,
    }
}

/// Newest `*.ps-` file one level below `root`.
fn newest_page(root: &Path) -> Option<PathBuf> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for session in fs::read_dir(root).ok()?.flatten() {
        let Ok(entries) = fs::read_dir(session.path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.to_string_lossy().ends_with(".ps-") {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if best.as_ref().is_none_or(|(t, _)| modified > *t) {
                best = Some((modified, path));
            }
        }
    }
    best.map(|(_, path)| path)
}

/// The system GMT library.
#[derive(Debug, Default)]
pub struct GmtLibrary;

impl GmtLibrary {
    pub fn new() -> Self {
        Self
    }
}

impl NativeLibrary for GmtLibrary {
    fn name(&self) -> &str {
        "gmt"
    }

    fn create_session(&self, tag: &CStr, pad: u32, mode: SessionMode) -> Option<ApiPtr> {
        messages().clear();
        // SAFETY: `tag` is NUL-terminated; `capture` matches the callback
        // signature and never unwinds.
        let api = unsafe { sys::GMT_Create_Session(tag.as_ptr(), pad, mode.bits(), Some(capture)) };
        ApiPtr::new(api)
    }

    unsafe fn destroy_session(&self, api: ApiPtr) -> c_int {
        unsafe { sys::GMT_Destroy_Session(api.as_ptr()) }
    }

    unsafe fn call_module(&self, api: ApiPtr, module: &CStr, args: &CStr) -> c_int {
        messages().clear();
        // SAFETY: GMT_MODULE_CMD reads `args` as a C string and does not keep it.
        unsafe {
            sys::GMT_Call_Module(
                api.as_ptr(),
                module.as_ptr(),
                sys::GMT_MODULE_CMD as c_int,
                args.as_ptr() as *mut c_void,
            )
        }
    }

    unsafe fn error_text(&self, _api: ApiPtr) -> String {
        let lines = messages();
        let errors: Vec<&str> = lines
            .iter()
            .map(String::as_str)
            .filter(|l| l.contains("[ERROR]"))
            .collect();
        if errors.is_empty() {
            lines.join("\n")
        } else {
            errors.join("\n")
        }
    }

    unsafe fn version(&self, api: ApiPtr) -> LibraryVersion {
        let (mut major, mut minor, mut patch) = (0, 0, 0);
        // SAFETY: the out pointers are valid locals.
        unsafe { sys::GMT_Get_Version(api.as_ptr(), &mut major, &mut minor, &mut patch) };
        LibraryVersion {
            major,
            minor,
            patch,
            text: format!("{major}.{minor}.{patch}"),
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
        messages().clear();
        let mut dim: [u64; 4] = [columns as u64, rows as u64, u64::from(type_code(element)), 0];
        // SAFETY: container-only allocation; `dim` outlives the call.
        let data = unsafe {
            sys::GMT_Create_Data(
                api.as_ptr(),
                family_code(family),
                geometry_code(geometry),
                sys::GMT_CONTAINER_ONLY as c_uint,
                dim.as_mut_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
                0,
                0,
                ptr::null_mut(),
            )
        };
        DataPtr::new(data)
    }

    unsafe fn put_vector(
        &self,
        api: ApiPtr,
        data: DataPtr,
        column: usize,
        array: &ArrayDescriptor,
    ) -> c_int {
        if !array.is_contiguous() {
            return STATUS_LOCAL;
        }
        messages().clear();
        // SAFETY: the caller keeps the buffer alive until the container dies.
        unsafe {
            sys::GMT_Put_Vector(
                api.as_ptr(),
                data.as_ptr() as *mut sys::GMT_VECTOR,
                column as c_uint,
                type_code(array.element()),
                array.as_ptr() as *mut c_void,
            )
        }
    }

    unsafe fn put_matrix(&self, api: ApiPtr, data: DataPtr, array: &ArrayDescriptor) -> c_int {
        if !array.is_contiguous() {
            return STATUS_LOCAL;
        }
        messages().clear();
        // SAFETY: as in `put_vector`.
        unsafe {
            sys::GMT_Put_Matrix(
                api.as_ptr(),
                data.as_ptr() as *mut sys::GMT_MATRIX,
                type_code(array.element()),
                0,
                array.as_ptr() as *mut c_void,
            )
        }
    }

    unsafe fn open_virtual_file(
        &self,
        api: ApiPtr,
        family: Family,
        geometry: Geometry,
        direction: Direction,
        data: Option<DataPtr>,
    ) -> Result<CString, c_int> {
        messages().clear();
        let family = match (family, geometry) {
            (Family::Matrix, Geometry::Surface) => {
                family_code(Family::Grid) | sys::GMT_VIA_MATRIX as c_uint
            }
            (family, _) => family_code(family),
        };
        let (direction, data) = match direction {
            Direction::In => (sys::GMT_IN | sys::GMT_IS_REFERENCE, data),
            Direction::Out => (sys::GMT_OUT | sys::GMT_IS_REFERENCE, None),
        };
        let mut name = [0 as c_char; consts::VF_LEN];
        // SAFETY: `name` holds VF_LEN bytes, the documented maximum.
        let status = unsafe {
            sys::GMT_Open_VirtualFile(
                api.as_ptr(),
                family,
                geometry_code(geometry),
                direction as c_uint,
                data.map_or(ptr::null_mut(), DataPtr::as_ptr),
                name.as_mut_ptr(),
            )
        };
        if status != NOERROR {
            return Err(status);
        }
        // SAFETY: GMT wrote a NUL-terminated name into the buffer.
        Ok(unsafe { CStr::from_ptr(name.as_ptr()) }.to_owned())
    }

    unsafe fn close_virtual_file(&self, api: ApiPtr, name: &CStr) -> c_int {
        messages().clear();
        unsafe { sys::GMT_Close_VirtualFile(api.as_ptr(), name.as_ptr()) }
    }

    unsafe fn read_virtual_file(&self, api: ApiPtr, name: &CStr) -> Option<DataPtr> {
        messages().clear();
        DataPtr::new(unsafe { sys::GMT_Read_VirtualFile(api.as_ptr(), name.as_ptr()) })
    }

    unsafe fn read_data(
        &self,
        api: ApiPtr,
        family: Family,
        resource: &CStr,
    ) -> Result<DataPtr, ReadFailure> {
        messages().clear();
        let text = resource.to_string_lossy();
        // `@` names are remote datasets GMT downloads itself
        if !text.starts_with('@') && !Path::new(text.as_ref()).exists() {
            messages().push(format!("read_data [ERROR]: cannot find file {text}"));
            return Err(ReadFailure::NotFound);
        }
        let (geometry, mode) = match family {
            Family::Grid => (Geometry::Surface, sys::GMT_CONTAINER_AND_DATA as c_uint),
            _ => (Geometry::Point, sys::GMT_READ_NORMAL as c_uint),
        };
        // SAFETY: `resource` is NUL-terminated and not retained.
        let data = unsafe {
            sys::GMT_Read_Data(
                api.as_ptr(),
                family_code(family),
                sys::GMT_IS_FILE as c_uint,
                geometry_code(geometry),
                mode,
                ptr::null_mut(),
                resource.as_ptr(),
                ptr::null_mut(),
            )
        };
        DataPtr::new(data).ok_or(ReadFailure::Malformed)
    }

    unsafe fn describe_data(
        &self,
        _api: ApiPtr,
        family: Family,
        data: DataPtr,
    ) -> Result<NativeLayout, c_int> {
        // SAFETY: `data` is a live object of `family`.
        unsafe {
            match family {
                Family::Grid => describe_grid(data.as_ptr() as *const sys::GMT_GRID),
                Family::Dataset => describe_dataset(data.as_ptr() as *const sys::GMT_DATASET),
                Family::Matrix => describe_matrix(data.as_ptr() as *const sys::GMT_MATRIX),
                Family::Vector => describe_vector(data.as_ptr() as *const sys::GMT_VECTOR),
            }
        }
        .ok_or(STATUS_LOCAL)
    }

    unsafe fn destroy_data(&self, api: ApiPtr, data: DataPtr) -> c_int {
        let mut object = data.as_ptr();
        // SAFETY: GMT takes the address of the pointer and nulls it.
        unsafe { sys::GMT_Destroy_Data(api.as_ptr(), &mut object as *mut *mut c_void as *mut c_void) }
    }

    unsafe fn end_figure(&self, _api: ApiPtr, name: &CStr) -> Result<Vec<u8>, c_int> {
        messages().clear();
        let fail = |message: String| {
            messages().push(format!("end [ERROR]: {message}"));
            Err(STATUS_LOCAL)
        };
        let Some(home) = dirs::home_dir() else {
            return fail("cannot locate the home directory".into());
        };
        let root = home.join(".gmt").join("sessions");
        let Some(page) = newest_page(&root) else {
            return fail(format!(
                "no page for figure {} under {}",
                name.to_string_lossy(),
                root.display()
            ));
        };
        debug!("gmt: figure {} from {}", name.to_string_lossy(), page.display());
        fs::read(&page).or_else(|e| fail(format!("cannot read {}: {e}", page.display())))
    }
}

unsafe fn plane(
    element: ElementType,
    rows: usize,
    columns: usize,
    strides: [isize; 2],
    ptr: *const c_void,
) -> ArrayDescriptor {
    // SAFETY: forwarded from the caller.
    unsafe { ArrayDescriptor::from_raw_parts(element, vec![rows, columns], strides.to_vec(), ptr) }
}

unsafe fn column(element: ElementType, rows: usize, ptr: *const c_void) -> ArrayDescriptor {
    // SAFETY: forwarded from the caller.
    unsafe { ArrayDescriptor::from_raw_parts(element, vec![rows], vec![1], ptr) }
}

fn table_layout(rows: usize, columns: usize, buffer: NativeBuffer) -> NativeLayout {
    NativeLayout {
        rows,
        columns,
        region: None,
        increment: None,
        registration: Registration::Gridline,
        pad: [0; 4],
        buffer,
    }
}

fn registration_of(code: u32) -> Option<Registration> {
    match code {
        consts::GRID_NODE_REG => Some(Registration::Gridline),
        consts::GRID_PIXEL_REG => Some(Registration::Pixel),
        _ => None,
    }
}

unsafe fn describe_grid(grid: *const sys::GMT_GRID) -> Option<NativeLayout> {
    let grid = unsafe { grid.as_ref() }?;
    let header = unsafe { grid.header.as_ref() }?;
    if grid.data.is_null() {
        return None;
    }
    let (nx, ny) = (header.n_columns as usize, header.n_rows as usize);
    let pad = header.pad.map(|p| p as usize);
    let mx = header.mx as usize;
    let offset = pad[3] * mx + pad[0];
    let registration = registration_of(header.registration as u32)?;
    let [west, east, south, north] = header.wesn;
    // gmt_grdfloat is single precision in default builds
    let buffer = NativeBuffer::Plane(unsafe {
        plane(
            ElementType::F32,
            ny,
            nx,
            [mx as isize, 1],
            grid.data.add(offset) as *const c_void,
        )
    });
    Some(NativeLayout {
        rows: ny,
        columns: nx,
        region: Some(Region::new(west, east, south, north)),
        increment: Some(header.inc),
        registration,
        pad,
        buffer,
    })
}

unsafe fn describe_dataset(dataset: *const sys::GMT_DATASET) -> Option<NativeLayout> {
    let dataset = unsafe { dataset.as_ref() }?;
    let columns = dataset.n_columns as usize;
    let mut segments = Vec::new();
    for t in 0..dataset.n_tables as usize {
        let table = unsafe { (*dataset.table.add(t)).as_ref() }?;
        for s in 0..table.n_segments as usize {
            let segment = unsafe { (*table.segment.add(s)).as_ref() }?;
            let rows = segment.n_rows as usize;
            let descs = (0..columns)
                .map(|c| unsafe {
                    column(ElementType::F64, rows, *segment.data.add(c) as *const c_void)
                })
                .collect();
            segments.push(descs);
        }
    }
    Some(table_layout(
        dataset.n_records as usize,
        columns,
        NativeBuffer::Columns(segments),
    ))
}

unsafe fn describe_matrix(matrix: *const sys::GMT_MATRIX) -> Option<NativeLayout> {
    let matrix = unsafe { matrix.as_ref() }?;
    let element = element_of(matrix.type_ as c_uint)?;
    let (rows, columns) = (matrix.n_rows as usize, matrix.n_columns as usize);
    let dim = matrix.dim as isize;
    let strides = if matrix.shape as c_uint == sys::GMT_IS_COL_FORMAT as c_uint {
        [1, dim]
    } else {
        [dim, 1]
    };
    let ptr = unsafe { matrix.data.f8 } as *const c_void;
    let buffer = NativeBuffer::Plane(unsafe { plane(element, rows, columns, strides, ptr) });
    Some(table_layout(rows, columns, buffer))
}

unsafe fn describe_vector(vector: *const sys::GMT_VECTOR) -> Option<NativeLayout> {
    let vector = unsafe { vector.as_ref() }?;
    let (rows, columns) = (vector.n_rows as usize, vector.n_columns as usize);
    let descs = (0..columns)
        .map(|c| unsafe {
            let element = element_of(*vector.type_.add(c) as c_uint)?;
            let ptr = (*vector.data.add(c)).f8 as *const c_void;
            Some(column(element, rows, ptr))
        })
        .collect::<Option<Vec<_>>>()?;
    Some(table_layout(rows, columns, NativeBuffer::Columns(vec![descs])))
}
