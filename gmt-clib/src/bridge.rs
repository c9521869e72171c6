//! Conversion between `ndarray` arrays and native buffer descriptors.
//!
//! [`describe`] turns a host array into a [`BridgedArray`]: a contiguous
//! (possibly copied) array plus the pointer/extent/stride triple the native
//! buffer APIs expect. The descriptor borrows from the bridged array, so the
//! pointer stays valid for as long as the `BridgedArray` is alive.
//!
//! The reverse direction has two flavours. [`materialize`] copies a native
//! buffer into a fresh host array; [`view`] aliases it without copying and is
//! only exposed safely through [`DataHandle`](crate::DataHandle), whose
//! borrow keeps the native object alive.

use std::ffi::c_void;
use std::fmt;

use log::warn;
use ndarray::{ArrayBase, ArrayD, ArrayViewD, CowArray, Data, Dimension, IxDyn, ShapeBuilder};

use crate::error::{Error, Result};

/// Highest array rank the native buffer APIs accept.
pub const MAX_RANK: usize = 2;

/// Element types shared by the host and the native library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F64,
    F32,
    I32,
}

impl ElementType {
    pub fn size(self) -> usize {
        match self {
            ElementType::F64 => 8,
            ElementType::F32 | ElementType::I32 => 4,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ElementType::F64 => "double",
            ElementType::F32 => "float",
            ElementType::I32 => "int32",
        })
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for f64 {}
    impl Sealed for f32 {}
    impl Sealed for i32 {}
}

/// A host element type with a native counterpart.
pub trait Element: Copy + fmt::Debug + sealed::Sealed + 'static {
    const TYPE: ElementType;

    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;
}

impl Element for f64 {
    const TYPE: ElementType = ElementType::F64;

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }
}

impl Element for f32 {
    const TYPE: ElementType = ElementType::F32;

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Element for i32 {
    const TYPE: ElementType = ElementType::I32;

    fn from_f64(value: f64) -> Self {
        value as i32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

/// Element type, extents, strides and base pointer of a buffer.
///
/// Strides are counted in elements, not bytes, and follow `ndarray`'s sign
/// convention.
#[derive(Debug, Clone)]
pub struct ArrayDescriptor {
    element: ElementType,
    extents: Vec<usize>,
    strides: Vec<isize>,
    ptr: *const c_void,
    copied: bool,
}

impl ArrayDescriptor {
    /// Describe a buffer owned elsewhere.
    ///
    /// # Safety
    ///
    /// `ptr` must point to memory holding `element` values laid out as
    /// `extents`/`strides` describe, and stay valid while the descriptor
    /// (or any clone of it) is read from.
    pub unsafe fn from_raw_parts(
        element: ElementType,
        extents: Vec<usize>,
        strides: Vec<isize>,
        ptr: *const c_void,
    ) -> Self {
        Self {
            element,
            extents,
            strides,
            ptr,
            copied: false,
        }
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.extents.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`describe`] had to copy the host array.
    pub fn is_copy(&self) -> bool {
        self.copied
    }

    /// C-order contiguous (row-major, no gaps).
    pub fn is_contiguous(&self) -> bool {
        let mut expected = 1isize;
        for (&extent, &stride) in self.extents.iter().zip(&self.strides).rev() {
            if extent > 1 && stride != expected {
                return false;
            }
            expected *= extent as isize;
        }
        true
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.ptr
    }
}

/// A host array prepared for a native call.
///
/// Holds either a borrow of the caller's array or, when its layout was not
/// usable as-is, a contiguous copy.
pub struct BridgedArray<'a, T: Element> {
    array: CowArray<'a, T, IxDyn>,
    descriptor: ArrayDescriptor,
}

impl<'a, T: Element> BridgedArray<'a, T> {
    pub fn descriptor(&self) -> &ArrayDescriptor {
        &self.descriptor
    }

    pub fn array(&self) -> ArrayViewD<'_, T> {
        self.array.view()
    }
}

impl<T: Element> fmt::Debug for BridgedArray<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgedArray")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Validate a host array and capture its native descriptor.
pub fn describe<'a, T, S, D>(array: &'a ArrayBase<S, D>) -> Result<BridgedArray<'a, T>>
where
    T: Element,
    S: Data<Elem = T>,
    D: Dimension,
{
    let rank = array.ndim();
    if rank > MAX_RANK {
        return Err(Error::UnsupportedShape {
            rank,
            max: MAX_RANK,
        });
    }
    if rank == 0 {
        return Err(Error::Shape("scalars cannot be passed as arrays".into()));
    }
    if array.is_empty() {
        return Err(Error::Shape(format!(
            "zero-length array of shape {:?}",
            array.shape()
        )));
    }

    let view = array.view().into_dyn();
    let (cow, copied) = if view.is_standard_layout() {
        (CowArray::from(view), false)
    } else {
        warn!(
            "copying non-contiguous {} array of shape {:?} ({} bytes)",
            T::TYPE,
            view.shape(),
            view.len() * T::TYPE.size()
        );
        (CowArray::from(view.as_standard_layout().into_owned()), true)
    };

    let descriptor = ArrayDescriptor {
        element: T::TYPE,
        extents: cow.shape().to_vec(),
        strides: cow.strides().to_vec(),
        ptr: cow.as_ptr() as *const c_void,
        copied,
    };
    Ok(BridgedArray {
        array: cow,
        descriptor,
    })
}

unsafe fn read_as<T: Element>(element: ElementType, base: *const c_void, offset: isize) -> T {
    // SAFETY: the caller guarantees `base + offset` is in bounds for `element`.
    unsafe {
        if element == T::TYPE {
            return *(base as *const T).offset(offset);
        }
        match element {
            ElementType::F64 => T::from_f64(*(base as *const f64).offset(offset)),
            ElementType::F32 => T::from_f64(f64::from(*(base as *const f32).offset(offset))),
            ElementType::I32 => T::from_f64(f64::from(*(base as *const i32).offset(offset))),
        }
    }
}

/// Copy a native buffer into a new host array of element type `T`.
///
/// Values of a different native element type are converted through `f64`.
///
/// # Safety
///
/// The descriptor must describe live, readable memory.
pub unsafe fn materialize<T: Element>(descriptor: &ArrayDescriptor) -> Result<ArrayD<T>> {
    let len = descriptor.len();
    let mut values = Vec::with_capacity(len);
    let mut index = vec![0usize; descriptor.rank()];
    for _ in 0..len {
        let offset: isize = index
            .iter()
            .zip(&descriptor.strides)
            .map(|(&i, &s)| i as isize * s)
            .sum();
        // SAFETY: `index` stays within `extents`, forwarded from the caller.
        values.push(unsafe { read_as::<T>(descriptor.element, descriptor.ptr, offset) });

        for axis in (0..index.len()).rev() {
            index[axis] += 1;
            if index[axis] < descriptor.extents[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    ArrayD::from_shape_vec(IxDyn(&descriptor.extents), values)
        .map_err(|e| Error::Shape(e.to_string()))
}

/// Alias a native buffer as a host view.
///
/// # Safety
///
/// The descriptor must describe live memory that is neither freed nor
/// written to for `'h`.
pub unsafe fn view<'h, T: Element>(descriptor: &ArrayDescriptor) -> Result<ArrayViewD<'h, T>> {
    if descriptor.element != T::TYPE {
        return Err(Error::ElementType {
            native: descriptor.element,
            requested: T::TYPE,
        });
    }
    if descriptor.strides.iter().any(|&s| s < 0) {
        return Err(Error::Shape("native buffer has negative strides".into()));
    }
    let strides: Vec<usize> = descriptor.strides.iter().map(|&s| s as usize).collect();
    let shape = IxDyn(&descriptor.extents).strides(IxDyn(&strides));
    // SAFETY: layout and lifetime are guaranteed by the caller.
    Ok(unsafe { ArrayViewD::from_shape_ptr(shape, descriptor.ptr as *const T) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, Array3, s};

    #[test]
    fn contiguous_arrays_are_borrowed() {
        let a = Array2::<f64>::from_shape_fn((3, 4), |(i, j)| (i * 4 + j) as f64);
        let bridged = describe(&a).unwrap();
        let desc = bridged.descriptor();
        assert!(!desc.is_copy());
        assert_eq!(desc.extents(), &[3, 4]);
        assert_eq!(desc.strides(), &[4, 1]);
        assert_eq!(desc.as_ptr(), a.as_ptr() as *const c_void);
        assert!(desc.is_contiguous());
    }

    #[test]
    fn strided_arrays_are_copied() {
        let a = Array1::<f32>::from_iter((0..10).map(|v| v as f32));
        let every_other = a.slice(s![..;2]);
        let bridged = describe(&every_other).unwrap();
        assert!(bridged.descriptor().is_copy());
        assert_eq!(bridged.descriptor().extents(), &[5]);
        let back = unsafe { materialize::<f32>(bridged.descriptor()) }.unwrap();
        assert_eq!(back.as_slice().unwrap(), &[0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn transposed_matrix_is_copied_in_logical_order() {
        let a = Array2::<i32>::from_shape_fn((2, 3), |(i, j)| (i * 3 + j) as i32);
        let t = a.t();
        let bridged = describe(&t).unwrap();
        assert!(bridged.descriptor().is_copy());
        let back = unsafe { materialize::<i32>(bridged.descriptor()) }.unwrap();
        assert_eq!(back, t.to_owned().into_dyn());
    }

    #[test]
    fn rank_three_is_unsupported() {
        let a = Array3::<f64>::zeros((2, 2, 2));
        match describe(&a) {
            Err(Error::UnsupportedShape { rank: 3, max: 2 }) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_arrays_are_rejected() {
        let a = Array1::<f64>::zeros(0);
        assert!(matches!(describe(&a), Err(Error::Shape(_))));
    }

    #[test]
    fn materialize_converts_between_element_types() {
        let a = Array1::from(vec![1.5f64, -2.0, 3.25]);
        let bridged = describe(&a).unwrap();
        let back = unsafe { materialize::<f32>(bridged.descriptor()) }.unwrap();
        assert_eq!(back.as_slice().unwrap(), &[1.5f32, -2.0, 3.25]);
    }

    #[test]
    fn view_requires_matching_element_type() {
        let a = Array1::from(vec![1.0f64, 2.0]);
        let bridged = describe(&a).unwrap();
        let err = unsafe { view::<f32>(bridged.descriptor()) }.unwrap_err();
        assert!(matches!(
            err,
            Error::ElementType {
                native: ElementType::F64,
                requested: ElementType::F32
            }
        ));
        let v = unsafe { view::<f64>(bridged.descriptor()) }.unwrap();
        assert_eq!(v, a.view().into_dyn());
    }
}
