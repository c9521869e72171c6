//! Data objects held by the memory engine.

use std::ffi::c_void;

use crate::bridge::{self, ArrayDescriptor, ElementType};
use crate::library::{Family, Geometry, NativeBuffer, NativeLayout, Region, Registration};

/// A regular float grid stored north row first inside a padded plane.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Grid {
    pub region: Region,
    pub increment: [f64; 2],
    pub registration: Registration,
    pub nx: usize,
    pub ny: usize,
    pub pad: usize,
    data: Vec<f32>,
}

impl Grid {
    /// Build from `ny × nx` values, north row first.
    pub fn from_values(
        region: Region,
        increment: [f64; 2],
        registration: Registration,
        (ny, nx): (usize, usize),
        pad: usize,
        values: &[f32],
    ) -> Result<Self, String> {
        if nx == 0 || ny == 0 {
            return Err("grid has no nodes".into());
        }
        let too_large = || format!("grid of {nx} x {ny} nodes is too large");
        let nodes = nx.checked_mul(ny).ok_or_else(too_large)?;
        if values.len() != nodes {
            return Err(format!(
                "expected {nodes} grid values, found {}",
                values.len()
            ));
        }
        let padded = |n: usize| pad.checked_mul(2).and_then(|p| n.checked_add(p));
        let (mx, my) = padded(nx).zip(padded(ny)).ok_or_else(too_large)?;
        let plane = mx.checked_mul(my).ok_or_else(too_large)?;
        let mut data = vec![f32::NAN; plane];
        for (row, chunk) in values.chunks(nx).enumerate() {
            let start = (row + pad) * mx + pad;
            data[start..start + nx].copy_from_slice(chunk);
        }
        Ok(Self {
            region,
            increment,
            registration,
            nx,
            ny,
            pad,
            data,
        })
    }

    fn mx(&self) -> usize {
        self.nx + 2 * self.pad
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[(row + self.pad) * self.mx() + col + self.pad]
    }

    /// Interior values, north row first.
    pub fn values(&self) -> Vec<f32> {
        (0..self.ny)
            .flat_map(|row| (0..self.nx).map(move |col| (row, col)))
            .map(|(row, col)| self.get(row, col))
            .collect()
    }

    fn half_cell(&self) -> f64 {
        match self.registration {
            Registration::Gridline => 0.0,
            Registration::Pixel => 0.5,
        }
    }

    pub fn x(&self, col: usize) -> f64 {
        self.region.west + (col as f64 + self.half_cell()) * self.increment[0]
    }

    pub fn y(&self, row: usize) -> f64 {
        self.region.north - (row as f64 + self.half_cell()) * self.increment[1]
    }

    /// Smallest and largest finite value.
    pub fn range(&self) -> Option<(f32, f32)> {
        self.values()
            .into_iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Nodes falling inside `region`, as a new grid.
    pub fn cut(&self, region: Region, pad: usize) -> Result<Self, String> {
        let eps = 1e-9 * self.increment[0].abs().max(self.increment[1].abs());
        let cols: Vec<usize> = (0..self.nx)
            .filter(|&c| self.x(c) >= region.west - eps && self.x(c) <= region.east + eps)
            .collect();
        let rows: Vec<usize> = (0..self.ny)
            .filter(|&r| self.y(r) >= region.south - eps && self.y(r) <= region.north + eps)
            .collect();
        let (Some(&c0), Some(&c1), Some(&r0), Some(&r1)) =
            (cols.first(), cols.last(), rows.first(), rows.last())
        else {
            return Err(format!("region {region} does not overlap the grid"));
        };
        let half = [
            self.half_cell() * self.increment[0],
            self.half_cell() * self.increment[1],
        ];
        let cut_region = Region::new(
            self.x(c0) - half[0],
            self.x(c1) + half[0],
            self.y(r1) - half[1],
            self.y(r0) + half[1],
        );
        let values: Vec<f32> = rows
            .iter()
            .flat_map(|&r| cols.iter().map(move |&c| (r, c)))
            .map(|(r, c)| self.get(r, c))
            .collect();
        Grid::from_values(
            cut_region,
            self.increment,
            self.registration,
            (rows.len(), cols.len()),
            pad,
            &values,
        )
    }

    pub fn with_pad(&self, pad: usize) -> Self {
        if pad == self.pad {
            return self.clone();
        }
        let mut data = vec![f32::NAN; (self.nx + 2 * pad) * (self.ny + 2 * pad)];
        let mx = self.nx + 2 * pad;
        for row in 0..self.ny {
            for col in 0..self.nx {
                data[(row + pad) * mx + col + pad] = self.get(row, col);
            }
        }
        Self {
            pad,
            data,
            ..self.clone()
        }
    }

    fn descriptor(&self) -> ArrayDescriptor {
        let mx = self.mx();
        let offset = self.pad * mx + self.pad;
        // SAFETY: the interior lies within `data`, which lives as long as the
        // object and is never reallocated.
        unsafe {
            ArrayDescriptor::from_raw_parts(
                ElementType::F32,
                vec![self.ny, self.nx],
                vec![mx as isize, 1],
                self.data.as_ptr().add(offset) as *const c_void,
            )
        }
    }

    /// Node table `x y z`, north row first.
    fn to_table(&self) -> Table {
        let mut columns = vec![Vec::new(), Vec::new(), Vec::new()];
        for row in 0..self.ny {
            for col in 0..self.nx {
                columns[0].push(self.x(col));
                columns[1].push(self.y(row));
                columns[2].push(f64::from(self.get(row, col)));
            }
        }
        Table::single(columns)
    }
}

/// Columns of doubles split into segments (`segment → column → value`).
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Table {
    pub columns: usize,
    pub segments: Vec<Vec<Vec<f64>>>,
}

impl Table {
    pub fn single(columns: Vec<Vec<f64>>) -> Self {
        Self {
            columns: columns.len(),
            segments: vec![columns],
        }
    }

    pub fn rows(&self) -> usize {
        self.segments
            .iter()
            .map(|s| s.first().map_or(0, Vec::len))
            .sum()
    }

    /// Records of one segment.
    pub fn records(segment: &[Vec<f64>]) -> impl Iterator<Item = Vec<f64>> + '_ {
        let rows = segment.first().map_or(0, Vec::len);
        (0..rows).map(move |i| segment.iter().map(|c| c[i]).collect())
    }

    /// A table of the given columns, in the given order.
    pub fn pick(&self, columns: &[usize]) -> Result<Self, String> {
        if let Some(&bad) = columns.iter().find(|&&c| c >= self.columns) {
            return Err(format!(
                "column {bad} requested but the table has {}",
                self.columns
            ));
        }
        let segments = self
            .segments
            .iter()
            .map(|segment| columns.iter().map(|&c| segment[c].clone()).collect())
            .collect();
        Ok(Self {
            columns: columns.len(),
            segments,
        })
    }

    /// Keep records for which `keep` holds, dropping emptied segments.
    pub fn retain(&self, mut keep: impl FnMut(&[f64]) -> bool) -> Self {
        let mut segments = Vec::new();
        for segment in &self.segments {
            let mut out = vec![Vec::new(); self.columns];
            for record in Table::records(segment) {
                if keep(&record) {
                    for (column, value) in out.iter_mut().zip(record) {
                        column.push(value);
                    }
                }
            }
            if out.first().is_some_and(|c| !c.is_empty()) {
                segments.push(out);
            }
        }
        Self {
            columns: self.columns,
            segments,
        }
    }

    fn descriptors(&self) -> Vec<Vec<ArrayDescriptor>> {
        self.segments
            .iter()
            .map(|segment| {
                segment
                    .iter()
                    .map(|column| {
                        // SAFETY: the column vector is owned by this table and
                        // not modified while described.
                        unsafe {
                            ArrayDescriptor::from_raw_parts(
                                ElementType::F64,
                                vec![column.len()],
                                vec![1],
                                column.as_ptr() as *const c_void,
                            )
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

/// Everything a data pointer of the memory engine can refer to.
#[derive(Debug)]
pub(crate) enum Object {
    /// Columns attached by reference with `put_vector`.
    Vector {
        geometry: Geometry,
        rows: usize,
        element: ElementType,
        columns: Vec<Option<ArrayDescriptor>>,
    },
    /// A 2-D buffer attached by reference with `put_matrix`.
    Matrix {
        geometry: Geometry,
        rows: usize,
        columns: usize,
        element: ElementType,
        array: Option<ArrayDescriptor>,
    },
    Grid(Grid),
    Dataset(Table),
}

impl Object {
    pub fn family(&self) -> Family {
        match self {
            Object::Vector { .. } => Family::Vector,
            Object::Matrix { .. } => Family::Matrix,
            Object::Grid(_) => Family::Grid,
            Object::Dataset(_) => Family::Dataset,
        }
    }

    pub fn layout(&self) -> Result<NativeLayout, String> {
        let table_layout = |rows, columns, buffer| NativeLayout {
            rows,
            columns,
            region: None,
            increment: None,
            registration: Registration::Gridline,
            pad: [0; 4],
            buffer,
        };
        match self {
            Object::Vector { rows, columns, .. } => {
                let descs = columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| c.clone().ok_or_else(|| format!("vector column {i} was never set")))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(table_layout(*rows, columns.len(), NativeBuffer::Columns(vec![descs])))
            }
            Object::Matrix {
                rows,
                columns,
                array,
                ..
            } => {
                let desc = array.clone().ok_or("matrix buffer was never set")?;
                Ok(table_layout(*rows, *columns, NativeBuffer::Plane(desc)))
            }
            Object::Dataset(table) => Ok(table_layout(
                table.rows(),
                table.columns,
                NativeBuffer::Columns(table.descriptors()),
            )),
            Object::Grid(grid) => Ok(NativeLayout {
                rows: grid.ny,
                columns: grid.nx,
                region: Some(grid.region),
                increment: Some(grid.increment),
                registration: grid.registration,
                pad: [grid.pad; 4],
                buffer: NativeBuffer::Plane(grid.descriptor()),
            }),
        }
    }

    /// Read the object as a table of doubles.
    ///
    /// # Safety
    ///
    /// Buffers attached by reference must still be alive.
    pub unsafe fn to_table(&self) -> Result<Table, String> {
        match self {
            Object::Dataset(table) => Ok(table.clone()),
            Object::Grid(grid) => Ok(grid.to_table()),
            Object::Vector { .. } | Object::Matrix { .. } => {
                let layout = self.layout()?;
                let columns = match layout.buffer {
                    NativeBuffer::Columns(mut segments) => segments
                        .pop()
                        .unwrap_or_default()
                        .iter()
                        .map(|desc| {
                            // SAFETY: forwarded from the caller.
                            let values = unsafe { bridge::materialize::<f64>(desc) }
                                .map_err(|e| e.to_string())?;
                            Ok(values.iter().copied().collect())
                        })
                        .collect::<Result<Vec<Vec<f64>>, String>>()?,
                    NativeBuffer::Plane(desc) => {
                        // SAFETY: forwarded from the caller.
                        let values =
                            unsafe { bridge::materialize::<f64>(&desc) }.map_err(|e| e.to_string())?;
                        (0..layout.columns)
                            .map(|j| (0..layout.rows).map(|i| values[[i, j]]).collect())
                            .collect()
                    }
                };
                Ok(Table::single(columns))
            }
        }
    }

    /// Read the object as a grid; matrices take `region` or their index
    /// extent.
    ///
    /// # Safety
    ///
    /// As for [`to_table`](Self::to_table).
    pub unsafe fn to_grid(&self, region: Option<Region>, pad: usize) -> Result<Grid, String> {
        match self {
            Object::Grid(grid) => Ok(grid.with_pad(pad)),
            Object::Matrix {
                geometry: Geometry::Surface,
                rows,
                columns,
                array,
                ..
            } => {
                let desc = array.as_ref().ok_or("matrix buffer was never set")?;
                // SAFETY: forwarded from the caller.
                let values =
                    unsafe { bridge::materialize::<f32>(desc) }.map_err(|e| e.to_string())?;
                let region = region.unwrap_or(Region::new(
                    0.0,
                    columns.saturating_sub(1) as f64,
                    0.0,
                    rows.saturating_sub(1) as f64,
                ));
                let increment = [
                    region.width() / (columns.saturating_sub(1).max(1)) as f64,
                    region.height() / (rows.saturating_sub(1).max(1)) as f64,
                ];
                let flat: Vec<f32> = values.iter().copied().collect();
                Grid::from_values(
                    region,
                    increment,
                    Registration::Gridline,
                    (*rows, *columns),
                    pad,
                    &flat,
                )
            }
            other => Err(format!("{} data cannot be read as a grid", other.family())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(nx: usize, ny: usize) -> Grid {
        let values: Vec<f32> = (0..nx * ny).map(|v| v as f32).collect();
        Grid::from_values(
            Region::new(0.0, (nx - 1) as f64, 0.0, (ny - 1) as f64),
            [1.0, 1.0],
            Registration::Gridline,
            (ny, nx),
            2,
            &values,
        )
        .unwrap()
    }

    #[test]
    fn grid_descriptor_skips_padding() {
        let grid = ramp(4, 3);
        let layout = Object::Grid(grid.clone()).layout().unwrap();
        let NativeBuffer::Plane(desc) = layout.buffer else {
            panic!("grid must be a plane")
        };
        assert_eq!(desc.extents(), &[3, 4]);
        assert_eq!(desc.strides(), &[8, 1]);
        let copy = unsafe { bridge::materialize::<f32>(&desc) }.unwrap();
        assert_eq!(copy.iter().copied().collect::<Vec<_>>(), grid.values());
    }

    #[test]
    fn cut_keeps_nodes_inside() {
        let grid = ramp(11, 11);
        let cut = grid.cut(Region::new(2.0, 5.0, 3.0, 4.0), 0).unwrap();
        assert_eq!((cut.ny, cut.nx), (2, 4));
        assert_eq!(cut.region, Region::new(2.0, 5.0, 3.0, 4.0));
        // north row of the cut is y = 4, i.e. row 6 of the source
        assert_eq!(cut.get(0, 0), grid.get(6, 2));
    }

    #[test]
    fn pick_reorders_and_checks_bounds() {
        let table = Table::single(vec![vec![1.0], vec![2.0], vec![3.0]]);
        let picked = table.pick(&[2, 0]).unwrap();
        assert_eq!(picked.columns, 2);
        assert_eq!(picked.segments[0], vec![vec![3.0], vec![1.0]]);
        assert!(table.pick(&[3]).is_err());
    }

    #[test]
    fn retain_drops_empty_segments() {
        let table = Table {
            columns: 2,
            segments: vec![
                vec![vec![0.0, 1.0], vec![0.0, 1.0]],
                vec![vec![9.0], vec![9.0]],
            ],
        };
        let kept = table.retain(|r| r[0] < 5.0);
        assert_eq!(kept.segments.len(), 1);
        assert_eq!(kept.rows(), 2);
    }
}
