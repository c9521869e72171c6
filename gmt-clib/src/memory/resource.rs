//! Resource loading for the memory engine.
//!
//! Names are looked up in the library's registry first, then opened as files
//! and memory-mapped. Grids use the ESRI ASCII raster layout; tables are
//! whitespace- or comma-separated columns with `>` segment headers and `#`
//! comments.

use std::fs::File;
use std::ops::Deref;
use std::sync::Arc;

use memmap2::Mmap;

use super::objects::{Grid, Table};
use crate::library::{ReadFailure, Region, Registration};

/// Bytes of a resource, wherever they live.
pub(crate) enum Source {
    Registered(Arc<[u8]>),
    Mapped(Mmap),
    Empty,
}

impl Deref for Source {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Source::Registered(bytes) => &bytes[..],
            Source::Mapped(map) => &map[..],
            Source::Empty => &[],
        }
    }
}

/// Open `path` for reading.
pub(crate) fn map_file(path: &str) -> Result<Source, (ReadFailure, String)> {
    let file = File::open(path)
        .map_err(|e| (ReadFailure::NotFound, format!("cannot open {path}: {e}")))?;
    let len = file
        .metadata()
        .map_err(|e| (ReadFailure::NotFound, format!("cannot stat {path}: {e}")))?
        .len();
    if len == 0 {
        return Ok(Source::Empty);
    }
    // SAFETY: read-only map, parsed and dropped within one read call.
    let map = unsafe { Mmap::map(&file) }
        .map_err(|e| (ReadFailure::NotFound, format!("cannot map {path}: {e}")))?;
    Ok(Source::Mapped(map))
}

fn text(bytes: &[u8]) -> Result<&str, String> {
    std::str::from_utf8(bytes).map_err(|e| format!("not UTF-8 text: {e}"))
}

/// Largest accepted `ncols`/`nrows`.
const MAX_NODES: f64 = u32::MAX as f64;

fn node_count(key: &str, number: f64) -> Result<usize, String> {
    if number.fract() != 0.0 || !(1.0..=MAX_NODES).contains(&number) {
        return Err(format!("`{key}` must be a positive whole number, got {number}"));
    }
    Ok(number as usize)
}

/// Parse an ESRI ASCII grid.
pub(crate) fn parse_grid(bytes: &[u8], pad: usize) -> Result<Grid, String> {
    let text = text(bytes)?;
    let mut tokens = text.split_whitespace().peekable();

    let mut ncols = None;
    let mut nrows = None;
    let mut xll = None;
    let mut yll = None;
    let mut registration = Registration::Gridline;
    let mut dx = None;
    let mut dy = None;
    let mut nodata = None;

    while let Some(&key) = tokens.peek() {
        if key.parse::<f64>().is_ok() {
            break;
        }
        tokens.next();
        let value = tokens
            .next()
            .ok_or_else(|| format!("header key `{key}` has no value"))?;
        let number: f64 = value
            .parse()
            .map_err(|_| format!("header value `{value}` for `{key}` is not a number"))?;
        match key.to_ascii_lowercase().as_str() {
            "ncols" => ncols = Some(node_count(key, number)?),
            "nrows" => nrows = Some(node_count(key, number)?),
            "xllcenter" => xll = Some(number),
            "yllcenter" => yll = Some(number),
            "xllcorner" => {
                xll = Some(number);
                registration = Registration::Pixel;
            }
            "yllcorner" => {
                yll = Some(number);
                registration = Registration::Pixel;
            }
            "cellsize" => {
                dx = Some(number);
                dy = Some(number);
            }
            "dx" => dx = Some(number),
            "dy" => dy = Some(number),
            "nodata_value" => nodata = Some(number),
            other => return Err(format!("unknown header key `{other}`")),
        }
    }

    let missing = |name: &str| format!("header is missing `{name}`");
    let nx = ncols.ok_or_else(|| missing("ncols"))?;
    let ny = nrows.ok_or_else(|| missing("nrows"))?;
    let west = xll.ok_or_else(|| missing("xllcenter"))?;
    let south = yll.ok_or_else(|| missing("yllcenter"))?;
    let dx = dx.ok_or_else(|| missing("cellsize"))?;
    let dy = dy.ok_or_else(|| missing("cellsize"))?;
    if !(dx > 0.0 && dy > 0.0) {
        return Err("cell size must be positive".into());
    }

    let values = tokens
        .map(|t| {
            let v: f64 = t.parse().map_err(|_| format!("bad grid value `{t}`"))?;
            Ok(if nodata == Some(v) { f32::NAN } else { v as f32 })
        })
        .collect::<Result<Vec<f32>, String>>()?;

    let (width, height) = match registration {
        Registration::Gridline => ((nx.max(1) - 1) as f64 * dx, (ny.max(1) - 1) as f64 * dy),
        Registration::Pixel => (nx as f64 * dx, ny as f64 * dy),
    };
    let region = Region::new(west, west + width, south, south + height);
    Grid::from_values(region, [dx, dy], registration, (ny, nx), pad, &values)
}

/// Parse a text table.
pub(crate) fn parse_table(bytes: &[u8]) -> Result<Table, String> {
    let text = text(bytes)?;
    let mut table = Table::default();
    let mut current: Vec<Vec<f64>> = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('>') {
            if current.first().is_some_and(|c| !c.is_empty()) {
                table.segments.push(std::mem::take(&mut current));
            }
            continue;
        }
        let fields = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|f| !f.is_empty())
            .map(|f| {
                f.parse::<f64>()
                    .map_err(|_| format!("line {}: `{f}` is not a number", lineno + 1))
            })
            .collect::<Result<Vec<f64>, String>>()?;
        if table.columns == 0 {
            table.columns = fields.len();
        }
        if fields.len() != table.columns {
            return Err(format!(
                "line {}: expected {} columns, found {}",
                lineno + 1,
                table.columns,
                fields.len()
            ));
        }
        if current.is_empty() {
            current = vec![Vec::new(); table.columns];
        }
        for (column, value) in current.iter_mut().zip(fields) {
            column.push(value);
        }
    }
    if current.first().is_some_and(|c| !c.is_empty()) {
        table.segments.push(current);
    }
    if table.rows() == 0 {
        return Err("no data records".into());
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_registered_grid() {
        let mut text = String::from("ncols 3\nnrows 2\nxllcenter 0\nyllcenter 0\ncellsize 5\nNODATA_value -9999\n");
        text.push_str("1 2 3\n4 -9999 6\n");
        let grid = parse_grid(text.as_bytes(), 0).unwrap();
        assert_eq!(grid.region, Region::new(0.0, 10.0, 0.0, 5.0));
        assert_eq!(grid.registration, Registration::Gridline);
        assert_eq!(grid.get(0, 2), 3.0);
        assert!(grid.get(1, 1).is_nan());
    }

    #[test]
    fn corner_registered_grid() {
        let text = "ncols 2\nnrows 2\nxllcorner 10\nyllcorner 20\ncellsize 1\n1 2\n3 4\n";
        let grid = parse_grid(text.as_bytes(), 2).unwrap();
        assert_eq!(grid.registration, Registration::Pixel);
        assert_eq!(grid.region, Region::new(10.0, 12.0, 20.0, 22.0));
        assert_eq!(grid.x(0), 10.5);
    }

    #[test]
    fn short_grid_is_malformed() {
        let text = "ncols 3\nnrows 3\nxllcenter 0\nyllcenter 0\ncellsize 1\n1 2 3\n";
        assert!(parse_grid(text.as_bytes(), 0).is_err());
    }

    #[test]
    fn table_with_segments_and_comments() {
        let text = "# x y\n1 2\n3,4\n> next\n5 6\n";
        let table = parse_table(text.as_bytes()).unwrap();
        assert_eq!(table.columns, 2);
        assert_eq!(table.segments.len(), 2);
        assert_eq!(table.segments[1][1], vec![6.0]);
    }

    #[test]
    fn ragged_table_is_rejected() {
        assert!(parse_table(b"1 2\n3\n").is_err());
        assert!(parse_table(b"# nothing\n").is_err());
    }
}
