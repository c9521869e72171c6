//! Per-session state of the memory engine and the modules it implements.

use std::collections::{BTreeMap, HashSet};
use std::ffi::{c_int, c_void};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use gmt_sys::consts::NOERROR;
use log::debug;

use super::Shared;
use super::canvas::{CM, Canvas, Frame};
use super::objects::{Grid, Object, Table};
use super::resource::{self, Source};
use crate::bridge::{ArrayDescriptor, ElementType};
use crate::library::{DataPtr, Direction, Family, Geometry, NativeLayout, ReadFailure, Region};

/// Unknown module.
pub(crate) const STATUS_MODULE: c_int = 1;
/// Bad or missing arguments.
pub(crate) const STATUS_ARGS: c_int = 2;
/// Call not valid in the current session state.
pub(crate) const STATUS_STATE: c_int = 3;
/// Input data could not be used.
pub(crate) const STATUS_DATA: c_int = 4;
/// Unknown or mismatched object / virtual file.
pub(crate) const STATUS_OBJECT: c_int = 5;

#[derive(Debug)]
struct Failure {
    status: c_int,
    message: String,
}

impl Failure {
    fn new(status: c_int, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn args(message: impl Into<String>) -> Self {
        Self::new(STATUS_ARGS, message)
    }

    fn state(message: impl Into<String>) -> Self {
        Self::new(STATUS_STATE, message)
    }

    fn data(message: impl Into<String>) -> Self {
        Self::new(STATUS_DATA, message)
    }

    fn object(message: impl Into<String>) -> Self {
        Self::new(STATUS_OBJECT, message)
    }
}

type ModuleResult = Result<(), Failure>;

#[derive(Debug)]
struct Slot {
    family: Family,
    direction: Direction,
    object: Option<DataPtr>,
}

/// Region and projection remembered between drawing calls.
#[derive(Debug, Default)]
struct History {
    region: Option<Region>,
    projection: Option<String>,
}

/// Parsed module arguments.
#[derive(Debug, Default)]
struct Args {
    inputs: Vec<String>,
    options: Vec<(char, String)>,
    output: Option<String>,
}

impl Args {
    fn parse(args: &str) -> Result<Self, Failure> {
        let mut parsed = Args::default();
        for token in tokenize(args)? {
            if let Some(target) = token.strip_prefix("->") {
                parsed.output = Some(target.to_string());
            } else if let Some(option) = token.strip_prefix('-') {
                let mut chars = option.chars();
                let Some(flag) = chars.next() else {
                    return Err(Failure::args("empty option `-`"));
                };
                parsed.options.push((flag, chars.as_str().to_string()));
            } else {
                parsed.inputs.push(token);
            }
        }
        Ok(parsed)
    }

    fn get(&self, flag: char) -> Option<&str> {
        self.options
            .iter()
            .rev()
            .find(|(f, _)| *f == flag)
            .map(|(_, v)| v.as_str())
    }

    fn has(&self, flag: char) -> bool {
        self.get(flag).is_some()
    }

    fn input(&self) -> Result<&str, Failure> {
        self.inputs
            .first()
            .map(String::as_str)
            .ok_or_else(|| Failure::args("no input data given"))
    }

    /// Options other than `skip`, rendered in call order.
    fn rest(&self, skip: &[char]) -> Vec<String> {
        self.options
            .iter()
            .filter(|(f, _)| !skip.contains(f))
            .map(|(f, v)| format!("-{f}{v}"))
            .collect()
    }
}

/// Split on whitespace outside double quotes; quotes are removed.
fn tokenize(args: &str) -> Result<Vec<String>, Failure> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;
    for c in args.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    tokens.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if quoted {
        return Err(Failure::args("unterminated double quote"));
    }
    if pending {
        tokens.push(current);
    }
    Ok(tokens)
}

/// A length in points; `c`, `i` and `p` units, centimetres by default.
fn length(text: &str) -> Result<f64, Failure> {
    let (number, scale) = match text.chars().last() {
        Some('c') => (&text[..text.len() - 1], CM),
        Some('i') => (&text[..text.len() - 1], 72.0),
        Some('p') => (&text[..text.len() - 1], 1.0),
        _ => (text, CM),
    };
    number
        .parse::<f64>()
        .map(|v| v * scale)
        .map_err(|_| Failure::args(format!("`{text}` is not a length")))
}

fn parse_region(text: &str) -> Result<Region, Failure> {
    match text {
        "g" => Ok(Region::new(0.0, 360.0, -90.0, 90.0)),
        "d" => Ok(Region::GLOBAL),
        other => other.parse().map_err(|e: crate::Error| Failure::args(e.to_string())),
    }
}

/// Plot size in points for a projection string such as `X10c`, `M15c` or
/// `x1c/2c`.
fn map_size(projection: &str, region: &Region) -> Result<(f64, f64), Failure> {
    let code_len = projection
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(projection.len());
    let (code, rest) = projection.split_at(code_len);
    let parts: Vec<&str> = rest.split('/').filter(|p| !p.is_empty()).collect();
    let bad = || Failure::args(format!("cannot size projection `-J{projection}`"));
    let upper = code.starts_with(|c: char| c.is_ascii_uppercase());
    let aspect = region.height() / region.width();

    let (width, height) = if code.eq_ignore_ascii_case("x") {
        let a = length(parts.first().ok_or_else(bad)?)?;
        let b = parts.get(1).map(|p| length(p)).transpose()?;
        if upper {
            (a, b.unwrap_or(a * aspect))
        } else {
            (a * region.width(), b.unwrap_or(a) * region.height())
        }
    } else {
        let a = length(parts.last().ok_or_else(bad)?)?;
        if upper {
            (a, a * aspect)
        } else {
            (a * region.width(), a * region.height())
        }
    };
    if !(width > 0.0 && height > 0.0) || code.is_empty() {
        return Err(bad());
    }
    Ok((width, height))
}

/// Zero-based column list such as `2,0` or `0-2,4` (`:` also marks a range).
fn column_list(spec: &str) -> Result<Vec<usize>, Failure> {
    let bad = || Failure::args(format!("bad column selection -o{spec}"));
    let index = |text: &str| text.trim().parse::<usize>().map_err(|_| bad());
    let mut columns = Vec::new();
    for item in spec.split(',') {
        match item.split_once(['-', ':']) {
            Some((first, last)) => {
                let (first, last) = (index(first)?, index(last)?);
                if first > last {
                    return Err(bad());
                }
                columns.extend(first..=last);
            }
            None => columns.push(index(item)?),
        }
    }
    Ok(columns)
}

fn shift(text: Option<&str>) -> Result<f64, Failure> {
    match text {
        None => Ok(0.0),
        Some(t) => length(t.trim_start_matches(['a', 'r'])),
    }
}

/// Text after a `+t` modifier.
fn title(option: Option<&str>) -> Option<&str> {
    option
        .and_then(|v| v.find("+t").map(|i| &v[i + 2..]))
        .filter(|t| !t.is_empty())
}

/// Input of a drawing module, loaded before the page is touched.
enum Content {
    None,
    Table(Table),
    Label(Table, String),
    Grid(Grid),
}

pub(crate) struct Engine {
    tag: String,
    pad: usize,
    shared: Arc<Shared>,
    messages: Vec<String>,
    objects: HashSet<DataPtr>,
    files: BTreeMap<String, Slot>,
    next_file: usize,
    defaults: BTreeMap<String, String>,
    history: History,
    figure: Option<Canvas>,
    finished: Option<(String, Vec<u8>)>,
}

impl Engine {
    pub fn new(tag: &str, pad: usize, shared: Arc<Shared>) -> Self {
        Self {
            tag: tag.to_string(),
            pad,
            shared,
            messages: Vec::new(),
            objects: HashSet::new(),
            files: BTreeMap::new(),
            next_file: 0,
            defaults: BTreeMap::new(),
            history: History::default(),
            figure: None,
            finished: None,
        }
    }

    pub fn error_text(&self) -> String {
        self.messages.join("\n")
    }

    fn fail(&mut self, context: &str, failure: Failure) -> c_int {
        let line = format!("{context} [ERROR]: {}", failure.message);
        debug!("{}: {line}", self.tag);
        self.messages.push(line);
        failure.status
    }

    // ---- objects -------------------------------------------------------

    fn insert(&mut self, object: Object) -> DataPtr {
        let ptr = NonNull::from(Box::leak(Box::new(object))).cast::<c_void>();
        let data = DataPtr::from_non_null(ptr);
        self.objects.insert(data);
        self.shared.counters.live_objects.fetch_add(1, Ordering::Relaxed);
        data
    }

    fn object(&self, data: DataPtr) -> Option<&Object> {
        // SAFETY: only pointers produced by `insert` and not yet destroyed
        // are in the set.
        self.objects
            .contains(&data)
            .then(|| unsafe { &*(data.as_ptr() as *const Object) })
    }

    fn object_mut(&mut self, data: DataPtr) -> Option<&mut Object> {
        // SAFETY: as in `object`; `&mut self` makes the borrow unique.
        self.objects
            .contains(&data)
            .then(|| unsafe { &mut *(data.as_ptr() as *mut Object) })
    }

    fn remove(&mut self, data: DataPtr) -> bool {
        if !self.objects.remove(&data) {
            return false;
        }
        // SAFETY: allocated by `insert`, removed from the set exactly once.
        drop(unsafe { Box::from_raw(data.as_ptr() as *mut Object) });
        self.shared.counters.live_objects.fetch_sub(1, Ordering::Relaxed);
        true
    }

    pub fn create_data(
        &mut self,
        family: Family,
        geometry: Geometry,
        rows: usize,
        columns: usize,
        element: ElementType,
    ) -> Option<DataPtr> {
        self.messages.clear();
        if rows == 0 || columns == 0 {
            self.fail("create_data", Failure::args("containers need at least one row and column"));
            return None;
        }
        let object = match family {
            Family::Vector => Object::Vector {
                geometry,
                rows,
                element,
                columns: vec![None; columns],
            },
            Family::Matrix => Object::Matrix {
                geometry,
                rows,
                columns,
                element,
                array: None,
            },
            other => {
                self.fail(
                    "create_data",
                    Failure::object(format!("cannot create an empty {other} container")),
                );
                return None;
            }
        };
        Some(self.insert(object))
    }

    pub fn put_vector(&mut self, data: DataPtr, column: usize, array: &ArrayDescriptor) -> c_int {
        self.messages.clear();
        let result = match self.object_mut(data) {
            Some(Object::Vector {
                rows,
                element,
                columns,
                ..
            }) => {
                if column >= columns.len() {
                    Err(Failure::args(format!(
                        "column {column} out of {}",
                        columns.len()
                    )))
                } else if array.rank() != 1 || array.len() != *rows {
                    Err(Failure::args(format!(
                        "column of shape {:?} does not fit {rows} rows",
                        array.extents()
                    )))
                } else if array.element() != *element {
                    Err(Failure::args(format!(
                        "column holds {} values, container expects {element}",
                        array.element()
                    )))
                } else {
                    columns[column] = Some(array.clone());
                    Ok(())
                }
            }
            _ => Err(Failure::object("not a vector container")),
        };
        self.status("put_vector", result)
    }

    pub fn put_matrix(&mut self, data: DataPtr, array: &ArrayDescriptor) -> c_int {
        self.messages.clear();
        let result = match self.object_mut(data) {
            Some(Object::Matrix {
                rows,
                columns,
                element,
                array: slot,
                ..
            }) => {
                if array.extents() != [*rows, *columns] {
                    Err(Failure::args(format!(
                        "matrix of shape {:?} does not fit {rows}x{columns}",
                        array.extents()
                    )))
                } else if array.element() != *element {
                    Err(Failure::args(format!(
                        "matrix holds {} values, container expects {element}",
                        array.element()
                    )))
                } else {
                    *slot = Some(array.clone());
                    Ok(())
                }
            }
            _ => Err(Failure::object("not a matrix container")),
        };
        self.status("put_matrix", result)
    }

    pub fn destroy_data(&mut self, data: DataPtr) -> c_int {
        self.messages.clear();
        if self.remove(data) {
            NOERROR
        } else {
            self.fail("destroy_data", Failure::object("unknown data object"))
        }
    }

    pub fn describe(&mut self, family: Family, data: DataPtr) -> Result<NativeLayout, c_int> {
        self.messages.clear();
        let result = match self.object(data) {
            None => Err(Failure::object("unknown data object")),
            Some(object) if object.family() != family => Err(Failure::object(format!(
                "object is {}, not {family}",
                object.family()
            ))),
            Some(object) => object.layout().map_err(Failure::data),
        };
        result.map_err(|f| self.fail("describe_data", f))
    }

    fn status(&mut self, context: &str, result: ModuleResult) -> c_int {
        match result {
            Ok(()) => NOERROR,
            Err(failure) => self.fail(context, failure),
        }
    }

    // ---- virtual files -------------------------------------------------

    pub fn open_file(
        &mut self,
        family: Family,
        direction: Direction,
        data: Option<DataPtr>,
    ) -> Result<String, c_int> {
        self.messages.clear();
        match (direction, data) {
            (Direction::In, Some(data)) => match self.object(data) {
                Some(object) if object.family() == family => {}
                Some(object) => {
                    let found = object.family();
                    return Err(self.fail(
                        "open_virtual_file",
                        Failure::object(format!("{found} object opened as {family}")),
                    ));
                }
                None => {
                    return Err(
                        self.fail("open_virtual_file", Failure::object("unknown data object"))
                    );
                }
            },
            (Direction::In, None) => {
                return Err(self.fail(
                    "open_virtual_file",
                    Failure::args("input virtual files need data"),
                ));
            }
            (Direction::Out, Some(_)) => {
                return Err(self.fail(
                    "open_virtual_file",
                    Failure::args("output virtual files start empty"),
                ));
            }
            (Direction::Out, None) => {}
        }
        let name = format!("@GMTAPI@-{:06}", self.next_file);
        self.next_file += 1;
        self.files.insert(
            name.clone(),
            Slot {
                family,
                direction,
                object: data,
            },
        );
        Ok(name)
    }

    pub fn close_file(&mut self, name: &str) -> c_int {
        self.messages.clear();
        let Some(slot) = self.files.remove(name) else {
            return self.fail(
                "close_virtual_file",
                Failure::object(format!("no virtual file named {name}")),
            );
        };
        if let (Direction::Out, Some(unread)) = (slot.direction, slot.object) {
            self.remove(unread);
        }
        NOERROR
    }

    pub fn read_file(&mut self, name: &str) -> Option<DataPtr> {
        self.messages.clear();
        match self.files.get_mut(name) {
            Some(slot) if slot.direction == Direction::Out => slot.object.take(),
            _ => {
                self.fail(
                    "read_virtual_file",
                    Failure::object(format!("{name} is not an output virtual file")),
                );
                None
            }
        }
    }

    // ---- resources -----------------------------------------------------

    fn load(&self, name: &str) -> Result<Source, (ReadFailure, String)> {
        if let Some(bytes) = self.shared.resource(name) {
            return Ok(Source::Registered(bytes));
        }
        resource::map_file(name)
    }

    fn read_object(&self, family: Family, name: &str) -> Result<Object, (ReadFailure, String)> {
        let source = self.load(name)?;
        let malformed = |message: String| (ReadFailure::Malformed, format!("{name}: {message}"));
        match family {
            Family::Grid => resource::parse_grid(&source, self.pad)
                .map(Object::Grid)
                .map_err(malformed),
            Family::Dataset => resource::parse_table(&source)
                .map(Object::Dataset)
                .map_err(malformed),
            other => Err(malformed(format!("{other} data cannot be read from a resource"))),
        }
    }

    pub fn read_data(&mut self, family: Family, name: &str) -> Result<DataPtr, ReadFailure> {
        self.messages.clear();
        match self.read_object(family, name) {
            Ok(object) => Ok(self.insert(object)),
            Err((failure, message)) => {
                let status = match failure {
                    ReadFailure::NotFound => STATUS_OBJECT,
                    ReadFailure::Malformed => STATUS_DATA,
                };
                self.fail("read_data", Failure::new(status, message));
                Err(failure)
            }
        }
    }

    fn input_slot(&self, name: &str) -> Option<Result<&Object, Failure>> {
        let slot = self.files.get(name)?;
        if slot.direction != Direction::In {
            return Some(Err(Failure::args(format!("{name} is an output file"))));
        }
        Some(
            slot.object
                .and_then(|data| self.object(data))
                .ok_or_else(|| Failure::object(format!("{name} has no data"))),
        )
    }

    fn input_table(&self, args: &Args) -> Result<Table, Failure> {
        let name = args.input()?;
        if let Some(object) = self.input_slot(name) {
            // SAFETY: referenced host buffers are pinned by the open file.
            return unsafe { object?.to_table() }.map_err(Failure::data);
        }
        match self.read_object(Family::Dataset, name) {
            Ok(Object::Dataset(table)) => Ok(table),
            Ok(_) => Err(Failure::data(format!("{name} is not a table"))),
            Err((_, message)) => Err(Failure::data(message)),
        }
    }

    fn input_grid(&self, args: &Args, region: Option<Region>) -> Result<Grid, Failure> {
        let name = args.input()?;
        if let Some(object) = self.input_slot(name) {
            // SAFETY: as in `input_table`.
            return unsafe { object?.to_grid(region, self.pad) }.map_err(Failure::data);
        }
        match self.read_object(Family::Grid, name) {
            Ok(Object::Grid(grid)) => Ok(grid),
            Ok(_) => Err(Failure::data(format!("{name} is not a grid"))),
            Err((_, message)) => Err(Failure::data(message)),
        }
    }

    fn write_output(&mut self, name: Option<&str>, object: Object) -> ModuleResult {
        let family = object.family();
        let name = name.ok_or_else(|| Failure::args("no output virtual file given"))?;
        match self.files.get(name) {
            Some(slot) if slot.direction == Direction::Out && slot.family == family => {}
            Some(_) => {
                return Err(Failure::args(format!("{name} is not a {family} output file")));
            }
            None => {
                return Err(Failure::args(format!(
                    "cannot write {name}: only virtual files are writable"
                )));
            }
        }
        let data = self.insert(object);
        let replaced = self
            .files
            .get_mut(name)
            .and_then(|slot| slot.object.replace(data));
        if let Some(old) = replaced {
            self.remove(old);
        }
        Ok(())
    }

    // ---- modules -------------------------------------------------------

    pub fn call(&mut self, module: &str, args: &str) -> c_int {
        self.messages.clear();
        let result = Args::parse(args).and_then(|parsed| match module {
            "begin" => self.begin(&parsed),
            "end" => self.end(),
            "gmtset" => self.gmtset(&parsed),
            "basemap" | "coast" | "plot" | "text" | "grdimage" | "colorbar" | "logo" => {
                self.draw(module, &parsed)
            }
            "gmtconvert" => self.gmtconvert(&parsed),
            "select" => self.select(&parsed),
            "grdcut" => self.grdcut(&parsed),
            "grdconvert" => self.grdconvert(&parsed),
            _ => Err(Failure::new(
                STATUS_MODULE,
                format!("module `{module}` not found"),
            )),
        });
        self.status(module, result)
    }

    fn begin(&mut self, args: &Args) -> ModuleResult {
        let name = args.input()?;
        if let Some(active) = &self.figure {
            return Err(Failure::state(format!(
                "figure {} is still active",
                active.name()
            )));
        }
        self.figure = Some(Canvas::new(name));
        self.history = History::default();
        self.finished = None;
        Ok(())
    }

    fn end(&mut self) -> ModuleResult {
        let canvas = self
            .figure
            .take()
            .ok_or_else(|| Failure::state("no figure is active"))?;
        let name = canvas.name().to_string();
        debug!("{}: figure {name} ends with {} objects", self.tag, canvas.object_count());
        self.finished = Some((name, canvas.finish()));
        Ok(())
    }

    pub fn end_figure(&mut self, name: &str) -> Result<Vec<u8>, c_int> {
        self.messages.clear();
        if self.figure.as_ref().is_some_and(|c| c.name() == name) {
            self.end().map_err(|f| self.fail("end", f))?;
        }
        match self.finished.take() {
            Some((finished, page)) if finished == name => Ok(page),
            other => {
                self.finished = other;
                Err(self.fail("end", Failure::state(format!("no figure named {name}"))))
            }
        }
    }

    fn gmtset(&mut self, args: &Args) -> ModuleResult {
        if !args.options.is_empty() || args.output.is_some() {
            return Err(Failure::args("gmtset takes only KEY=VALUE pairs"));
        }
        let mut pairs = Vec::with_capacity(args.inputs.len());
        for item in &args.inputs {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| Failure::args(format!("`{item}` is not KEY=VALUE")))?;
            let valid = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
            if !valid {
                return Err(Failure::args(format!("unrecognized keyword {key}")));
            }
            pairs.push((key.to_string(), value.to_string()));
        }
        self.defaults.extend(pairs);
        Ok(())
    }

    fn draw(&mut self, module: &str, args: &Args) -> ModuleResult {
        if self.figure.is_none() {
            return Err(Failure::state("no figure is active; run `begin` first"));
        }
        let region = match args.get('R') {
            Some(text) => parse_region(text)?,
            None => self
                .history
                .region
                .ok_or_else(|| Failure::args("must specify -R option"))?,
        };
        let projection = match args.get('J') {
            Some(text) => text.to_string(),
            None => self
                .history
                .projection
                .clone()
                .ok_or_else(|| Failure::args("must specify -J option"))?,
        };
        let (width, height) = map_size(&projection, &region)?;
        let frame = Frame {
            region,
            width,
            height,
        };
        let (dx, dy) = (shift(args.get('X'))?, shift(args.get('Y'))?);

        let content = match module {
            // `-T` moves the origin without reading or drawing anything
            "plot" if args.has('T') => Content::None,
            "plot" => Content::Table(self.input_table(args)?),
            "text" => {
                let label = title(args.get('F'))
                    .ok_or_else(|| Failure::args("text needs -F+t<text>"))?
                    .to_string();
                Content::Label(self.input_table(args)?, label)
            }
            "grdimage" => Content::Grid(self.input_grid(args, Some(region))?),
            _ => Content::None,
        };

        self.history.region = Some(region);
        self.history.projection = Some(projection.clone());

        let mut summary = vec![format!("-R{region}"), format!("-J{projection}")];
        summary.extend(args.rest(&['R', 'J', 'X', 'Y']));
        let Some(canvas) = self.figure.as_mut() else {
            return Err(Failure::state("no figure is active"));
        };
        canvas.shift(dx, dy);
        canvas.begin_object(module, &summary.join(" "));
        render(canvas, module, &frame, args, &content);
        canvas.end_object();
        Ok(())
    }

    /// Copy a table, keeping only the `-o` columns when given.
    fn gmtconvert(&mut self, args: &Args) -> ModuleResult {
        let mut table = self.input_table(args)?;
        if let Some(spec) = args.get('o') {
            table = table.pick(&column_list(spec)?).map_err(Failure::data)?;
        }
        self.write_output(args.output.as_deref(), Object::Dataset(table))
    }

    /// Keep records inside `-R` and drop exact duplicates.
    fn select(&mut self, args: &Args) -> ModuleResult {
        let table = self.input_table(args)?;
        let region = args.get('R').map(parse_region).transpose()?;
        if table.columns < 2 && region.is_some() {
            return Err(Failure::data("-R selection needs x and y columns"));
        }
        let mut seen = HashSet::new();
        let selected = table.retain(|record| {
            let inside = region.is_none_or(|r| r.contains(record[0], record[1]));
            inside && seen.insert(record.iter().map(|v| v.to_bits()).collect::<Vec<u64>>())
        });
        self.write_output(args.output.as_deref(), Object::Dataset(selected))
    }

    fn grdcut(&mut self, args: &Args) -> ModuleResult {
        let region = parse_region(
            args.get('R')
                .ok_or_else(|| Failure::args("must specify -R option"))?,
        )?;
        let grid = self.input_grid(args, None)?;
        let cut = grid.cut(region, self.pad).map_err(Failure::data)?;
        self.write_output(args.get('G'), Object::Grid(cut))
    }

    fn grdconvert(&mut self, args: &Args) -> ModuleResult {
        let region = args.get('R').map(parse_region).transpose()?;
        let grid = self.input_grid(args, region)?;
        self.write_output(args.get('G'), Object::Grid(grid))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let leftover: Vec<DataPtr> = self.objects.iter().copied().collect();
        if !leftover.is_empty() {
            debug!("{}: freeing {} objects at destroy", self.tag, leftover.len());
        }
        for data in leftover {
            self.remove(data);
        }
    }
}

fn render(canvas: &mut Canvas, module: &str, frame: &Frame, args: &Args, content: &Content) {
    match (module, content) {
        ("basemap", _) => {
            canvas.rectangle(frame, None);
            if let Some(text) = title(args.get('B')) {
                canvas.text(0.0, frame.height + 12.0, text);
            }
        }
        ("coast", _) => {
            let fill = args.has('G').then_some(0.8).or(args.has('S').then_some(0.95));
            canvas.rectangle(frame, fill);
        }
        ("plot", Content::Table(table)) => {
            let size = args
                .get('S')
                .map(|s| s.trim_start_matches(|c: char| c.is_ascii_alphabetic()))
                .filter(|s| !s.is_empty())
                .and_then(|s| length(s).ok())
                .unwrap_or(0.2 * CM);
            for segment in &table.segments {
                let points = projected(frame, segment);
                if args.has('S') {
                    canvas.symbols(&points, size);
                } else {
                    canvas.polyline(&points);
                }
            }
        }
        ("text", Content::Label(table, label)) => {
            for segment in &table.segments {
                for (x, y) in projected(frame, segment) {
                    canvas.text(x, y, label);
                }
            }
        }
        ("grdimage", Content::Grid(grid)) => {
            let (lo, hi) = grid.range().unwrap_or((0.0, 0.0));
            let samples: Vec<u8> = grid
                .values()
                .into_iter()
                .map(|v| {
                    if !v.is_finite() {
                        255
                    } else if hi > lo {
                        ((v - lo) / (hi - lo) * 255.0).round() as u8
                    } else {
                        128
                    }
                })
                .collect();
            canvas.comment(&format!("grid {}x{} z {lo}..{hi}", grid.nx, grid.ny));
            canvas.image(frame, grid.nx, grid.ny, &samples);
        }
        ("colorbar", _) => {
            let bar = Frame {
                height: 0.4 * CM,
                ..*frame
            };
            let ramp: Vec<u8> = (0..=255).collect();
            canvas.comment("colorbar");
            canvas.image(&bar, ramp.len(), 1, &ramp);
        }
        ("logo", _) => canvas.text(0.0, 0.0, "GMT"),
        _ => {}
    }
}

/// Page coordinates of the records of a segment that fall inside the frame.
fn projected(frame: &Frame, segment: &[Vec<f64>]) -> Vec<(f64, f64)> {
    if segment.len() < 2 {
        return Vec::new();
    }
    segment[0]
        .iter()
        .zip(&segment[1])
        .filter(|&(&x, &y)| frame.region.contains(x, y))
        .map(|(&x, &y)| frame.project(x, y))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_honours_quotes() {
        let tokens = tokenize(r#"-Bafg -B+t"My Map" in.txt"#).unwrap();
        assert_eq!(tokens, vec!["-Bafg", "-B+tMy Map", "in.txt"]);
        assert!(tokenize("-B+t\"open").is_err());
    }

    #[test]
    fn args_split_inputs_options_and_output() {
        let args = Args::parse("@GMTAPI@-000001 -R0/1/0/1 -JX5c ->@GMTAPI@-000002").unwrap();
        assert_eq!(args.inputs, vec!["@GMTAPI@-000001"]);
        assert_eq!(args.get('R'), Some("0/1/0/1"));
        assert_eq!(args.output.as_deref(), Some("@GMTAPI@-000002"));
        assert_eq!(args.rest(&['R']), vec!["-JX5c"]);
    }

    #[test]
    fn column_lists() {
        assert_eq!(column_list("1").unwrap(), vec![1]);
        assert_eq!(column_list("2,0").unwrap(), vec![2, 0]);
        assert_eq!(column_list("0-2,4").unwrap(), vec![0, 1, 2, 4]);
        assert_eq!(column_list("1:2").unwrap(), vec![1, 2]);
        assert!(column_list("2-1").is_err());
        assert!(column_list("x").is_err());
    }

    #[test]
    fn projection_sizes() {
        let region = Region::new(0.0, 10.0, 0.0, 5.0);
        let (w, h) = map_size("X10c", &region).unwrap();
        assert!((w - 10.0 * CM).abs() < 1e-9 && (h - 5.0 * CM).abs() < 1e-9);
        let (w, h) = map_size("x1c/2c", &region).unwrap();
        assert!((w - 10.0 * CM).abs() < 1e-9 && (h - 10.0 * CM).abs() < 1e-9);
        assert!(map_size("X", &region).is_err());
    }

    #[test]
    fn drawing_reuses_history() {
        let mut engine = Engine::new("t", 2, Arc::default());
        assert_eq!(engine.call("basemap", "-R0/10/0/10 -JX10c"), STATUS_STATE);
        assert_eq!(engine.call("begin", "map"), NOERROR);
        assert_eq!(engine.call("basemap", "-Baf"), STATUS_ARGS);
        assert!(engine.error_text().contains("-R"));
        assert_eq!(engine.call("basemap", "-R0/10/0/10 -JX10c -Baf"), NOERROR);
        assert_eq!(engine.call("logo", ""), NOERROR);
        let page = String::from_utf8(engine.end_figure("map").unwrap()).unwrap();
        assert!(page.contains("% -R0/10/0/10 -JX10c -Baf\n"));
        assert!(page.contains("%%BeginObject logo\n% -R0/10/0/10 -JX10c\n"));
    }

    #[test]
    fn unknown_module_reports_name() {
        let mut engine = Engine::new("t", 2, Arc::default());
        assert_eq!(engine.call("grdfoo", "-R0/1/0/1"), STATUS_MODULE);
        assert!(engine.error_text().contains("grdfoo"));
        // a later valid call clears the message
        assert_eq!(engine.call("gmtset", "FONT_TITLE=12p"), NOERROR);
        assert!(engine.error_text().is_empty());
    }
}
