//! Sequencing drawing calls into one figure.
//!
//! A [`Figure`] owns its session for the whole `begin … end` span. Drawing
//! operations share one region and projection: the first call has to name
//! them, later calls inherit them. Both are always rendered as the leading
//! `-R`/`-J` arguments, so naming them again changes nothing.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use gmt_clib::{DataHandle, Element, Geometry, Session, SessionConfig, VirtualFile};
use log::{debug, warn};
use ndarray::{ArrayBase, Data, Ix1};

use crate::args::Params;
use crate::convert::{Converter, Format};
use crate::dispatch::{self, Fragment};
use crate::error::{Error, Result};

static NEXT_FIGURE: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Finalized,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    region: Option<String>,
    projection: Option<String>,
    history: Vec<String>,
    output: Option<Vec<u8>>,
}

pub struct Figure {
    session: Session,
    name: String,
    state: RefCell<State>,
}

impl Figure {
    /// Start a figure on a session with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(&SessionConfig::default())
    }

    pub fn with_config(config: &SessionConfig) -> Result<Self> {
        Self::with_session(Session::create(config)?)
    }

    /// Start a figure on `session`.
    ///
    /// If the library refuses to begin, the session is destroyed and the
    /// error returned.
    pub fn with_session(session: Session) -> Result<Self> {
        let name = format!(
            "gmtnb_{}_{}",
            process::id(),
            NEXT_FIGURE.fetch_add(1, Ordering::Relaxed)
        );
        session.invoke("begin", &name)?;
        debug!("figure {name} begun on session {}", session.id());
        Ok(Self {
            session,
            name,
            state: RefCell::new(State {
                phase: Phase::Active,
                region: None,
                projection: None,
                history: Vec::new(),
                output: None,
            }),
        })
    }

    /// The session drawing data is exposed through.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run a drawing operation.
    pub fn call(&self, operation: &str, params: &Params) -> Result<()> {
        self.call_with(operation, params, &[])
    }

    /// Run a drawing operation whose data arguments are virtual files.
    pub fn call_with(
        &self,
        operation: &str,
        params: &Params,
        files: &[&VirtualFile<'_>],
    ) -> Result<()> {
        self.ensure_active()?;
        let spec = dispatch::builtin()?.get(operation)?;
        spec.check_inputs(operation, files)?;
        let fragments = spec.render(operation, params)?;
        let (args, region, projection) = if spec.draws {
            let (region, projection, rest) = self.frame(operation, fragments)?;
            let mut args = vec![format!("-R{region}"), format!("-J{projection}")];
            args.extend(rest);
            (args.join(" "), Some(region), Some(projection))
        } else {
            (dispatch::join(&fragments), None, None)
        };

        self.session.invoke_with(operation, &args, files)?;

        let mut state = self.state.borrow_mut();
        if region.is_some() {
            state.region = region;
        }
        if projection.is_some() {
            state.projection = projection;
        }
        state.history.push(format!("{operation} {args}"));
        Ok(())
    }

    /// Plot `x`/`y` as lines, or as symbols when `style` is set.
    pub fn plot<T, S>(
        &self,
        x: &ArrayBase<S, Ix1>,
        y: &ArrayBase<S, Ix1>,
        params: &Params,
    ) -> Result<()>
    where
        T: Element,
        S: Data<Elem = T>,
    {
        self.scoped("plot", |fig| {
            let file = fig.session.open_vectors(&[x, y], Geometry::Point)?;
            fig.call_with("plot", params, &[&file])?;
            Ok(file.close()?)
        })
    }

    /// Write `label` at every `x`/`y` position.
    pub fn text<T, S>(
        &self,
        x: &ArrayBase<S, Ix1>,
        y: &ArrayBase<S, Ix1>,
        label: &str,
        params: &Params,
    ) -> Result<()>
    where
        T: Element,
        S: Data<Elem = T>,
    {
        let params = params.clone().set("text", format!("+t{label}"));
        self.scoped("text", |fig| {
            let file = fig.session.open_vectors(&[x, y], Geometry::Point)?;
            fig.call_with("text", &params, &[&file])?;
            Ok(file.close()?)
        })
    }

    /// Run a grid-reading operation (e.g. `grdimage`) on `grid`.
    pub fn grid_image(
        &self,
        operation: &str,
        grid: &DataHandle<'_>,
        params: &Params,
    ) -> Result<()> {
        self.scoped(operation, |fig| {
            let file = fig.session.open_data(grid, Geometry::Surface)?;
            fig.call_with(operation, params, &[&file])?;
            Ok(file.close()?)
        })
    }

    /// Run `body`, then fail if it left virtual files open.
    ///
    /// Files opened before the call are not counted. A leak is reported
    /// in place of any error `body` returned.
    pub fn scoped<R>(
        &self,
        operation: &str,
        body: impl FnOnce(&Self) -> Result<R>,
    ) -> Result<R> {
        self.ensure_active()?;
        let mark = self.session.open_file_count();
        let result = body(self);
        self.session.check_files_closed(operation, mark)?;
        result
    }

    /// Move the plot origin by `x`/`y` centimetres.
    pub fn shift_origin(&self, x: f64, y: f64) -> Result<()> {
        let params = Params::new()
            .set("no_plot", true)
            .set("xshift", format!("{x}c"))
            .set("yshift", format!("{y}c"));
        self.call("plot", &params)
    }

    /// End the figure and keep its raw output.
    ///
    /// Finalizing twice is a no-op.
    pub fn finalize(&self) -> Result<()> {
        if self.is_finalized() {
            return Ok(());
        }
        let page = self.session.extract_figure(&self.name)?;
        debug!("figure {} finalized ({} bytes)", self.name, page.len());
        {
            let mut state = self.state.borrow_mut();
            state.phase = Phase::Finalized;
            state.output = Some(page);
        }
        self.session.check_no_open_files("end")?;
        Ok(())
    }

    /// The figure in `format`, finalizing it first if needed.
    pub fn export(&self, format: Format) -> Result<Vec<u8>> {
        self.export_with(&Converter::default(), format)
    }

    pub fn export_with(&self, converter: &Converter, format: Format) -> Result<Vec<u8>> {
        self.finalize()?;
        let state = self.state.borrow();
        let page = state
            .output
            .as_deref()
            .ok_or_else(|| gmt_clib::Error::EmptyOutput(self.name.clone()))?;
        converter.convert(page, format)
    }

    /// Write the figure to `path` in the format its extension names.
    pub fn savefig(&self, path: impl AsRef<Path>) -> Result<()> {
        self.savefig_with(path, &Converter::default())
    }

    pub fn savefig_with(&self, path: impl AsRef<Path>, converter: &Converter) -> Result<()> {
        let path = path.as_ref();
        let format = Format::from_path(path).ok_or_else(|| Error::ConversionUnavailable {
            format: path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
            reason: format!("no output format for {}", path.display()),
        })?;
        let bytes = self.export_with(converter, format)?;
        fs::write(path, bytes).map_err(|e| Error::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        debug!("figure {} saved to {}", self.name, path.display());
        Ok(())
    }

    /// Argument strings of every successful call, in order.
    pub fn history(&self) -> Vec<String> {
        self.state.borrow().history.clone()
    }

    /// The region later calls inherit, as passed to `-R`.
    pub fn region(&self) -> Option<String> {
        self.state.borrow().region.clone()
    }

    pub fn projection(&self) -> Option<String> {
        self.state.borrow().projection.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finalized(&self) -> bool {
        self.state.borrow().phase == Phase::Finalized
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state.borrow().phase {
            Phase::Active => Ok(()),
            Phase::Finalized => Err(Error::SequencerFinalized(self.name.clone())),
        }
    }

    /// Split off `-R`/`-J`, filling either from earlier calls.
    fn frame(
        &self,
        operation: &str,
        fragments: Vec<Fragment>,
    ) -> Result<(String, String, Vec<String>)> {
        let mut region = None;
        let mut projection = None;
        let mut rest = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let flag = fragment.flag.or_else(|| raw_flag(&fragment.text));
            match flag.as_deref() {
                // A bare `-R` or `-J` means "as before".
                Some("R") => region = option_value(&fragment.text).or(region),
                Some("J") => projection = option_value(&fragment.text).or(projection),
                _ => rest.push(fragment.text),
            }
        }
        let state = self.state.borrow();
        let missing = |flag| Error::MissingParameter {
            operation: operation.to_string(),
            flag,
        };
        let region = region
            .or_else(|| state.region.clone())
            .ok_or_else(|| missing('R'))?;
        let projection = projection
            .or_else(|| state.projection.clone())
            .ok_or_else(|| missing('J'))?;
        Ok((region, projection, rest))
    }
}

/// Text after a single-letter flag, e.g. `0/10/0/10` in `-R0/10/0/10`.
fn option_value(fragment: &str) -> Option<String> {
    fragment
        .get(2..)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// The flag letter of a raw `-X...` fragment.
fn raw_flag(fragment: &str) -> Option<String> {
    fragment
        .strip_prefix('-')
        .and_then(|rest| rest.get(..1))
        .map(str::to_string)
}

impl Drop for Figure {
    fn drop(&mut self) {
        if self.is_finalized() {
            return;
        }
        if let Err(e) = self.finalize() {
            warn!("figure {}: finalizing on drop: {e}", self.name);
        }
    }
}

impl std::fmt::Debug for Figure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Figure")
            .field("name", &self.name)
            .field("session", &self.session.id())
            .field("phase", &state.phase)
            .field("calls", &state.history.len())
            .finish()
    }
}
