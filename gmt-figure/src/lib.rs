//! Figures, keyword-driven module dispatch and output conversion on top of
//! [`gmt_clib`].
//!
//! ```no_run
//! use gmt_figure::{Figure, Params};
//!
//! let fig = Figure::new()?;
//! fig.call(
//!     "basemap",
//!     &Params::new()
//!         .set("region", [0.0, 10.0, 0.0, 10.0])
//!         .set("projection", "X10c")
//!         .set("frame", "afg"),
//! )?;
//! fig.call("logo", &Params::new())?;
//! fig.savefig("map.ps")?;
//! # Ok::<(), gmt_figure::Error>(())
//! ```

pub mod args;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod figure;

pub use args::{ArgValue, Params, quote};
pub use convert::{Converter, Format};
pub use dispatch::{DataKind, Fragment, OperationSpec, OperationTable, builtin, process};
pub use error::{Error, Result};
pub use figure::Figure;
