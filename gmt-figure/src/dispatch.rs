//! Table-driven operation dispatch.
//!
//! Every operation the crate can run is described once in `operations.yaml`:
//! whether it draws on a figure, which data families it reads and writes,
//! and which keyword maps to which option flag. Adding an operation is a
//! table edit, not new code.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use gmt_clib::{DataHandle, Direction, Family, Geometry, Session, VirtualFile};
use log::debug;
use serde::Deserialize;

use crate::args::Params;
use crate::error::{Error, Result};

const BUILTIN_TABLE: &str = include_str!("operations.yaml");

static BUILTIN: OnceLock<std::result::Result<OperationTable, String>> = OnceLock::new();

/// Data family an operation consumes or produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Dataset,
    Grid,
}

impl DataKind {
    pub fn family(self) -> Family {
        match self {
            DataKind::Dataset => Family::Dataset,
            DataKind::Grid => Family::Grid,
        }
    }

    /// Geometry of an output file of this kind.
    pub fn geometry(self) -> Geometry {
        match self {
            DataKind::Dataset => Geometry::Point,
            DataKind::Grid => Geometry::Surface,
        }
    }

    /// Whether a module reading this kind can take `file` as input.
    ///
    /// Vectors feed dataset readers; a matrix feeds either, by geometry.
    pub fn accepts(self, file: &VirtualFile<'_>) -> bool {
        match (self, file.family()) {
            (DataKind::Dataset, Family::Dataset | Family::Vector) => true,
            (DataKind::Grid, Family::Grid) => true,
            (DataKind::Dataset, Family::Matrix) => file.geometry() != Geometry::Surface,
            (DataKind::Grid, Family::Matrix) => file.geometry() == Geometry::Surface,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationSpec {
    /// Runs inside a figure and needs `-R`/`-J`.
    #[serde(default)]
    pub draws: bool,
    #[serde(default)]
    pub input: Option<DataKind>,
    #[serde(default)]
    pub output: Option<DataKind>,
    /// Keyword to option flag.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// One rendered argument. Raw fragments carry no flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub flag: Option<String>,
    pub text: String,
}

impl OperationSpec {
    /// The flag declared for `keyword`.
    pub fn flag(&self, keyword: &str) -> Option<&str> {
        self.params.get(keyword).map(String::as_str)
    }

    /// Reject input files the operation cannot read.
    pub fn check_inputs(&self, operation: &str, files: &[&VirtualFile<'_>]) -> Result<()> {
        let Some(kind) = self.input else {
            return Ok(());
        };
        let inputs = files.iter().filter(|f| f.direction() == Direction::In);
        for file in inputs {
            if !kind.accepts(file) {
                return Err(gmt_clib::Error::FamilyMismatch {
                    family: file.family(),
                    what: format!("{} input of `{operation}`", kind.family()),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Render `params` in the order they were set, raw fragments last.
    pub fn render(&self, operation: &str, params: &Params) -> Result<Vec<Fragment>> {
        let mut fragments = Vec::with_capacity(params.len());
        for (keyword, value) in params.iter() {
            let flag = self.flag(keyword).ok_or_else(|| Error::UnknownParameter {
                operation: operation.to_string(),
                keyword: keyword.to_string(),
            })?;
            fragments.extend(value.render(flag).into_iter().map(|text| Fragment {
                flag: Some(flag.to_string()),
                text,
            }));
        }
        fragments.extend(params.raw_fragments().iter().map(|text| Fragment {
            flag: None,
            text: text.clone(),
        }));
        Ok(fragments)
    }
}

/// Join fragments into a module argument string.
pub fn join(fragments: &[Fragment]) -> String {
    fragments
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationTable {
    operations: BTreeMap<String, OperationSpec>,
}

impl OperationTable {
    /// Parse and validate a table.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let operations: BTreeMap<String, OperationSpec> =
            serde_yaml::from_str(text).map_err(|e| Error::Table(e.to_string()))?;
        for (name, spec) in &operations {
            for (keyword, flag) in &spec.params {
                if flag.is_empty() || !flag.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(Error::Table(format!(
                        "{name}.{keyword}: `{flag}` is not an option flag"
                    )));
                }
            }
            if spec.draws {
                for needed in ["R", "J"] {
                    if !spec.params.values().any(|f| f == needed) {
                        return Err(Error::Table(format!(
                            "{name} draws but declares no -{needed} keyword"
                        )));
                    }
                }
            }
        }
        Ok(Self { operations })
    }

    pub fn get(&self, name: &str) -> Result<&OperationSpec> {
        self.operations
            .get(name)
            .ok_or_else(|| Error::UnknownOperation(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// The table shipped with the crate.
pub fn builtin() -> Result<&'static OperationTable> {
    let table = BUILTIN
        .get_or_init(|| OperationTable::from_yaml(BUILTIN_TABLE).map_err(|e| e.to_string()));
    match table {
        Ok(table) => Ok(table),
        Err(message) => Err(Error::Table(message.clone())),
    }
}

/// Run a non-drawing operation and read its result back.
///
/// `inputs` are passed ahead of the rendered parameters; the result is
/// written to an output virtual file of the operation's declared family.
pub fn process<'s>(
    session: &'s Session,
    operation: &str,
    inputs: &[&VirtualFile<'_>],
    params: &Params,
) -> Result<DataHandle<'s>> {
    let spec = builtin()?.get(operation)?;
    if spec.draws {
        return Err(gmt_clib::Error::InvalidArgument(format!(
            "`{operation}` draws on a figure and produces no data"
        ))
        .into());
    }
    let kind = spec.output.ok_or_else(|| {
        gmt_clib::Error::InvalidArgument(format!("`{operation}` declares no output"))
    })?;
    spec.check_inputs(operation, inputs)?;
    let args = join(&spec.render(operation, params)?);

    let output = session.open_output(kind.family(), kind.geometry())?;
    {
        let mut files: Vec<&VirtualFile<'_>> = inputs.to_vec();
        files.push(&output);
        session.invoke_with(operation, &args, &files)?;
    }
    debug!("{operation}: reading back {} output", kind.family());
    Ok(output.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgValue;

    #[test]
    fn builtin_table_loads() {
        let table = builtin().unwrap();
        assert!(table.get("basemap").unwrap().draws);
        assert_eq!(table.get("grdcut").unwrap().output, Some(DataKind::Grid));
        assert!(matches!(table.get("grdfoo"), Err(Error::UnknownOperation(_))));
    }

    #[test]
    fn drawing_operation_must_declare_region() {
        let yaml = "basemap:\n  draws: true\n  params:\n    projection: J\n";
        let err = OperationTable::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("-R"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(OperationTable::from_yaml("select:\n  outputs: dataset\n").is_err());
        assert!(OperationTable::from_yaml("select:\n  params:\n    region: \"-R\"\n").is_err());
    }

    #[test]
    fn render_keeps_order_and_appends_raw() {
        let spec = builtin().unwrap().get("basemap").unwrap();
        let params = Params::new()
            .set("frame", ArgValue::Repeat(vec!["af".into(), "+tMy Map".into()]))
            .set("region", [0.0, 1.0, 0.0, 1.0])
            .raw("-V");
        let fragments = spec.render("basemap", &params).unwrap();
        assert_eq!(join(&fragments), "-Baf -B+t\"My Map\" -R0/1/0/1 -V");
        assert_eq!(fragments[2].flag.as_deref(), Some("R"));
        assert_eq!(fragments[3].flag, None);
    }

    #[test]
    fn undeclared_keyword_is_an_error() {
        let spec = builtin().unwrap().get("select").unwrap();
        let err = spec
            .render("select", &Params::new().set("frame", true))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownParameter { ref keyword, .. } if keyword == "frame"
        ));
    }
}
