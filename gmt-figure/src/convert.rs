//! Turning a finished PostScript page into the requested output format.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use log::{debug, warn};

use crate::error::{Error, Result};

const EOF_MARKER: &str = "%%EOF";
const EPS_HEADER: &str = "%!PS-Adobe-3.0 EPSF-3.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Ps,
    Eps,
    Pdf,
    Png,
    Jpg,
    Tif,
}

impl Format {
    /// Format named by a file extension (case-insensitive).
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "ps" => Some(Format::Ps),
            "eps" => Some(Format::Eps),
            "pdf" => Some(Format::Pdf),
            "png" => Some(Format::Png),
            "jpg" | "jpeg" => Some(Format::Jpg),
            "tif" | "tiff" => Some(Format::Tif),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether the page is written without an external converter.
    pub fn is_native(self) -> bool {
        matches!(self, Format::Ps | Format::Eps)
    }

    /// Ghostscript output device.
    fn device(self) -> Option<&'static str> {
        match self {
            Format::Ps | Format::Eps => None,
            Format::Pdf => Some("pdfwrite"),
            Format::Png => Some("png16m"),
            Format::Jpg => Some("jpeg"),
            Format::Tif => Some("tiff24nc"),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Ps => "ps",
            Format::Eps => "eps",
            Format::Pdf => "pdf",
            Format::Png => "png",
            Format::Jpg => "jpg",
            Format::Tif => "tif",
        })
    }
}

/// Append the `%%EOF` trailer an unfinished page lacks.
pub fn close_page(postscript: &[u8]) -> Vec<u8> {
    let mut page = postscript.to_vec();
    let trimmed = postscript.trim_ascii_end();
    if !trimmed.ends_with(EOF_MARKER.as_bytes()) {
        if !page.ends_with(b"\n") {
            page.push(b'\n');
        }
        page.extend_from_slice(EOF_MARKER.as_bytes());
        page.push(b'\n');
    }
    page
}

fn to_eps(page: Vec<u8>) -> Vec<u8> {
    let body = match page.iter().position(|&b| b == b'\n') {
        Some(end) if page.starts_with(b"%!") => &page[end + 1..],
        _ => &page[..],
    };
    let mut eps = Vec::with_capacity(body.len() + EPS_HEADER.len() + 1);
    eps.extend_from_slice(EPS_HEADER.as_bytes());
    eps.push(b'\n');
    eps.extend_from_slice(body);
    eps
}

/// Renders pages with an external Ghostscript binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converter {
    program: String,
    dpi: u32,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new("gs")
    }
}

impl Converter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            dpi: 300,
        }
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Convert a raw page to `format`.
    pub fn convert(&self, postscript: &[u8], format: Format) -> Result<Vec<u8>> {
        let page = close_page(postscript);
        match format {
            Format::Ps => Ok(page),
            Format::Eps => Ok(to_eps(page)),
            _ => self.run(page, format),
        }
    }

    fn run(&self, page: Vec<u8>, format: Format) -> Result<Vec<u8>> {
        let Some(device) = format.device() else {
            return Ok(page);
        };
        let args = [
            "-q".to_string(),
            "-dSAFER".to_string(),
            "-dBATCH".to_string(),
            "-dNOPAUSE".to_string(),
            format!("-sDEVICE={device}"),
            format!("-r{}", self.dpi),
            "-sOutputFile=-".to_string(),
            "-".to_string(),
        ];
        debug!("{} {}", self.program, args.join(" "));
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::ConversionUnavailable {
                    format: format.to_string(),
                    reason: format!("`{}` was not found", self.program),
                },
                _ => Error::ConversionFailed {
                    format: format.to_string(),
                    status: None,
                    stderr: e.to_string(),
                },
            })?;

        // Fed from a thread so a full stdout pipe cannot stall the write.
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || {
                if let Err(e) = stdin.write_all(&page) {
                    warn!("writing page to converter: {e}");
                }
            })
        });
        let output = child.wait_with_output().map_err(|e| Error::ConversionFailed {
            format: format.to_string(),
            status: None,
            stderr: e.to_string(),
        })?;
        if let Some(writer) = writer {
            let _ = writer.join();
        }

        if !output.status.success() {
            return Err(Error::ConversionFailed {
                format: format.to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if output.stdout.is_empty() {
            return Err(Error::ConversionFailed {
                format: format.to_string(),
                status: output.status.code(),
                stderr: "converter produced no output".into(),
            });
        }
        Ok(output.stdout)
    }
}
