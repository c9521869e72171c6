//! Session configuration.
//!
//! A [`SessionConfig`] can be built in code or loaded from YAML:
//!
//! ```
//! use gmt_clib::{LibraryKind, SessionConfig, SessionMode};
//!
//! let config = SessionConfig::from_yaml(
//!     "library: memory\ntag: survey\nmode: EXTERNAL | NOEXIT\ndefaults:\n  FONT_TITLE: 14p\n",
//! )?;
//! assert_eq!(config.library, LibraryKind::Memory);
//! assert!(config.mode.contains(SessionMode::NOEXIT));
//! # Ok::<(), gmt_clib::Error>(())
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bitflags::bitflags;
use gmt_sys::consts;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::library::NativeLibrary;
use crate::memory::MemoryLibrary;

bitflags! {
    /// Mode bits passed to the native "create session" call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SessionMode: u32 {
        /// Return errors instead of calling `exit()`.
        const NOEXIT = consts::SESSION_NOEXIT;
        /// Called from an external (non-GMT) program.
        const EXTERNAL = consts::SESSION_EXTERNAL;
        /// Matrices passed in are column-major.
        const COLMAJOR = consts::SESSION_COLMAJOR;
        /// Write errors to the session log.
        const LOGERRORS = consts::SESSION_LOGERRORS;
        /// Run in modern mode from the start.
        const RUNMODE = consts::SESSION_RUNMODE;
    }
}

impl Default for SessionMode {
    fn default() -> Self {
        SessionMode::EXTERNAL
    }
}

/// Which native library backs a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    /// The in-process reference engine, [`MemoryLibrary`].
    Memory,
    /// The system libgmt (requires the `gmt` feature).
    Gmt,
}

impl LibraryKind {
    /// Instantiate the library.
    pub fn open(self) -> Result<Box<dyn NativeLibrary>> {
        match self {
            LibraryKind::Memory => Ok(Box::new(MemoryLibrary::new())),
            #[cfg(feature = "gmt")]
            LibraryKind::Gmt => Ok(Box::new(crate::gmt::GmtLibrary::new())),
            #[cfg(not(feature = "gmt"))]
            LibraryKind::Gmt => Err(Error::Config(
                "gmt-clib was built without the `gmt` feature".into(),
            )),
        }
    }
}

impl Default for LibraryKind {
    fn default() -> Self {
        if cfg!(feature = "gmt") {
            LibraryKind::Gmt
        } else {
            LibraryKind::Memory
        }
    }
}

impl fmt::Display for LibraryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryKind::Memory => f.write_str("memory"),
            LibraryKind::Gmt => f.write_str("gmt"),
        }
    }
}

impl FromStr for LibraryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(LibraryKind::Memory),
            "gmt" => Ok(LibraryKind::Gmt),
            other => Err(Error::Config(format!("unknown library `{other}`"))),
        }
    }
}

/// Parameters for [`Session::create`](crate::Session::create).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub library: LibraryKind,
    /// Session tag reported in native messages.
    pub tag: String,
    /// Grid padding (rows/columns on each side).
    pub pad: u32,
    pub mode: SessionMode,
    /// Native parameter defaults applied right after creation
    /// (`gmtset KEY=VALUE ...`).
    pub defaults: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            library: LibraryKind::default(),
            tag: "gmtnb".into(),
            pad: consts::PAD_DEFAULT,
            mode: SessionMode::default(),
            defaults: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    /// Shorthand for a default config on the given library.
    pub fn for_library(library: LibraryKind) -> Self {
        Self {
            library,
            ..Self::default()
        }
    }

    /// Parse a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    /// Check the values that would otherwise only fail inside the native
    /// create call.
    pub fn validate(&self) -> Result<()> {
        if self.tag.is_empty() || self.tag.contains('\0') {
            return Err(Error::Config(format!("invalid session tag {:?}", self.tag)));
        }
        for (key, value) in &self.defaults {
            let key_ok = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
            if !key_ok {
                return Err(Error::Config(format!("invalid default parameter name {key:?}")));
            }
            if value.is_empty() || value.contains(char::is_whitespace) || value.contains('\0') {
                return Err(Error::Config(format!(
                    "invalid value {value:?} for default parameter {key}"
                )));
            }
        }
        Ok(())
    }

    /// The `gmtset` argument string for [`defaults`](Self::defaults), if any.
    pub(crate) fn defaults_args(&self) -> Option<String> {
        if self.defaults.is_empty() {
            return None;
        }
        let args: Vec<String> = self
            .defaults
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        Some(args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_native_expectations() {
        let config = SessionConfig::default();
        assert_eq!(config.tag, "gmtnb");
        assert_eq!(config.pad, 2);
        assert_eq!(config.mode, SessionMode::EXTERNAL);
        assert!(config.defaults_args().is_none());
    }

    #[test]
    fn yaml_with_mode_flags() {
        let config = SessionConfig::from_yaml(
            "library: memory\ntag: t\npad: 0\nmode: EXTERNAL | COLMAJOR\n",
        )
        .unwrap();
        assert_eq!(config.pad, 0);
        assert_eq!(config.mode, SessionMode::EXTERNAL | SessionMode::COLMAJOR);
    }

    #[test]
    fn yaml_rejects_unknown_fields() {
        let err = SessionConfig::from_yaml("library: memory\nthreads: 4\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err}");
    }

    #[test]
    fn defaults_are_rendered_sorted() {
        let config = SessionConfig::from_yaml(
            "defaults:\n  MAP_FRAME_TYPE: plain\n  FONT_TITLE: 14p\n",
        )
        .unwrap();
        assert_eq!(
            config.defaults_args().as_deref(),
            Some("FONT_TITLE=14p MAP_FRAME_TYPE=plain")
        );
    }

    #[test]
    fn invalid_default_key_rejected() {
        let err = SessionConfig::from_yaml("defaults:\n  font title: 14p\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn library_kind_parses() {
        assert_eq!("memory".parse::<LibraryKind>().unwrap(), LibraryKind::Memory);
        assert!("matlab".parse::<LibraryKind>().is_err());
    }
}
