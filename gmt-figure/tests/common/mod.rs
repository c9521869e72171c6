#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, PoisonError};

use gmt_clib::{MemoryLibrary, Session, SessionConfig};
use gmt_figure::{Figure, Format, Params};

static SERIAL: Mutex<()> = Mutex::new(());

pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Fixture {
    pub library: MemoryLibrary,
    pub figure: Figure,
    _serial: MutexGuard<'static, ()>,
}

/// A figure on a fresh memory library.
pub fn figure() -> Fixture {
    let serial = serial();
    let library = MemoryLibrary::new();
    let session = Session::with_library(Box::new(library.clone()), &SessionConfig::default())
        .unwrap();
    Fixture {
        library,
        figure: Figure::with_session(session).unwrap(),
        _serial: serial,
    }
}

pub fn frame() -> Params {
    Params::new()
        .set("region", [0.0, 10.0, 0.0, 10.0])
        .set("projection", "X10c")
}

/// The finished page as text.
pub fn page(figure: &Figure) -> String {
    String::from_utf8(figure.export(Format::Ps).unwrap()).unwrap()
}
