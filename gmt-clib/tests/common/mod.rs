#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, PoisonError};

use gmt_clib::{MemoryLibrary, Session, SessionConfig};

static SERIAL: Mutex<()> = Mutex::new(());

/// Sessions on a non-reentrant library are process-wide; tests take turns.
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A memory session plus a clone of its library for inspecting counters.
pub struct Fixture {
    pub library: MemoryLibrary,
    pub session: Session,
    _serial: MutexGuard<'static, ()>,
}

pub fn fixture() -> Fixture {
    fixture_with(&SessionConfig::default())
}

pub fn fixture_with(config: &SessionConfig) -> Fixture {
    let serial = serial();
    let (library, session) = memory_session_with(config);
    Fixture {
        library,
        session,
        _serial: serial,
    }
}

/// Unguarded variant for tests that need to move the session; hold
/// [`serial`] while it lives.
pub fn memory_session() -> (MemoryLibrary, Session) {
    memory_session_with(&SessionConfig::default())
}

fn memory_session_with(config: &SessionConfig) -> (MemoryLibrary, Session) {
    let library = MemoryLibrary::new();
    let session = Session::with_library(Box::new(library.clone()), config).unwrap();
    (library, session)
}

/// ESRI ASCII grid of `n × n` nodes over `[0, n-1]²`, value = row * n + col.
pub fn ramp_grid(n: usize) -> String {
    let mut text = format!("ncols {n}\nnrows {n}\nxllcenter 0\nyllcenter 0\ncellsize 1\n");
    for row in 0..n {
        let line: Vec<String> = (0..n).map(|col| (row * n + col).to_string()).collect();
        text.push_str(&line.join(" "));
        text.push('\n');
    }
    text
}
