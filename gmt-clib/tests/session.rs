mod common;

use gmt_clib::*;

#[test]
fn second_session_is_rejected_before_native_create() {
    let fx = common::fixture();
    let other = MemoryLibrary::new();
    let err = Session::with_library(Box::new(other.clone()), &SessionConfig::default()).unwrap_err();
    assert!(matches!(err, Error::ConcurrentSession), "got {err}");
    assert_eq!(other.stats().create_attempts, 0);
    assert!(fx.session.is_active());
}

#[test]
fn guard_is_released_after_close() {
    let _serial = common::serial();
    let library = MemoryLibrary::new();
    let first = Session::with_library(Box::new(library.clone()), &SessionConfig::default()).unwrap();
    assert!(session_active());
    first.close().unwrap();
    assert!(!session_active());

    let second = Session::with_library(Box::new(library.clone()), &SessionConfig::default()).unwrap();
    drop(second);
    let stats = library.stats();
    assert_eq!(stats.sessions_created, 2);
    assert_eq!(stats.sessions_destroyed, 2);
}

#[test]
fn reentrant_library_skips_the_guard() {
    let library = MemoryLibrary::new().reentrant(true);
    let a = Session::with_library(Box::new(library.clone()), &SessionConfig::default()).unwrap();
    let b = Session::with_library(Box::new(library.clone()), &SessionConfig::default()).unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(library.stats().sessions_created, 2);
}

#[test]
fn null_session_is_an_initialization_error() {
    let _serial = common::serial();
    let library = MemoryLibrary::new();
    library.fail_next_create();
    let err = Session::with_library(Box::new(library.clone()), &SessionConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Initialization { .. }), "got {err}");
    assert!(!session_active());
}

#[test]
fn failed_invoke_leaves_session_usable() {
    let fx = common::fixture();
    let err = fx.session.invoke("grdfoo", "-R0/1/0/1").unwrap_err();
    match err {
        Error::Operation {
            operation,
            status,
            message,
        } => {
            assert_eq!(operation, "grdfoo");
            assert_ne!(status, 0);
            assert!(message.contains("grdfoo"), "message: {message}");
        }
        other => panic!("expected Operation, got {other}"),
    }
    fx.session.invoke("gmtset", "MAP_FRAME_TYPE=plain").unwrap();
    assert!(fx.session.is_active());
}

#[test]
fn configured_defaults_are_applied_at_create() {
    let config = SessionConfig::from_yaml("library: memory\ndefaults:\n  FONT_TITLE: 14p\n").unwrap();
    let fx = common::fixture_with(&config);
    // gmtset plus nothing else
    assert_eq!(fx.library.stats().module_calls, 1);
}

#[test]
fn info_reflects_config() {
    let config = SessionConfig {
        tag: "survey".into(),
        pad: 1,
        ..SessionConfig::for_library(LibraryKind::Memory)
    };
    let fx = common::fixture_with(&config);
    let info = fx.session.info().unwrap();
    assert_eq!(info.tag, "survey");
    assert_eq!(info.pad, 1);
    assert_eq!(info.version.major, 6);
    let map = info.to_map();
    assert_eq!(map["gmt_version_minor"], "5");
    assert_eq!(map["mode"], "0x2");
}

#[test]
fn raster_resource_reports_shape_and_region() {
    let fx = common::fixture();
    fx.library.register_resource("relief.asc", common::ramp_grid(11));
    let grid = fx.session.read_data(Family::Grid, "relief.asc").unwrap();
    assert_eq!(grid.shape(), (11, 11));
    assert_eq!(grid.region(), Some(Region::new(0.0, 10.0, 0.0, 10.0)));
    let layout = grid.layout();
    assert_eq!(layout.increment, Some([1.0, 1.0]));
    assert_eq!(layout.registration, Registration::Gridline);
    assert_eq!(layout.element, ElementType::F32);
    assert_eq!(layout.pad, [2; 4]);
}

#[test]
fn missing_and_malformed_resources_are_distinguished() {
    let fx = common::fixture();
    let err = fx.session.read_data(Family::Grid, "no/such/file.asc").unwrap_err();
    assert!(matches!(err, Error::ResourceNotFound { .. }), "got {err}");

    fx.library.register_resource("bad.asc", "ncols 2\nnrows 2\n1 2 3\n");
    let err = fx.session.read_data(Family::Grid, "bad.asc").unwrap_err();
    match err {
        Error::Format { resource, message } => {
            assert_eq!(resource, "bad.asc");
            assert!(!message.is_empty());
        }
        other => panic!("expected Format, got {other}"),
    }
    assert_eq!(fx.library.stats().live_objects, 0);
}

#[test]
fn resources_are_read_from_disk() {
    let fx = common::fixture();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("points.txt");
    std::fs::write(&path, "# x y\n1 2\n3 4\n5 6\n").unwrap();
    let table = fx
        .session
        .read_data(Family::Dataset, path.to_str().unwrap())
        .unwrap();
    assert_eq!(table.shape(), (3, 2));
    let columns = table.columns::<f64>().unwrap();
    assert_eq!(columns[1].to_vec(), vec![2.0, 4.0, 6.0]);
}

#[test]
fn close_reports_destroy_once() {
    let _serial = common::serial();
    let library = MemoryLibrary::new();
    let session = Session::with_library(Box::new(library.clone()), &SessionConfig::default()).unwrap();
    session.invoke("gmtset", "FONT_LABEL=10p").unwrap();
    session.close().unwrap();
    assert_eq!(library.stats().sessions_destroyed, 1);
}
