mod common;

use gmt_clib::{Error as ClibError, Geometry, MemoryLibrary, Session, SessionConfig};
use gmt_figure::{Converter, Error, Figure, Format, Params};
use ndarray::Array1;

#[test]
fn later_calls_inherit_region_and_projection() {
    let fx = common::figure();
    let fig = &fx.figure;
    fig.call("basemap", &common::frame().set("frame", "afg")).unwrap();
    fig.call("logo", &Params::new()).unwrap();

    assert_eq!(fig.region().as_deref(), Some("0/10/0/10"));
    assert_eq!(fig.projection().as_deref(), Some("X10c"));
    assert_eq!(
        fig.history(),
        vec![
            "basemap -R0/10/0/10 -JX10c -Bafg".to_string(),
            "logo -R0/10/0/10 -JX10c".to_string(),
        ]
    );

    let page = common::page(fig);
    assert!(page.contains("%%BeginObject basemap\n% -R0/10/0/10 -JX10c -Bafg\n"));
    assert!(page.contains("%%BeginObject logo\n% -R0/10/0/10 -JX10c\n"));
    assert!(page.ends_with("%%EOF\n"));
}

#[test]
fn repeating_region_and_projection_changes_nothing() {
    let draw = |repeat: bool| {
        let fx = common::figure();
        fx.figure
            .call("basemap", &common::frame().set("frame", true))
            .unwrap();
        let coast = if repeat {
            common::frame().set("land", "gray")
        } else {
            Params::new().set("land", "gray")
        };
        fx.figure.call("coast", &coast).unwrap();
        (fx.figure.history(), common::page(&fx.figure))
    };
    assert_eq!(draw(true), draw(false));
}

#[test]
fn first_drawing_call_needs_region() {
    let fx = common::figure();
    let calls = fx.library.stats().module_calls;
    let err = fx
        .figure
        .call("basemap", &Params::new().set("projection", "X10c"))
        .unwrap_err();
    assert!(matches!(err, Error::MissingParameter { flag: 'R', .. }), "got {err}");
    assert_eq!(fx.library.stats().module_calls, calls);
    assert!(fx.figure.history().is_empty());
}

#[test]
fn unknown_operation_and_parameter() {
    let fx = common::figure();
    assert!(matches!(
        fx.figure.call("grdfoo", &Params::new()),
        Err(Error::UnknownOperation(name)) if name == "grdfoo"
    ));
    assert!(matches!(
        fx.figure.call("basemap", &common::frame().set("colour", "red")),
        Err(Error::UnknownParameter { keyword, .. }) if keyword == "colour"
    ));
}

#[test]
fn failed_call_leaves_figure_usable() {
    let fx = common::figure();
    let err = fx
        .figure
        .call("basemap", &common::frame().set("xshift", "bogus"))
        .unwrap_err();
    assert!(matches!(err, Error::Session(ClibError::Operation { .. })), "got {err}");
    assert_eq!(fx.figure.region(), None);
    fx.figure.call("basemap", &common::frame()).unwrap();
    assert_eq!(fx.figure.history().len(), 1);
}

#[test]
fn drawing_after_finalize_is_rejected() {
    let fx = common::figure();
    fx.figure.call("basemap", &common::frame()).unwrap();
    fx.figure.finalize().unwrap();
    assert!(fx.figure.is_finalized());

    let calls = fx.library.stats().module_calls;
    let err = fx.figure.call("logo", &Params::new()).unwrap_err();
    assert!(matches!(err, Error::SequencerFinalized(ref name) if name == fx.figure.name()));
    assert_eq!(fx.library.stats().module_calls, calls);

    // Output stays available.
    fx.figure.finalize().unwrap();
    assert!(common::page(&fx.figure).contains("%%BeginObject basemap"));
}

#[test]
fn plot_and_text_pass_arrays_through_virtual_files() {
    let fx = common::figure();
    let x = Array1::from(vec![1.0, 5.0, 9.0]);
    let y = Array1::from(vec![2.0, 8.0, 2.0]);
    fx.figure
        .plot(&x, &y, &common::frame().set("style", "c0.3c"))
        .unwrap();
    fx.figure
        .text(&x, &y, "Peak point", &Params::new())
        .unwrap();

    assert_eq!(fx.figure.session().open_file_count(), 0);
    let history = fx.figure.history();
    assert_eq!(history[0], "plot -R0/10/0/10 -JX10c -Sc0.3c");
    assert_eq!(history[1], "text -R0/10/0/10 -JX10c -F+t\"Peak point\"");

    let page = common::page(&fx.figure);
    assert!(page.contains("(Peak point) show"));
    assert_eq!(fx.library.stats().live_objects, 0);
}

#[test]
fn grid_image_reads_a_data_handle() {
    let fx = common::figure();
    fx.library.register_resource(
        "@ramp",
        "ncols 3\nnrows 3\nxllcenter 0\nyllcenter 0\ncellsize 1\n0 1 2\n3 4 5\n6 7 8\n",
    );
    let session = fx.figure.session();
    let grid = session.read_data(gmt_clib::Family::Grid, "@ramp").unwrap();
    fx.figure
        .grid_image(
            "grdimage",
            &grid,
            &Params::new()
                .set("region", [0.0, 2.0, 0.0, 2.0])
                .set("projection", "X4c"),
        )
        .unwrap();
    grid.close().unwrap();
    assert!(common::page(&fx.figure).contains("% grid 3x3 z 0..8"));
}

#[test]
fn shift_origin_moves_later_objects() {
    let fx = common::figure();
    fx.figure.call("basemap", &common::frame()).unwrap();
    fx.figure.shift_origin(2.0, 1.0).unwrap();
    fx.figure.call("logo", &Params::new()).unwrap();
    assert_eq!(fx.figure.history()[1], "plot -R0/10/0/10 -JX10c -T -X2c -Y1c");
    let page = common::page(&fx.figure);
    assert!(page.contains("%%BeginObject plot\n% -R0/10/0/10 -JX10c -T\n"));
}

#[test]
fn leaked_file_is_reported_at_finalize() {
    let fx = common::figure();
    fx.figure.call("basemap", &common::frame()).unwrap();
    let x = Array1::from(vec![1.0, 2.0]);
    let file = fx
        .figure
        .session()
        .open_vectors(&[&x], Geometry::Point)
        .unwrap();
    let name = file.name().to_string();
    std::mem::forget(file);

    match fx.figure.finalize().unwrap_err() {
        Error::Session(ClibError::VirtualFileLeak { operation, names }) => {
            assert_eq!(operation, "end");
            assert_eq!(names, vec![name]);
        }
        other => panic!("expected VirtualFileLeak, got {other}"),
    }
    assert!(fx.figure.is_finalized());
}

#[test]
fn file_left_open_inside_an_operation_is_reported_by_it() {
    let fx = common::figure();
    let x = Array1::from(vec![1.0, 2.0]);
    let outer = fx
        .figure
        .session()
        .open_vectors(&[&x], Geometry::Point)
        .unwrap();

    let mut leaked = String::new();
    let err = fx
        .figure
        .scoped("overlay", |fig| {
            let file = fig.session().open_vectors(&[&x], Geometry::Point)?;
            leaked = file.name().to_string();
            std::mem::forget(file);
            // Fails too; the leak takes precedence.
            fig.call("basemap", &Params::new().set("projection", "X10c"))
        })
        .unwrap_err();
    match err {
        Error::Session(ClibError::VirtualFileLeak { operation, names }) => {
            assert_eq!(operation, "overlay");
            assert_eq!(names, vec![leaked]);
        }
        other => panic!("expected VirtualFileLeak, got {other}"),
    }

    // Files open before an operation starts are not its leaks.
    fx.figure
        .plot(&x, &x, &common::frame().set("style", "c0.1c"))
        .unwrap();
    assert_eq!(fx.figure.session().open_file_count(), 2);
    drop(outer);
}

#[test]
fn grid_operation_rejects_vector_input() {
    let fx = common::figure();
    let x = Array1::from(vec![1.0, 2.0]);
    let file = fx
        .figure
        .session()
        .open_vectors(&[&x, &x], Geometry::Point)
        .unwrap();
    let calls = fx.library.stats().module_calls;
    let err = fx
        .figure
        .call_with("grdimage", &common::frame(), &[&file])
        .unwrap_err();
    assert!(
        matches!(err, Error::Session(ClibError::FamilyMismatch { .. })),
        "got {err}"
    );
    assert_eq!(fx.library.stats().module_calls, calls);
    assert!(fx.figure.history().is_empty());
    file.close().unwrap();
}

#[test]
fn raw_region_and_projection_are_remembered() {
    let fx = common::figure();
    fx.figure
        .call("basemap", &Params::new().raw("-R0/5/0/5").raw("-JX5c"))
        .unwrap();
    fx.figure.call("logo", &Params::new()).unwrap();

    assert_eq!(fx.figure.region().as_deref(), Some("0/5/0/5"));
    assert_eq!(fx.figure.projection().as_deref(), Some("X5c"));
    assert_eq!(
        fx.figure.history(),
        vec![
            "basemap -R0/5/0/5 -JX5c".to_string(),
            "logo -R0/5/0/5 -JX5c".to_string(),
        ]
    );
}

#[test]
fn png_without_converter_is_recoverable() {
    let fx = common::figure();
    fx.figure.call("basemap", &common::frame()).unwrap();
    let converter = Converter::new("definitely-missing-gs");
    let err = fx.figure.export_with(&converter, Format::Png).unwrap_err();
    assert!(matches!(err, Error::ConversionUnavailable { .. }), "got {err}");

    // The figure is finalized but its page is still there.
    assert!(fx.figure.export(Format::Ps).is_ok());
}

#[test]
fn savefig_writes_native_formats() {
    let fx = common::figure();
    fx.figure.call("basemap", &common::frame()).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let ps = dir.path().join("map.ps");
    fx.figure.savefig(&ps).unwrap();
    let text = std::fs::read_to_string(&ps).unwrap();
    assert!(text.starts_with("%!PS-Adobe-3.0\n"));
    assert!(text.ends_with("%%EOF\n"));

    let eps = dir.path().join("map.eps");
    fx.figure.savefig(&eps).unwrap();
    assert!(std::fs::read_to_string(&eps)
        .unwrap()
        .starts_with("%!PS-Adobe-3.0 EPSF-3.0\n"));

    let err = fx.figure.savefig(dir.path().join("map.svg")).unwrap_err();
    assert!(matches!(err, Error::ConversionUnavailable { ref format, .. } if format == "svg"));
    assert!(!dir.path().join("map.svg").exists());
}

#[test]
fn dropping_an_active_figure_ends_it() {
    let _serial = common::serial();
    let library = MemoryLibrary::new();
    let session =
        Session::with_library(Box::new(library.clone()), &SessionConfig::default()).unwrap();
    let fig = Figure::with_session(session).unwrap();
    fig.call("basemap", &common::frame()).unwrap();
    drop(fig);

    let stats = library.stats();
    assert_eq!(stats.sessions_destroyed, 1);
    assert_eq!(stats.live_objects, 0);
    assert!(!gmt_clib::session_active());
}

#[test]
fn begin_failure_destroys_the_session() {
    let _serial = common::serial();
    let library = MemoryLibrary::new();
    let session =
        Session::with_library(Box::new(library.clone()), &SessionConfig::default()).unwrap();
    // An open figure on the session makes the second `begin` fail.
    session.invoke("begin", "other").unwrap();

    let err = Figure::with_session(session).unwrap_err();
    assert!(matches!(err, Error::Session(ClibError::Operation { .. })), "got {err}");
    assert_eq!(library.stats().sessions_destroyed, 1);
    assert!(!gmt_clib::session_active());
}
