mod common;

use gmt_clib::*;

#[test]
fn grid_view_is_north_row_first() {
    let fx = common::fixture();
    fx.library.register_resource("ramp.asc", common::ramp_grid(4));
    let grid = fx.session.read_data(Family::Grid, "ramp.asc").unwrap();
    let view = grid.view::<f32>().unwrap();
    assert_eq!(view.dim(), (4, 4));
    assert_eq!(view[[0, 0]], 0.0);
    assert_eq!(view[[3, 2]], 14.0);
    assert!(matches!(
        grid.view::<f64>(),
        Err(Error::ElementType {
            native: ElementType::F32,
            requested: ElementType::F64
        })
    ));
    // converting copy
    let wide = grid.to_array::<f64>().unwrap();
    assert_eq!(wide[[3, 2]], 14.0);
}

#[test]
fn grid_cut_through_open_data() {
    let fx = common::fixture();
    fx.library.register_resource("relief.asc", common::ramp_grid(11));
    let relief = fx.session.read_data(Family::Grid, "relief.asc").unwrap();
    let input = fx.session.open_data(&relief, Geometry::Surface).unwrap();
    let output = fx.session.open_output(Family::Grid, Geometry::Surface).unwrap();
    fx.session
        .invoke_with("grdcut", "-R2/5/3/4", &[&input, &output])
        .unwrap();
    let cut = output.finish().unwrap();
    input.close().unwrap();

    assert_eq!(cut.shape(), (2, 4));
    assert_eq!(cut.region(), Some(Region::new(2.0, 5.0, 3.0, 4.0)));
    // north row of the cut is y = 4, i.e. source row 6
    assert_eq!(cut.view::<f32>().unwrap()[[0, 0]], 68.0);
}

#[test]
fn multi_segment_tables() {
    let fx = common::fixture();
    fx.library
        .register_resource("tracks.txt", "1 10\n2 20\n> second\n3 30\n");
    let table = fx.session.read_data(Family::Dataset, "tracks.txt").unwrap();
    assert_eq!(table.shape(), (3, 2));
    assert_eq!(table.layout().segments, 2);
    assert!(matches!(table.columns::<f64>(), Err(Error::Shape(_))));
    let second = table.segment::<f64>(1).unwrap();
    assert_eq!(second[1].to_vec(), vec![30.0]);
    let all = table.to_array::<f64>().unwrap();
    assert_eq!(all.column(0).to_vec(), vec![1.0, 2.0, 3.0]);
    assert!(matches!(table.view::<f64>(), Err(Error::FamilyMismatch { .. })));
}

#[test]
fn close_destroys_the_native_object() {
    let fx = common::fixture();
    fx.library.register_resource("pts", "0 0\n");
    let table = fx.session.read_data(Family::Dataset, "pts").unwrap();
    assert_eq!(fx.library.stats().live_objects, 1);
    table.close().unwrap();
    assert_eq!(fx.library.stats().live_objects, 0);
}

#[test]
fn handles_from_another_session_are_rejected() {
    let fx = common::fixture();
    let other = Session::with_library(
        Box::new(MemoryLibrary::new().reentrant(true)),
        &SessionConfig::default(),
    )
    .unwrap();
    fx.library.register_resource("pts", "0 0\n");
    let mine = fx.session.read_data(Family::Dataset, "pts").unwrap();
    assert!(matches!(
        other.open_data(&mine, Geometry::Point),
        Err(Error::ForeignHandle(_))
    ));
}

#[test]
fn grid_header_counts_must_be_whole_and_bounded() {
    let fx = common::fixture();
    let body = "\nxllcenter 0\nyllcenter 0\ncellsize 1\n0 1\n2 3\n";
    for (name, header) in [
        ("huge.asc", "ncols 18446744073709551615\nnrows 2"),
        ("fraction.asc", "ncols 2.7\nnrows 2"),
        ("zero.asc", "ncols 2\nnrows 0"),
    ] {
        fx.library.register_resource(name, format!("{header}{body}"));
        match fx.session.read_data(Family::Grid, name) {
            Err(Error::Format { resource, message }) => {
                assert_eq!(resource, name);
                assert!(message.contains("whole number"), "{message}");
            }
            other => panic!("{name}: expected Format, got {other:?}"),
        }
    }
    assert_eq!(fx.library.stats().live_objects, 0);
}

#[test]
fn oversized_grid_is_rejected_without_allocating() {
    let fx = common::fixture();
    fx.library.register_resource(
        "wide.asc",
        "ncols 4294967295\nnrows 4294967295\nxllcenter 0\nyllcenter 0\ncellsize 1\n0\n",
    );
    assert!(matches!(
        fx.session.read_data(Family::Grid, "wide.asc"),
        Err(Error::Format { .. })
    ));
}
