use geo::{polygon, MultiPolygon};
use ndarray::Array2;
use ndmosaic::core::statistics::{AmplitudeReference, StatKind, StatRaster, SUM_NODATA};
use ndmosaic::core::tile::{MemorySink, Tile, TileOutcome, TileProcessor};
use ndmosaic::core::TimeSeries;
use ndmosaic::{GeoTransform, IndexKind, MaskedRaster, RunConfig, SceneKey, Season, Window};

const SIZE: usize = 6;

fn grid() -> GeoTransform {
    GeoTransform::from_gdal([0.0, 10.0, 0.0, 60.0, 0.0, -10.0])
}

fn tile() -> Tile {
    Tile {
        window: Window::new(0, 0, SIZE, SIZE),
        transform: grid(),
    }
}

/// Archive value for a month: rises through the season, one step per year
fn archive_value(year: i32, month: u32) -> u8 {
    (20 + month * 5) as u8 + (year - 2016) as u8
}

fn scene(value: u8, nodata: u8, holes: &[(usize, usize)]) -> MaskedRaster<u8> {
    let mut data = Array2::from_elem((SIZE, SIZE), value);
    for &h in holes {
        data[h] = nodata;
    }
    MaskedRaster::from_sentinel(data, nodata, grid(), "EPSG:3067".to_string())
}

/// April to October, 2016 to 2019; `holes` lists the pixels masked per slot
fn archive(nodata: u8, holes: &[(SceneKey, &[(usize, usize)])]) -> TimeSeries {
    let mut series = TimeSeries::new("s2_ndvi");
    for year in 2016..=2019 {
        for month in 4..=10 {
            let key = SceneKey::new(year, month);
            let masked = holes
                .iter()
                .filter(|(k, _)| *k == key)
                .flat_map(|(_, h)| h.iter().copied())
                .collect::<Vec<_>>();
            series.insert(key, scene(archive_value(year, month), nodata, &masked));
        }
    }
    series
}

fn config(index: IndexKind) -> RunConfig {
    RunConfig {
        index,
        archive_years: (2016..=2019).collect(),
        product_years: vec![2018, 2019],
        ..RunConfig::default()
    }
}

fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![
        (x: x0, y: y0),
        (x: x1, y: y0),
        (x: x1, y: y1),
        (x: x0, y: y1),
        (x: x0, y: y0),
    ]])
}

fn everywhere() -> MultiPolygon<f64> {
    square(-100.0, -100.0, 200.0, 200.0)
}

fn written(sink: &MemorySink, year: i32, month: u32) -> &MaskedRaster<u8> {
    let name = format!("s2_ndvi_{}_{:02}.tif", year, month);
    &sink.scenes[&(year, name)]
}

#[test]
fn test_tile_outside_boundary_writes_nothing() {
    let config = config(IndexKind::Ndvi);
    let boundary = square(1000.0, 1000.0, 2000.0, 2000.0);
    let mut sink = MemorySink::default();

    let outcome = TileProcessor::new(&config, &boundary)
        .process(&tile(), &archive(0, &[]), &mut sink)
        .unwrap();

    assert_eq!(outcome, TileOutcome::Outside);
    assert!(sink.discarded);
    assert!(sink.bases.is_empty());
    assert!(sink.scenes.is_empty());
    assert!(sink.statistics.is_empty());
}

#[test]
fn test_tile_touching_boundary_edge_is_skipped() {
    let config = config(IndexKind::Ndvi);
    // Shares the tile's eastern edge at x = 60
    let boundary = square(60.0, -50.0, 120.0, 110.0);
    let mut sink = MemorySink::default();

    let outcome = TileProcessor::new(&config, &boundary)
        .process(&tile(), &archive(0, &[]), &mut sink)
        .unwrap();

    assert_eq!(outcome, TileOutcome::Outside);
    assert!(sink.discarded);
    assert!(sink.scenes.is_empty());
}

#[test]
fn test_inside_tile_writes_every_product() {
    let config = config(IndexKind::Ndvi);
    let boundary = everywhere();
    let mut sink = MemorySink::default();

    let outcome = TileProcessor::new(&config, &boundary)
        .process(&tile(), &archive(0, &[]), &mut sink)
        .unwrap();

    let TileOutcome::Processed(summary) = outcome else {
        panic!("tile should be processed");
    };
    assert!(!summary.clipped);
    assert_eq!(summary.bases, 2);
    assert_eq!(summary.scenes, 14);
    assert_eq!(summary.statistics, 16);
    assert_eq!(summary.unfilled, 0);
    assert!(sink.bases.contains_key(&Season::Spring));
    assert!(sink.bases.contains_key(&Season::Autumn));
    assert_eq!(sink.scenes.len(), 14);
    assert_eq!(sink.statistics.len(), 16);
}

#[test]
fn test_valid_pixels_survive_unchanged() {
    let config = config(IndexKind::Ndvi);
    let boundary = everywhere();
    let holes: &[(usize, usize)] = &[(0, 0), (2, 3), (5, 5)];
    let series = archive(
        0,
        &[
            (SceneKey::new(2018, 7), holes),
            (SceneKey::new(2017, 7), holes),
            (SceneKey::new(2016, 7), holes),
        ],
    );
    let mut sink = MemorySink::default();
    TileProcessor::new(&config, &boundary)
        .process(&tile(), &series, &mut sink)
        .unwrap();

    let out = written(&sink, 2018, 7);
    let input = series.get(SceneKey::new(2018, 7)).unwrap();
    for i in 0..SIZE {
        for j in 0..SIZE {
            if let Some(v) = input.valid(i, j) {
                assert_eq!(out.valid(i, j), Some(v));
            }
        }
    }
    // Interpolated from the constant surroundings
    for &h in holes {
        assert_eq!(out.valid(h.0, h.1), Some(archive_value(2018, 7)));
    }
}

#[test]
fn test_cross_year_fill_takes_maximum() {
    let config = config(IndexKind::Ndvi);
    let boundary = everywhere();
    let series = archive(0, &[(SceneKey::new(2019, 6), &[(2, 2)])]);
    let mut sink = MemorySink::default();
    TileProcessor::new(&config, &boundary)
        .process(&tile(), &series, &mut sink)
        .unwrap();

    // 2018 is brighter than 2017 in this archive
    assert_eq!(written(&sink, 2019, 6).valid(2, 2), Some(archive_value(2018, 6)));
}

#[test]
fn test_spring_base_fills_when_history_is_masked() {
    // No interpolation for this index, so the seasonal base is the first source left
    let config = config(IndexKind::Ndbi);
    let boundary = everywhere();
    let hole: &[(usize, usize)] = &[(3, 3)];
    let series = archive(
        255,
        &[
            (SceneKey::new(2018, 4), hole),
            (SceneKey::new(2017, 4), hole),
            (SceneKey::new(2016, 4), hole),
        ],
    );
    let mut sink = MemorySink::default();
    TileProcessor::new(&config, &boundary)
        .process(&tile(), &series, &mut sink)
        .unwrap();

    // Spring samples at (3, 3): April 2019 and May 2016..2019 -> 43, 45, 46, 47, 48
    assert_eq!(sink.bases[&Season::Spring].valid(3, 3), Some(46));
    assert_eq!(written(&sink, 2018, 4).valid(3, 3), Some(46));
}

#[test]
fn test_autumn_base_fills_october() {
    let config = config(IndexKind::Ndbi);
    let boundary = everywhere();
    let hole: &[(usize, usize)] = &[(3, 3)];
    let series = archive(
        255,
        &[
            (SceneKey::new(2018, 10), hole),
            (SceneKey::new(2017, 10), hole),
            (SceneKey::new(2016, 10), hole),
        ],
    );
    let mut sink = MemorySink::default();
    TileProcessor::new(&config, &boundary)
        .process(&tile(), &series, &mut sink)
        .unwrap();

    // Only October 2019 is left for the autumn median at (3, 3)
    let autumn = archive_value(2019, 10);
    assert_eq!(sink.bases[&Season::Autumn].valid(3, 3), Some(autumn));
    // Spring median at (3, 3) is (43 + 45) / 2
    assert_eq!(sink.bases[&Season::Spring].valid(3, 3), Some(44));
    assert_eq!(written(&sink, 2018, 10).valid(3, 3), Some(autumn));
}

#[test]
fn test_august_filled_from_neighbouring_months() {
    let config = config(IndexKind::Ndbi);
    let boundary = everywhere();
    let hole: &[(usize, usize)] = &[(1, 1)];
    let series = archive(
        255,
        &[
            (SceneKey::new(2018, 8), hole),
            (SceneKey::new(2017, 8), hole),
            (SceneKey::new(2016, 8), hole),
        ],
    );
    let mut sink = MemorySink::default();
    TileProcessor::new(&config, &boundary)
        .process(&tile(), &series, &mut sink)
        .unwrap();

    let july = archive_value(2018, 7) as f64;
    let september = archive_value(2018, 9) as f64;
    let expected = ((july + september) / 2.0).round() as u8;
    assert_eq!(written(&sink, 2018, 8).valid(1, 1), Some(expected));
}

#[test]
fn test_unfillable_pixel_written_as_nodata() {
    let config = config(IndexKind::Ndbi);
    let boundary = everywhere();
    let hole: &[(usize, usize)] = &[(0, 0)];
    let holes: Vec<(SceneKey, &[(usize, usize)])> = (2016..=2019)
        .flat_map(|y| (4..=10).map(move |m| (SceneKey::new(y, m), hole)))
        .collect();
    let mut sink = MemorySink::default();
    let outcome = TileProcessor::new(&config, &boundary)
        .process(&tile(), &archive(255, &holes), &mut sink)
        .unwrap();

    let TileOutcome::Processed(summary) = outcome else {
        panic!("tile should be processed");
    };
    assert_eq!(summary.unfilled, 14);
    let out = written(&sink, 2019, 5);
    assert_eq!(out.valid(0, 0), None);
    assert_eq!(out.to_sentinel_array()[[0, 0]], 255);

    match &sink.statistics[&(2019, StatKind::Sum)] {
        StatRaster::I16(sum) => {
            assert_eq!(sum.to_sentinel_array()[[0, 0]], SUM_NODATA);
            assert!(sum.valid(1, 1).is_some());
        }
        other => panic!("sum should be 16-bit, got {:?}", other.dim()),
    }
}

#[test]
fn test_partial_tile_is_clipped() {
    let config = config(IndexKind::Ndvi);
    // Covers the western half of the tile
    let boundary = square(-50.0, -50.0, 30.0, 110.0);
    let mut sink = MemorySink::default();
    let outcome = TileProcessor::new(&config, &boundary)
        .process(&tile(), &archive(0, &[]), &mut sink)
        .unwrap();

    let TileOutcome::Processed(summary) = outcome else {
        panic!("tile should be processed");
    };
    assert!(summary.clipped);

    let out = written(&sink, 2019, 9);
    assert_eq!(out.dim(), (SIZE, 3));
    assert_eq!(out.transform, grid());
    assert_eq!(out.masked_count(), 0);
    for raster in sink.statistics.values() {
        assert_eq!(raster.dim(), (SIZE, 3));
    }
    // Base mosaics keep the full tile grid
    assert_eq!(sink.bases[&Season::Spring].dim(), (SIZE, SIZE));
}

#[test]
fn test_amplitude_policies() {
    let boundary = everywhere();
    let series = archive(0, &[]);

    let mut sink = MemorySink::default();
    TileProcessor::new(&config(IndexKind::Ndvi), &boundary)
        .process(&tile(), &series, &mut sink)
        .unwrap();
    let StatRaster::I16(amp) = &sink.statistics[&(2019, StatKind::Amplitude)] else {
        panic!("amplitude should be 16-bit");
    };
    // 2019: 43, 48, ..., 73; q25 = 50.5 -> 51
    assert_eq!(amp.valid(0, 0), Some(73 - 51));

    let fixed = RunConfig {
        amplitude: AmplitudeReference::BaseValue,
        ..config(IndexKind::Ndvi)
    };
    let mut sink = MemorySink::default();
    TileProcessor::new(&fixed, &boundary)
        .process(&tile(), &series, &mut sink)
        .unwrap();
    let StatRaster::I16(amp) = &sink.statistics[&(2019, StatKind::Amplitude)] else {
        panic!("amplitude should be 16-bit");
    };
    // 10th percentile of all 28 archive values: 42.7 -> 43
    assert_eq!(amp.valid(0, 0), Some(73 - 43));
}
