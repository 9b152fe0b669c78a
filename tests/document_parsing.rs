use geojson::Value;
use geosync_wasm::converter::track_to_feature_collection;
use geosync_wasm::error::MalformedDocumentError;
use geosync_wasm::geo_types::{ParsedTrack, PlacemarkKind};
use geosync_wasm::options::{GeoJsonOptions, ParseOptions};
use geosync_wasm::parser::{parse_document, parse_document_with};
use geosync_wasm::writer::{RouteDocument, write_kml};

fn load_fixture(path: &str) -> String {
    std::fs::read_to_string(format!("tests/fixtures/{path}")).unwrap()
}

fn parse(path: &str) -> ParsedTrack {
    parse_document(&load_fixture(path)).unwrap()
}

fn longitudes(track: &ParsedTrack) -> Vec<f64> {
    track.coordinates().map(|c| c.longitude).collect()
}

#[test]
fn test_explicit_path_with_annotations() {
    let track = parse("west_lake.kml");

    assert_eq!(track.name(), Some("West Lake loop"));
    assert!(track.source_had_explicit_path());
    assert_eq!(longitudes(&track), vec![120.148, 120.1552, 120.1615, 120.1582]);
    assert_eq!(track.start_point().unwrap().altitude, Some(8.0));
    assert_eq!(track.dropped_coordinates(), 0);

    let kinds: Vec<PlacemarkKind> = track.placemarks().iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![PlacemarkKind::Start, PlacemarkKind::Attachment, PlacemarkKind::End]
    );

    let bridge = &track.placemarks()[1];
    assert_eq!(bridge.name.as_deref(), Some("Broken Bridge"));
    assert_eq!(bridge.description.as_deref(), Some("Snow on the bridge"));
    assert_eq!(
        bridge.attachments,
        vec![
            "https://files.example.com/bridge.jpg".to_string(),
            "https://files.example.com/bridge-2.jpg".to_string(),
        ]
    );
}

#[test]
fn test_annotations_reordered_when_no_path() {
    let track = parse("scattered_points.kml");

    assert!(!track.source_had_explicit_path());
    assert_eq!(longitudes(&track), vec![120.1, 120.11, 120.12, 120.13]);
    // Annotations themselves stay in document order.
    let names: Vec<&str> = track
        .placemarks()
        .iter()
        .filter_map(|p| p.name.as_deref())
        .collect();
    assert_eq!(names, vec!["Longjing", "Meijiawu", "Hupao", "Yunqi"]);
}

#[test]
fn test_many_annotations_keep_document_order() {
    let track = parse("many_points.kml");

    assert!(!track.source_had_explicit_path());
    assert_eq!(track.track_points().len(), 11);
    assert_eq!(
        longitudes(&track),
        vec![120.13, 120.1, 120.17, 120.11, 120.19, 120.14, 120.2, 120.12, 120.16, 120.18, 120.15]
    );
}

#[test]
fn test_reorder_cap_is_configurable() {
    let opts = ParseOptions {
        reorder_max_points: 11,
        ..Default::default()
    };
    let track = parse_document_with(&load_fixture("many_points.kml"), &opts).unwrap();
    let lngs = longitudes(&track);
    assert_eq!(lngs.len(), 11);
    assert_eq!(lngs[0], 120.13);
    // Second hop goes to a neighbour 0.01° away, not to document-order 120.1.
    assert!((lngs[1] - 120.13).abs() < 0.015);

    let mut sorted = lngs.clone();
    sorted.sort_by(f64::total_cmp);
    let mut expected = longitudes(&parse("many_points.kml"));
    expected.sort_by(f64::total_cmp);
    assert_eq!(sorted, expected);
}

#[test]
fn test_gx_track() {
    let track = parse("gx_track.kml");

    assert_eq!(track.name(), Some("Morning ride"));
    assert!(track.source_had_explicit_path());
    assert_eq!(longitudes(&track), vec![116.39, 116.4, 116.41]);
    assert_eq!(track.end_point().unwrap().altitude, Some(47.0));
    assert_eq!(track.dropped_coordinates(), 1);
    assert!(track.placemarks().is_empty());
}

#[test]
fn test_invalid_coordinates_are_dropped() {
    let track = parse("invalid_coordinates.kml");

    assert_eq!(longitudes(&track), vec![120.1, 120.3]);
    assert_eq!(track.dropped_coordinates(), 3);
    assert!(track.is_renderable());
}

#[test]
fn test_truncated_document_is_malformed() {
    let err = parse_document(&load_fixture("truncated.kml")).unwrap_err();
    assert!(matches!(
        err,
        MalformedDocumentError::UnexpectedEof | MalformedDocumentError::Xml(_)
    ));
}

#[test]
fn test_geojson_from_fixture() {
    let track = parse("west_lake.kml");
    let fc = track_to_feature_collection(&track, &GeoJsonOptions::default());

    assert_eq!(fc.features.len(), 4);
    match &fc.features[0].geometry.as_ref().unwrap().value {
        Value::LineString(coords) => {
            assert_eq!(coords.len(), 4);
            assert_eq!(coords[0], vec![120.148, 30.259, 8.0]);
        }
        _ => panic!("Expected LineString"),
    }
    let props = fc.features[0].properties.as_ref().unwrap();
    assert_eq!(props["layer"], "track");
    assert!(props["lengthKm"].as_f64().unwrap() > 1.0);

    let bridge = fc.features[2].properties.as_ref().unwrap();
    assert_eq!(bridge["kind"], "attachment");
    assert_eq!(bridge["attachments"].as_array().unwrap().len(), 2);
}

#[test]
fn test_fixture_survives_write_and_reparse() {
    let original = parse("west_lake.kml");
    let kml = write_kml(&RouteDocument::from_track(&original)).unwrap();
    let reparsed = parse_document(&kml).unwrap();

    assert_eq!(reparsed.name(), original.name());
    assert_eq!(reparsed.track_points(), original.track_points());
    assert_eq!(reparsed.placemarks(), original.placemarks());
}

#[test]
fn test_reconstructed_track_written_as_explicit_path() {
    let original = parse("scattered_points.kml");
    let kml = write_kml(&RouteDocument::from_track(&original)).unwrap();
    let reparsed = parse_document(&kml).unwrap();

    assert!(reparsed.source_had_explicit_path());
    assert_eq!(longitudes(&reparsed), longitudes(&original));
    // startPoint/endPoint are added because the source had none.
    let kinds: Vec<PlacemarkKind> = reparsed.placemarks().iter().map(|p| p.kind).collect();
    assert_eq!(kinds[0], PlacemarkKind::Start);
    assert_eq!(kinds[1], PlacemarkKind::End);
    assert_eq!(reparsed.placemarks().len(), 6);
}
