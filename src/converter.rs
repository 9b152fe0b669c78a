use geojson::{Feature, FeatureCollection, Geometry, Value};
use serde_json::{Map, Value as JsonValue};

use crate::geo_types::{Coordinate, ParsedTrack, Placemark, Poi, Route};
use crate::options::{GeoJsonOptions, OutputLayer};
use crate::store::GeoDataStore;

/// Convert one parsed document to a GeoJSON FeatureCollection.
pub fn track_to_feature_collection(track: &ParsedTrack, opts: &GeoJsonOptions) -> FeatureCollection {
    collection(track_features(track, opts))
}

/// Everything the map currently shows: POIs, routes, then imported tracks.
pub fn store_to_feature_collection(store: &GeoDataStore, opts: &GeoJsonOptions) -> FeatureCollection {
    let mut features = Vec::new();

    if opts.should_include(OutputLayer::Poi) {
        features.extend(store.pois().iter().map(|poi| poi_feature(poi, opts)));
    }

    if opts.should_include(OutputLayer::Route) {
        for route in store.routes().iter() {
            features.push(route_feature(route, opts));
        }
    }

    for track in store.tracks().iter() {
        features.extend(track_features(track, opts));
    }

    collection(features)
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn track_features(track: &ParsedTrack, opts: &GeoJsonOptions) -> Vec<Feature> {
    let mut features = Vec::new();

    // A single point is shown by its placemark alone.
    if opts.should_include(OutputLayer::Track) && track.is_renderable() {
        let coords: Vec<Vec<f64>> = track
            .coordinates()
            .map(|c| position(&c, opts.include_altitude))
            .collect();
        let mut props = layer_props(OutputLayer::Track);
        if opts.include_metadata {
            insert_optional(&mut props, "name", track.name());
            props.insert("lengthKm".to_string(), JsonValue::from(track.length_km()));
            props.insert(
                "explicitPath".to_string(),
                JsonValue::Bool(track.source_had_explicit_path()),
            );
        }
        features.push(feature(Value::LineString(coords), props));
    }

    if opts.should_include(OutputLayer::Placemark) {
        features.extend(track.placemarks().iter().map(|p| placemark_feature(p, opts)));
    }

    features
}

fn placemark_feature(placemark: &Placemark, opts: &GeoJsonOptions) -> Feature {
    let mut props = layer_props(OutputLayer::Placemark);
    props.insert("kind".to_string(), JsonValue::from(placemark.kind.as_str()));

    if opts.include_metadata {
        insert_optional(&mut props, "name", placemark.name.as_deref());
        insert_optional(&mut props, "description", placemark.description.as_deref());
        if !placemark.attachments.is_empty() {
            props.insert(
                "attachments".to_string(),
                JsonValue::Array(
                    placemark
                        .attachments
                        .iter()
                        .map(|a| JsonValue::String(a.clone()))
                        .collect(),
                ),
            );
        }
    }

    feature(
        Value::Point(position(&placemark.coordinate, opts.include_altitude)),
        props,
    )
}

fn poi_feature(poi: &Poi, opts: &GeoJsonOptions) -> Feature {
    let mut props = layer_props(OutputLayer::Poi);
    props.insert("id".to_string(), JsonValue::String(poi.id.clone()));
    props.insert("category".to_string(), JsonValue::String(poi.category.clone()));

    if opts.include_metadata {
        props.insert("name".to_string(), JsonValue::String(poi.name.clone()));
        insert_optional(&mut props, "address", poi.address.as_deref());
        insert_optional(&mut props, "description", poi.description.as_deref());
        insert_optional(&mut props, "openingHours", poi.opening_hours.as_deref());
        insert_optional(&mut props, "contactPhone", poi.contact_phone.as_deref());
    }

    feature(
        Value::Point(position(&poi.coordinate, opts.include_altitude)),
        props,
    )
}

/// Routes with a single vertex degrade to a Point.
fn route_feature(route: &Route, opts: &GeoJsonOptions) -> Feature {
    let mut props = layer_props(OutputLayer::Route);
    props.insert("id".to_string(), JsonValue::String(route.id.clone()));
    insert_optional(&mut props, "travelMode", route.travel_mode.as_deref());

    if opts.include_metadata {
        props.insert("name".to_string(), JsonValue::String(route.name.clone()));
        insert_optional(&mut props, "description", route.description.as_deref());
    }

    let mut coords: Vec<Vec<f64>> = route
        .path
        .iter()
        .map(|c| position(c, opts.include_altitude))
        .collect();
    let value = if coords.len() == 1 {
        Value::Point(coords.remove(0))
    } else {
        Value::LineString(coords)
    };
    feature(value, props)
}

fn feature(value: Value, props: Map<String, JsonValue>) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: Some(props),
        foreign_members: None,
    }
}

fn layer_props(layer: OutputLayer) -> Map<String, JsonValue> {
    let mut props = Map::new();
    props.insert(
        "layer".to_string(),
        JsonValue::String(layer.as_str().to_string()),
    );
    props
}

/// Build [lng, lat] or [lng, lat, alt] position array.
fn position(c: &Coordinate, include_altitude: bool) -> Vec<f64> {
    match (include_altitude, c.altitude) {
        (true, Some(alt)) => vec![c.longitude, c.latitude, alt],
        _ => vec![c.longitude, c.latitude],
    }
}

fn insert_optional(props: &mut Map<String, JsonValue>, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        props.insert(key.to_string(), JsonValue::String(v.to_string()));
    }
}
