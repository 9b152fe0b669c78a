use serde::{Deserialize, Serialize};

use crate::geo_math;

/// A WGS84 position. Latitude/longitude are in degrees, altitude in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    /// Build a coordinate, rejecting anything outside lat [-90,90] / lng [-180,180].
    /// Out-of-range values are never clamped.
    pub fn checked(latitude: f64, longitude: f64, altitude: Option<f64>) -> Option<Self> {
        let c = Self {
            latitude,
            longitude,
            altitude,
        };
        c.is_valid().then_some(c)
    }

    /// NaN fails both range checks, so it is never valid.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A coordinate plus its position in the owning track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackPoint {
    pub coordinate: Coordinate,
    pub sequence: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacemarkKind {
    Start,
    End,
    Attachment,
    #[default]
    Plain,
}

impl PlacemarkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PlacemarkKind::Start => "start",
            PlacemarkKind::End => "end",
            PlacemarkKind::Attachment => "attachment",
            PlacemarkKind::Plain => "plain",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "start" => Some(PlacemarkKind::Start),
            "end" => Some(PlacemarkKind::End),
            "attachment" => Some(PlacemarkKind::Attachment),
            "plain" => Some(PlacemarkKind::Plain),
            _ => None,
        }
    }
}

/// A named point annotation. Not part of the ordered path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placemark {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub coordinate: Coordinate,
    #[serde(default)]
    pub kind: PlacemarkKind,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl Placemark {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            name: None,
            description: None,
            coordinate,
            kind: PlacemarkKind::Plain,
            attachments: Vec::new(),
        }
    }
}

/// Result of one parse call. Immutable: re-parsing builds a new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedTrack {
    name: Option<String>,
    track_points: Vec<TrackPoint>,
    placemarks: Vec<Placemark>,
    source_had_explicit_path: bool,
    dropped_coordinates: usize,
}

impl ParsedTrack {
    pub(crate) fn new(
        name: Option<String>,
        path: Vec<Coordinate>,
        placemarks: Vec<Placemark>,
        source_had_explicit_path: bool,
        dropped_coordinates: usize,
    ) -> Self {
        let track_points = path
            .into_iter()
            .enumerate()
            .map(|(sequence, coordinate)| TrackPoint {
                coordinate,
                sequence,
            })
            .collect();
        Self {
            name,
            track_points,
            placemarks,
            source_had_explicit_path,
            dropped_coordinates,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn track_points(&self) -> &[TrackPoint] {
        &self.track_points
    }

    pub fn coordinates(&self) -> impl Iterator<Item = Coordinate> + '_ {
        self.track_points.iter().map(|tp| tp.coordinate)
    }

    pub fn placemarks(&self) -> &[Placemark] {
        &self.placemarks
    }

    pub fn source_had_explicit_path(&self) -> bool {
        self.source_had_explicit_path
    }

    /// Coordinates dropped for failing to parse or failing range validation.
    pub fn dropped_coordinates(&self) -> usize {
        self.dropped_coordinates
    }

    pub fn start_point(&self) -> Option<Coordinate> {
        self.track_points.first().map(|tp| tp.coordinate)
    }

    pub fn end_point(&self) -> Option<Coordinate> {
        self.track_points.last().map(|tp| tp.coordinate)
    }

    /// A line needs at least two points.
    pub fn is_renderable(&self) -> bool {
        self.track_points.len() >= 2
    }

    pub fn length_km(&self) -> f64 {
        let coords: Vec<Coordinate> = self.coordinates().collect();
        geo_math::path_length(&coords)
    }
}

/// Point of interest as delivered by the area endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Poi {
    pub id: String,
    pub name: String,
    pub coordinate: Coordinate,
    pub category: String,
    pub address: Option<String>,
    pub description: Option<String>,
    pub opening_hours: Option<String>,
    pub contact_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub name: String,
    pub travel_mode: Option<String>,
    pub description: Option<String>,
    pub path: Vec<Coordinate>,
}

/// The rectangle currently visible on the map surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportBounds {
    pub south_west: Coordinate,
    pub north_east: Coordinate,
}

impl ViewportBounds {
    pub fn new(south_west: Coordinate, north_east: Coordinate) -> Self {
        Self {
            south_west,
            north_east,
        }
    }

    pub fn min_lng(&self) -> f64 {
        self.south_west.longitude
    }

    pub fn min_lat(&self) -> f64 {
        self.south_west.latitude
    }

    pub fn max_lng(&self) -> f64 {
        self.north_east.longitude
    }

    pub fn max_lat(&self) -> f64 {
        self.north_east.latitude
    }

    pub fn is_valid(&self) -> bool {
        self.south_west.is_valid() && self.north_east.is_valid()
    }

    /// Clamp to the world extent. Zoomed-out map surfaces report longitudes
    /// past ±180; the bounds are a query key, not a stored coordinate.
    /// Returns `None` if any component is NaN.
    pub fn clamped(&self) -> Option<Self> {
        let values = [
            self.south_west.latitude,
            self.south_west.longitude,
            self.north_east.latitude,
            self.north_east.longitude,
        ];
        if values.iter().any(|v| v.is_nan()) {
            return None;
        }
        let clamp = |c: &Coordinate| Coordinate {
            latitude: c.latitude.clamp(-90.0, 90.0),
            longitude: c.longitude.clamp(-180.0, 180.0),
            altitude: c.altitude,
        };
        Some(Self {
            south_west: clamp(&self.south_west),
            north_east: clamp(&self.north_east),
        })
    }
}

/// Active user filters. Empty lists mean "everything".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(default)]
    pub poi_types: Vec<String>,
    #[serde(default)]
    pub travel_modes: Vec<String>,
}

impl Filters {
    /// Filter values relevant to `lane`, sorted and deduplicated.
    pub fn canonical_for(&self, lane: Lane) -> Vec<String> {
        let source = match lane {
            Lane::Pois => &self.poi_types,
            Lane::Routes => &self.travel_modes,
        };
        let mut values: Vec<String> = source.iter().map(|v| v.trim().to_string()).collect();
        values.retain(|v| !v.is_empty());
        values.sort();
        values.dedup();
        values
    }
}

/// Independent fetch lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Pois,
    Routes,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Pois, Lane::Routes];

    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Pois => "pois",
            Lane::Routes => "routes",
        }
    }
}
