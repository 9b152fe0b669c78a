use std::rc::Rc;

use log::debug;

use crate::error::FetchFailure;
use crate::geo_types::{Coordinate, Lane, ParsedTrack, Poi, Route};

/// Items delivered for one lane by a completed fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum LaneData {
    Pois(Vec<Poi>),
    Routes(Vec<Route>),
}

impl LaneData {
    pub fn lane(&self) -> Lane {
        match self {
            LaneData::Pois(_) => Lane::Pois,
            LaneData::Routes(_) => Lane::Routes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LaneData::Pois(items) => items.len(),
            LaneData::Routes(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read view of one lane.
#[derive(Debug, Clone)]
pub enum LaneSnapshot {
    Pois(Rc<[Poi]>),
    Routes(Rc<[Route]>),
}

/// Current geodata for one map session.
///
/// Every collection is held as an `Rc` slice and replaced wholesale, so a
/// snapshot handed to a reader never changes underneath it. Once closed,
/// every write is ignored.
#[derive(Debug)]
pub struct GeoDataStore {
    pois: Rc<[Poi]>,
    routes: Rc<[Route]>,
    tracks: Rc<[Rc<ParsedTrack>]>,
    poi_error: Option<FetchFailure>,
    route_error: Option<FetchFailure>,
    location: Option<Coordinate>,
    recenter: Option<Coordinate>,
    revision: u64,
    closed: bool,
}

impl Default for GeoDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoDataStore {
    pub fn new() -> Self {
        Self {
            pois: Rc::from(Vec::new()),
            routes: Rc::from(Vec::new()),
            tracks: Rc::from(Vec::new()),
            poi_error: None,
            route_error: None,
            location: None,
            recenter: None,
            revision: 0,
            closed: false,
        }
    }

    pub fn snapshot(&self, lane: Lane) -> LaneSnapshot {
        match lane {
            Lane::Pois => LaneSnapshot::Pois(self.pois()),
            Lane::Routes => LaneSnapshot::Routes(self.routes()),
        }
    }

    pub fn pois(&self) -> Rc<[Poi]> {
        Rc::clone(&self.pois)
    }

    pub fn routes(&self) -> Rc<[Route]> {
        Rc::clone(&self.routes)
    }

    pub fn tracks(&self) -> Rc<[Rc<ParsedTrack>]> {
        Rc::clone(&self.tracks)
    }

    /// Replace a lane's contents. There is no merging: the previous
    /// viewport's items are discarded.
    pub fn replace(&mut self, data: LaneData) {
        if self.closed {
            return;
        }
        debug!("Replacing {} with {} items", data.lane().as_str(), data.len());
        match data {
            LaneData::Pois(items) => self.pois = Rc::from(items),
            LaneData::Routes(items) => self.routes = Rc::from(items),
        }
        self.bump();
    }

    /// `None` once the store is closed.
    pub fn append_track(&mut self, track: ParsedTrack) -> Option<Rc<ParsedTrack>> {
        if self.closed {
            debug!("Store closed, dropping imported track");
            return None;
        }
        let track = Rc::new(track);
        let mut tracks: Vec<Rc<ParsedTrack>> = self.tracks.iter().cloned().collect();
        tracks.push(Rc::clone(&track));
        self.tracks = Rc::from(tracks);
        self.bump();
        Some(track)
    }

    pub fn clear_tracks(&mut self) {
        if self.closed || self.tracks.is_empty() {
            return;
        }
        self.tracks = Rc::from(Vec::new());
        self.bump();
    }

    pub fn lane_error(&self, lane: Lane) -> Option<&FetchFailure> {
        match lane {
            Lane::Pois => self.poi_error.as_ref(),
            Lane::Routes => self.route_error.as_ref(),
        }
    }

    pub fn set_lane_error(&mut self, lane: Lane, error: Option<FetchFailure>) {
        let slot = match lane {
            Lane::Pois => &mut self.poi_error,
            Lane::Routes => &mut self.route_error,
        };
        if !self.closed && *slot != error {
            *slot = error;
            self.bump();
        }
    }

    pub fn location(&self) -> Option<Coordinate> {
        self.location
    }

    /// Record the device position and ask the renderer to recentre once.
    pub fn publish_location(&mut self, at: Coordinate) {
        if self.closed {
            debug!("Store closed, dropping position {at:?}");
            return;
        }
        self.location = Some(at);
        self.recenter = Some(at);
        self.bump();
    }

    /// One-shot: a second call returns `None` until the next publish.
    pub fn take_recenter_request(&mut self) -> Option<Coordinate> {
        self.recenter.take()
    }

    /// Stop accepting writes. Readers keep their snapshots.
    pub fn close(&mut self) {
        self.closed = true;
        self.recenter = None;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Increases on every visible change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_document;

    fn poi(id: &str) -> Poi {
        Poi {
            id: id.to_string(),
            name: format!("POI {id}"),
            coordinate: Coordinate::new(39.9, 116.4),
            category: "scenic".to_string(),
            address: None,
            description: None,
            opening_hours: None,
            contact_phone: None,
        }
    }

    #[test]
    fn test_replace_swaps_whole_lane() {
        let mut store = GeoDataStore::new();
        store.replace(LaneData::Pois(vec![poi("1"), poi("2")]));
        store.replace(LaneData::Pois(vec![poi("3")]));
        let pois = store.pois();
        assert_eq!(pois.len(), 1);
        assert_eq!(pois[0].id, "3");
    }

    #[test]
    fn test_old_snapshot_is_unchanged_after_replace() {
        let mut store = GeoDataStore::new();
        store.replace(LaneData::Pois(vec![poi("1"), poi("2")]));
        let before = store.pois();
        store.replace(LaneData::Pois(Vec::new()));
        assert_eq!(before.len(), 2);
        assert!(store.pois().is_empty());
    }

    #[test]
    fn test_lanes_are_independent() {
        let mut store = GeoDataStore::new();
        store.replace(LaneData::Pois(vec![poi("1")]));
        store.replace(LaneData::Routes(Vec::new()));
        match store.snapshot(Lane::Pois) {
            LaneSnapshot::Pois(items) => assert_eq!(items.len(), 1),
            LaneSnapshot::Routes(_) => panic!("wrong lane"),
        }
    }

    #[test]
    fn test_append_track() {
        let mut store = GeoDataStore::new();
        let held = store.tracks();
        let track =
            parse_document("<kml><LineString><coordinates>1,1 2,2</coordinates></LineString></kml>")
                .unwrap();
        store.append_track(track);
        assert!(held.is_empty());
        assert_eq!(store.tracks().len(), 1);
        store.clear_tracks();
        assert!(store.tracks().is_empty());
    }

    #[test]
    fn test_revision_and_errors() {
        let mut store = GeoDataStore::new();
        let r0 = store.revision();
        store.set_lane_error(Lane::Routes, Some(FetchFailure::Http { status: 502 }));
        assert_eq!(store.lane_error(Lane::Routes), Some(&FetchFailure::Http { status: 502 }));
        assert!(store.lane_error(Lane::Pois).is_none());
        assert!(store.revision() > r0);

        let r1 = store.revision();
        store.set_lane_error(Lane::Routes, Some(FetchFailure::Http { status: 502 }));
        assert_eq!(store.revision(), r1);
    }

    #[test]
    fn test_recenter_is_one_shot() {
        let mut store = GeoDataStore::new();
        let here = Coordinate::new(30.0, 120.0);
        store.publish_location(here);
        assert_eq!(store.take_recenter_request(), Some(here));
        assert_eq!(store.take_recenter_request(), None);
        assert_eq!(store.location(), Some(here));
    }

    #[test]
    fn test_closed_store_ignores_writes() {
        let mut store = GeoDataStore::new();
        store.replace(LaneData::Pois(vec![poi("1")]));
        store.close();
        let r0 = store.revision();

        store.replace(LaneData::Pois(vec![poi("2")]));
        store.publish_location(Coordinate::new(30.0, 120.0));
        store.set_lane_error(Lane::Pois, Some(FetchFailure::Cancelled));
        let track =
            parse_document("<kml><LineString><coordinates>1,1 2,2</coordinates></LineString></kml>")
                .unwrap();
        assert!(store.append_track(track).is_none());

        assert!(store.is_closed());
        assert_eq!(store.pois()[0].id, "1");
        assert_eq!(store.location(), None);
        assert_eq!(store.take_recenter_request(), None);
        assert!(store.lane_error(Lane::Pois).is_none());
        assert!(store.tracks().is_empty());
        assert_eq!(store.revision(), r0);
    }
}
