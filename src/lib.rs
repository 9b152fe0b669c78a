pub mod api;
pub mod browser;
pub mod cancel;
pub mod converter;
pub mod error;
pub mod geo_math;
pub mod geo_types;
pub mod location;
pub mod options;
pub mod parser;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod writer;

use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::sync::Once;

use js_sys::Promise;
use log::{info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};

use crate::browser::{BrowserGeolocation, BrowserTransport};
use crate::geo_types::{Coordinate, Filters, Lane, ViewportBounds};
use crate::options::{GeoJsonOptions, ParseOptions, SessionConfig};
use crate::session::GeoSession;
use crate::writer::RouteDocument;

static START: Once = Once::new();

fn init() {
    if !cfg!(test) {
        START.call_once(|| {
            // Fails only if the host already installed a logger.
            let _ = console_log::init_with_level(log::Level::Info);
        });
        // Panics shouldn't happen, but if they do, console.log them.
        console_error_panic_hook::set_once();
    }
}

/// Parse a KML document into a track, returned as a JS object.
#[wasm_bindgen(js_name = parseKml)]
pub fn parse_kml(kml_string: &str, options: JsValue) -> Result<JsValue, JsValue> {
    init();

    let opts: ParseOptions = from_js(options)?;
    let track = parser::parse_document_with(kml_string, &opts)?;
    to_js(&track)
}

/// Convert a KML document to GeoJSON, returned as a JS object.
#[wasm_bindgen(js_name = kmlToGeoJson)]
pub fn kml_to_geojson(kml_string: &str, options: JsValue) -> Result<JsValue, JsValue> {
    init();

    let opts: GeoJsonOptions = from_js(options)?;
    let track = parser::parse_document(kml_string)?;
    let fc = converter::track_to_feature_collection(&track, &opts);
    to_js(&fc)
}

/// Convert a KML document to GeoJSON, returned as a JSON string.
#[wasm_bindgen(js_name = kmlToGeoJsonString)]
pub fn kml_to_geojson_string(kml_string: &str, options: JsValue) -> Result<String, JsValue> {
    init();

    let opts: GeoJsonOptions = from_js(options)?;
    let track = parser::parse_document(kml_string)?;
    let fc = converter::track_to_feature_collection(&track, &opts);
    serde_json::to_string(&fc).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Serialise a `{ name, description, path, placemarks }` object as KML.
#[wasm_bindgen(js_name = writeKml)]
pub fn write_kml(document: JsValue) -> Result<String, JsValue> {
    init();

    let doc: RouteDocument = from_js(document)?;
    Ok(writer::write_kml(&doc)?)
}

/// Great-circle distance in kilometres.
#[wasm_bindgen(js_name = distanceKm)]
pub fn distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    geo_math::distance(Coordinate::new(lat1, lng1), Coordinate::new(lat2, lng2))
}

type BrowserSession = GeoSession<BrowserTransport, BrowserGeolocation>;

struct Shared {
    session: BrowserSession,
    timer: Cell<Option<i32>>,
}

/// A map surface's data session. Call `teardown()` when the map unmounts.
#[wasm_bindgen]
pub struct MapSession {
    shared: Rc<Shared>,
}

#[wasm_bindgen]
impl MapSession {
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<MapSession, JsValue> {
        init();

        let config: SessionConfig = from_js(config)?;
        info!("Starting map session against {}", config.api_base_url);
        let session = GeoSession::new(config, BrowserTransport, BrowserGeolocation)?;
        Ok(MapSession {
            shared: Rc::new(Shared {
                session,
                timer: Cell::new(None),
            }),
        })
    }

    #[wasm_bindgen(js_name = onViewportChanged)]
    pub fn on_viewport_changed(&self, south: f64, west: f64, north: f64, east: f64) -> bool {
        let bounds = ViewportBounds::new(Coordinate::new(south, west), Coordinate::new(north, east));
        let accepted = self.shared.session.viewport_changed(bounds, browser::now());
        if accepted {
            arm_timer(&self.shared);
        }
        accepted
    }

    /// `filters` is `{ poiTypes?: string[], travelModes?: string[] }`.
    #[wasm_bindgen(js_name = onFiltersChanged)]
    pub fn on_filters_changed(&self, filters: JsValue) -> Result<bool, JsValue> {
        let filters: Filters = from_js(filters)?;
        let accepted = self.shared.session.filters_changed(&filters, browser::now());
        if accepted {
            arm_timer(&self.shared);
        }
        Ok(accepted)
    }

    /// Parse a local document and add it to the map. Returns the track.
    #[wasm_bindgen(js_name = importDocument)]
    pub fn import_document(&self, kml_string: &str) -> Result<JsValue, JsValue> {
        let track = self.shared.session.import_document(kml_string)?;
        to_js(track.as_ref())
    }

    /// Download a shared document by id and add it to the map.
    #[wasm_bindgen(js_name = importSharedDocument)]
    pub fn import_shared_document(&self, id: String) -> Promise {
        let shared = Rc::clone(&self.shared);
        future_to_promise(async move {
            let track = shared.session.import_remote_document(&id).await?;
            to_js(track.as_ref())
        })
    }

    #[wasm_bindgen(js_name = listPublicDocuments)]
    pub fn list_public_documents(&self, page: u32, size: u32) -> Promise {
        let shared = Rc::clone(&self.shared);
        future_to_promise(async move {
            let page = shared.session.list_public_documents(page, size).await?;
            to_js(&page)
        })
    }

    #[wasm_bindgen(js_name = clearTracks)]
    pub fn clear_tracks(&self) {
        self.shared.session.clear_tracks();
    }

    /// Resolve the device position and request a recentre.
    pub fn locate(&self) -> Promise {
        let shared = Rc::clone(&self.shared);
        future_to_promise(async move {
            let at = shared.session.locate().await?;
            to_js(&at)
        })
    }

    /// The pending recentre target, consumed on read.
    #[wasm_bindgen(js_name = takeRecenterRequest)]
    pub fn take_recenter_request(&self) -> Result<JsValue, JsValue> {
        match self.shared.session.take_recenter_request() {
            Some(at) => to_js(&at),
            None => Ok(JsValue::UNDEFINED),
        }
    }

    /// Current store contents as a GeoJSON FeatureCollection.
    #[wasm_bindgen(js_name = toGeoJson)]
    pub fn to_geojson(&self, options: JsValue) -> Result<JsValue, JsValue> {
        let opts: GeoJsonOptions = from_js(options)?;
        let fc = converter::store_to_feature_collection(&self.shared.session.store(), &opts);
        to_js(&fc)
    }

    /// Banner text for a lane (`"pois"` or `"routes"`), if its last fetch failed.
    #[wasm_bindgen(js_name = laneError)]
    pub fn lane_error(&self, lane: &str) -> Result<Option<String>, JsValue> {
        let lane = match lane {
            "pois" => Lane::Pois,
            "routes" => Lane::Routes,
            other => return Err(JsValue::from_str(&format!("Unknown lane: {other}"))),
        };
        Ok(self
            .shared
            .session
            .store()
            .lane_error(lane)
            .map(|e| e.to_string()))
    }

    /// Increases on every store change; poll it to know when to redraw.
    pub fn revision(&self) -> f64 {
        self.shared.session.store().revision() as f64
    }

    pub fn teardown(&self) {
        if let Some(handle) = self.shared.timer.take() {
            browser::clear_timeout(handle);
        }
        self.shared.session.teardown();
    }
}

/// (Re)arm the single debounce timer for the earliest lane deadline.
fn arm_timer(shared: &Rc<Shared>) {
    if let Some(handle) = shared.timer.take() {
        browser::clear_timeout(handle);
    }
    let Some(deadline) = shared.session.next_deadline() else {
        return;
    };
    let delay = deadline.saturating_sub(browser::now());
    let weak: Weak<Shared> = Rc::downgrade(shared);
    let armed = browser::set_timeout(delay, move || {
        if let Some(shared) = weak.upgrade() {
            pump(&shared);
        }
    });
    match armed {
        Ok(handle) => shared.timer.set(Some(handle)),
        Err(e) => warn!("Could not arm debounce timer: {e:?}"),
    }
}

fn pump(shared: &Rc<Shared>) {
    shared.timer.set(None);
    for command in shared.session.due_commands(browser::now()) {
        let shared = Rc::clone(shared);
        spawn_local(async move {
            shared.session.run_fetch(command).await;
        });
    }
    // Timers may fire early; re-arm for whatever is still pending.
    arm_timer(shared);
}

fn from_js<T: DeserializeOwned + Default>(value: JsValue) -> Result<T, JsValue> {
    if value.is_undefined() || value.is_null() {
        Ok(T::default())
    } else {
        serde_wasm_bindgen::from_value(value).map_err(|e| JsValue::from_str(&e.to_string()))
    }
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&e.to_string()))
}
