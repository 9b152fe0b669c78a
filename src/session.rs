use std::cell::{Ref, RefCell};
use std::rc::Rc;

use log::{info, warn};

use crate::api::{DocumentPage, GeoApi, Transport};
use crate::error::{FetchFailure, LocationError, MalformedDocumentError};
use crate::geo_types::{Coordinate, Filters, ParsedTrack, ViewportBounds};
use crate::location::{LocationTracker, PositionProvider};
use crate::options::{ParseOptions, SessionConfig};
use crate::parser;
use crate::scheduler::{Completion, FetchCommand, Millis, ViewportFetchScheduler};
use crate::store::GeoDataStore;

/// A failed document import.
#[derive(Debug)]
pub enum ImportError {
    Fetch(FetchFailure),
    Malformed(MalformedDocumentError),
    /// The session was torn down.
    Closed,
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "{e}"),
            Self::Malformed(e) => write!(f, "{e}"),
            Self::Closed => write!(f, "Session torn down"),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<FetchFailure> for ImportError {
    fn from(e: FetchFailure) -> Self {
        Self::Fetch(e)
    }
}

impl From<MalformedDocumentError> for ImportError {
    fn from(e: MalformedDocumentError) -> Self {
        Self::Malformed(e)
    }
}

impl From<ImportError> for wasm_bindgen::JsValue {
    fn from(e: ImportError) -> Self {
        wasm_bindgen::JsValue::from_str(&e.to_string())
    }
}

/// One map surface: scheduler, store, API client and location tracker.
///
/// The session owns no clock and spawns nothing. The host calls
/// [`GeoSession::due_commands`] once [`GeoSession::next_deadline`] passes
/// and awaits [`GeoSession::run_fetch`] for each command, concurrently if
/// it likes. No `RefCell` borrow is held across an await.
pub struct GeoSession<T, P> {
    scheduler: RefCell<ViewportFetchScheduler>,
    store: RefCell<GeoDataStore>,
    api: GeoApi<T>,
    tracker: LocationTracker<P>,
    parse: ParseOptions,
}

impl<T: Transport, P: PositionProvider> GeoSession<T, P> {
    pub fn new(config: SessionConfig, transport: T, provider: P) -> Result<Self, FetchFailure> {
        let api = GeoApi::new(&config.api_base_url, transport)?;
        Ok(Self {
            scheduler: RefCell::new(ViewportFetchScheduler::new(config.scheduler)),
            store: RefCell::new(GeoDataStore::new()),
            api,
            tracker: LocationTracker::new(provider, config.location),
            parse: config.parse,
        })
    }

    pub fn store(&self) -> Ref<'_, GeoDataStore> {
        self.store.borrow()
    }

    pub fn scheduler(&self) -> Ref<'_, ViewportFetchScheduler> {
        self.scheduler.borrow()
    }

    pub fn api(&self) -> &GeoApi<T> {
        &self.api
    }

    pub fn viewport_changed(&self, bounds: ViewportBounds, now: Millis) -> bool {
        let mut scheduler = self.scheduler.borrow_mut();
        let filters = scheduler.filters().clone();
        scheduler.on_viewport_changed(bounds, &filters, now)
    }

    pub fn filters_changed(&self, filters: &Filters, now: Millis) -> bool {
        self.scheduler.borrow_mut().on_filters_changed(filters, now)
    }

    pub fn next_deadline(&self) -> Option<Millis> {
        self.scheduler.borrow().next_deadline()
    }

    pub fn due_commands(&self, now: Millis) -> Vec<FetchCommand> {
        self.scheduler.borrow_mut().poll(now)
    }

    /// Execute one command and feed its outcome back to the scheduler.
    pub async fn run_fetch(&self, command: FetchCommand) -> Completion {
        let result = self.api.fetch_area(&command.request, &command.cancel).await;
        let mut store = self.store.borrow_mut();
        self.scheduler
            .borrow_mut()
            .on_fetch_completed(command.lane, command.seq, result, &mut store)
    }

    /// Parse a document and add it to the imported tracks.
    pub fn import_document(&self, text: &str) -> Result<Rc<ParsedTrack>, ImportError> {
        if self.store.borrow().is_closed() {
            return Err(ImportError::Closed);
        }
        let track = parser::parse_document_with(text, &self.parse)?;
        info!(
            "Imported document with {} path points and {} placemarks",
            track.track_points().len(),
            track.placemarks().len()
        );
        self.store
            .borrow_mut()
            .append_track(track)
            .ok_or(ImportError::Closed)
    }

    /// Download a shared document by id and import it. The store is
    /// checked again once the download lands.
    pub async fn import_remote_document(&self, id: &str) -> Result<Rc<ParsedTrack>, ImportError> {
        if self.store.borrow().is_closed() {
            return Err(ImportError::Closed);
        }
        let text = self.api.download_document(id).await?;
        self.import_document(&text).inspect_err(|e| {
            if let ImportError::Malformed(e) = e {
                warn!("Document {id} could not be parsed: {e}");
            }
        })
    }

    pub async fn list_public_documents(&self, page: u32, size: u32) -> Result<DocumentPage, FetchFailure> {
        self.api.list_public_documents(page, size).await
    }

    pub fn clear_tracks(&self) {
        self.store.borrow_mut().clear_tracks();
    }

    pub async fn locate(&self) -> Result<Coordinate, LocationError> {
        self.tracker.request_current_location(&self.store).await
    }

    pub fn take_recenter_request(&self) -> Option<Coordinate> {
        self.store.borrow_mut().take_recenter_request()
    }

    /// Cancel in-flight fetches and close the store. Later viewport events,
    /// imports and position fixes are refused.
    pub fn teardown(&self) {
        self.scheduler.borrow_mut().teardown();
        self.store.borrow_mut().close();
    }
}
