use std::cell::RefCell;

use log::{debug, info, warn};

use crate::error::{LocationError, LocationErrorKind};
use crate::geo_types::Coordinate;
use crate::options::{LocationConfig, PositionRequest};
use crate::store::GeoDataStore;

/// Device positioning capability.
#[allow(async_fn_in_trait)]
pub trait PositionProvider {
    async fn current_position(&self, request: &PositionRequest) -> Result<Coordinate, LocationError>;
}

/// Resolves the device position through a fallback chain of strategies.
pub struct LocationTracker<P> {
    provider: P,
    config: LocationConfig,
}

impl<P: PositionProvider> LocationTracker<P> {
    pub fn new(provider: P, config: LocationConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Try each strategy in order; the first valid fix wins.
    ///
    /// A permission denial ends the chain immediately since no later
    /// strategy can succeed. Otherwise the last error is returned.
    pub async fn locate(&self) -> Result<Coordinate, LocationError> {
        let mut last_error = LocationError::new(
            LocationErrorKind::Unknown,
            "no positioning strategies configured",
        );

        for (attempt, strategy) in self.config.strategies.iter().enumerate() {
            debug!("Positioning attempt {} with {strategy:?}", attempt + 1);
            match self.provider.current_position(strategy).await {
                Ok(at) if at.is_valid() => {
                    info!("Position resolved on attempt {}", attempt + 1);
                    return Ok(at);
                }
                Ok(at) => {
                    warn!("Positioning returned an out-of-range fix: {at:?}");
                    last_error = LocationError::new(
                        LocationErrorKind::Unavailable,
                        "position out of range",
                    );
                }
                Err(e) if e.kind == LocationErrorKind::PermissionDenied => {
                    warn!("Positioning permission denied");
                    return Err(e);
                }
                Err(e) => {
                    warn!("Positioning attempt {} failed: {e}", attempt + 1);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Resolve the position, publish it to the store and request a single
    /// recentre of the map. A store closed before or during the lookup
    /// yields `Cancelled` and is left untouched.
    pub async fn request_current_location(
        &self,
        store: &RefCell<GeoDataStore>,
    ) -> Result<Coordinate, LocationError> {
        if store.borrow().is_closed() {
            return Err(closed());
        }
        let at = self.locate().await?;

        let mut store = store.borrow_mut();
        if store.is_closed() {
            debug!("Position arrived after teardown, dropping it");
            return Err(closed());
        }
        store.publish_location(at);
        Ok(at)
    }
}

fn closed() -> LocationError {
    LocationError::new(LocationErrorKind::Cancelled, "session torn down")
}
