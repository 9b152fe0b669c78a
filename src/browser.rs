//! Browser implementations of the I/O seams: `fetch` with an
//! `AbortController`, `navigator.geolocation`, and `setTimeout`.

use js_sys::{Function, Promise};
use url::Url;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    AbortController, Position, PositionError, PositionOptions, Request, RequestInit, Response,
};

use crate::api::Transport;
use crate::cancel::CancelToken;
use crate::error::{FetchFailure, LocationError, LocationErrorKind};
use crate::geo_types::Coordinate;
use crate::location::PositionProvider;
use crate::options::PositionRequest;
use crate::scheduler::Millis;

/// `window.fetch`, aborted through the request's cancel token.
#[derive(Debug, Default)]
pub struct BrowserTransport;

impl Transport for BrowserTransport {
    async fn get(&self, url: &Url, cancel: &CancelToken) -> Result<String, FetchFailure> {
        let window = web_sys::window().ok_or_else(|| FetchFailure::Network("no window".into()))?;

        let controller = AbortController::new().map_err(network_failure)?;
        let opts = RequestInit::new();
        opts.set_method("GET");
        opts.set_signal(Some(&controller.signal()));
        let request = Request::new_with_str_and_init(url.as_str(), &opts).map_err(network_failure)?;
        cancel.on_cancel(move || controller.abort());

        let response = match JsFuture::from(window.fetch_with_request(&request)).await {
            Ok(value) => value,
            Err(_) if cancel.is_cancelled() => return Err(FetchFailure::Cancelled),
            Err(e) => return Err(network_failure(e)),
        };
        let response: Response = response
            .dyn_into()
            .map_err(|_| FetchFailure::Network("fetch did not resolve to a Response".into()))?;
        if !response.ok() {
            return Err(FetchFailure::Http {
                status: response.status(),
            });
        }

        let body = match JsFuture::from(response.text().map_err(network_failure)?).await {
            Ok(body) => body,
            Err(_) if cancel.is_cancelled() => return Err(FetchFailure::Cancelled),
            Err(e) => return Err(network_failure(e)),
        };
        body.as_string()
            .ok_or_else(|| FetchFailure::Decode("response body is not text".into()))
    }
}

fn network_failure(e: JsValue) -> FetchFailure {
    FetchFailure::Network(format!("{e:?}"))
}

/// `navigator.geolocation.getCurrentPosition`.
#[derive(Debug, Default)]
pub struct BrowserGeolocation;

impl PositionProvider for BrowserGeolocation {
    async fn current_position(&self, request: &PositionRequest) -> Result<Coordinate, LocationError> {
        let geolocation = web_sys::window()
            .ok_or_else(|| LocationError::new(LocationErrorKind::Unavailable, "no window"))?
            .navigator()
            .geolocation()
            .map_err(|_| {
                LocationError::new(LocationErrorKind::Unavailable, "geolocation not supported")
            })?;

        let options = PositionOptions::new();
        options.set_enable_high_accuracy(request.high_accuracy);
        options.set_timeout(request.timeout_ms);
        options.set_maximum_age(request.maximum_age_ms);

        let promise = Promise::new(&mut |resolve, reject| {
            if let Err(e) = geolocation.get_current_position_with_error_callback_and_options(
                &resolve,
                Some(&reject),
                &options,
            ) {
                let _ = reject.call1(&JsValue::NULL, &e);
            }
        });

        // The DOM interfaces are named GeolocationPosition(Error) at runtime,
        // so cast by shape instead of `instanceof`.
        match JsFuture::from(promise).await {
            Ok(value) if has_property(&value, "coords") => {
                let position: Position = value.unchecked_into();
                let coords = position.coords();
                let mut at = Coordinate::new(coords.latitude(), coords.longitude());
                at.altitude = coords.altitude();
                Ok(at)
            }
            Ok(_) => Err(LocationError::new(
                LocationErrorKind::Unknown,
                "unexpected position value",
            )),
            Err(e) if has_property(&e, "code") => {
                let err: PositionError = e.unchecked_into();
                Err(LocationError::new(
                    LocationErrorKind::from_code(err.code()),
                    err.message(),
                ))
            }
            Err(other) => Err(LocationError::new(
                LocationErrorKind::Unknown,
                format!("{other:?}"),
            )),
        }
    }
}

fn has_property(value: &JsValue, key: &str) -> bool {
    value.is_object() && js_sys::Reflect::has(value, &JsValue::from_str(key)).unwrap_or(false)
}

pub fn now() -> Millis {
    js_sys::Date::now() as Millis
}

/// Run `f` once after `delay_ms`. Returns the timer handle.
pub fn set_timeout(delay_ms: Millis, f: impl FnOnce() + 'static) -> Result<i32, JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let callback = Closure::once_into_js(f);
    let delay = i32::try_from(delay_ms).unwrap_or(i32::MAX);
    window.set_timeout_with_callback_and_timeout_and_arguments_0(
        callback.unchecked_ref::<Function>(),
        delay,
    )
}

pub fn clear_timeout(handle: i32) {
    if let Some(window) = web_sys::window() {
        window.clear_timeout_with_handle(handle);
    }
}
