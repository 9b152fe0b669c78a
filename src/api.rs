use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::cancel::CancelToken;
use crate::error::FetchFailure;
use crate::geo_types::{Coordinate, Lane, Poi, Route};
use crate::scheduler::FetchRequest;
use crate::store::LaneData;

type Result<T> = std::result::Result<T, FetchFailure>;

/// HTTP GET capability. Implementations should abort the request when
/// `cancel` fires and report `FetchFailure::Cancelled`.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn get(&self, url: &Url, cancel: &CancelToken) -> Result<String>;
}

/// Client for the geodata REST endpoints.
#[derive(Debug)]
pub struct GeoApi<T> {
    base: Url,
    transport: T,
}

impl<T: Transport> GeoApi<T> {
    pub fn new(base_url: &str, transport: T) -> Result<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base, transport })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// `api/gsi/{pois|routes}/area?minLng&minLat&maxLng&maxLat&{types[]|travelModes[]}`
    pub fn area_url(&self, request: &FetchRequest) -> Result<Url> {
        let (path, filter_key) = match request.lane {
            Lane::Pois => ("api/gsi/pois/area", "types[]"),
            Lane::Routes => ("api/gsi/routes/area", "travelModes[]"),
        };
        let mut url = self.base.join(path)?;
        {
            let bounds = &request.bounds;
            let mut query = url.query_pairs_mut();
            query.append_pair("minLng", &bounds.min_lng().to_string());
            query.append_pair("minLat", &bounds.min_lat().to_string());
            query.append_pair("maxLng", &bounds.max_lng().to_string());
            query.append_pair("maxLat", &bounds.max_lat().to_string());
            for value in &request.filters {
                query.append_pair(filter_key, value);
            }
        }
        Ok(url)
    }

    pub async fn fetch_area(&self, request: &FetchRequest, cancel: &CancelToken) -> Result<LaneData> {
        let url = self.area_url(request)?;
        debug!("GET {url}");
        let body = self.transport.get(&url, cancel).await?;
        if cancel.is_cancelled() {
            return Err(FetchFailure::Cancelled);
        }
        decode_lane(request.lane, &body)
    }

    pub async fn list_public_documents(&self, page: u32, size: u32) -> Result<DocumentPage> {
        let mut url = self.base.join("api/kml-files/public")?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("size", &size.to_string());
        let body = self.transport.get(&url, &CancelToken::new()).await?;
        open_envelope(&body)
    }

    /// Raw document text for the parser.
    pub async fn download_document(&self, id: &str) -> Result<String> {
        let mut url = self.base.join("api/kml-files/")?;
        url.path_segments_mut()
            .map_err(|_| FetchFailure::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(id)
            .push("download");
        self.transport.get(&url, &CancelToken::new()).await
    }
}

/// Decode an area response envelope into lane items.
/// Records that fail to decode or lack a valid position are dropped.
pub fn decode_lane(lane: Lane, body: &str) -> Result<LaneData> {
    match lane {
        Lane::Pois => {
            let (records, total) = decode_records::<PoiRecord>(body)?;
            let pois: Vec<Poi> = records.into_iter().filter_map(PoiRecord::into_poi).collect();
            if pois.len() < total {
                warn!("Dropped {} POIs with invalid fields or coordinates", total - pois.len());
            }
            Ok(LaneData::Pois(pois))
        }
        Lane::Routes => {
            let (records, total) = decode_records::<RouteRecord>(body)?;
            let routes: Vec<Route> = records
                .into_iter()
                .filter_map(RouteRecord::into_route)
                .collect();
            if routes.len() < total {
                warn!("Dropped {} routes without valid coordinates", total - routes.len());
            }
            Ok(LaneData::Routes(routes))
        }
    }
}

/// Decode each record separately so a malformed one costs only itself.
/// Returns the records that decoded and the total count.
fn decode_records<R: DeserializeOwned>(body: &str) -> Result<(Vec<R>, usize)> {
    let raw: Vec<serde_json::Value> = open_envelope(body)?;
    let total = raw.len();
    let records = raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping undecodable record: {e}");
                None
            }
        })
        .collect();
    Ok((records, total))
}

/// `{ code, message, data }`; any non-zero code is a failure.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

fn open_envelope<T: DeserializeOwned + Default>(body: &str) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_str(body)?;
    if envelope.code != 0 {
        return Err(FetchFailure::Api {
            code: envelope.code,
            message: envelope.message.unwrap_or_default(),
        });
    }
    Ok(envelope.data.unwrap_or_default())
}

/// Ids arrive as numbers or strings depending on the endpoint.
fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoiRecord {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "lng")]
    longitude: Option<f64>,
    #[serde(default, alias = "lat")]
    latitude: Option<f64>,
    #[serde(rename = "type", alias = "category", default)]
    category: Option<String>,
    address: Option<String>,
    description: Option<String>,
    opening_hours: Option<String>,
    contact_phone: Option<String>,
}

impl PoiRecord {
    fn into_poi(self) -> Option<Poi> {
        let coordinate = Coordinate::checked(self.latitude?, self.longitude?, None)?;
        Some(Poi {
            id: self.id,
            name: self.name.unwrap_or_default(),
            coordinate,
            category: self.category.unwrap_or_default(),
            address: self.address,
            description: self.description,
            opening_hours: self.opening_hours,
            contact_phone: self.contact_phone,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PointRecord {
    #[serde(default, alias = "lng")]
    longitude: Option<f64>,
    #[serde(default, alias = "lat")]
    latitude: Option<f64>,
    #[serde(default)]
    altitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteRecord {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    travel_mode: Option<String>,
    description: Option<String>,
    #[serde(default, alias = "points")]
    path: Vec<PointRecord>,
}

impl RouteRecord {
    fn into_route(self) -> Option<Route> {
        let path: Vec<Coordinate> = self
            .path
            .iter()
            .filter_map(|p| Coordinate::checked(p.latitude?, p.longitude?, p.altitude))
            .collect();
        if path.is_empty() {
            return None;
        }
        Some(Route {
            id: self.id,
            name: self.name.unwrap_or_default(),
            travel_mode: self.travel_mode,
            description: self.description,
            path,
        })
    }
}

/// One page of the public document listing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPage {
    #[serde(default, alias = "records")]
    pub content: Vec<DocumentSummary>,
    #[serde(default, alias = "total")]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(alias = "name")]
    pub file_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_types::ViewportBounds;
    use futures::executor::block_on;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedTransport {
        responses: RefCell<VecDeque<Result<String>>>,
        requested: RefCell<Vec<String>>,
    }

    impl ScriptedTransport {
        fn replying(body: &str) -> Self {
            let t = Self::default();
            t.responses.borrow_mut().push_back(Ok(body.to_string()));
            t
        }
    }

    impl Transport for ScriptedTransport {
        async fn get(&self, url: &Url, _cancel: &CancelToken) -> Result<String> {
            self.requested.borrow_mut().push(url.to_string());
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or(Err(FetchFailure::Network("no scripted response".into())))
        }
    }

    fn request(lane: Lane, filters: &[&str]) -> FetchRequest {
        FetchRequest {
            lane,
            bounds: ViewportBounds::new(Coordinate::new(39.8, 116.3), Coordinate::new(40.0, 116.5)),
            filters: filters.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_poi_area_url() {
        let api = GeoApi::new("https://maps.example.com/app", ScriptedTransport::default()).unwrap();
        let url = api.area_url(&request(Lane::Pois, &["cafe", "museum"])).unwrap();
        assert_eq!(url.path(), "/app/api/gsi/pois/area");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("minLng".to_string(), "116.3".to_string()));
        assert_eq!(pairs[3], ("maxLat".to_string(), "40".to_string()));
        assert_eq!(pairs[4], ("types[]".to_string(), "cafe".to_string()));
        assert_eq!(pairs[5], ("types[]".to_string(), "museum".to_string()));
    }

    #[test]
    fn test_route_area_url_uses_travel_modes() {
        let api = GeoApi::new("https://maps.example.com/", ScriptedTransport::default()).unwrap();
        let url = api.area_url(&request(Lane::Routes, &["walking"])).unwrap();
        assert_eq!(url.path(), "/api/gsi/routes/area");
        assert!(url.query_pairs().any(|(k, v)| k == "travelModes[]" && v == "walking"));
    }

    #[test]
    fn test_fetch_pois() {
        let body = r#"{"code":0,"message":"ok","data":[
            {"id":1,"name":"Palace Museum","longitude":116.397,"latitude":39.918,"type":"museum","openingHours":"08:30-17:00"},
            {"id":"b2","name":"Broken","longitude":300.0,"latitude":39.9,"type":"cafe"}
        ]}"#;
        let api = GeoApi::new("https://maps.example.com/", ScriptedTransport::replying(body)).unwrap();
        let data = block_on(api.fetch_area(&request(Lane::Pois, &[]), &CancelToken::new())).unwrap();
        match data {
            LaneData::Pois(pois) => {
                assert_eq!(pois.len(), 1);
                assert_eq!(pois[0].id, "1");
                assert_eq!(pois[0].category, "museum");
                assert_eq!(pois[0].opening_hours.as_deref(), Some("08:30-17:00"));
            }
            LaneData::Routes(_) => panic!("expected POIs"),
        }
    }

    #[test]
    fn test_fetch_routes() {
        let body = r#"{"code":0,"message":"ok","data":[
            {"id":7,"name":"Hutong walk","travelMode":"walking","path":[{"lng":116.39,"lat":39.93},{"lng":116.40,"lat":39.94}]},
            {"id":8,"name":"Empty","path":[]}
        ]}"#;
        let api = GeoApi::new("https://maps.example.com/", ScriptedTransport::replying(body)).unwrap();
        let data = block_on(api.fetch_area(&request(Lane::Routes, &[]), &CancelToken::new())).unwrap();
        match data {
            LaneData::Routes(routes) => {
                assert_eq!(routes.len(), 1);
                assert_eq!(routes[0].travel_mode.as_deref(), Some("walking"));
                assert_eq!(routes[0].path.len(), 2);
            }
            LaneData::Pois(_) => panic!("expected routes"),
        }
    }

    #[test]
    fn test_bad_record_costs_only_itself() {
        let body = r#"{"code":0,"data":[
            {"id":1,"name":"Palace Museum","lng":116.397,"lat":39.918,"type":"museum"},
            {"id":2,"name":null,"lng":116.40,"lat":39.92,"type":null},
            {"id":3,"name":"No position","lng":null,"lat":39.9},
            {"id":4,"name":"Wrong type","lng":"east","lat":39.9},
            {"name":"No id","lng":116.41,"lat":39.93}
        ]}"#;
        match decode_lane(Lane::Pois, body).unwrap() {
            LaneData::Pois(pois) => {
                let ids: Vec<&str> = pois.iter().map(|p| p.id.as_str()).collect();
                assert_eq!(ids, vec!["1", "2"]);
                assert_eq!(pois[1].name, "");
                assert_eq!(pois[1].category, "");
            }
            LaneData::Routes(_) => panic!("expected POIs"),
        }
    }

    #[test]
    fn test_route_with_null_vertex_keeps_the_rest() {
        let body = r#"{"code":0,"data":[
            {"id":7,"name":null,"path":[{"lng":116.39,"lat":39.93},{"lng":null,"lat":39.94},{"lng":116.40,"lat":39.94}]},
            {"id":8,"name":"Broken","path":"not a list"}
        ]}"#;
        match decode_lane(Lane::Routes, body).unwrap() {
            LaneData::Routes(routes) => {
                assert_eq!(routes.len(), 1);
                assert_eq!(routes[0].id, "7");
                assert_eq!(routes[0].path.len(), 2);
            }
            LaneData::Pois(_) => panic!("expected routes"),
        }
    }

    #[test]
    fn test_data_that_is_not_a_list_is_decode_failure() {
        let err = decode_lane(Lane::Pois, r#"{"code":0,"data":{"id":1}}"#).unwrap_err();
        assert!(matches!(err, FetchFailure::Decode(_)));
    }

    #[test]
    fn test_nonzero_code_is_failure() {
        let body = r#"{"code":4001,"message":"area too large","data":null}"#;
        let err = decode_lane(Lane::Pois, body).unwrap_err();
        assert_eq!(
            err,
            FetchFailure::Api {
                code: 4001,
                message: "area too large".into()
            }
        );
    }

    #[test]
    fn test_null_data_is_empty() {
        let data = decode_lane(Lane::Routes, r#"{"code":0,"message":"ok","data":null}"#).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_garbage_body_is_decode_failure() {
        let err = decode_lane(Lane::Pois, "<html>502</html>").unwrap_err();
        assert!(matches!(err, FetchFailure::Decode(_)));
    }

    #[test]
    fn test_cancelled_after_response_is_discarded() {
        let body = r#"{"code":0,"data":[]}"#;
        let api = GeoApi::new("https://maps.example.com/", ScriptedTransport::replying(body)).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let err = block_on(api.fetch_area(&request(Lane::Pois, &[]), &token)).unwrap_err();
        assert_eq!(err, FetchFailure::Cancelled);
    }

    #[test]
    fn test_list_public_documents() {
        let body = r#"{"code":0,"message":"ok","data":{"content":[
            {"id":12,"fileName":"west-lake.kml","uploader":"li"}
        ],"totalElements":1,"totalPages":1}}"#;
        let api = GeoApi::new("https://maps.example.com/", ScriptedTransport::replying(body)).unwrap();
        let page = block_on(api.list_public_documents(0, 20)).unwrap();
        assert_eq!(page.total_elements, 1);
        assert_eq!(page.content[0].id, "12");
        assert_eq!(page.content[0].file_name, "west-lake.kml");
        let requested = api.transport().requested.borrow();
        assert_eq!(
            requested[0],
            "https://maps.example.com/api/kml-files/public?page=0&size=20"
        );
    }

    #[test]
    fn test_download_document_url() {
        let api = GeoApi::new("https://maps.example.com/", ScriptedTransport::replying("<kml/>")).unwrap();
        let text = block_on(api.download_document("12")).unwrap();
        assert_eq!(text, "<kml/>");
        let requested = api.transport().requested.borrow();
        assert_eq!(requested[0], "https://maps.example.com/api/kml-files/12/download");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(GeoApi::new("not a url", ScriptedTransport::default()).is_err());
    }
}
