use serde::Deserialize;

/// Options for route document parsing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseOptions {
    /// Largest annotation-only point set that gets nearest-neighbour
    /// reordering. Larger sets keep document order (default: 10)
    #[serde(default = "default_reorder_max_points")]
    pub reorder_max_points: usize,

    /// Keep altitude values from coordinate triples (default: true)
    #[serde(default = "default_true")]
    pub include_altitude: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            reorder_max_points: default_reorder_max_points(),
            include_altitude: true,
        }
    }
}

/// Options for GeoJSON output.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoJsonOptions {
    /// Include altitude as the 3rd coordinate value (default: true)
    #[serde(default = "default_true")]
    pub include_altitude: bool,

    /// Include names, descriptions and other metadata in properties (default: true)
    #[serde(default = "default_true")]
    pub include_metadata: bool,

    /// Which layers to emit (default: all)
    #[serde(default)]
    pub layers: Option<Vec<OutputLayer>>,
}

impl Default for GeoJsonOptions {
    fn default() -> Self {
        Self {
            include_altitude: true,
            include_metadata: true,
            layers: None,
        }
    }
}

impl GeoJsonOptions {
    pub fn should_include(&self, layer: OutputLayer) -> bool {
        match &self.layers {
            None => true,
            Some(layers) => layers.contains(&layer),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLayer {
    Poi,
    Route,
    Track,
    Placemark,
}

impl OutputLayer {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputLayer::Poi => "poi",
            OutputLayer::Route => "route",
            OutputLayer::Track => "track",
            OutputLayer::Placemark => "placemark",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Quiet period after the last viewport/filter event (default: 500)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// One positioning attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRequest {
    pub high_accuracy: bool,
    pub timeout_ms: u32,
    /// Oldest cached fix accepted, 0 for a fresh fix only.
    pub maximum_age_ms: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationConfig {
    /// Tried in order; the first success wins.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<PositionRequest>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub parse: ParseOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            scheduler: SchedulerConfig::default(),
            location: LocationConfig::default(),
            parse: ParseOptions::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_reorder_max_points() -> usize {
    10
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_api_base_url() -> String {
    "http://localhost:8080/".to_string()
}

fn default_strategies() -> Vec<PositionRequest> {
    vec![
        PositionRequest {
            high_accuracy: true,
            timeout_ms: 5_000,
            maximum_age_ms: 0,
        },
        PositionRequest {
            high_accuracy: false,
            timeout_ms: 10_000,
            maximum_age_ms: 60_000,
        },
        PositionRequest {
            high_accuracy: false,
            timeout_ms: 15_000,
            maximum_age_ms: 600_000,
        },
    ]
}
