use std::{
    fs,
    io::{self, IsTerminal, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Parser;
use geojson::{Feature, FeatureCollection, JsonObject, Value};
use serde::Deserialize;
use tracing::{debug, info, warn, Level};
use urlencoding::encode;

/// Host serving the Places API.
pub const GOOGLE_MAPS_HOST: &str = "https://maps.googleapis.com";
const NEARBY_SEARCH_PATH: &str = "/maps/api/place/nearbysearch/json";

// New Delhi center, 8 km around it.
pub const DEFAULT_LATITUDE: f64 = 28.6139;
pub const DEFAULT_LONGITUDE: f64 = 77.2090;
pub const DEFAULT_RADIUS_METERS: u32 = 8000;
pub const DEFAULT_PLACE_TYPE: &str = "doctor";

const HEADER: &str = "Nearby Doctors:";
const ERROR_PREFIX: &str = "Error fetching doctor locations:";

/// Rendered in place of a missing or null name or vicinity.
const MISSING_FIELD: &str = "unknown";

/// Provider statuses that are normal outcomes of a search.
const QUIET_STATUSES: [&str; 2] = ["OK", "ZERO_RESULTS"];

/// List places of a given type around a point, using the Google Places
/// Nearby Search API.
///
/// The API key is read from the GOOGLE_MAPS_API_KEY environment variable
/// unless given with `--api-key`.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Google Maps Platform API key
    #[arg(long, env = "GOOGLE_MAPS_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Latitude of the search center
    #[arg(
        long,
        default_value_t = DEFAULT_LATITUDE,
        allow_negative_numbers = true
    )]
    latitude: f64,

    /// Longitude of the search center
    #[arg(
        long,
        default_value_t = DEFAULT_LONGITUDE,
        allow_negative_numbers = true
    )]
    longitude: f64,

    /// Search radius in meters
    #[arg(
        long,
        default_value_t = DEFAULT_RADIUS_METERS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    radius: u32,

    /// Place type to filter on, e.g. "doctor" or "pharmacy"
    #[arg(
        long = "type",
        value_name = "TYPE",
        default_value = DEFAULT_PLACE_TYPE
    )]
    place_type: String,

    /// Also write the located places to this file, GeoJSON formatted
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Log the outgoing request and the result count
    #[arg(short, long)]
    verbose: bool,

    #[arg(long, hide = true, default_value = GOOGLE_MAPS_HOST)]
    host: String,
}

/// Run the command-line interface
pub async fn run() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_max_level(match cli.verbose {
            true => Level::DEBUG,
            false => Level::WARN,
        })
        .init();

    let request = SearchRequest {
        latitude: cli.latitude,
        longitude: cli.longitude,
        radius: cli.radius,
        place_type: cli.place_type,
        api_key: cli.api_key,
    };

    NearbyPlaceFetcher::new(&cli.host)
        .run(
            &request,
            cli.output.as_deref(),
            &mut io::stdout(),
            &mut io::stderr(),
        )
        .await;
}

/// The parameters of one nearby search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub radius: u32,
    pub place_type: String,
    pub api_key: String,
}

impl SearchRequest {
    /// The nearby search URL for this request on the given host.
    pub fn url(&self, host: &str) -> String {
        format!(
            "{}{}?location={},{}&radius={}&type={}&key={}",
            host.trim_end_matches('/'),
            NEARBY_SEARCH_PATH,
            self.latitude,
            self.longitude,
            self.radius,
            encode(&self.place_type),
            encode(&self.api_key),
        )
    }
}

/// The body of a nearby search response. Only `results` is required, and
/// its elements are kept as parsed.
#[derive(Debug, Deserialize)]
struct NearbySearchResponse {
    results: Vec<serde_json::Value>,
    status: Option<String>,
    error_message: Option<String>,
}

/// The fields of one `results` element this crate reads.
///
/// Built leniently from the raw element: a field of an unexpected shape is
/// left out instead of failing the whole response.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceResult {
    pub name: Option<serde_json::Value>,
    pub vicinity: Option<serde_json::Value>,
    pub place_id: Option<String>,
    pub location: Option<LatLng>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl From<&serde_json::Value> for PlaceResult {
    fn from(raw: &serde_json::Value) -> Self {
        let present =
            |key: &str| raw.get(key).filter(|v| !v.is_null()).cloned();
        PlaceResult {
            name: present("name"),
            vicinity: present("vicinity"),
            place_id: raw
                .get("place_id")
                .and_then(|v| v.as_str())
                .map(String::from),
            location: raw
                .pointer("/geometry/location")
                .and_then(|l| LatLng::deserialize(l).ok()),
        }
    }
}

impl PlaceResult {
    /// The `"{index}. {name} - {vicinity}"` listing line.
    fn listing_line(&self, index: usize) -> String {
        format!(
            "{}. {} - {}",
            index,
            render_field(self.name.as_ref()),
            render_field(self.vicinity.as_ref()),
        )
    }
}

/// Strings as they are, other values as JSON.
fn render_field(field: Option<&serde_json::Value>) -> String {
    match field {
        None => MISSING_FIELD.to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Fetches nearby places from the Places API and prints them.
#[derive(Debug, Clone)]
pub struct NearbyPlaceFetcher {
    host: String,
    client: reqwest::Client,
}

impl NearbyPlaceFetcher {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Fetch, print and optionally export the places for `request`.
    ///
    /// The listing goes to `out`. Any failure is reported as a single line
    /// on `err`; nothing is returned to the caller.
    pub async fn run<O: Write, E: Write>(
        &self,
        request: &SearchRequest,
        export: Option<&Path>,
        out: &mut O,
        err: &mut E,
    ) {
        if let Err(e) = self.try_run(request, export, out).await {
            let _ = writeln!(err, "{ERROR_PREFIX} {e:#}");
        }
    }

    async fn try_run<O: Write>(
        &self,
        request: &SearchRequest,
        export: Option<&Path>,
        out: &mut O,
    ) -> Result<()> {
        let raw = self.fetch(request).await?;
        let places: Vec<PlaceResult> =
            raw.iter().map(PlaceResult::from).collect();
        print_places(out, &raw, &places)?;
        if let Some(path) = export {
            let features = places_to_feature_collection(&places);
            fs::write(path, features.to_string()).with_context(|| {
                format!("Failed to write GeoJSON to {}", path.display())
            })?;
        }
        Ok(())
    }

    /// Perform the nearby search and return the raw `results` elements in
    /// provider order.
    pub async fn fetch(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<serde_json::Value>> {
        debug!(
            latitude = request.latitude,
            longitude = request.longitude,
            radius = request.radius,
            place_type = %request.place_type,
            "Searching nearby places"
        );

        // Errors drop their URL so the key is never printed.
        let resp = self
            .client
            .get(request.url(&self.host))
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("Failed to send request")?;

        let body = resp
            .json::<NearbySearchResponse>()
            .await
            .map_err(|e| e.without_url())
            .context("Failed to decode response body")?;

        if let Some(status) = body
            .status
            .as_deref()
            .filter(|s| !QUIET_STATUSES.contains(s))
        {
            warn!(
                status,
                error_message =
                    body.error_message.as_deref().unwrap_or_default(),
                "Places API did not return OK"
            );
        }
        info!("Found {} places", body.results.len());

        Ok(body.results)
    }
}

/// Print the header with the raw results, then one numbered line per place.
fn print_places<O: Write>(
    out: &mut O,
    raw: &[serde_json::Value],
    places: &[PlaceResult],
) -> Result<()> {
    writeln!(out, "{HEADER} {}", serde_json::to_string(raw)?)?;
    for (i, place) in places.iter().enumerate() {
        writeln!(out, "{}", place.listing_line(i + 1))?;
    }
    Ok(())
}

/// Convert the places that have a location to GeoJSON point features.
pub fn places_to_feature_collection(
    places: &[PlaceResult],
) -> FeatureCollection {
    FeatureCollection {
        features: places.iter().filter_map(place_to_feature).collect(),
        bbox: None,
        foreign_members: None,
    }
}

fn place_to_feature(place: &PlaceResult) -> Option<Feature> {
    let LatLng { lat, lng } = place.location?;
    let mut properties = JsonObject::new();
    if let Some(name) = &place.name {
        properties.insert("name".into(), name.clone());
    }
    if let Some(vicinity) = &place.vicinity {
        properties.insert("vicinity".into(), vicinity.clone());
    }
    if let Some(place_id) = &place.place_id {
        properties.insert("place_id".into(), place_id.clone().into());
    }
    Some(Feature {
        geometry: Some(Value::Point(vec![lng, lat]).into()),
        properties: Some(properties),
        ..Default::default()
    })
}
