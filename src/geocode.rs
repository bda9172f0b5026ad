//! Geocoding gateway: place names (or map clicks) to coordinates.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;

use crate::foundation::{
    core::Coordinate,
    error::{TripError, TripResult},
};

/// A geocoding hit.
#[derive(Clone, Debug, PartialEq)]
pub struct Place {
    pub coordinate: Coordinate,
    pub display_name: String,
}

/// Tagged geocoding failure. Callers always receive one of these instead of a transport error.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GeocodeError {
    #[error("enter a place name first")]
    EmptyQuery,

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("no place found for '{0}'")]
    NotFound(String),

    #[error("geocoding service failed: {0}")]
    ServiceError(String),
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Forward lookup of a non-empty, trimmed query.
    async fn search(&self, query: &str) -> Result<Place, GeocodeError>;

    /// Reverse lookup of a validated coordinate.
    async fn reverse(&self, at: Coordinate) -> Result<Place, GeocodeError>;
}

/// Client for a Nominatim-compatible HTTP service.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimGeocoder {
    /// `user_agent` identifies the application, as the public Nominatim usage policy requires.
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> TripResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| TripError::service(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, GeocodeError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| GeocodeError::ServiceError(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(GeocodeError::ServiceError(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| GeocodeError::ServiceError(format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn search(&self, query: &str) -> Result<Place, GeocodeError> {
        let url = format!("{}/search", self.base_url);
        let body = self
            .get_json(
                &url,
                &[
                    ("format", "json".to_string()),
                    ("limit", "1".to_string()),
                    ("q", query.to_string()),
                ],
            )
            .await?;
        tracing::trace!("received geocoding search response");
        parse_search_response(query, &body)
    }

    async fn reverse(&self, at: Coordinate) -> Result<Place, GeocodeError> {
        let url = format!("{}/reverse", self.base_url);
        let body = self
            .get_json(
                &url,
                &[
                    ("format", "json".to_string()),
                    ("lat", at.lat.to_string()),
                    ("lon", at.lng.to_string()),
                ],
            )
            .await?;
        parse_reverse_response(at, &body)
    }
}

fn number_field(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn place_from_value(v: &Value) -> Option<Place> {
    let lat = number_field(v, "lat")?;
    let lng = number_field(v, "lon")?;
    let coordinate = Coordinate::checked(lat, lng).ok()?;
    let display_name = v
        .get("display_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(Place {
        coordinate,
        display_name,
    })
}

/// Parse a `/search?format=json` body: an array whose first element is the best candidate.
pub fn parse_search_response(query: &str, body: &Value) -> Result<Place, GeocodeError> {
    let candidates = body.as_array().ok_or_else(|| {
        GeocodeError::ServiceError("expected a JSON array of candidates".to_string())
    })?;
    let first = candidates
        .first()
        .ok_or_else(|| GeocodeError::NotFound(query.to_string()))?;
    let mut place = place_from_value(first).ok_or_else(|| {
        GeocodeError::ServiceError("candidate is missing a valid lat/lon".to_string())
    })?;
    if place.display_name.is_empty() {
        place.display_name = query.to_string();
    }
    Ok(place)
}

/// Parse a `/reverse?format=json` body. The clicked coordinate is kept; only the name is taken
/// from the service.
pub fn parse_reverse_response(at: Coordinate, body: &Value) -> Result<Place, GeocodeError> {
    if body.get("error").is_some() {
        return Err(GeocodeError::NotFound(at.to_string()));
    }
    let display_name = body
        .get("display_name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GeocodeError::NotFound(at.to_string()))?;
    Ok(Place {
        coordinate: at,
        display_name: display_name.to_string(),
    })
}

/// Entry point used by the player: validates input, then issues exactly one lookup.
#[derive(Clone)]
pub struct GeocodingGateway {
    service: Arc<dyn Geocoder>,
}

impl GeocodingGateway {
    pub fn new(service: Arc<dyn Geocoder>) -> Self {
        Self { service }
    }

    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, name: &str) -> Result<Place, GeocodeError> {
        let query = name.trim();
        if query.is_empty() {
            return Err(GeocodeError::EmptyQuery);
        }
        let place = self.service.search(query).await;
        if let Err(e) = &place {
            tracing::debug!(error = %e, "geocoding failed");
        }
        place
    }

    #[tracing::instrument(skip(self))]
    pub async fn resolve_from_coordinate(&self, lat: f64, lng: f64) -> Result<Place, GeocodeError> {
        let at = Coordinate::checked(lat, lng)
            .map_err(|e| GeocodeError::InvalidCoordinate(e.to_string()))?;
        self.service.reverse(at).await
    }
}

#[cfg(test)]
#[path = "../tests/unit/geocode/gateway.rs"]
mod tests;
