//! Google Geocoding API client.
//!
//! See <https://developers.google.com/maps/documentation/geocoding/requests-geocoding>

use async_trait::async_trait;

use crate::{GeocodeError, GeocodedAddress, GeocodingProvider, GeocodingService};

/// Geocodes through the Google Geocoding API.
pub struct GoogleGeocoder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    language: String,
    region: String,
}

impl std::fmt::Debug for GoogleGeocoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleGeocoder")
            .field("base_url", &self.base_url)
            .field("language", &self.language)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl GoogleGeocoder {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: String,
        api_key: String,
        language: String,
        region: String,
    ) -> Result<Self, GeocodeError> {
        Ok(Self {
            client: crate::http_client()?,
            base_url,
            api_key,
            language,
            region,
        })
    }
}

#[async_trait]
impl GeocodingService for GoogleGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeocodedAddress>, GeocodeError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("address", address),
                ("key", self.api_key.as_str()),
                ("language", self.language.as_str()),
                ("region", self.region.as_str()),
            ])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }

        let body: serde_json::Value = resp.error_for_status()?.json().await?;
        parse_response(&body)
    }

    fn provider(&self) -> GeocodingProvider {
        GeocodingProvider::Google
    }
}

/// Parses a Google Geocoding JSON response.
fn parse_response(body: &serde_json::Value) -> Result<Option<GeocodedAddress>, GeocodeError> {
    let status = body["status"].as_str().unwrap_or_default();
    match status {
        "OK" => {}
        "ZERO_RESULTS" => return Ok(None),
        "OVER_QUERY_LIMIT" => return Err(GeocodeError::RateLimited),
        "" => {
            return Err(GeocodeError::Parse {
                message: "Missing status in Google response".to_string(),
            });
        }
        other => {
            return Err(GeocodeError::Rejected {
                provider: GeocodingProvider::Google,
                status: other.to_string(),
            });
        }
    }

    let Some(first) = body["results"].as_array().and_then(|r| r.first()) else {
        return Ok(None);
    };

    let location = &first["geometry"]["location"];
    let lat = location["lat"].as_f64().ok_or_else(|| GeocodeError::Parse {
        message: "Missing lat in Google response".to_string(),
    })?;
    let lng = location["lng"].as_f64().ok_or_else(|| GeocodeError::Parse {
        message: "Missing lng in Google response".to_string(),
    })?;

    Ok(Some(GeocodedAddress {
        latitude: lat,
        longitude: lng,
        matched_address: first["formatted_address"].as_str().map(String::from),
        provider: GeocodingProvider::Google,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_google_result() {
        let body = serde_json::json!({
            "status": "OK",
            "results": [{
                "formatted_address": "111台灣台北市士林區中山北路五段1號",
                "geometry": { "location": { "lat": 25.0953, "lng": 121.5246 } }
            }]
        });
        let result = parse_response(&body).unwrap().unwrap();
        assert!((result.latitude - 25.0953).abs() < 1e-6);
        assert!((result.longitude - 121.5246).abs() < 1e-6);
        assert_eq!(result.provider, GeocodingProvider::Google);
        assert!(result.matched_address.is_some());
    }

    #[test]
    fn zero_results_is_none() {
        let body = serde_json::json!({ "status": "ZERO_RESULTS", "results": [] });
        assert!(parse_response(&body).unwrap().is_none());
    }

    #[test]
    fn quota_is_rate_limited() {
        let body = serde_json::json!({ "status": "OVER_QUERY_LIMIT" });
        assert!(matches!(parse_response(&body), Err(GeocodeError::RateLimited)));
    }

    #[test]
    fn denied_is_rejected() {
        let body = serde_json::json!({ "status": "REQUEST_DENIED" });
        assert!(matches!(
            parse_response(&body),
            Err(GeocodeError::Rejected { status, .. }) if status == "REQUEST_DENIED"
        ));
    }

    #[test]
    fn missing_location_is_parse_error() {
        let body = serde_json::json!({ "status": "OK", "results": [{ "geometry": {} }] });
        assert!(matches!(parse_response(&body), Err(GeocodeError::Parse { .. })));
    }
}
