//! Nominatim / OpenStreetMap geocoder client.
//!
//! Nominatim has strict rate limits on the public instance: **1 request
//! per second** maximum. The resolver paces calls accordingly.
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use async_trait::async_trait;

use crate::{GeocodeError, GeocodedAddress, GeocodingProvider, GeocodingService};

/// Geocodes free-form queries through a Nominatim instance.
#[derive(Debug)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
    country_code: String,
}

impl NominatimGeocoder {
    /// Creates a client restricted to `country_code`.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: String, country_code: String) -> Result<Self, GeocodeError> {
        Ok(Self {
            client: crate::http_client()?,
            base_url,
            country_code,
        })
    }
}

#[async_trait]
impl GeocodingService for NominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<GeocodedAddress>, GeocodeError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", address),
                ("countrycodes", self.country_code.as_str()),
                ("format", "jsonv2"),
                ("limit", "1"),
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
        GeocodingProvider::Nominatim
    }
}

/// Parses Nominatim JSON response.
fn parse_response(body: &serde_json::Value) -> Result<Option<GeocodedAddress>, GeocodeError> {
    let results = body.as_array().ok_or_else(|| GeocodeError::Parse {
        message: "Nominatim response is not an array".to_string(),
    })?;

    let Some(first) = results.first() else {
        return Ok(None);
    };

    let lat = first["lat"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing lat in Nominatim response".to_string(),
        })?;

    let lon = first["lon"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing lon in Nominatim response".to_string(),
        })?;

    Ok(Some(GeocodedAddress {
        latitude: lat,
        longitude: lon,
        matched_address: first["display_name"].as_str().map(String::from),
        provider: GeocodingProvider::Nominatim,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nominatim_result() {
        let body = serde_json::json!([{
            "lat": "25.0330",
            "lon": "121.5654",
            "display_name": "台北101, 信義路五段, 信義區, 臺北市, 110, 臺灣"
        }]);
        let result = parse_response(&body).unwrap().unwrap();
        assert!((result.latitude - 25.0330).abs() < 1e-4);
        assert!((result.longitude - 121.5654).abs() < 1e-4);
        assert_eq!(result.provider, GeocodingProvider::Nominatim);
    }

    #[test]
    fn parses_nominatim_empty() {
        let body = serde_json::json!([]);
        assert!(parse_response(&body).unwrap().is_none());
    }

    #[test]
    fn rejects_non_array() {
        let body = serde_json::json!({ "error": "bad" });
        assert!(parse_response(&body).is_err());
    }
}
