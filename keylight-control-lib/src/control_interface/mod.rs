use std::fmt;
use std::net::Ipv6Addr;
use std::time::Duration;

use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::registry::DeviceRecord;
use crate::util::temperature::mired_to_kelvin;

/// Per-request timeout for calls to a light.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Path of the lights resource on every Key Light.
pub const LIGHTS_PATH: &str = "/elgato/lights";

/// HTTP client bound to the lights endpoint of a single Key Light.
///
/// Holds no device state. Concurrent updates are not serialized, the last
/// request to reach the light wins.
#[derive(Debug, Clone)]
pub struct KeyLightClient {
    url: String,
    client: Client,
}

/// State of one light as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    #[serde(deserialize_with = "deserialize_power", serialize_with = "serialize_power")]
    pub on: bool,
    /// Percent, 0..100.
    pub brightness: i32,
    /// Mireds, roughly 143..344.
    pub temperature: i32,
}

impl LightState {
    /// Colour temperature in Kelvin, `None` when the light reports 0 mireds.
    pub fn kelvin(&self) -> Option<f64> {
        mired_to_kelvin(self.temperature)
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let power = if self.on { "on" } else { "off" };
        match self.kelvin() {
            Some(kelvin) => write!(
                f,
                "{}, brightness {}%, temperature {} ({:.0}K)",
                power, self.brightness, self.temperature, kelvin
            ),
            None => write!(
                f,
                "{}, brightness {}%, temperature {}",
                power, self.brightness, self.temperature
            ),
        }
    }
}

/// Any subset of a light's settings. Unset fields are left out of the
/// request and keep their value on the device.
///
/// Values are not range checked, the light decides what it accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LightUpdate {
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_power"
    )]
    pub on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<i32>,
}

impl LightUpdate {
    pub fn power(on: bool) -> Self {
        LightUpdate {
            on: Some(on),
            ..Default::default()
        }
    }

    pub fn brightness(brightness: i32) -> Self {
        LightUpdate {
            brightness: Some(brightness),
            ..Default::default()
        }
    }

    pub fn temperature(mired: i32) -> Self {
        LightUpdate {
            temperature: Some(mired),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.on.is_none() && self.brightness.is_none() && self.temperature.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct LightsResponse {
    #[serde(default)]
    lights: Vec<LightState>,
}

#[derive(Debug, Serialize)]
struct LightsRequest<'a> {
    lights: [&'a LightUpdate; 1],
}

impl KeyLightClient {
    /// Binds to `http://{ip}:{port}/elgato/lights` with the default timeout.
    pub fn new(ip: &str, port: &str) -> Result<Self> {
        Self::with_timeout(ip, port, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(ip: &str, port: &str, timeout: Duration) -> Result<Self> {
        let url = Self::lights_url(ip, port);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| Error::Transport {
                url: url.clone(),
                source,
            })?;
        Ok(KeyLightClient { url, client })
    }

    /// Uses a prepared client, e.g. to share one connection pool between
    /// several lights.
    pub fn with_client(client: Client, ip: &str, port: &str) -> Self {
        KeyLightClient {
            url: Self::lights_url(ip, port),
            client,
        }
    }

    pub fn from_device_record(device: &DeviceRecord) -> Result<Self> {
        Self::new(&device.ip, &device.port)
    }

    /// IPv6 literals are bracketed, host names and IPv4 addresses are used as is.
    pub fn lights_url(ip: &str, port: &str) -> String {
        if ip.parse::<Ipv6Addr>().is_ok() {
            format!("http://[{}]:{}{}", ip, port, LIGHTS_PATH)
        } else {
            format!("http://{}:{}{}", ip, port, LIGHTS_PATH)
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches the state of the first light the device reports.
    pub async fn get_status(&self) -> Result<LightState> {
        debug!("GET {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|source| self.transport(source))?;

        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| self.transport(source))?;
        self.parse_status(&body)
    }

    /// Sends `{"lights":[update]}` to the device.
    pub async fn update(&self, update: &LightUpdate) -> Result<()> {
        let body = serde_json::to_vec(&LightsRequest { lights: [update] }).map_err(|e| {
            Error::MalformedResponse {
                url: self.url.clone(),
                message: format!("could not encode update: {}", e),
            }
        })?;
        debug!("PUT {} {}", self.url, String::from_utf8_lossy(&body));

        let response = self
            .client
            .put(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|source| self.transport(source))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::HttpStatus {
                url: self.url.clone(),
                status: response.status().as_u16(),
            })
        }
    }

    pub async fn set_power(&self, on: bool) -> Result<()> {
        self.update(&LightUpdate::power(on)).await
    }

    /// Percent, forwarded unchecked.
    pub async fn set_brightness(&self, brightness: i32) -> Result<()> {
        self.update(&LightUpdate::brightness(brightness)).await
    }

    /// Mireds, forwarded unchecked.
    pub async fn set_temperature(&self, mired: i32) -> Result<()> {
        self.update(&LightUpdate::temperature(mired)).await
    }

    fn parse_status(&self, body: &str) -> Result<LightState> {
        let response: LightsResponse =
            serde_json::from_str(body).map_err(|e| Error::MalformedResponse {
                url: self.url.clone(),
                message: e.to_string(),
            })?;
        response
            .lights
            .into_iter()
            .next()
            .ok_or_else(|| Error::MalformedResponse {
                url: self.url.clone(),
                message: "response has no lights".to_string(),
            })
    }

    fn transport(&self, source: reqwest::Error) -> Error {
        Error::Transport {
            url: self.url.clone(),
            source,
        }
    }
}

// Lights report `on` as 0/1; some firmware sends the digits as strings.
fn deserialize_power<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct PowerVisitor;

    impl Visitor<'_> for PowerVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("0, 1, \"0\", \"1\" or a boolean")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<bool, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<bool, E> {
            match v {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(E::invalid_value(de::Unexpected::Unsigned(v), &self)),
            }
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<bool, E> {
            match v {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(E::invalid_value(de::Unexpected::Signed(v), &self)),
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<bool, E> {
            match v.trim() {
                "0" | "false" => Ok(false),
                "1" | "true" => Ok(true),
                _ => Err(E::invalid_value(de::Unexpected::Str(v), &self)),
            }
        }
    }

    deserializer.deserialize_any(PowerVisitor)
}

fn serialize_power<S: Serializer>(on: &bool, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*on))
}

fn serialize_optional_power<S: Serializer>(
    on: &Option<bool>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match on {
        Some(on) => serialize_power(on, serializer),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, KeyLightClient) {
        let server = MockServer::start().await;
        let address = server.address();
        let client =
            KeyLightClient::new(&address.ip().to_string(), &address.port().to_string()).unwrap();
        (server, client)
    }

    #[test]
    fn binds_to_lights_endpoint() {
        let client = KeyLightClient::new("10.0.0.5", "9123").unwrap();
        assert_eq!(client.url(), "http://10.0.0.5:9123/elgato/lights");
    }

    #[test]
    fn ipv6_addresses_are_bracketed() {
        assert_eq!(
            KeyLightClient::lights_url("fe80::1", "9123"),
            "http://[fe80::1]:9123/elgato/lights"
        );
        assert_eq!(
            KeyLightClient::lights_url("elgato-key-light-0d4b.local", "9123"),
            "http://elgato-key-light-0d4b.local:9123/elgato/lights"
        );
        let client = KeyLightClient::new("fe80::1", "9123").unwrap();
        assert_eq!(client.url(), "http://[fe80::1]:9123/elgato/lights");
    }

    #[test]
    fn update_body_contains_only_set_fields() {
        let update = LightUpdate::brightness(50);
        let body = serde_json::to_string(&LightsRequest { lights: [&update] }).unwrap();
        assert_eq!(body, r#"{"lights":[{"brightness":50}]}"#);

        let update = LightUpdate {
            on: Some(true),
            temperature: Some(200),
            ..Default::default()
        };
        let body = serde_json::to_value(&LightsRequest { lights: [&update] }).unwrap();
        assert_eq!(body, json!({ "lights": [{ "on": 1, "temperature": 200 }] }));
    }

    #[test]
    fn power_accepts_numbers_strings_and_booleans() {
        for (raw, expected) in [
            (json!(1), true),
            (json!(0), false),
            (json!("1"), true),
            (json!("0"), false),
            (json!(true), true),
        ] {
            let state: LightState =
                serde_json::from_value(json!({ "on": raw, "brightness": 10, "temperature": 200 }))
                    .unwrap();
            assert_eq!(state.on, expected, "{raw}");
        }
        assert!(serde_json::from_value::<LightState>(
            json!({ "on": 2, "brightness": 10, "temperature": 200 })
        )
        .is_err());
    }

    #[tokio::test]
    async fn get_status_returns_first_light() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/elgato/lights"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "numberOfLights": 2,
                "lights": [
                    { "on": 1, "brightness": 40, "temperature": 200 },
                    { "on": 0, "brightness": 3, "temperature": 344 }
                ]
            })))
            .mount(&server)
            .await;

        let state = client.get_status().await.unwrap();
        assert_eq!(
            state,
            LightState {
                on: true,
                brightness: 40,
                temperature: 200
            }
        );
        assert_eq!(state.kelvin(), Some(5000.0));
    }

    #[tokio::test]
    async fn update_sends_put_with_json_content_type() {
        let (server, client) = setup().await;
        Mock::given(method("PUT"))
            .and(path("/elgato/lights"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({ "lights": [{ "brightness": 50 }] })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client.update(&LightUpdate::brightness(50)).await.unwrap();
    }

    #[tokio::test]
    async fn out_of_range_values_are_forwarded() {
        let (server, client) = setup().await;
        Mock::given(method("PUT"))
            .and(body_json(json!({ "lights": [{ "brightness": 150, "temperature": 20 }] })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let update = LightUpdate {
            brightness: Some(150),
            temperature: Some(20),
            ..Default::default()
        };
        client.update(&update).await.unwrap();
    }

    #[tokio::test]
    async fn power_helper_sends_integer() {
        let (server, client) = setup().await;
        Mock::given(method("PUT"))
            .and(body_json(json!({ "lights": [{ "on": 0 }] })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client.set_power(false).await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_transport_error() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let err = client.get_status().await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 500, .. }));
        assert!(err.is_transport());

        let err = client.set_brightness(10).await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 400, .. }));
    }

    #[tokio::test]
    async fn malformed_bodies_are_rejected() {
        for body in [
            json!({ "lights": [] }),
            json!({ "numberOfLights": 0 }),
            json!({ "lights": "nope" }),
        ] {
            let (server, client) = setup().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
                .mount(&server)
                .await;

            let err = client.get_status().await.unwrap_err();
            assert!(
                matches!(err, Error::MalformedResponse { .. }),
                "{body}: {err:?}"
            );
        }

        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        assert!(matches!(
            client.get_status().await,
            Err(Error::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_device_is_transport_error() {
        let client = KeyLightClient::with_timeout("127.0.0.1", "1", Duration::from_millis(500))
            .unwrap();
        let err = client.get_status().await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }), "{err:?}");
    }
}
