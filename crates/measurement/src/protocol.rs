//! Wire types for the measurement backend.
//!
//! The backend answers every call with HTTP 200 and signals failures through
//! an `error` field, so replies are discriminated by which fields are present
//! rather than by status code.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Body of `POST /detectar_aruco`.
#[derive(Clone, Debug, Serialize)]
pub struct DetectionRequest {
    /// `data:image/jpeg;base64,...` URL of the captured frame.
    pub image: String,
    /// Marker side length in meters.
    #[serde(rename = "tamano_lado")]
    pub side_length_m: f64,
    #[serde(rename = "generar_visualizacion")]
    pub want_visualization: bool,
}

/// Result of a successful detection. The variant depends on the detection
/// mode the backend runs in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Measurement {
    Distance { distance: f64, area: f64 },
    Rectangle { base: f64, height: f64, area: f64 },
}

impl Measurement {
    pub fn area(&self) -> f64 {
        match *self {
            Measurement::Distance { area, .. } | Measurement::Rectangle { area, .. } => area,
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Measurement::Distance { distance, area } => {
                write!(f, "Distance measured: {distance} m | Area: {area} m²")
            }
            Measurement::Rectangle { base, height, area } => {
                write!(f, "Measured {base} m x {height} m = {area} m²")
            }
        }
    }
}

/// Optional extras the backend attaches to a detection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionExtras {
    pub confidence: Option<f64>,
    pub method: Option<String>,
    pub visualization: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DetectionReply {
    Detected {
        measurement: Measurement,
        extras: DetectionExtras,
    },
    /// The backend processed the frame but reported an error, usually that
    /// no markers were found.
    Rejected(String),
}

#[derive(Deserialize)]
struct RawDetectionReply {
    success: Option<bool>,
    error: Option<String>,
    distancia: Option<f64>,
    base: Option<f64>,
    altura: Option<f64>,
    area: Option<f64>,
    confianza: Option<f64>,
    metodo_usado: Option<String>,
    visualizacion: Option<String>,
}

impl DetectionReply {
    pub fn from_json(body: &[u8]) -> Result<Self, TransportError> {
        let raw: RawDetectionReply = serde_json::from_slice(body)
            .map_err(|err| TransportError::Protocol(err.to_string()))?;

        if let Some(error) = raw.error {
            return Ok(DetectionReply::Rejected(error));
        }
        if raw.success != Some(true) {
            return Err(TransportError::Protocol(
                "reply has neither `error` nor `success: true`".into(),
            ));
        }
        let area = raw
            .area
            .ok_or_else(|| TransportError::Protocol("successful reply without `area`".into()))?;
        let measurement = match (raw.distancia, raw.base, raw.altura) {
            (Some(distance), _, _) => Measurement::Distance { distance, area },
            (None, Some(base), Some(height)) => Measurement::Rectangle { base, height, area },
            _ => {
                return Err(TransportError::Protocol(
                    "successful reply without `distancia` or `base`/`altura`".into(),
                ));
            }
        };
        Ok(DetectionReply::Detected {
            measurement,
            extras: DetectionExtras {
                confidence: raw.confianza,
                method: raw.metodo_usado,
                visualization: raw.visualizacion,
            },
        })
    }
}

/// Last accepted detection, kept for the layout calculation.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedMeasurement {
    pub measurement: Measurement,
    pub confidence: Option<f64>,
    pub method: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// Query for `GET /generar`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LayoutQuery {
    Distance(f64),
    Rectangle { base: f64, height: f64 },
}

impl LayoutQuery {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match *self {
            LayoutQuery::Distance(distance) => vec![("distancia", distance.to_string())],
            LayoutQuery::Rectangle { base, height } => vec![
                ("base", base.to_string()),
                ("altura", height.to_string()),
            ],
        }
    }
}

impl From<Measurement> for LayoutQuery {
    fn from(measurement: Measurement) -> Self {
        match measurement {
            Measurement::Distance { distance, .. } => LayoutQuery::Distance(distance),
            Measurement::Rectangle { base, height, .. } => LayoutQuery::Rectangle { base, height },
        }
    }
}

/// Luminaire distribution computed by the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutReport {
    pub area: f64,
    /// Required luminaire count before rounding to a grid.
    pub nl: f64,
    pub x: u32,
    pub y: u32,
    pub total: u32,
    pub image_url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLayoutReply {
    Error { error: String },
    Report(LayoutReport),
}

/// Parse a `/generar` reply into the report or the backend's error text.
pub fn parse_layout_reply(body: &[u8]) -> Result<Result<LayoutReport, String>, TransportError> {
    match serde_json::from_slice::<RawLayoutReply>(body) {
        Ok(RawLayoutReply::Error { error }) => Ok(Err(error)),
        Ok(RawLayoutReply::Report(report)) => Ok(Ok(report)),
        Err(err) => Err(TransportError::Protocol(err.to_string())),
    }
}

/// Detection profile on the backend, trading speed for precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OptimizationProfile {
    Speed,
    Precision,
}

impl OptimizationProfile {
    pub fn wire_name(self) -> &'static str {
        match self {
            OptimizationProfile::Speed => "velocidad",
            OptimizationProfile::Precision => "precision",
        }
    }
}

#[derive(Serialize)]
pub(crate) struct ProfileRequest {
    pub(crate) tipo: &'static str,
}

/// Acknowledgement of a profile change.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileAck {
    pub message: String,
    pub settings: serde_json::Value,
}

#[derive(Deserialize)]
struct RawProfileReply {
    success: Option<bool>,
    error: Option<String>,
    mensaje: Option<String>,
    configuracion: Option<serde_json::Value>,
}

pub fn parse_profile_reply(body: &[u8]) -> Result<Result<ProfileAck, String>, TransportError> {
    let raw: RawProfileReply =
        serde_json::from_slice(body).map_err(|err| TransportError::Protocol(err.to_string()))?;
    if let Some(error) = raw.error {
        return Ok(Err(error));
    }
    if raw.success != Some(true) {
        return Err(TransportError::Protocol("profile reply without `success`".into()));
    }
    Ok(Ok(ProfileAck {
        message: raw.mensaje.unwrap_or_default(),
        settings: raw.configuracion.unwrap_or(serde_json::Value::Null),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_reply_is_detected() {
        let reply = DetectionReply::from_json(
            br#"{"success": true, "distancia": 3.0, "area": 12.5, "confianza": 0.91, "metodo_usado": "multipunto"}"#,
        )
        .unwrap();
        match reply {
            DetectionReply::Detected {
                measurement,
                extras,
            } => {
                assert_eq!(
                    measurement,
                    Measurement::Distance {
                        distance: 3.0,
                        area: 12.5
                    }
                );
                assert_eq!(extras.confidence, Some(0.91));
                assert_eq!(extras.method.as_deref(), Some("multipunto"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn base_height_reply_is_a_rectangle() {
        let reply = DetectionReply::from_json(
            br#"{"success": true, "base": 2.0, "altura": 4.5, "area": 9.0}"#,
        )
        .unwrap();
        assert!(matches!(
            reply,
            DetectionReply::Detected {
                measurement: Measurement::Rectangle {
                    base: 2.0,
                    height: 4.5,
                    area: 9.0
                },
                ..
            }
        ));
    }

    #[test]
    fn error_field_wins() {
        let reply = DetectionReply::from_json(br#"{"error": "no marker detected"}"#).unwrap();
        assert_eq!(reply, DetectionReply::Rejected("no marker detected".into()));
    }

    #[test]
    fn unknown_shapes_are_protocol_errors() {
        let bodies: [&[u8]; 4] = [
            br#"{"success": true, "distancia": 3.0}"#,
            br#"{"success": false}"#,
            br#"{"success": true, "base": 1.0, "area": 1.0}"#,
            br#"<html>oops</html>"#,
        ];
        for body in bodies {
            assert!(matches!(
                DetectionReply::from_json(body),
                Err(TransportError::Protocol(_))
            ));
        }
    }

    #[test]
    fn measurement_status_text() {
        let m = Measurement::Distance {
            distance: 3.0,
            area: 12.5,
        };
        assert_eq!(m.to_string(), "Distance measured: 3 m | Area: 12.5 m²");
    }

    #[test]
    fn layout_queries_use_backend_names() {
        assert_eq!(
            LayoutQuery::Distance(3.5).query_pairs(),
            vec![("distancia", "3.5".to_string())]
        );
        let rect = LayoutQuery::from(Measurement::Rectangle {
            base: 2.0,
            height: 3.0,
            area: 6.0,
        });
        assert_eq!(
            rect.query_pairs(),
            vec![("base", "2".to_string()), ("altura", "3".to_string())]
        );
    }

    #[test]
    fn layout_reply_variants() {
        let ok = parse_layout_reply(
            br#"{"area": 9.0, "nl": 3.52, "x": 2, "y": 2, "total": 4, "image_url": "/static/luminarias_300cm.png"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(ok.total, 4);
        let err = parse_layout_reply(br#"{"error": "La distancia debe ser mayor que 0."}"#)
            .unwrap()
            .unwrap_err();
        assert!(err.contains("mayor"));
    }

    #[test]
    fn profile_reply_variants() {
        let ack = parse_profile_reply(
            br#"{"success": true, "mensaje": "ok", "configuracion": {"MAX_WIDTH": 800}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(ack.settings["MAX_WIDTH"], 800);
        assert_eq!(
            parse_profile_reply(br#"{"error": "bad"}"#).unwrap(),
            Err("bad".to_string())
        );
    }
}
