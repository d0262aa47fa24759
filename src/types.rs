use serde::{de, Deserialize, Deserializer, Serialize};

/// Body of `POST /create-reel`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReelRequest {
    pub video_id: Option<String>,
    pub music_id: Option<String>,
    #[serde(default)]
    pub overlays: OverlaySpec,
    #[serde(default, deserialize_with = "number_or_numeric_string")]
    pub max_duration: Option<f64>,
}

/// Accepts `30`, `12.5` and `"30"`; clients send either form.
fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("maxDuration is not a number: {s:?}"))),
    }
}

/// Up to three captions keyed by screen region.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlaySpec {
    pub top: Option<OverlayText>,
    pub center: Option<OverlayText>,
    pub bottom: Option<OverlayText>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayText {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPosition { Top, Center, Bottom }

impl OverlaySpec {
    /// Non-blank captions in drawing order.
    pub fn entries(&self) -> Vec<(OverlayPosition, &str)> {
        [
            (OverlayPosition::Top, &self.top),
            (OverlayPosition::Center, &self.center),
            (OverlayPosition::Bottom, &self.bottom),
        ]
        .into_iter()
        .filter_map(|(pos, o)| o.as_ref().map(|o| (pos, o.text.as_str())))
        .filter(|(_, text)| !text.trim().is_empty())
        .collect()
    }
}

/// A validated creation request. Immutable once accepted.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub video_id: String,
    pub music_id: String,
    pub overlays: OverlaySpec,
    pub max_duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub status: String,
    pub job_id: String,
    pub status_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub active_jobs: usize,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_payload() {
        let body = r#"{
            "videoId": "v1",
            "musicId": "m1",
            "overlays": {"top": {"text": "Hello"}, "bottom": {"text": "  "}},
            "maxDuration": 30
        }"#;
        let req: CreateReelRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.video_id.as_deref(), Some("v1"));
        assert_eq!(req.max_duration, Some(30.0));
        assert_eq!(req.overlays.entries(), vec![(OverlayPosition::Top, "Hello")]);
    }

    #[test]
    fn overlays_are_optional() {
        let req: CreateReelRequest = serde_json::from_str(r#"{"videoId":"v","musicId":"m"}"#).unwrap();
        assert!(req.overlays.entries().is_empty());
        assert!(req.max_duration.is_none());
    }

    #[test]
    fn ceiling_accepts_numeric_strings() {
        let req: CreateReelRequest =
            serde_json::from_str(r#"{"videoId":"v","musicId":"m","maxDuration":"30"}"#).unwrap();
        assert_eq!(req.max_duration, Some(30.0));
        let req: CreateReelRequest =
            serde_json::from_str(r#"{"videoId":"v","musicId":"m","maxDuration":null}"#).unwrap();
        assert!(req.max_duration.is_none());
        assert!(serde_json::from_str::<CreateReelRequest>(r#"{"videoId":"v","maxDuration":"half"}"#).is_err());
        assert!(serde_json::from_str::<CreateReelRequest>(r#"{"videoId":"v","maxDuration":true}"#).is_err());
    }
}
