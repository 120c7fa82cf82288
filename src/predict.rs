use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub prediction: f64,
    pub trained_at: Option<DateTime<Utc>>,
}

/// Client for the external model-serving endpoint.
#[derive(Debug, Clone)]
pub struct PredictionClient {
    endpoint: String,
    client: Client,
}

impl PredictionClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(config.ml_timeout).build()?;
        Ok(Self {
            endpoint: config.ml_endpoint.clone(),
            client,
        })
    }

    pub fn predict_url(&self, personnel_id: Uuid) -> String {
        format!("{}/ml/predict/{}", self.endpoint, personnel_id)
    }

    pub async fn predict_personnel_performance(&self, personnel_id: Uuid) -> Result<Prediction> {
        let url = self.predict_url(personnel_id);
        tracing::debug!(%url, "requesting performance prediction");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Prediction(format!(
                "{status} from {url}: {}",
                body.trim()
            )));
        }

        Ok(response.json::<Prediction>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> Config {
        Config {
            database_url: "postgres://db".to_string(),
            max_connections: 1,
            ml_endpoint: endpoint.to_string(),
            ml_timeout: std::time::Duration::from_secs(5),
            idle_timeout: std::time::Duration::from_secs(900),
            idle_warning: std::time::Duration::from_secs(60),
        }
    }

    #[test]
    fn builds_prediction_url_from_endpoint() {
        let client = PredictionClient::new(&config("http://ml.school.test")).expect("client");
        let id = Uuid::nil();
        assert_eq!(
            client.predict_url(id),
            "http://ml.school.test/ml/predict/00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn parses_service_payload() {
        let payload = r#"{"prediction": 87.5, "trainedAt": "2026-06-01T08:00:00Z"}"#;
        let parsed: Prediction = serde_json::from_str(payload).expect("parse");
        assert_eq!(parsed.prediction, 87.5);
        assert!(parsed.trained_at.is_some());

        let untrained: Prediction = serde_json::from_str(r#"{"prediction": 0.4}"#).expect("parse");
        assert_eq!(untrained.trained_at, None);
    }
}
