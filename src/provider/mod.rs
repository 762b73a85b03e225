pub mod normalize;
pub mod request;
pub mod transport;

use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::Config;
use crate::error::MirageError;
use crate::provider::request::GenerationRequest;
use crate::provider::transport::{SendOptions, Transport};

/// Closed set of provider models. The discriminator selects the endpoint
/// pair, the wire shape of the create request, and the result encoding;
/// nothing else may vary per model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Model {
    Gpt4oImage,
    FluxKontextPro,
    FluxKontextMax,
    Veo,
    VeoFast,
    Runway,
    KlingStandard,
    KlingPro,
}

/// The two status-payload conventions observed across provider models.
/// Kept separate behind [`normalize::normalize`]; never merged upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultEncoding {
    /// `state` ∈ waiting | success | fail, URLs inside a `resultJson` string.
    StateString,
    /// `successFlag` ∈ 0 | 1 | 2 | 3, URLs under `response.resultUrls`.
    IntegerFlag,
}

impl Model {
    /// Provider family name, used in logs and failure rows.
    pub fn service(self) -> &'static str {
        match self {
            Self::Gpt4oImage => "gpt4o-image",
            Self::FluxKontextPro | Self::FluxKontextMax => "flux-kontext",
            Self::Veo | Self::VeoFast => "veo",
            Self::Runway => "runway",
            Self::KlingStandard | Self::KlingPro => "kling",
        }
    }

    pub fn create_endpoint(self) -> &'static str {
        match self {
            Self::Gpt4oImage => "/api/v1/gpt4o-image/generate",
            Self::FluxKontextPro | Self::FluxKontextMax => "/api/v1/flux/kontext/generate",
            Self::Veo | Self::VeoFast => "/api/v1/veo/generate",
            Self::Runway => "/api/v1/runway/generate",
            Self::KlingStandard | Self::KlingPro => "/api/v1/jobs/createTask",
        }
    }

    pub fn query_endpoint(self) -> &'static str {
        match self {
            Self::Gpt4oImage => "/api/v1/gpt4o-image/record-info",
            Self::FluxKontextPro | Self::FluxKontextMax => "/api/v1/flux/kontext/record-info",
            Self::Veo | Self::VeoFast => "/api/v1/veo/record-info",
            Self::Runway => "/api/v1/runway/record-detail",
            Self::KlingStandard | Self::KlingPro => "/api/v1/jobs/recordInfo",
        }
    }

    pub fn encoding(self) -> ResultEncoding {
        match self {
            Self::Gpt4oImage | Self::Veo | Self::VeoFast => ResultEncoding::IntegerFlag,
            Self::FluxKontextPro
            | Self::FluxKontextMax
            | Self::Runway
            | Self::KlingStandard
            | Self::KlingPro => ResultEncoding::StateString,
        }
    }

    /// Base interval between status polls. Image jobs settle in seconds,
    /// video jobs in minutes, so the families poll at different cadences.
    pub fn poll_interval(self) -> Duration {
        match self {
            Self::Gpt4oImage | Self::FluxKontextPro | Self::FluxKontextMax => {
                Duration::from_secs(5)
            }
            Self::Veo | Self::VeoFast | Self::Runway | Self::KlingStandard | Self::KlingPro => {
                Duration::from_secs(15)
            }
        }
    }

    /// Backoff cap for the poll schedule.
    pub fn max_poll_interval(self) -> Duration {
        match self {
            Self::Gpt4oImage | Self::FluxKontextPro | Self::FluxKontextMax => {
                Duration::from_secs(30)
            }
            Self::Veo | Self::VeoFast | Self::Runway | Self::KlingStandard | Self::KlingPro => {
                Duration::from_secs(60)
            }
        }
    }
}

/// Task Creator + Task Query against the provider API. Holds the one
/// [`Transport`] constructed at process start; no hidden globals.
#[derive(Debug)]
pub struct ProviderClient {
    transport: Transport,
}

impl ProviderClient {
    pub fn new(config: &Config) -> Self {
        Self {
            transport: Transport::new(config),
        }
    }

    /// Submit a generation request and return the provider-assigned
    /// external task id. No Task Store writes happen here; the caller
    /// persists the PENDING row before any poll starts.
    pub async fn create_task(&self, request: &GenerationRequest) -> Result<String, MirageError> {
        let model = request.model();
        let (path, body) = request.to_wire();

        let envelope = self
            .transport
            .send(Method::POST, path, Some(&body), &SendOptions::default())
            .await?;

        let external_task_id = envelope["data"]["taskId"]
            .as_str()
            .map(str::to_owned)
            .ok_or(MirageError::MissingField("data.taskId"))?;

        tracing::info!(
            service = model.service(),
            model = ?model,
            external_task_id = %external_task_id,
            "generation task created"
        );

        Ok(external_task_id)
    }

    /// Fetch the raw provider status record for a task. The record keeps
    /// its provider shape; normalization belongs to [`normalize`].
    pub async fn query_task(
        &self,
        model: Model,
        external_task_id: &str,
    ) -> Result<Value, MirageError> {
        let params = json!({ "taskId": external_task_id });

        let envelope = self
            .transport
            .send(
                Method::GET,
                model.query_endpoint(),
                Some(&params),
                &SendOptions::default(),
            )
            .await?;

        envelope
            .get("data")
            .filter(|d| !d.is_null())
            .cloned()
            .ok_or(MirageError::MissingField("data"))
    }
}
