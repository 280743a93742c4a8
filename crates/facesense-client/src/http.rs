//! JSON-over-HTTP client for the FaceSense attendance backend.
//!
//! `ureq` is blocking, so every exchange runs on tokio's blocking pool. A
//! 4xx from the enrollment or marking endpoints is the server declining the
//! request and becomes a negative acknowledgement; everything else that is
//! not 2xx surfaces as [`GatewayError::Rejected`].

use base64::Engine as _;
use facesense_core::{
    AttendanceGateway, AttendanceKind, Coordinate, EnrollAck, GatewayError, MarkAck, MarkRequest,
    RecognitionOutcome, SubjectId,
};
use facesense_hw::FrameSnapshot;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the backend to retrain its recognition model from stored samples.
    pub async fn train(&self) -> Result<String, GatewayError> {
        tracing::info!(gateway = %self.base_url, "requesting model training");
        match self
            .exchange::<TrainReply>("/api/train", Some(serde_json::json!({})))
            .await?
        {
            Reply::Accepted(reply) => Ok(reply
                .message
                .unwrap_or_else(|| "Model trained".to_string())),
            Reply::Refused { status, message } => Err(GatewayError::Rejected { status, message }),
        }
    }

    async fn exchange<R>(
        &self,
        path: &'static str,
        body: Option<serde_json::Value>,
    ) -> Result<Reply<R>, GatewayError>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "gateway request");
        tokio::task::spawn_blocking(move || exchange_blocking(&agent, &url, body))
            .await
            .map_err(|e| GatewayError::Transport(format!("request task failed: {e}")))?
    }
}

impl AttendanceGateway for HttpGateway {
    async fn recognize(
        &self,
        frame: &FrameSnapshot,
        coordinate: Option<Coordinate>,
    ) -> Result<RecognitionOutcome, GatewayError> {
        let (latitude, longitude) = split(coordinate);
        let body = to_body(&RecognizeBody {
            image: data_url(frame),
            latitude,
            longitude,
        })?;
        match self.exchange::<RecognizeReply>("/api/recognize", Some(body)).await? {
            Reply::Accepted(reply) => Ok(reply.into()),
            Reply::Refused { status, message } => Err(GatewayError::Rejected { status, message }),
        }
    }

    async fn enroll(
        &self,
        subject: &SubjectId,
        frame: &FrameSnapshot,
        coordinate: Option<Coordinate>,
    ) -> Result<EnrollAck, GatewayError> {
        let (latitude, longitude) = split(coordinate);
        let body = to_body(&EnrollBody {
            user_id: subject.clone(),
            image: data_url(frame),
            latitude,
            longitude,
        })?;
        let reply = self
            .exchange::<EnrollReply>("/api/register-face", Some(body))
            .await?;
        enroll_ack(reply)
    }

    async fn mark(&self, request: MarkRequest<'_>) -> Result<MarkAck, GatewayError> {
        let (latitude, longitude) = split(request.coordinate);
        let body = to_body(&MarkBody {
            user_id: request.subject.id.clone(),
            user_name: request.subject.name.clone(),
            kind: request.kind,
            latitude,
            longitude,
            location_ok: request.location_ok,
        })?;
        let reply = self
            .exchange::<MarkReply>("/api/attendance/mark", Some(body))
            .await?;
        mark_ack(reply)
    }

    async fn sample_count(&self, subject: &SubjectId) -> Result<Option<u32>, GatewayError> {
        match self.exchange::<RegistryReply>("/api/face-registry", None).await? {
            Reply::Accepted(reply) => Ok(reply.samples_for(subject)),
            Reply::Refused { status, message } => Err(GatewayError::Rejected { status, message }),
        }
    }
}

/// A decoded response: either the 2xx body or the server's refusal text.
#[derive(Debug)]
enum Reply<R> {
    Accepted(R),
    Refused { status: u16, message: String },
}

fn exchange_blocking<R: DeserializeOwned>(
    agent: &ureq::Agent,
    url: &str,
    body: Option<serde_json::Value>,
) -> Result<Reply<R>, GatewayError> {
    let result = match body {
        Some(body) => agent.post(url).send_json(body),
        None => agent.get(url).call(),
    };
    match result {
        Ok(response) => response
            .into_json::<R>()
            .map(Reply::Accepted)
            .map_err(|e| GatewayError::Malformed(e.to_string())),
        Err(ureq::Error::Status(status, response)) => {
            let text = response.into_string().ok();
            let message = refusal_message(status, text.as_deref());
            tracing::debug!(%url, status, %message, "gateway refused request");
            Ok(Reply::Refused { status, message })
        }
        Err(ureq::Error::Transport(e)) => Err(GatewayError::Transport(e.to_string())),
    }
}

fn to_body<T: Serialize>(body: &T) -> Result<serde_json::Value, GatewayError> {
    serde_json::to_value(body).map_err(|e| GatewayError::Malformed(e.to_string()))
}

fn data_url(frame: &FrameSnapshot) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(frame.jpeg())
    )
}

fn split(coordinate: Option<Coordinate>) -> (Option<f64>, Option<f64>) {
    match coordinate {
        Some(c) => (Some(c.latitude), Some(c.longitude)),
        None => (None, None),
    }
}

/// Pull `error` (or `message`) out of an error body, falling back to the
/// status code.
fn refusal_message(status: u16, body: Option<&str>) -> String {
    body.and_then(|text| serde_json::from_str::<ErrorBody>(text).ok())
        .and_then(|e| e.error.or(e.message))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("server returned HTTP {status}"))
}

fn is_client_error(status: u16) -> bool {
    (400..500).contains(&status)
}

fn enroll_ack(reply: Reply<EnrollReply>) -> Result<EnrollAck, GatewayError> {
    match reply {
        Reply::Accepted(reply) => Ok(EnrollAck {
            accepted: reply.ok,
            samples: reply.samples,
            location_saved: reply.location_saved,
            message: reply.message.or(reply.error),
        }),
        Reply::Refused { status, message } if is_client_error(status) => Ok(EnrollAck {
            accepted: false,
            message: Some(message),
            ..EnrollAck::default()
        }),
        Reply::Refused { status, message } => Err(GatewayError::Rejected { status, message }),
    }
}

fn mark_ack(reply: Reply<MarkReply>) -> Result<MarkAck, GatewayError> {
    match reply {
        Reply::Accepted(reply) => Ok(MarkAck {
            ok: true,
            message: reply.message,
        }),
        Reply::Refused { status, message } if is_client_error(status) => Ok(MarkAck {
            ok: false,
            message: Some(message),
        }),
        Reply::Refused { status, message } => Err(GatewayError::Rejected { status, message }),
    }
}

// Wire types.

#[derive(Serialize)]
struct RecognizeBody {
    image: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RecognizeReply {
    #[serde(default)]
    recognized: bool,
    user_id: Option<SubjectId>,
    name: Option<String>,
    confidence: Option<f32>,
    location_ok: Option<bool>,
    message: Option<String>,
}

impl From<RecognizeReply> for RecognitionOutcome {
    fn from(reply: RecognizeReply) -> Self {
        RecognitionOutcome {
            recognized: reply.recognized,
            subject_id: reply.user_id,
            subject_name: reply.name,
            confidence: reply.confidence,
            location_ok: reply.location_ok,
            message: reply.message,
        }
    }
}

#[derive(Serialize)]
struct EnrollBody {
    user_id: SubjectId,
    image: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct EnrollReply {
    #[serde(default)]
    ok: bool,
    samples: Option<u32>,
    #[serde(default)]
    location_saved: bool,
    message: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct MarkBody {
    user_id: SubjectId,
    user_name: String,
    #[serde(rename = "type")]
    kind: AttendanceKind,
    latitude: Option<f64>,
    longitude: Option<f64>,
    location_ok: bool,
}

#[derive(Debug, Deserialize)]
struct MarkReply {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryReply {
    #[serde(default)]
    registry: Vec<RegistryEntry>,
}

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    user_id: SubjectId,
    samples_count: Option<u32>,
}

impl RegistryReply {
    fn samples_for(&self, subject: &SubjectId) -> Option<u32> {
        self.registry
            .iter()
            .find(|entry| &entry.user_id == subject)
            .map(|entry| entry.samples_count.unwrap_or(0))
    }
}

#[derive(Debug, Deserialize)]
struct TrainReply {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}
