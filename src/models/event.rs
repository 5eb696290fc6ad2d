//! Event models for the SSE stream and the publish API.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// One decoded server-to-client event.
///
/// Wire shape is a flat JSON object discriminated by `type`, e.g.
/// `{"type":"progress","projectId":"abc","progress":42}`. Unknown types are
/// rejected at decode time; every field other than `type` may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RelayEvent {
    /// Routing subject. Absent means "applies to everyone".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 128))]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 128))]
    pub id: Option<String>,
    /// Correlates an event with the request that triggered the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 128))]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payload keyed on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    Connected,
    Heartbeat,
    #[serde(rename_all = "camelCase")]
    Progress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        object: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    #[serde(rename = "error", alias = "failed")]
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        object: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
}

impl RelayEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            project_id: None,
            id: None,
            request_id: None,
            kind,
        }
    }

    pub fn for_subject(subject: impl Into<String>, kind: EventKind) -> Self {
        Self {
            project_id: Some(subject.into()),
            ..Self::new(kind)
        }
    }

    /// Decode one event from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Subject used for routing, if the event names one.
    pub fn subject(&self) -> Option<&str> {
        self.project_id.as_deref().filter(|s| !s.is_empty())
    }

    /// Wire value of `type`.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            EventKind::Connected => "connected",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Progress { .. } => "progress",
            EventKind::Status { .. } => "status",
            EventKind::Completed { .. } => "completed",
            EventKind::Failed { .. } => "error",
            EventKind::Update { .. } => "update",
        }
    }

    /// Progress, when given, must be a percentage.
    pub fn progress_in_range(&self) -> bool {
        match self.kind {
            EventKind::Progress { progress: Some(p), .. } => (0.0..=100.0).contains(&p),
            _ => true,
        }
    }

    /// Result location of a completed job (`videoUrl`, else `url`).
    pub fn result_url(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Completed { video_url, url, .. } => {
                video_url.as_deref().or(url.as_deref())
            }
            _ => None,
        }
    }
}
