//! Channel names and URL conventions.
//!
//! A channel is the transport-level address of an event stream:
//! `file.{id}` or `project.{id}`. The id part is the subject that events
//! are routed by.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Base path of the event stream endpoint.
pub const EVENTS_PATH: &str = "/api/events";

/// Channel kind based on prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// `file.{fileId}`
    File,
    /// `project.{projectId}`
    Project,
}

impl ChannelKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            ChannelKind::File => "file",
            ChannelKind::Project => "project",
        }
    }
}

/// A parsed channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    pub kind: ChannelKind,
    pub id: String,
}

impl Channel {
    pub fn new(kind: ChannelKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Parse an exact channel name (`file.abc`, `project.abc`).
    pub fn from_name(name: &str) -> Option<Self> {
        let (prefix, id) = name.split_once('.')?;
        let kind = match prefix {
            "file" => ChannelKind::File,
            "project" => ChannelKind::Project,
            _ => return None,
        };
        if !is_valid_id(id) {
            return None;
        }
        Some(Self::new(kind, id))
    }

    /// Find the channel named by a URL: the first path segment of the form
    /// `file.<id>` or `project.<id>`. Host, query and fragment never match.
    pub fn from_url(url: &str) -> Option<Self> {
        match Url::parse(url) {
            Ok(absolute) => absolute.path_segments()?.find_map(Self::from_name),
            Err(_) => {
                let path = url.split(['?', '#']).next().unwrap_or("");
                path.split('/').find_map(Self::from_name)
            }
        }
    }

    /// Subject that events on this channel are routed by.
    pub fn subject(&self) -> &str {
        &self.id
    }

    /// Endpoint path for this channel, e.g. `/api/events/project.abc`.
    pub fn path(&self) -> String {
        format!("{}/{}", EVENTS_PATH, self)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.prefix(), self.id)
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
