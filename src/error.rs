//! Error taxonomy for the transfer pipeline and its collaborators.
//!
//! The CLI surface reports through `anyhow`; these types classify the
//! failures that are handled (degraded, logged, retried next cycle) rather
//! than propagated. Transport and persistence errors never abort a run,
//! stage errors are isolated to their item, and cancellation is the only
//! condition that tears down the whole cycle.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A pipeline stage, used to attribute per-item failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SegmentProbe,
    SegmentFetch,
    Captions,
    Transcode,
    Tag,
    Placement,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::SegmentProbe => "segment probe",
            Stage::SegmentFetch => "segment fetch",
            Stage::Captions => "caption extract",
            Stage::Transcode => "transcode",
            Stage::Tag => "tag",
            Stage::Placement => "placement",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The device (or the discovery service) could not be reached.
    #[error("transport failure talking to {device}: {source}")]
    Transport {
        device: String,
        #[source]
        source: reqwest::Error,
    },

    /// The device answered with a non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    /// A cache or history file could not be read or written.
    #[error("cannot {op} {}: {source}", path.display())]
    Persistence {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A pipeline stage failed for one item; other items are unaffected.
    #[error("{stage} failed for {identity}: {message}")]
    Stage {
        stage: Stage,
        identity: String,
        message: String,
    },

    /// The user interrupted the run.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn stage(stage: Stage, identity: &str, message: impl Into<String>) -> Self {
        Error::Stage {
            stage,
            identity: identity.to_string(),
            message: message.into(),
        }
    }
}
