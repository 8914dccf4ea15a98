//! Command types for the epochsyncd NDJSON protocol

use epochsync_util::ParticipantId;
use serde::{Deserialize, Serialize};

use crate::{API_VERSION, ClockSyncSample, Epoch, EpochBoundary, Event, RankedEntry, StatusSnapshot};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            command,
        }
    }
}

/// Commands accepted from the boundary supplier and ranking service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Replace the loaded epoch
    LoadEpoch(EpochBoundary),

    /// Overwrite the provisional display ordering
    RefreshRanking { order: Vec<ParticipantId> },

    /// Attach the authoritative final ranking
    SetFinalRanking { ranking: Vec<RankedEntry> },

    /// Get the current status snapshot
    GetStatus,

    /// Run a clock sync immediately
    SyncNow,

    /// Stop the service
    Shutdown,
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.result, ResponseResult::Ok(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidBoundary,
    NoEpochLoaded,
    FinalRankingRejected,
    InternalError,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    EpochLoaded { epoch: Epoch },
    RankingUpdated { epoch: Epoch },
    Status(StatusSnapshot),
    Synced(ClockSyncSample),
    ShuttingDown,
}

/// One line of daemon output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum OutputMessage {
    Response(Response),
    Event(Event),
}
