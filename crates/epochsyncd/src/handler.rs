//! Command handling

use epochsync_api::{
    API_VERSION, Command, ErrorCode, ErrorInfo, Event, EventPayload, Request, Response,
    ResponsePayload, StatusSnapshot,
};
use epochsync_clock::ClockSyncService;
use epochsync_core::EpochStateMachine;
use epochsync_util::EpochSyncError;
use tracing::{debug, info};

/// Result of one command
#[derive(Debug)]
pub struct HandledCommand {
    pub response: Response,
    /// Events to stream after the response
    pub events: Vec<Event>,
    pub shutdown: bool,
}

impl HandledCommand {
    fn reply(response: Response) -> Self {
        Self {
            response,
            events: Vec::new(),
            shutdown: false,
        }
    }
}

/// Applies commands to the clock service and the state machine
#[derive(Debug, Clone)]
pub struct CommandHandler {
    clock: ClockSyncService,
    machine: EpochStateMachine,
}

impl CommandHandler {
    pub fn new(clock: ClockSyncService, machine: EpochStateMachine) -> Self {
        Self { clock, machine }
    }

    pub async fn handle(&self, request: Request) -> HandledCommand {
        let request_id = request.request_id;
        debug!(request_id, command = ?request.command, "Handling command");

        match request.command {
            Command::LoadEpoch(boundary) => match self.machine.initialize_epoch(boundary) {
                Ok(epoch) => HandledCommand {
                    response: Response::success(
                        request_id,
                        ResponsePayload::EpochLoaded {
                            epoch: epoch.clone(),
                        },
                    ),
                    events: vec![Event::new(EventPayload::EpochLoaded { epoch })],
                    shutdown: false,
                },
                Err(e) => HandledCommand::reply(Response::error(request_id, error_info(&e))),
            },

            Command::RefreshRanking { order } => {
                HandledCommand::reply(match self.machine.refresh_ranking_order(order) {
                    Ok(epoch) => {
                        Response::success(request_id, ResponsePayload::RankingUpdated { epoch })
                    }
                    Err(e) => Response::error(request_id, error_info(&e)),
                })
            }

            Command::SetFinalRanking { ranking } => {
                HandledCommand::reply(match self.machine.set_final_ranking(ranking) {
                    Ok(epoch) => {
                        Response::success(request_id, ResponsePayload::RankingUpdated { epoch })
                    }
                    Err(e) => Response::error(request_id, error_info(&e)),
                })
            }

            Command::GetStatus => HandledCommand::reply(Response::success(
                request_id,
                ResponsePayload::Status(self.status()),
            )),

            Command::SyncNow => {
                let sample = self.clock.sync().await;
                HandledCommand::reply(Response::success(
                    request_id,
                    ResponsePayload::Synced(sample),
                ))
            }

            Command::Shutdown => {
                info!(request_id, "Shutdown requested");
                HandledCommand {
                    response: Response::success(request_id, ResponsePayload::ShuttingDown),
                    events: Vec::new(),
                    shutdown: true,
                }
            }
        }
    }

    /// Current clock and epoch state
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            api_version: API_VERSION,
            server_time: self.clock.server_time(),
            offset_millis: self.clock.offset(),
            sync_quality: self.clock.sync_quality(),
            last_sample: self.clock.last_sample(),
            epoch: self.machine.current_epoch(),
            time_remaining: self.machine.time_remaining(),
        }
    }
}

/// Map a service error to its protocol error
pub fn error_info(error: &EpochSyncError) -> ErrorInfo {
    let code = match error {
        EpochSyncError::InvalidBoundary(_) => ErrorCode::InvalidBoundary,
        EpochSyncError::NoEpochLoaded => ErrorCode::NoEpochLoaded,
        EpochSyncError::FinalRankingAlreadySet(_) | EpochSyncError::NotSettling { .. } => {
            ErrorCode::FinalRankingRejected
        }
        _ => ErrorCode::InternalError,
    };
    ErrorInfo::new(code, error.to_string())
}
