//! Main service loop

use anyhow::{Context, Result};
use epochsync_api::{
    Command, EpochEvent, ErrorCode, ErrorInfo, Event, EventPayload, OutputMessage, Response,
};
use epochsync_clock::{ClockSyncService, HttpTimeSource, TimeSource};
use epochsync_config::Settings;
use epochsync_core::EpochStateMachine;
use epochsync_util::{LocalClock, SystemClock, format_timestamp};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{
    CommandHandler, HandledCommand, InputMessage, read_epoch_file, spawn_output_writer,
    spawn_request_reader,
};

/// Out-of-band control, usually from process signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Re-read the epoch file
    Reload,
    Shutdown,
}

/// The composed service: clock, state machine and command handling
pub struct Daemon {
    clock: ClockSyncService,
    machine: EpochStateMachine,
    handler: CommandHandler,
    epoch_path: Option<PathBuf>,
}

impl Daemon {
    pub fn new(
        settings: Settings,
        source: Arc<dyn TimeSource>,
        local: Arc<dyn LocalClock>,
        epoch_path: Option<PathBuf>,
    ) -> Self {
        let clock = ClockSyncService::new(source, local, settings.clock);
        let machine = EpochStateMachine::new(clock.clone(), settings.epoch);
        let handler = CommandHandler::new(clock.clone(), machine.clone());

        Self {
            clock,
            machine,
            handler,
            epoch_path,
        }
    }

    /// HTTP time source on the system clock
    pub fn from_settings(settings: Settings, epoch_path: Option<PathBuf>) -> Result<Self> {
        let source = HttpTimeSource::new(&settings.clock).context("Failed to create time source")?;
        Ok(Self::new(settings, Arc::new(source), Arc::new(SystemClock), epoch_path))
    }

    /// Serve requests from `input` and stream responses and events to
    /// `output` until a shutdown command or signal.
    ///
    /// EOF on `input` stops reading but keeps the service running.
    pub async fn run<R, W>(
        self,
        input: R,
        output: W,
        mut control: mpsc::UnboundedReceiver<ControlSignal>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let writer = spawn_output_writer(output, out_rx);

        let (in_tx, mut in_rx) = mpsc::unbounded_channel();
        let reader = spawn_request_reader(input, in_tx);

        // Machine callbacks run on the tick task; hand events over to this loop
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<EpochEvent>();
        let subscription = self.machine.on_event(move |event| {
            let _ = event_tx.send(event.clone());
        });

        let mut samples = self.clock.watch_samples();
        let auto_sync = self
            .clock
            .start_auto_sync()
            .context("Failed to start clock auto-sync")?;

        if self.epoch_path.is_some() {
            self.reload_epoch(&out_tx).await;
        }

        self.machine
            .start()
            .context("Failed to start epoch tick loop")?;

        info!("Service running");

        // In-flight `sync_now` round trips
        let mut syncs = JoinSet::new();

        let mut input_open = true;
        loop {
            tokio::select! {
                Some(event) = event_rx.recv() => {
                    emit(&out_tx, Event::new(event.into()));
                }

                Ok(()) = samples.changed() => {
                    let sample = *samples.borrow_and_update();
                    if let Some(sample) = sample {
                        emit(&out_tx, Event::new(EventPayload::ClockSynced(sample)));
                    }
                }

                Some(joined) = syncs.join_next(), if !syncs.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Sync request task failed");
                    }
                }

                message = in_rx.recv(), if input_open => match message {
                    Some(InputMessage::Request(request)) if matches!(request.command, Command::SyncNow) => {
                        let handler = self.handler.clone();
                        let out_tx = out_tx.clone();
                        syncs.spawn(async move {
                            send_handled(&out_tx, handler.handle(request).await);
                        });
                    }
                    Some(InputMessage::Request(request)) => {
                        let handled = self.handler.handle(request).await;
                        let shutdown = handled.shutdown;
                        send_handled(&out_tx, handled);
                        if shutdown {
                            break;
                        }
                    }
                    Some(InputMessage::Invalid { request_id, error }) => {
                        let response = Response::error(
                            request_id,
                            ErrorInfo::new(ErrorCode::InvalidRequest, error),
                        );
                        let _ = out_tx.send(OutputMessage::Response(response));
                    }
                    None => {
                        info!("Command input closed, continuing without it");
                        input_open = false;
                    }
                },

                Some(signal) = control.recv() => match signal {
                    ControlSignal::Reload => {
                        if self.epoch_path.is_some() {
                            self.reload_epoch(&out_tx).await;
                        } else {
                            debug!("Reload requested without an epoch file");
                        }
                    }
                    ControlSignal::Shutdown => {
                        info!("Shutdown signal received");
                        break;
                    }
                },
            }
        }

        info!("Shutting down epochsyncd");

        self.machine.stop();
        auto_sync.cancel();
        syncs.shutdown().await;
        subscription.unsubscribe();
        self.machine.destroy();
        reader.abort();

        flush_events(&mut event_rx, &out_tx);
        emit(&out_tx, Event::new(EventPayload::Shutdown));
        drop(out_tx);
        if let Err(e) = writer.await {
            warn!(error = %e, "Output writer ended abnormally");
        }

        Ok(())
    }

    async fn reload_epoch(&self, out_tx: &mpsc::UnboundedSender<OutputMessage>) {
        let Some(path) = &self.epoch_path else {
            return;
        };

        let result = read_epoch_file(path)
            .await
            .and_then(|boundary| self.machine.initialize_epoch(boundary).map_err(Into::into));

        match result {
            Ok(epoch) => {
                info!(
                    path = %path.display(),
                    epoch_id = %epoch.id,
                    start = %format_timestamp(&epoch.start),
                    end = %format_timestamp(&epoch.end),
                    "Epoch file loaded"
                );
                emit(out_tx, Event::new(EventPayload::EpochLoaded { epoch }));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{:#}", e), "Failed to load epoch file");
            }
        }
    }
}

fn emit(out_tx: &mpsc::UnboundedSender<OutputMessage>, event: Event) {
    let _ = out_tx.send(OutputMessage::Event(event));
}

fn send_handled(out_tx: &mpsc::UnboundedSender<OutputMessage>, handled: HandledCommand) {
    let _ = out_tx.send(OutputMessage::Response(handled.response));
    for event in handled.events {
        emit(out_tx, event);
    }
}

/// Forward machine events that were queued but not yet streamed
fn flush_events(
    event_rx: &mut mpsc::UnboundedReceiver<EpochEvent>,
    out_tx: &mpsc::UnboundedSender<OutputMessage>,
) -> usize {
    let mut flushed = 0;
    while let Ok(event) = event_rx.try_recv() {
        emit(out_tx, Event::new(event.into()));
        flushed += 1;
    }
    if flushed > 0 {
        debug!(flushed, "Flushed queued epoch events");
    }
    flushed
}
