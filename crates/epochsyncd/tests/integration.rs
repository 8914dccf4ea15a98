//! Integration tests for epochsyncd
//!
//! These drive the full service (config, clock sync, state machine and the
//! NDJSON protocol) over in-memory pipes with a mock time server.

use epochsync_api::{
    EpochPhase, ErrorCode, EventPayload, OutputMessage, Response, ResponsePayload,
    ResponseResult,
};
use epochsync_clock::{MockTimeSource, TimeSourceError};
use epochsync_config::{Settings, parse_config};
use epochsync_util::{ManualClock, add_millis, from_unix_millis};
use epochsyncd::{ControlSignal, Daemon};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const T: i64 = 1_767_225_600_000;
const OFFSET: i64 = 2_000;
const LATENCY_MS: u64 = 40;

fn test_settings() -> Settings {
    parse_config(
        r#"
        config_version = 1

        [clock]
        time_url = "http://127.0.0.1:9/time"

        [epoch]
        tick_period_ms = 20
        cooldown_seconds = 120

        [[epoch.warnings]]
        seconds_before = 30
        severity = "critical"
        message = "{epoch_id} closes in {seconds}s"
        "#,
    )
    .unwrap()
}

struct Harness {
    input: DuplexStream,
    lines: Lines<BufReader<DuplexStream>>,
    control: mpsc::UnboundedSender<ControlSignal>,
    local: ManualClock,
    source: Arc<MockTimeSource>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    fn start(epoch_path: Option<PathBuf>, failing: bool) -> Self {
        let local = ManualClock::at_millis(T);
        let source = Arc::new(
            MockTimeSource::new(local.clone(), OFFSET)
                .with_latency(Duration::from_millis(LATENCY_MS)),
        );
        if failing {
            source.set_failure(Some(TimeSourceError::BadStatus(503)));
        }

        let daemon = Daemon::new(
            test_settings(),
            source.clone(),
            Arc::new(local.clone()),
            epoch_path,
        );

        let (input, daemon_input) = tokio::io::duplex(64 * 1024);
        let (daemon_output, output) = tokio::io::duplex(64 * 1024);
        let (control, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(daemon.run(daemon_input, daemon_output, control_rx));

        Self {
            input,
            lines: BufReader::new(output).lines(),
            control,
            local,
            source,
            task,
        }
    }

    async fn send(&mut self, json: &str) {
        self.input
            .write_all(format!("{}\n", json).as_bytes())
            .await
            .unwrap();
    }

    async fn next(&mut self) -> Option<OutputMessage> {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for output")
            .unwrap()?;
        Some(serde_json::from_str(&line).unwrap())
    }

    async fn wait_for(&mut self, pred: impl Fn(&OutputMessage) -> bool) -> OutputMessage {
        loop {
            let message = self.next().await.expect("output closed");
            if pred(&message) {
                return message;
            }
        }
    }

    async fn response(&mut self, request_id: u64) -> Response {
        match self
            .wait_for(|m| matches!(m, OutputMessage::Response(r) if r.request_id == request_id))
            .await
        {
            OutputMessage::Response(response) => response,
            _ => unreachable!(),
        }
    }

    async fn event(&mut self, pred: impl Fn(&EventPayload) -> bool) -> EventPayload {
        match self
            .wait_for(|m| matches!(m, OutputMessage::Event(e) if pred(&e.payload)))
            .await
        {
            OutputMessage::Event(event) => event.payload,
            _ => unreachable!(),
        }
    }

    /// Set the local clock so that synchronized time is `T + server_offset`
    fn set_server_time(&self, server_offset: i64) {
        self.local
            .set(from_unix_millis(T + server_offset - OFFSET).unwrap());
    }

    async fn shutdown(mut self, request_id: u64) {
        self.send(&format!(
            r#"{{"request_id":{},"command":{{"type":"shutdown"}}}}"#,
            request_id
        ))
        .await;
        let response = self.response(request_id).await;
        assert!(matches!(
            response.result,
            ResponseResult::Ok(ResponsePayload::ShuttingDown)
        ));

        self.event(|p| matches!(p, EventPayload::Shutdown)).await;
        assert!(self.next().await.is_none());
        self.task.await.unwrap().unwrap();
    }
}

fn load_epoch(request_id: u64, id: &str, start: i64, end: i64) -> String {
    format!(
        r#"{{"request_id":{},"command":{{"type":"load_epoch","epoch_id":"{}","start_timestamp":{},"end_timestamp":{}}}}}"#,
        request_id,
        id,
        T + start,
        T + end
    )
}

fn error_code(response: &Response) -> Option<ErrorCode> {
    match &response.result {
        ResponseResult::Err(info) => Some(info.code),
        ResponseResult::Ok(_) => None,
    }
}

#[tokio::test]
async fn full_epoch_over_ndjson() {
    let mut h = Harness::start(None, false);

    // Startup sync lands first
    match h.event(|p| matches!(p, EventPayload::ClockSynced(_))).await {
        EventPayload::ClockSynced(sample) => {
            assert_eq!(sample.offset_millis, OFFSET);
            assert_eq!(sample.round_trip_millis, LATENCY_MS);
        }
        _ => unreachable!(),
    }
    assert_eq!(h.source.request_count(), 1);

    // Synchronized time is now T + LATENCY_MS + OFFSET
    h.send(&load_epoch(1, "round-1", 5_000, 65_000)).await;
    let response = h.response(1).await;
    match response.result {
        ResponseResult::Ok(ResponsePayload::EpochLoaded { epoch }) => {
            assert_eq!(epoch.phase, EpochPhase::PreEpoch);
            assert_eq!(epoch.id.as_str(), "round-1");
        }
        other => panic!("Expected EpochLoaded, got {:?}", other),
    }
    h.event(|p| matches!(p, EventPayload::EpochLoaded { .. })).await;

    h.send(r#"{"request_id":2,"command":{"type":"get_status"}}"#).await;
    match h.response(2).await.result {
        ResponseResult::Ok(ResponsePayload::Status(status)) => {
            assert_eq!(status.offset_millis, OFFSET);
            let expected = 5_000 - (LATENCY_MS as i64 + OFFSET);
            assert_eq!(status.time_remaining, Duration::from_millis(expected as u64));
            assert_eq!(status.epoch.unwrap().phase, EpochPhase::PreEpoch);
        }
        other => panic!("Expected Status, got {:?}", other),
    }

    // Cross the start boundary
    h.set_server_time(5_000);
    match h.event(|p| matches!(p, EventPayload::Transition(_))).await {
        EventPayload::Transition(t) => {
            assert_eq!(t.from, EpochPhase::PreEpoch);
            assert_eq!(t.to, EpochPhase::Active);
            assert_eq!(t.epoch.phase, EpochPhase::Active);
        }
        _ => unreachable!(),
    }

    h.send(r#"{"request_id":3,"command":{"type":"refresh_ranking","order":["bob","alice"]}}"#)
        .await;
    match h.response(3).await.result {
        ResponseResult::Ok(ResponsePayload::RankingUpdated { epoch }) => {
            assert_eq!(epoch.locked_ranking.len(), 2);
            assert_eq!(epoch.locked_ranking[0].as_str(), "bob");
        }
        other => panic!("Expected RankingUpdated, got {:?}", other),
    }

    let final_ranking = r#"{"request_id":RID,"command":{"type":"set_final_ranking","ranking":[{"participant":"alice","rank":1,"score":104.5},{"participant":"bob","rank":2,"score":99.0}]}}"#;

    h.send(&final_ranking.replace("RID", "4")).await;
    let response = h.response(4).await;
    assert_eq!(error_code(&response), Some(ErrorCode::FinalRankingRejected));

    // Jump past cooldown: both remaining transitions arrive in order
    h.set_server_time(65_000 + 120_000 + 1);
    match h.event(|p| matches!(p, EventPayload::Transition(_))).await {
        EventPayload::Transition(t) => assert_eq!(t.to, EpochPhase::Cooldown),
        _ => unreachable!(),
    }
    match h.event(|p| matches!(p, EventPayload::Transition(_))).await {
        EventPayload::Transition(t) => assert_eq!(t.to, EpochPhase::Settling),
        _ => unreachable!(),
    }

    h.send(&final_ranking.replace("RID", "5")).await;
    match h.response(5).await.result {
        ResponseResult::Ok(ResponsePayload::RankingUpdated { epoch }) => {
            let ranking = epoch.final_ranking.unwrap();
            assert_eq!(ranking.len(), 2);
            assert_eq!(ranking[0].participant.as_str(), "alice");
        }
        other => panic!("Expected RankingUpdated, got {:?}", other),
    }

    h.send(&final_ranking.replace("RID", "6")).await;
    let response = h.response(6).await;
    assert_eq!(error_code(&response), Some(ErrorCode::FinalRankingRejected));

    h.shutdown(7).await;
}

#[tokio::test]
async fn invalid_requests_get_error_responses() {
    let mut h = Harness::start(None, false);

    h.send("this is not json").await;
    let response = h.response(0).await;
    assert_eq!(error_code(&response), Some(ErrorCode::InvalidRequest));

    h.send(r#"{"request_id":11,"command":{"type":"self_destruct"}}"#)
        .await;
    let response = h.response(11).await;
    assert_eq!(error_code(&response), Some(ErrorCode::InvalidRequest));

    h.send(&load_epoch(12, "backwards", 10_000, 5_000)).await;
    let response = h.response(12).await;
    assert_eq!(error_code(&response), Some(ErrorCode::InvalidBoundary));

    h.send(r#"{"request_id":13,"command":{"type":"refresh_ranking","order":[]}}"#)
        .await;
    let response = h.response(13).await;
    assert_eq!(error_code(&response), Some(ErrorCode::NoEpochLoaded));

    h.shutdown(14).await;
}

#[tokio::test]
async fn closing_warning_is_streamed_once() {
    let mut h = Harness::start(None, false);
    h.event(|p| matches!(p, EventPayload::ClockSynced(_))).await;

    // Active with 29.5s left at current synchronized time
    let now = LATENCY_MS as i64 + OFFSET;
    h.send(&load_epoch(1, "round-w", -60_000, now + 29_500)).await;
    h.response(1).await;

    match h.event(|p| matches!(p, EventPayload::Warning(_))).await {
        EventPayload::Warning(w) => {
            assert_eq!(w.threshold_seconds, 30);
            assert_eq!(w.time_remaining, Duration::from_millis(29_500));
            assert_eq!(w.message.as_deref(), Some("round-w closes in 30s"));
        }
        _ => unreachable!(),
    }

    // Several more ticks at the same instant: no second warning
    let mut ticks = 0;
    while ticks < 5 {
        match h.next().await.expect("output closed") {
            OutputMessage::Event(e) => match e.payload {
                EventPayload::Warning(_) => panic!("Warning repeated"),
                EventPayload::Tick(_) => ticks += 1,
                _ => {}
            },
            OutputMessage::Response(_) => {}
        }
    }

    h.shutdown(2).await;
}

#[tokio::test]
async fn failed_sync_keeps_zero_offset() {
    let mut h = Harness::start(None, true);

    h.send(r#"{"request_id":1,"command":{"type":"sync_now"}}"#).await;
    match h.response(1).await.result {
        ResponseResult::Ok(ResponsePayload::Synced(sample)) => {
            assert_eq!(sample.round_trip_millis, 0);
            assert_eq!(sample.offset_millis, 0);
        }
        other => panic!("Expected Synced, got {:?}", other),
    }

    h.source.set_failure(None);
    h.send(r#"{"request_id":2,"command":{"type":"sync_now"}}"#).await;
    match h.response(2).await.result {
        ResponseResult::Ok(ResponsePayload::Synced(sample)) => {
            assert_eq!(sample.offset_millis, OFFSET);
        }
        other => panic!("Expected Synced, got {:?}", other),
    }
    h.event(|p| matches!(p, EventPayload::ClockSynced(_))).await;

    h.shutdown(3).await;
}

#[tokio::test(start_paused = true)]
async fn slow_sync_keeps_events_flowing() {
    let mut h = Harness::start(None, false);
    h.event(|p| matches!(p, EventPayload::ClockSynced(_))).await;

    h.send(&load_epoch(1, "r1", 60_000, 3_660_000)).await;
    assert!(h.response(1).await.is_ok());

    *h.source.delay.lock().unwrap() = Some(Duration::from_secs(2));
    h.send(r#"{"request_id":2,"command":{"type":"sync_now"}}"#).await;

    let mut ticks = 0;
    loop {
        match h.next().await.expect("output closed") {
            OutputMessage::Event(event) if matches!(event.payload, EventPayload::Tick(_)) => {
                ticks += 1;
            }
            OutputMessage::Response(response) if response.request_id == 2 => {
                assert!(matches!(
                    response.result,
                    ResponseResult::Ok(ResponsePayload::Synced(sample)) if sample.round_trip_millis > 0
                ));
                break;
            }
            _ => {}
        }
    }

    // 20ms ticks across a 2s round trip
    assert!(ticks >= 50, "only {} ticks while the sync was in flight", ticks);

    *h.source.delay.lock().unwrap() = None;
    h.shutdown(3).await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_slow_sync() {
    let mut h = Harness::start(None, false);

    *h.source.delay.lock().unwrap() = Some(Duration::from_secs(30));
    h.send(r#"{"request_id":1,"command":{"type":"sync_now"}}"#).await;
    h.send(r#"{"request_id":2,"command":{"type":"get_status"}}"#).await;
    assert!(h.response(2).await.is_ok());

    // The pending sync is abandoned, not waited for
    h.shutdown(3).await;
}

#[tokio::test]
async fn epoch_file_loads_and_reloads_on_signal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("epoch.json");
    let write_epoch = |id: &str| {
        let start = add_millis(from_unix_millis(T).unwrap(), 60_000);
        let json = format!(
            r#"{{"epoch_id":"{}","start_timestamp":{},"end_timestamp":{}}}"#,
            id,
            start.timestamp_millis(),
            start.timestamp_millis() + 3_600_000
        );
        std::fs::write(&path, json).unwrap();
    };

    write_epoch("from-file-1");
    let mut h = Harness::start(Some(path.clone()), false);

    match h.event(|p| matches!(p, EventPayload::EpochLoaded { .. })).await {
        EventPayload::EpochLoaded { epoch } => assert_eq!(epoch.id.as_str(), "from-file-1"),
        _ => unreachable!(),
    }

    write_epoch("from-file-2");
    h.control.send(ControlSignal::Reload).unwrap();
    match h.event(|p| matches!(p, EventPayload::EpochLoaded { .. })).await {
        EventPayload::EpochLoaded { epoch } => {
            assert_eq!(epoch.id.as_str(), "from-file-2");
            assert_eq!(epoch.phase, EpochPhase::PreEpoch);
        }
        _ => unreachable!(),
    }

    // A broken file leaves the loaded epoch in place
    std::fs::write(&path, "{ broken").unwrap();
    h.control.send(ControlSignal::Reload).unwrap();
    h.send(r#"{"request_id":1,"command":{"type":"get_status"}}"#).await;
    match h.response(1).await.result {
        ResponseResult::Ok(ResponsePayload::Status(status)) => {
            assert_eq!(status.epoch.unwrap().id.as_str(), "from-file-2");
        }
        other => panic!("Expected Status, got {:?}", other),
    }

    h.control.send(ControlSignal::Shutdown).unwrap();
    h.event(|p| matches!(p, EventPayload::Shutdown)).await;
    assert!(h.next().await.is_none());
    h.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn service_outlives_closed_input() {
    let Harness {
        input,
        mut lines,
        control,
        task,
        ..
    } = Harness::start(None, false);
    drop(input);

    // Still syncing after stdin is gone
    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let message: OutputMessage = serde_json::from_str(&line).unwrap();
    assert!(matches!(message, OutputMessage::Event(_)));

    control.send(ControlSignal::Shutdown).unwrap();
    task.await.unwrap().unwrap();
}
