//! NDJSON input and output pumps

use epochsync_api::{OutputMessage, Request};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// One parsed input line
#[derive(Debug, Clone)]
pub enum InputMessage {
    Request(Request),
    /// Unparseable line; `request_id` is recovered when possible, else 0
    Invalid { request_id: u64, error: String },
}

pub fn parse_input_line(line: &str) -> InputMessage {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => InputMessage::Request(request),
        Err(e) => {
            let request_id = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|v| v.get("request_id").and_then(Value::as_u64))
                .unwrap_or(0);
            InputMessage::Invalid {
                request_id,
                error: e.to_string(),
            }
        }
    }
}

/// Read requests line by line until EOF or until the receiver goes away
pub fn spawn_request_reader<R>(input: R, tx: mpsc::UnboundedSender<InputMessage>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(input);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("Input closed (EOF)");
                    break;
                }
                Ok(_) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let message = parse_input_line(line);
                    if let InputMessage::Invalid { error, .. } = &message {
                        warn!(error = %error, "Invalid request");
                    }
                    if tx.send(message).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Input read error");
                    break;
                }
            }
        }
    })
}

/// Write every message as one JSON line. Ends once all senders are dropped.
pub fn spawn_output_writer<W>(output: W, mut rx: mpsc::UnboundedReceiver<OutputMessage>) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut writer = output;

        while let Some(message) = rx.recv().await {
            let mut json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to encode output message");
                    continue;
                }
            };
            json.push('\n');

            if let Err(e) = writer.write_all(json.as_bytes()).await {
                debug!(error = %e, "Output write error");
                break;
            }
            if let Err(e) = writer.flush().await {
                debug!(error = %e, "Output flush error");
                break;
            }
        }

        let _ = writer.shutdown().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use epochsync_api::{Command, Event, EventPayload};

    #[test]
    fn parses_valid_request() {
        let msg = parse_input_line(r#"{"request_id":4,"command":{"type":"get_status"}}"#);
        assert!(matches!(
            msg,
            InputMessage::Request(Request { request_id: 4, command: Command::GetStatus })
        ));
    }

    #[test]
    fn recovers_request_id_from_bad_command() {
        let msg = parse_input_line(r#"{"request_id":9,"command":{"type":"launch_rockets"}}"#);
        assert!(matches!(msg, InputMessage::Invalid { request_id: 9, .. }));

        let msg = parse_input_line("definitely not json");
        assert!(matches!(msg, InputMessage::Invalid { request_id: 0, .. }));
    }

    #[tokio::test]
    async fn reader_skips_blank_lines() {
        let input: &[u8] = b"\n{\"request_id\":1,\"command\":{\"type\":\"sync_now\"}}\n\n garbage \n";
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_request_reader(input, tx).await.unwrap();

        assert!(matches!(rx.recv().await, Some(InputMessage::Request(_))));
        assert!(matches!(rx.recv().await, Some(InputMessage::Invalid { .. })));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn writer_emits_one_line_per_message() {
        let (client, server) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = spawn_output_writer(server, rx);

        tx.send(OutputMessage::Event(Event::new(EventPayload::Shutdown)))
            .unwrap();
        tx.send(OutputMessage::Event(Event::new(EventPayload::Shutdown)))
            .unwrap();
        drop(tx);
        writer.await.unwrap();

        let mut lines = BufReader::new(client).lines();
        let mut count = 0;
        while let Some(line) = lines.next_line().await.unwrap() {
            let parsed: OutputMessage = serde_json::from_str(&line).unwrap();
            assert!(matches!(parsed, OutputMessage::Event(_)));
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
