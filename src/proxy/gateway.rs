//! Per-request stream driver.
//!
//! A spawned task reads the adapter's chunk stream and is the only writer to
//! the response channel. Alongside upstream data it emits heartbeat frames
//! on a fixed interval and ends the stream with a timeout error when the
//! upstream has been silent for the inactivity window.

use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::{Instant, MissedTickBehavior};

use super::frame::StreamChunk;
use crate::config::GatewayConfig;
use crate::error::Error;
use crate::providers::ChunkStream;

/// Frames buffered between the driver and the HTTP body.
const CHANNEL_CAPACITY: usize = 32;

/// Written when a frame cannot be encoded. Terminal.
const ENCODE_FAILURE_FRAME: &[u8] = b"{\"error\":\"Failed to encode stream frame\"}\n";

/// Heartbeat and watchdog periods for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTimings {
    pub heartbeat_interval: Duration,
    pub inactivity_timeout: Duration,
}

impl StreamTimings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            inactivity_timeout: config.inactivity_timeout(),
        }
    }
}

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `{finished: true}` written.
    Completed,
    /// Upstream error written as the terminal frame.
    Failed,
    /// Watchdog fired.
    TimedOut,
    /// The client went away; nothing more can be written.
    Disconnected,
}

/// Summary of one driven stream, logged when it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamReport {
    pub outcome: StreamOutcome,
    pub text_frames: usize,
    pub heartbeats: usize,
}

/// Request identity carried into the stream's log lines.
#[derive(Debug)]
pub struct StreamContext {
    pub request_id: String,
    pub provider: String,
    pub model: String,
    /// Concurrency slot, released when the stream task ends.
    pub permit: Option<OwnedSemaphorePermit>,
}

/// Start driving `upstream` on its own task and return the frame receiver.
///
/// Dropping the receiver cancels the upstream read, heartbeat and watchdog
/// together.
pub fn spawn(
    upstream: ChunkStream,
    timings: StreamTimings,
    context: StreamContext,
) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let _permit = context.permit;
        let started = Instant::now();
        let report = drive(upstream, tx, timings).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match report.outcome {
            StreamOutcome::Completed => tracing::info!(
                request_id = %context.request_id,
                provider = %context.provider,
                model = %context.model,
                text_frames = report.text_frames,
                heartbeats = report.heartbeats,
                elapsed_ms,
                "Stream completed"
            ),
            StreamOutcome::Disconnected => tracing::info!(
                request_id = %context.request_id,
                provider = %context.provider,
                model = %context.model,
                text_frames = report.text_frames,
                heartbeats = report.heartbeats,
                elapsed_ms,
                "Client disconnected mid-stream"
            ),
            outcome => tracing::warn!(
                request_id = %context.request_id,
                provider = %context.provider,
                model = %context.model,
                outcome = ?outcome,
                text_frames = report.text_frames,
                heartbeats = report.heartbeats,
                elapsed_ms,
                "Stream ended with error"
            ),
        }
    });

    rx
}

/// Result of writing one frame.
enum Written {
    Ok,
    /// Encoding failed; a terminal error frame was written instead.
    Replaced,
    Closed,
}

async fn write(tx: &mpsc::Sender<Bytes>, chunk: &StreamChunk) -> Written {
    let (bytes, replaced) = match chunk.to_ndjson() {
        Ok(bytes) => (bytes, false),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode stream frame");
            (Bytes::from_static(ENCODE_FAILURE_FRAME), true)
        }
    };

    match tx.send(bytes).await {
        Err(_) => Written::Closed,
        Ok(()) if replaced => Written::Replaced,
        Ok(()) => Written::Ok,
    }
}

/// Drive `upstream` into `tx` until a terminal frame, timeout or disconnect.
///
/// Every path that still has a client ends with exactly one terminal frame.
/// The first heartbeat fires one full interval after the stream starts.
pub async fn drive(
    mut upstream: ChunkStream,
    tx: mpsc::Sender<Bytes>,
    timings: StreamTimings,
) -> StreamReport {
    let mut report = StreamReport {
        outcome: StreamOutcome::Completed,
        text_frames: 0,
        heartbeats: 0,
    };

    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + timings.heartbeat_interval,
        timings.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let watchdog = tokio::time::sleep(timings.inactivity_timeout);
    tokio::pin!(watchdog);

    loop {
        // Biased so a chunk arriving on the deadline still counts, and a
        // timeout wins over a heartbeat due at the same instant.
        tokio::select! {
            biased;

            _ = tx.closed() => {
                report.outcome = StreamOutcome::Disconnected;
                return report;
            }

            next = upstream.next() => {
                watchdog
                    .as_mut()
                    .reset(Instant::now() + timings.inactivity_timeout);

                let chunk = next.unwrap_or(StreamChunk::Finished);
                match &chunk {
                    StreamChunk::Text(_) => report.text_frames += 1,
                    StreamChunk::Heartbeat => report.heartbeats += 1,
                    StreamChunk::Error(_) => report.outcome = StreamOutcome::Failed,
                    StreamChunk::Finished => report.outcome = StreamOutcome::Completed,
                }

                match write(&tx, &chunk).await {
                    Written::Ok if chunk.is_terminal() => return report,
                    Written::Ok => {}
                    Written::Replaced => {
                        report.outcome = StreamOutcome::Failed;
                        return report;
                    }
                    Written::Closed => {
                        report.outcome = StreamOutcome::Disconnected;
                        return report;
                    }
                }
            }

            _ = &mut watchdog => {
                let message = Error::InactivityTimeout(timings.inactivity_timeout).to_string();
                report.outcome = match write(&tx, &StreamChunk::Error(message)).await {
                    Written::Closed => StreamOutcome::Disconnected,
                    _ => StreamOutcome::TimedOut,
                };
                return report;
            }

            _ = heartbeat.tick() => {
                match write(&tx, &StreamChunk::Heartbeat).await {
                    Written::Ok => report.heartbeats += 1,
                    Written::Replaced => {
                        report.outcome = StreamOutcome::Failed;
                        return report;
                    }
                    Written::Closed => {
                        report.outcome = StreamOutcome::Disconnected;
                        return report;
                    }
                }
            }
        }
    }
}
