//! Latency and throughput measurement for published envelopes.
//!
//! Messages are grouped into fixed windows. Every message counts towards the
//! window's throughput. Only messages carrying a parseable `timestamp`
//! contribute latency, yet the average divides by the full count.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Deserialize;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::transport::InboundMessage;

#[derive(Deserialize)]
struct Stamped {
    timestamp: Option<String>,
}

/// Seconds between the envelope's capture timestamp and `now`.
///
/// `None` when the payload is not JSON or has no usable `timestamp`.
pub fn envelope_latency(payload: &[u8], now: DateTime<Utc>) -> Option<f64> {
    let stamped: Stamped = serde_json::from_slice(payload).ok()?;
    let captured = DateTime::parse_from_rfc3339(stamped.timestamp.as_deref()?).ok()?;
    let delta = now.signed_duration_since(captured.with_timezone(&Utc));
    delta
        .num_microseconds()
        .map(|us| us as f64 / 1_000_000.0)
}

#[derive(Debug, Default)]
pub struct LatencyWindow {
    count: u64,
    total_latency_secs: f64,
}

impl LatencyWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one message and return its latency, if it has one.
    pub fn record(&mut self, payload: &[u8], now: DateTime<Utc>) -> Option<f64> {
        self.count += 1;
        let latency = envelope_latency(payload, now);
        if let Some(secs) = latency {
            self.total_latency_secs += secs;
        }
        latency
    }

    /// Close the window and start a fresh one.
    pub fn close(&mut self, length: Duration) -> WindowReport {
        let report = WindowReport {
            count: self.count,
            total_latency_secs: self.total_latency_secs,
            length,
        };
        *self = Self::default();
        report
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowReport {
    pub count: u64,
    pub total_latency_secs: f64,
    pub length: Duration,
}

impl WindowReport {
    pub fn average_latency_secs(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total_latency_secs / self.count as f64
    }

    pub fn messages_per_second(&self) -> f64 {
        let secs = self.length.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.count as f64 / secs
    }
}

impl fmt::Display for WindowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message Per Second: {:.0}  Average Latency: {:.3}",
            self.messages_per_second(),
            self.average_latency_secs()
        )
    }
}

/// Feed messages into `window` until `deadline`.
///
/// Errors once the receive loop has gone away.
pub fn collect_window(
    inbound: &Receiver<InboundMessage>,
    deadline: Instant,
    window: &mut LatencyWindow,
    mut on_latency: impl FnMut(f64),
) -> Result<()> {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        match inbound.recv_timeout(deadline - now) {
            Ok(message) => {
                if let Some(latency) = window.record(&message.payload, Utc::now()) {
                    on_latency(latency);
                }
            }
            Err(RecvTimeoutError::Timeout) => return Ok(()),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("MQTT receive loop stopped"))
            }
        }
    }
}

/// Print one report line per window until `stop` is set.
///
/// With `perf_stats`, every message's latency is written as it arrives.
pub fn run_reporter(
    inbound: &Receiver<InboundMessage>,
    length: Duration,
    perf_stats: bool,
    stop: &AtomicBool,
    out: &mut impl Write,
) -> Result<()> {
    let mut window = LatencyWindow::new();
    while !stop.load(Ordering::SeqCst) {
        let deadline = Instant::now() + length;
        let mut write_error = None;
        let collected = collect_window(inbound, deadline, &mut window, |latency| {
            if perf_stats && write_error.is_none() {
                if let Err(e) = writeln!(out, "Latency: {latency}") {
                    write_error = Some(e);
                }
            }
        });
        if let Some(e) = write_error {
            return Err(e).context("write latency");
        }
        collected?;
        writeln!(out, "{}", window.close(length)).context("write report")?;
        out.flush().context("flush report")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::format_timestamp;
    use chrono::Duration as ChronoDuration;

    fn envelope_at(ts: DateTime<Utc>) -> Vec<u8> {
        format!(
            r#"{{"dtype":"image/jpeg","timestamp":"{}","src_id":"cam1","height":1,"width":1,"data":""}}"#,
            format_timestamp(&ts)
        )
        .into_bytes()
    }

    #[test]
    fn ten_messages_fifty_ms_old() {
        let now = Utc::now();
        let sent = now - ChronoDuration::milliseconds(50);
        let mut window = LatencyWindow::new();
        for _ in 0..10 {
            window.record(&envelope_at(sent), now);
        }
        let report = window.close(Duration::from_secs(1));
        assert_eq!(report.count, 10);
        assert!((report.average_latency_secs() - 0.050).abs() < 0.002);
        assert!(report.to_string().starts_with("Message Per Second: 10  Average Latency: 0.05"));
    }

    #[test]
    fn malformed_payloads_count_without_latency() {
        let now = Utc::now();
        let mut window = LatencyWindow::new();
        assert_eq!(window.record(b"not json", now), None);
        assert_eq!(window.record(br#"{"dtype":"image/jpeg"}"#, now), None);
        assert_eq!(window.record(br#"{"timestamp":"yesterday"}"#, now), None);
        assert!(window
            .record(&envelope_at(now - ChronoDuration::milliseconds(300)), now)
            .is_some());

        let report = window.close(Duration::from_secs(1));
        assert_eq!(report.count, 4);
        assert!((report.average_latency_secs() - 0.075).abs() < 0.002);
    }

    #[test]
    fn close_resets_the_window() {
        let mut window = LatencyWindow::new();
        window.record(b"{}", Utc::now());
        assert_eq!(window.close(Duration::from_secs(1)).count, 1);
        let empty = window.close(Duration::from_secs(1));
        assert_eq!(empty.count, 0);
        assert_eq!(empty.average_latency_secs(), 0.0);
        assert_eq!(
            empty.to_string(),
            "Message Per Second: 0  Average Latency: 0.000"
        );
    }

    #[test]
    fn rate_scales_with_window_length() {
        let report = WindowReport {
            count: 5,
            total_latency_secs: 0.0,
            length: Duration::from_millis(500),
        };
        assert_eq!(report.messages_per_second(), 10.0);
    }

    #[test]
    fn collect_window_stops_at_deadline() -> Result<()> {
        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..3 {
            tx.send(InboundMessage {
                topic: "videopub/stream/cam1".to_string(),
                payload: envelope_at(Utc::now()),
            })?;
        }
        let mut window = LatencyWindow::new();
        let mut seen = 0;
        collect_window(
            &rx,
            Instant::now() + Duration::from_millis(50),
            &mut window,
            |_| seen += 1,
        )?;
        assert_eq!(seen, 3);
        assert_eq!(window.close(Duration::from_millis(50)).count, 3);
        Ok(())
    }

    #[test]
    fn reporter_fails_when_receiver_is_gone() {
        let (tx, rx) = crossbeam_channel::unbounded::<InboundMessage>();
        drop(tx);
        let stop = AtomicBool::new(false);
        let mut out = Vec::new();
        assert!(run_reporter(&rx, Duration::from_millis(20), false, &stop, &mut out).is_err());
    }

    #[test]
    fn reporter_prints_window_lines() -> Result<()> {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(InboundMessage {
            topic: "videopub/stream/cam1".to_string(),
            payload: envelope_at(Utc::now()),
        })?;
        let stop = AtomicBool::new(false);
        let mut out = Vec::new();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(Duration::from_millis(30));
                stop.store(true, Ordering::SeqCst);
            });
            run_reporter(&rx, Duration::from_millis(50), true, &stop, &mut out)
        })?;
        let text = String::from_utf8(out)?;
        assert!(text.contains("Latency: "));
        assert!(text.contains("Message Per Second: 20"));
        drop(tx);
        Ok(())
    }

    #[derive(Clone, Default)]
    struct SharedOut(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl SharedOut {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedOut {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn latency_lines_are_written_before_the_window_closes() -> Result<()> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let stop = AtomicBool::new(false);
        let shared = SharedOut::default();
        let mut out = shared.clone();
        let mid_window = std::thread::scope(|scope| {
            let watcher = scope.spawn(|| {
                tx.send(InboundMessage {
                    topic: "videopub/stream/cam1".to_string(),
                    payload: envelope_at(Utc::now()),
                })
                .unwrap();
                std::thread::sleep(Duration::from_millis(50));
                let text = shared.text();
                stop.store(true, Ordering::SeqCst);
                text
            });
            run_reporter(&rx, Duration::from_millis(400), true, &stop, &mut out)?;
            Ok::<_, anyhow::Error>(watcher.join().unwrap())
        })?;
        assert!(mid_window.starts_with("Latency: "), "{mid_window:?}");
        assert!(!mid_window.contains("Message Per Second"));
        assert!(shared.text().contains("Message Per Second"));
        Ok(())
    }
}
