//! Serial barcode scanner driver for COM port scanners.
//!
//! Complements keyboard-wedge scanners (which arrive as ordinary key input)
//! with support for scanners connected via serial/COM port. A background
//! thread reads newline-terminated barcodes and pushes [`ScanEvent`]s into a
//! channel the session screen consumes; the session controller decides what
//! each barcode means.

use std::io::Read;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Frames outside this range are scanner noise, not barcodes.
const MIN_BARCODE_LEN: usize = 3;
const MAX_BARCODE_LEN: usize = 50;

/// A partial line longer than this without a terminator is a wedged scanner;
/// drop the buffer instead of growing it forever.
const MAX_LINE_BUF: usize = 512;

const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Last barcode seen by any serial scanner, for the diagnostics screen.
static LAST_SCAN: Mutex<Option<String>> = Mutex::new(None);

/// One detected barcode.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    pub barcode: String,
    pub source: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Scanner state for status queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerStatus {
    pub connected: bool,
    pub port: String,
    pub last_scan: Option<String>,
}

/// A running serial scanner. Dropping the handle without calling [`stop`]
/// leaves the reader thread running until its next read timeout notices the
/// cancelled token.
///
/// [`stop`]: SerialScanner::stop
pub struct SerialScanner {
    port_name: String,
    cancel: CancellationToken,
    reader: Option<std::thread::JoinHandle<()>>,
}

impl SerialScanner {
    /// Open `port` and start the background reader. Detected barcodes are
    /// sent on `events`; the channel closing stops the reader.
    pub fn start(
        port: &str,
        baud_rate: u32,
        events: mpsc::UnboundedSender<ScanEvent>,
    ) -> Result<Self, String> {
        let mut serial = serialport::new(port, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| format!("Failed to open serial port {port}: {e}"))?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let port_name = port.to_string();
        let thread_port = port_name.clone();

        let reader = std::thread::spawn(move || {
            info!(port = %thread_port, "Serial scanner background reader started");
            let mut line_buf = String::new();
            let mut chunk = [0u8; 256];

            while !token.is_cancelled() {
                match serial.read(&mut chunk) {
                    Ok(0) => {}
                    Ok(n) => {
                        line_buf.push_str(&String::from_utf8_lossy(&chunk[..n]));
                        for barcode in drain_frames(&mut line_buf) {
                            info!(barcode = %barcode, "Serial scanner: barcode detected");
                            if let Ok(mut last) = LAST_SCAN.lock() {
                                *last = Some(barcode.clone());
                            }
                            let event = ScanEvent {
                                barcode,
                                source: "serial",
                                timestamp: Utc::now(),
                            };
                            if events.send(event).is_err() {
                                // Receiver gone; nobody is listening anymore.
                                return;
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        warn!(error = %e, "Serial scanner read error");
                        // Brief backoff before retry
                        std::thread::sleep(Duration::from_secs(1));
                    }
                }
            }

            info!(port = %thread_port, "Serial scanner background reader stopped");
        });

        Ok(Self {
            port_name,
            cancel,
            reader: Some(reader),
        })
    }

    /// Stop the reader and wait for the thread to exit.
    pub fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        info!(port = %self.port_name, "Serial scanner stopped");
    }

    pub fn status(&self) -> ScannerStatus {
        ScannerStatus {
            connected: !self.cancel.is_cancelled(),
            port: self.port_name.clone(),
            last_scan: last_scan(),
        }
    }
}

/// Last barcode seen by any serial scanner in this process.
pub fn last_scan() -> Option<String> {
    LAST_SCAN.lock().map(|l| l.clone()).unwrap_or(None)
}

/// Pull complete, plausible barcodes out of the line buffer.
///
/// Barcodes end with `\r\n` or `\n`. Frames outside the sane length range
/// are dropped; a runaway buffer with no terminator is cleared.
fn drain_frames(line_buf: &mut String) -> Vec<String> {
    let mut frames = Vec::new();

    while let Some(pos) = line_buf.find('\n') {
        let barcode = line_buf[..pos].trim().to_string();
        line_buf.replace_range(..=pos, "");

        if barcode.len() >= MIN_BARCODE_LEN && barcode.len() <= MAX_BARCODE_LEN {
            frames.push(barcode);
        }
    }

    if line_buf.len() > MAX_LINE_BUF {
        line_buf.clear();
    }

    frames
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn frames_split_on_newline_and_trim_cr() {
        let mut buf = String::from("5901234123457\r\n4006381333931\npartial");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames, vec!["5901234123457", "4006381333931"]);
        assert_eq!(buf, "partial", "incomplete frame stays buffered");
    }

    #[test]
    fn noise_frames_are_dropped() {
        let mut buf = String::from("x\n5901234123457\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames, vec!["5901234123457"]);

        let mut long = "9".repeat(60);
        long.push('\n');
        assert!(drain_frames(&mut long).is_empty());
    }

    #[test]
    fn runaway_buffer_is_cleared() {
        let mut buf = "a".repeat(MAX_LINE_BUF + 1);
        assert!(drain_frames(&mut buf).is_empty());
        assert!(buf.is_empty(), "wedged-scanner buffer must not grow forever");
    }

    #[test]
    #[serial]
    fn last_scan_tracks_global_state() {
        {
            let mut last = LAST_SCAN.lock().unwrap();
            *last = None;
        }
        assert_eq!(last_scan(), None);
        {
            let mut last = LAST_SCAN.lock().unwrap();
            *last = Some("5901234123457".into());
        }
        assert_eq!(last_scan().as_deref(), Some("5901234123457"));
    }
}
