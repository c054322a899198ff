/// Sensor serial connection and label ingestion
///
/// The sensor streams comma-separated text records once it receives the start command.
/// A single worker thread owns the port, maps each record's judgment field to a label
/// and hands the label to the UI through a small queue where the newest value wins.

use serialport::{self, DataBits, FlowControl, Parity, StopBits};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::num::IntErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::config_loader::SerialSettings;
use crate::label_mapper::{Label, DEFAULT_LABEL};

/// Records with fewer fields than this are rejected
pub const MIN_FIELDS: usize = 3;
/// 0-based index of the judgment value in a record
pub const JUDGMENT_FIELD: usize = 1;

// -------------------- Record parsing --------------------

/// What a single line from the sensor turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Judgment parsed; values beyond i64 are saturated and map to the default label
    Label { judgment: i64, label: Label },
    Blank,
    TooFewFields(usize),
    BadJudgment(String),
}

pub fn parse_record(line: &str) -> RecordOutcome {
    let line = line.trim();
    if line.is_empty() {
        return RecordOutcome::Blank;
    }
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < MIN_FIELDS {
        return RecordOutcome::TooFewFields(fields.len());
    }
    let raw = fields[JUDGMENT_FIELD].trim();
    match raw.parse::<i64>() {
        Ok(judgment) => RecordOutcome::Label { judgment, label: Label::from_judgment(judgment) },
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => RecordOutcome::Label { judgment: i64::MAX, label: DEFAULT_LABEL },
            IntErrorKind::NegOverflow => RecordOutcome::Label { judgment: i64::MIN, label: DEFAULT_LABEL },
            _ => RecordOutcome::BadJudgment(raw.to_string()),
        },
    }
}

// -------------------- Label hand-off --------------------

/// Called after every delivered label (the GUI passes its repaint request)
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// Worker side of the label queue. Never blocks: a full queue drops its oldest entry.
#[derive(Clone)]
pub struct LabelSender {
    tx: Sender<Label>,
    evict: Receiver<Label>,
    waker: Option<Waker>,
}

/// UI side of the label queue
pub struct LabelReceiver {
    rx: Receiver<Label>,
}

pub fn label_channel(depth: usize, waker: Option<Waker>) -> (LabelSender, LabelReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(depth.max(1));
    let sender = LabelSender { tx, evict: rx.clone(), waker };
    (sender, LabelReceiver { rx })
}

impl LabelSender {
    pub fn send(&self, label: Label) {
        let mut pending = label;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(l)) => {
                    let _ = self.evict.try_recv();
                    pending = l;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
        if let Some(wake) = &self.waker {
            wake();
        }
    }
}

impl LabelReceiver {
    /// Drain everything queued and keep only the newest label
    pub fn latest(&self) -> Option<Label> {
        self.rx.try_iter().last()
    }

    /// Block until the next label. None once the worker has exited.
    pub fn recv(&self) -> Option<Label> {
        self.rx.recv().ok()
    }

    /// Ok(None) on timeout, Err once the worker has exited
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Label>> {
        match self.rx.recv_timeout(timeout) {
            Ok(label) => Ok(Some(label)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("Serial reader has stopped")),
        }
    }
}

// -------------------- Port handling --------------------

/// Ports the OS reports, for the operator's port picker
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!(target: "serial_reader", "Could not enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

/// Open the sensor port: 8 data bits, no parity, one stop bit, no flow control
pub fn open_port(port_path: &str, settings: &SerialSettings) -> Result<Box<dyn serialport::SerialPort>> {
    let port_path = port_path.trim();
    if port_path.is_empty() {
        return Err(anyhow!("No serial port given (e.g. COM3 or /dev/ttyUSB0)"));
    }
    serialport::new(port_path, settings.baud_rate)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_millis(settings.read_timeout_ms.max(1)))
        .open()
        .with_context(|| format!("Error opening serial port {} at {} baud", port_path, settings.baud_rate))
}

enum LineRead {
    Line(String),
    Eof,
    Stopped,
}

/// Read one newline-terminated line, retrying port timeouts. Bytes received before a
/// timeout stay in `pending` so a line split across polls is reassembled.
fn read_line<R: BufRead>(reader: &mut R, pending: &mut Vec<u8>, stop: &AtomicBool) -> io::Result<LineRead> {
    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(LineRead::Stopped);
        }
        match reader.read_until(b'\n', pending) {
            Ok(0) if pending.is_empty() => return Ok(LineRead::Eof),
            Ok(_) => {
                let line = String::from_utf8_lossy(pending).trim().to_string();
                pending.clear();
                return Ok(LineRead::Line(line));
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Send the start command and check the acknowledgment. A wrong reply is only logged.
fn start_stream<P: Read + Write>(reader: &mut BufReader<P>, settings: &SerialSettings, stop: &AtomicBool) -> Result<bool> {
    let command = format!("{}\n", settings.start_command);
    let port = reader.get_mut();
    port.write_all(command.as_bytes())?;
    port.flush()?;

    let mut pending = Vec::new();
    match read_line(reader, &mut pending, stop)? {
        LineRead::Line(reply) if reply == settings.ack_reply => {
            info!(target: "serial_reader", "{}. Stream started...", reply);
            Ok(true)
        }
        LineRead::Line(reply) => {
            warn!(target: "serial_reader", "Unexpected stream acknowledgment {:?} (expected {:?})", reply, settings.ack_reply);
            Ok(false)
        }
        LineRead::Eof | LineRead::Stopped => Ok(false),
    }
}

/// Counters for one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub ack_ok: bool,
    pub delivered: usize,
    pub malformed: usize,
    pub bad_judgments: usize,
}

/// Run the ingestion loop until end-of-stream, a stop request, or a device error.
/// Takes ownership of the port, so it is released exactly once on every exit path.
pub fn run_ingestion<P: Read + Write>(
    port: P,
    settings: &SerialSettings,
    sink: &LabelSender,
    stop: &AtomicBool,
) -> Result<IngestSummary> {
    let mut reader = BufReader::new(port);
    let result = ingest_records(&mut reader, settings, sink, stop);
    drop(reader);
    if let Err(e) = &result {
        error!(target: "serial_reader", "{:#}", e);
    }
    info!(target: "serial_reader", "Serial communication closed.");
    result
}

fn ingest_records<P: Read + Write>(
    reader: &mut BufReader<P>,
    settings: &SerialSettings,
    sink: &LabelSender,
    stop: &AtomicBool,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();
    summary.ack_ok = start_stream(reader, settings, stop).context("Error starting sensor stream")?;

    let delay = Duration::from_millis(settings.read_delay_ms);
    let mut pending = Vec::new();
    loop {
        let line = match read_line(reader, &mut pending, stop).context("Error in serial communication")? {
            LineRead::Line(line) => line,
            LineRead::Eof => {
                info!(target: "serial_reader", "Sensor closed the stream");
                break;
            }
            LineRead::Stopped => {
                debug!(target: "serial_reader", "Stop requested");
                break;
            }
        };

        match parse_record(&line) {
            RecordOutcome::Label { judgment, label } => {
                debug!(target: "serial_reader", "Judgment {} -> label {}", judgment, label);
                sink.send(label);
                summary.delivered += 1;
            }
            RecordOutcome::Blank => {}
            RecordOutcome::TooFewFields(n) => {
                warn!(target: "serial_reader", "Malformed record ({} fields): {:?}", n, line);
                summary.malformed += 1;
            }
            RecordOutcome::BadJudgment(raw) => {
                warn!(target: "serial_reader", "Judgment is not an integer: {:?}", raw);
                summary.bad_judgments += 1;
            }
        }

        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
    Ok(summary)
}

// -------------------- Background worker --------------------

/// Handle on the reader thread. Dropping it asks the thread to stop.
pub struct ReaderHandle {
    port_path: String,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<IngestSummary>>>,
}

impl ReaderHandle {
    pub fn port_path(&self) -> &str {
        &self.port_path
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Stop the worker and wait until it has released the port. Bounded by the port's
    /// poll timeout, so the same port can be reopened right after this returns.
    pub fn stop_and_join(self) -> Result<IngestSummary> {
        self.request_stop();
        self.join()
    }

    /// Wait for the worker and return how the run ended
    pub fn join(mut self) -> Result<IngestSummary> {
        let thread = self.thread.take().ok_or_else(|| anyhow!("Serial reader already joined"))?;
        thread.join().map_err(|_| anyhow!("Serial reader thread panicked"))?
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.request_stop();
    }
}

/// Open `port_path` and start the reader thread. Open failures return before any thread starts.
pub fn spawn_reader(port_path: &str, settings: &SerialSettings, sink: LabelSender) -> Result<ReaderHandle> {
    let port = open_port(port_path, settings)?;
    info!(target: "serial_reader", "Serial communication opened on port {} at {} bps.", port_path.trim(), settings.baud_rate);
    spawn_with_port(port, port_path.trim(), settings.clone(), sink)
}

/// Start the reader thread on an already-open port
pub fn spawn_with_port<P: Read + Write + Send + 'static>(
    port: P,
    port_path: &str,
    settings: SerialSettings,
    sink: LabelSender,
) -> Result<ReaderHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = Arc::clone(&stop);
    let thread = thread::Builder::new()
        .name("serial-reader".to_string())
        .spawn(move || run_ingestion(port, &settings, &sink, &stop_thread))
        .context("Failed to spawn serial reader thread")?;
    Ok(ReaderHandle {
        port_path: port_path.to_string(),
        stop,
        thread: Some(thread),
    })
}
