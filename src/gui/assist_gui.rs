/// MathAssist GUI binary
///
/// Run with: cargo run --bin math_assist

use eframe::egui;
use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{Receiver, TryRecvError};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mathassist::completion_client::OpenAiClient;
use mathassist::config_loader::{self, AppConfig, EnvDefaults};
use mathassist::hint_workflow::{HintWorkflow, SessionContext, WorkflowError};
use mathassist::serial_reader::{self, LabelReceiver, ReaderHandle, Waker};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long)]
    debug: bool,
    /// YAML config (defaults to math_assist.yaml next to Cargo.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

const MAX_MESSAGE_LOG: usize = 10000;

/// Result of a service call made off the UI thread
enum TaskOutcome {
    Reasoning(Result<SessionContext, WorkflowError>),
    Hint(Result<String, WorkflowError>),
}

/// MathAssist GUI state
struct AssistGUI {
    config: AppConfig,
    workflow: Arc<HintWorkflow<OpenAiClient>>,
    api_key: String,
    problem_text: String,
    reasoning_text: String,
    suggestion_request: String,
    suggestion_text: String,
    label_text: String,
    port_path: String,
    available_ports: Vec<String>,
    session: Option<SessionContext>,
    reader: Option<ReaderHandle>,
    labels: Option<LabelReceiver>,
    pending: Option<Receiver<TaskOutcome>>,
    message: String,
    last_error: Option<String>,
}

impl AssistGUI {
    fn new(config: AppConfig, env: EnvDefaults) -> Result<Self> {
        let client = OpenAiClient::new(&config.service)?;
        let workflow = Arc::new(HintWorkflow::from_config(client, &config));
        Ok(Self {
            config,
            workflow,
            api_key: env.api_key.unwrap_or_default(),
            problem_text: String::new(),
            reasoning_text: String::new(),
            suggestion_request: String::new(),
            suggestion_text: String::new(),
            label_text: String::new(),
            port_path: env.port.unwrap_or_default(),
            available_ports: serial_reader::available_ports(),
            session: None,
            reader: None,
            labels: None,
            pending: None,
            message: String::new(),
            last_error: None,
        })
    }

    fn log(&mut self, msg: &str) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        self.message.push_str(&format!("[{}] {}\n", stamp, msg));
        // Keep log size manageable
        if self.message.len() > MAX_MESSAGE_LOG {
            let mut cut = self.message.len() - MAX_MESSAGE_LOG / 2;
            while !self.message.is_char_boundary(cut) {
                cut += 1;
            }
            self.message = self.message.split_off(cut);
        }
    }

    fn report_error(&mut self, msg: String) {
        log::warn!(target: "math_assist", "{}", msg);
        self.log(&format!("ERROR: {}", msg));
        self.last_error = Some(msg);
    }

    fn spawn_task<F>(&mut self, ctx: &egui::Context, task: F)
    where
        F: FnOnce() -> TaskOutcome + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let ctx = ctx.clone();
        thread::spawn(move || {
            let _ = tx.send(task());
            ctx.request_repaint();
        });
        self.pending = Some(rx);
    }

    fn generate_reasoning(&mut self, ctx: &egui::Context) {
        if self.pending.is_some() {
            return;
        }
        self.last_error = None;
        self.log("Requesting reasoning steps...");
        let workflow = Arc::clone(&self.workflow);
        let api_key = self.api_key.clone();
        let problem = self.problem_text.clone();
        self.spawn_task(ctx, move || TaskOutcome::Reasoning(workflow.generate_reasoning(&api_key, &problem)));
    }

    fn request_hint(&mut self, ctx: &egui::Context) {
        if self.pending.is_some() {
            return;
        }
        self.last_error = None;
        self.log(&format!("Requesting hint (label {:?})...", self.label_text));
        let workflow = Arc::clone(&self.workflow);
        let api_key = self.api_key.clone();
        let session = self.session.clone();
        let request = self.suggestion_request.clone();
        let label = self.label_text.clone();
        self.spawn_task(ctx, move || {
            TaskOutcome::Hint(workflow.request_hint(&api_key, session.as_ref(), &request, &label))
        });
    }

    fn poll_pending(&mut self) {
        let Some(rx) = self.pending.as_ref() else { return; };
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                self.pending = None;
                self.report_error("Service worker ended without a result".to_string());
                return;
            }
        };
        self.pending = None;

        match outcome {
            TaskOutcome::Reasoning(Ok(session)) => {
                self.reasoning_text = session.reasoning().to_string();
                self.log(&format!("Reasoning received ({} chars)", self.reasoning_text.len()));
                self.session = Some(session);
            }
            TaskOutcome::Hint(Ok(hint)) => {
                self.log(&format!("Hint received ({} chars)", hint.len()));
                self.suggestion_text = hint;
            }
            TaskOutcome::Reasoning(Err(e)) | TaskOutcome::Hint(Err(e)) => {
                self.report_error(e.to_string());
            }
        }
    }

    fn connect(&mut self, ctx: &egui::Context) {
        let port_path = self.port_path.trim().to_string();
        if port_path.is_empty() {
            self.report_error("Insert serial port (e.g. COM3 or /dev/ttyUSB0)".to_string());
            return;
        }
        self.disconnect();
        self.last_error = None;

        let repaint_ctx = ctx.clone();
        let waker: Waker = Arc::new(move || repaint_ctx.request_repaint());
        let (tx, rx) = serial_reader::label_channel(self.config.serial.label_queue_depth, Some(waker));
        match serial_reader::spawn_reader(&port_path, &self.config.serial, tx) {
            Ok(handle) => {
                self.log(&format!("Connected to sensor on {} @{}", port_path, self.config.serial.baud_rate));
                self.reader = Some(handle);
                self.labels = Some(rx);
            }
            Err(e) => self.report_error(format!("{:#}", e)),
        }
    }

    /// Stop the reader and wait for it to release the port so it can be reopened at once
    fn disconnect(&mut self) {
        if let Some(handle) = self.reader.take() {
            let port_path = handle.port_path().to_string();
            self.log(&format!("Disconnecting from {}", port_path));
            match handle.stop_and_join() {
                Ok(summary) => self.log(&format!(
                    "Sensor on {} released after {} labels", port_path, summary.delivered
                )),
                Err(e) => self.report_error(format!("Serial communication on {} stopped: {:#}", port_path, e)),
            }
        }
        self.labels = None;
        // A label from a closed stream must not grade later hints
        self.label_text.clear();
    }

    fn poll_reader(&mut self) {
        if let Some(label) = self.labels.as_ref().and_then(|rx| rx.latest()) {
            self.label_text = label.to_string();
        }

        let finished = self.reader.as_ref().map_or(false, |h| h.is_finished());
        if !finished {
            return;
        }
        if let Some(handle) = self.reader.take() {
            let port_path = handle.port_path().to_string();
            match handle.join() {
                Ok(summary) => self.log(&format!(
                    "Sensor stream on {} ended: {} labels, {} malformed, {} bad judgments",
                    port_path, summary.delivered, summary.malformed, summary.bad_judgments
                )),
                Err(e) => self.report_error(format!("Serial communication on {} stopped: {:#}", port_path, e)),
            }
        }
        self.labels = None;
        self.label_text.clear();
    }
}

impl eframe::App for AssistGUI {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_pending();
        self.poll_reader();

        let busy = self.pending.is_some();

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                ui.heading("MathAssist & Serial Label Integration");

                ui.separator();

                ui.horizontal(|ui| {
                    ui.label("API Key:");
                    ui.add(egui::TextEdit::singleline(&mut self.api_key).password(true).desired_width(380.0));
                });

                ui.separator();

                ui.label("Math Problem Description:");
                ui.add(egui::TextEdit::multiline(&mut self.problem_text)
                    .desired_rows(6)
                    .desired_width(f32::INFINITY));
                if ui.add_enabled(!busy, egui::Button::new("Generate Reasoning Steps")).clicked() {
                    self.generate_reasoning(ctx);
                }

                ui.label("Reasoning steps:");
                let mut reasoning_view = self.reasoning_text.as_str();
                ui.add(egui::TextEdit::multiline(&mut reasoning_view)
                    .desired_rows(8)
                    .desired_width(f32::INFINITY));

                ui.separator();

                ui.horizontal(|ui| {
                    ui.label("Suggestion Request:");
                    ui.add(egui::TextEdit::singleline(&mut self.suggestion_request).desired_width(380.0));
                });
                ui.horizontal(|ui| {
                    ui.label("Label (0-6):");
                    let mut label_view = self.label_text.as_str();
                    ui.add(egui::TextEdit::singleline(&mut label_view).desired_width(40.0));
                    if self.reader.is_none() {
                        ui.colored_label(egui::Color32::GRAY, "(sensor not connected)");
                    }
                    if self.session.is_none() {
                        ui.colored_label(egui::Color32::GRAY, "(no reasoning yet)");
                    }
                });
                if ui.add_enabled(!busy, egui::Button::new("Suggestion Request")).clicked() {
                    self.request_hint(ctx);
                }
                if busy {
                    ui.horizontal(|ui| {
                        ui.spinner();
                        ui.label("Waiting for the service...");
                    });
                }

                ui.label("Suggestion:");
                let mut suggestion_view = self.suggestion_text.as_str();
                ui.add(egui::TextEdit::multiline(&mut suggestion_view)
                    .desired_rows(8)
                    .desired_width(f32::INFINITY));

                ui.separator();

                // Sensor connection
                ui.horizontal(|ui| {
                    ui.label("Serial Port (e.g. COM3 or /dev/ttyUSB0):");
                    ui.add(egui::TextEdit::singleline(&mut self.port_path).desired_width(160.0));
                });
                ui.horizontal(|ui| {
                    let ports = self.available_ports.clone();
                    egui::ComboBox::from_id_source("detected_ports")
                        .selected_text("Detected ports")
                        .show_ui(ui, |ui| {
                            for p in &ports {
                                ui.selectable_value(&mut self.port_path, p.clone(), p.as_str());
                            }
                        });
                    if ui.button("Rescan").clicked() {
                        self.available_ports = serial_reader::available_ports();
                        let count = self.available_ports.len();
                        self.log(&format!("Found {} serial port(s)", count));
                    }
                    if ui.button("Connect Sensor").clicked() {
                        self.connect(ctx);
                    }
                    if ui.add_enabled(self.reader.is_some(), egui::Button::new("Disconnect")).clicked() {
                        self.disconnect();
                    }
                });
                match self.reader.as_ref() {
                    Some(handle) => {
                        ui.colored_label(egui::Color32::GREEN, format!("Streaming from {}", handle.port_path()));
                    }
                    None => {
                        ui.label("Sensor not connected");
                    }
                }

                if let Some(err) = self.last_error.clone() {
                    ui.separator();
                    ui.colored_label(egui::Color32::RED, err);
                }

                // Display messages
                if !self.message.is_empty() {
                    ui.separator();
                    ui.label("Messages:");
                    let mut message_view = self.message.as_str();
                    ui.add(egui::TextEdit::multiline(&mut message_view)
                        .desired_rows(6)
                        .desired_width(f32::INFINITY));
                }
            });
        });

        if busy || self.reader.is_some() {
            ctx.request_repaint_after(Duration::from_millis(250));
        }
    }
}

fn main() {
    let args = Args::parse();
    mathassist::init_logging(args.debug);

    let config = match config_loader::load_config_or_default(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };
    let env = EnvDefaults::from_env();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("MathAssist")
            .with_inner_size([720.0, 900.0]),
        ..Default::default()
    };

    if let Err(e) = eframe::run_native(
        "MathAssist",
        options,
        Box::new(move |_cc| {
            match AssistGUI::new(config, env) {
                Ok(gui) => Box::new(gui),
                Err(e) => {
                    eprintln!("Failed to create AssistGUI: {:#}", e);
                    std::process::exit(1);
                }
            }
        }),
    ) {
        eprintln!("GUI error: {}", e);
        std::process::exit(1);
    }
}
