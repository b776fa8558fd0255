use crate::config::AppConfig;
use crate::error::GenerateError;
use crate::markdown::{extract_segments, language_class, Segment, SegmentKind};
use crate::registry::{ConnectionState, Registry, RegistrySnapshot};
use crate::transcript::{ChatMessage, Transcript};
use anyhow::{anyhow, Context, Result};
use eframe::egui::{self, Align, Button, Color32, Frame, Layout, RichText, ScrollArea, Stroke};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const APP_TITLE: &str = "Ollama Chat";
const COPIED_FEEDBACK: Duration = Duration::from_secs(2);
const WORKER_GONE: &str = "the request ended without a reply";
const EXAMPLE_PROMPTS: [&str; 5] = [
    "Explain quantum computing in simple terms",
    "Write a Python function to reverse a string",
    "What are the benefits of renewable energy?",
    "Create a React component with TypeScript",
    "Show me how to use async/await in JavaScript",
];

const WIN95_DESKTOP: Color32 = Color32::from_rgb(0, 128, 128);
const WIN95_FACE: Color32 = Color32::from_rgb(192, 192, 192);
const WIN95_LIGHT: Color32 = Color32::from_rgb(223, 223, 223);
const WIN95_HIGHLIGHT: Color32 = Color32::from_rgb(255, 255, 255);
const WIN95_SHADOW: Color32 = Color32::from_rgb(128, 128, 128);
const WIN95_SHADOW_DARK: Color32 = Color32::from_rgb(64, 64, 64);
const WIN95_TITLE_BLUE: Color32 = Color32::from_rgb(0, 0, 128);
const WIN95_TEXT: Color32 = Color32::from_rgb(0, 0, 0);
const WIN95_WINDOW_BG: Color32 = Color32::from_rgb(236, 233, 216);
const WIN95_INPUT_BG: Color32 = Color32::from_rgb(255, 255, 255);
const USER_BUBBLE: Color32 = Color32::from_rgb(235, 244, 255);
const ASSISTANT_BUBBLE: Color32 = Color32::from_rgb(255, 255, 228);
const CODE_BG: Color32 = Color32::from_rgb(248, 248, 248);
const INLINE_CODE_BG: Color32 = Color32::from_rgb(230, 230, 230);
const INLINE_CODE_TEXT: Color32 = Color32::from_rgb(199, 37, 78);
const STATUS_OK: Color32 = Color32::from_rgb(0, 128, 0);
const STATUS_BAD: Color32 = Color32::from_rgb(176, 0, 0);
const STATUS_WAIT: Color32 = Color32::from_rgb(160, 110, 0);

enum WorkerEvent {
    Reply(String),
    Failed(GenerateError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CopyTarget {
    message_id: u64,
    segment: usize,
}

struct RenderedMessage {
    rect: egui::Rect,
    copied: Option<CopyTarget>,
}

pub fn run_gui(config: AppConfig) -> Result<()> {
    let app = ChatApp::new(config)?;
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([960.0, 720.0])
            .with_min_inner_size([620.0, 460.0])
            .with_title(APP_TITLE),
        ..Default::default()
    };

    eframe::run_native(
        APP_TITLE,
        native_options,
        Box::new(move |cc| {
            configure_theme(&cc.egui_ctx);
            Ok(Box::new(app))
        }),
    )
    .map_err(|err| anyhow!("Unable to start the graphical interface: {err}"))
}

fn configure_theme(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();
    style.visuals = egui::Visuals::light();
    style.visuals.override_text_color = Some(WIN95_TEXT);
    style.visuals.panel_fill = WIN95_DESKTOP;
    style.visuals.window_fill = WIN95_FACE;
    style.visuals.extreme_bg_color = WIN95_INPUT_BG;
    style.visuals.faint_bg_color = WIN95_WINDOW_BG;

    let widgets = &mut style.visuals.widgets;
    for (visuals, fill) in [
        (&mut widgets.noninteractive, WIN95_FACE),
        (&mut widgets.inactive, WIN95_FACE),
        (&mut widgets.hovered, WIN95_LIGHT),
        (&mut widgets.active, WIN95_SHADOW),
    ] {
        visuals.bg_fill = fill;
        visuals.bg_stroke = Stroke::new(1.0, WIN95_SHADOW_DARK);
        visuals.fg_stroke = Stroke::new(1.0, WIN95_TEXT);
    }

    style.visuals.selection.bg_fill = Color32::from_rgb(10, 36, 106);
    style.visuals.selection.stroke = Stroke::new(1.0, WIN95_HIGHLIGHT);
    style.spacing.item_spacing = egui::vec2(8.0, 8.0);
    style.spacing.button_padding = egui::vec2(10.0, 6.0);
    style.spacing.window_margin = egui::Margin::same(8);

    for (text_style, font) in [
        (egui::TextStyle::Heading, egui::FontId::proportional(20.0)),
        (egui::TextStyle::Body, egui::FontId::proportional(14.0)),
        (egui::TextStyle::Button, egui::FontId::proportional(14.0)),
        (egui::TextStyle::Monospace, egui::FontId::monospace(13.0)),
        (egui::TextStyle::Small, egui::FontId::proportional(12.0)),
    ] {
        style.text_styles.insert(text_style, font);
    }
    ctx.set_style(style);
}

/// Two-pixel Win95 bevel: outer ring then inner ring, each drawn as a
/// top-left "L" and a bottom-right "L".
fn paint_bevel(ui: &egui::Ui, rect: egui::Rect, outer: (Color32, Color32), inner: (Color32, Color32)) {
    let painter = ui.painter();
    for (inset, (top_left, bottom_right)) in [(0.0, outer), (1.0, inner)] {
        if rect.width() < 3.0 + 2.0 * inset || rect.height() < 3.0 + 2.0 * inset {
            return;
        }
        let min = rect.min + egui::vec2(inset, inset);
        let max = rect.max - egui::vec2(1.0 + inset, 1.0 + inset);

        painter.line_segment([min, egui::pos2(max.x, min.y)], Stroke::new(1.0, top_left));
        painter.line_segment([min, egui::pos2(min.x, max.y)], Stroke::new(1.0, top_left));
        painter.line_segment([egui::pos2(min.x, max.y), max], Stroke::new(1.0, bottom_right));
        painter.line_segment([egui::pos2(max.x, min.y), max], Stroke::new(1.0, bottom_right));
    }
}

fn raised_panel<R>(
    ui: &mut egui::Ui,
    fill: Color32,
    margin: i8,
    add_contents: impl FnOnce(&mut egui::Ui) -> R,
) -> egui::InnerResponse<R> {
    let panel = Frame::default()
        .fill(fill)
        .inner_margin(egui::Margin::same(margin))
        .show(ui, add_contents);
    paint_bevel(
        ui,
        panel.response.rect,
        (WIN95_HIGHLIGHT, WIN95_SHADOW_DARK),
        (WIN95_LIGHT, WIN95_SHADOW),
    );
    panel
}

fn sunken_panel<R>(
    ui: &mut egui::Ui,
    fill: Color32,
    margin: i8,
    add_contents: impl FnOnce(&mut egui::Ui) -> R,
) -> egui::InnerResponse<R> {
    let panel = Frame::default()
        .fill(fill)
        .inner_margin(egui::Margin::same(margin))
        .show(ui, add_contents);
    paint_bevel(
        ui,
        panel.response.rect,
        (WIN95_SHADOW_DARK, WIN95_HIGHLIGHT),
        (WIN95_SHADOW, WIN95_LIGHT),
    );
    panel
}

fn win95_button(label: &str, width: f32) -> Button<'_> {
    Button::new(label)
        .min_size(egui::vec2(width, 24.0))
        .fill(WIN95_FACE)
        .stroke(Stroke::new(1.0, WIN95_SHADOW_DARK))
}

fn status_color(state: ConnectionState) -> Color32 {
    match state {
        ConnectionState::Connected => STATUS_OK,
        ConnectionState::Disconnected => STATUS_BAD,
        ConnectionState::Checking => STATUS_WAIT,
    }
}

pub struct ChatApp {
    runtime: tokio::runtime::Runtime,
    registry: Registry,
    transcript: Transcript,
    url_input: String,
    input: String,
    status: String,
    pending: bool,
    compose_focused: bool,
    worker_rx: Option<Receiver<WorkerEvent>>,
    copied: Option<(CopyTarget, Instant)>,
}

impl ChatApp {
    pub fn new(config: AppConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("Unable to create the async runtime")?;
        let registry = Registry::new(config.registry_config(), runtime.handle().clone())?;
        registry.schedule_check();

        Ok(Self {
            runtime,
            registry,
            transcript: Transcript::new(),
            url_input: config.base_url,
            input: String::new(),
            status: "Ready".to_string(),
            pending: false,
            compose_focused: false,
            worker_rx: None,
            copied: None,
        })
    }

    fn can_send(&self) -> bool {
        !self.pending && !self.input.trim().is_empty()
    }

    fn send_prompt(&mut self) {
        if !self.can_send() {
            return;
        }
        let prompt = self.input.trim().to_string();
        self.input.clear();
        self.pending = true;
        self.status = "Generating...".to_string();
        self.transcript.push_user(prompt.clone());

        let (tx, rx) = mpsc::channel();
        self.worker_rx = Some(rx);
        let registry = self.registry.clone();

        self.runtime.spawn(async move {
            let event = match registry.generate(&prompt).await {
                Ok(text) => WorkerEvent::Reply(text),
                Err(err) => WorkerEvent::Failed(err),
            };
            let _ = tx.send(event);
        });
    }

    fn refresh_models(&self) {
        let registry = self.registry.clone();
        self.runtime.spawn(async move {
            registry.refresh_models(true).await;
        });
    }

    fn drain_worker_events(&mut self) {
        let event = match self.worker_rx.as_ref() {
            Some(rx) => rx.try_recv(),
            None => return,
        };

        match event {
            Ok(WorkerEvent::Reply(text)) => {
                self.transcript.push_assistant(text);
                self.status = "Ready".to_string();
            }
            Ok(WorkerEvent::Failed(err)) => {
                self.status = if err.is_connectivity() {
                    "Server offline".to_string()
                } else {
                    "Error".to_string()
                };
                self.transcript.push_assistant(err.to_string());
            }
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                warn!("generation worker stopped without sending a reply");
                let err = GenerateError::Unclassified(WORKER_GONE.to_string());
                self.transcript.push_assistant(err.to_string());
                self.status = "Error".to_string();
            }
        }

        self.pending = false;
        self.worker_rx = None;
    }

    fn clear_chat(&mut self) {
        self.transcript.clear();
        self.copied = None;
        self.status = "Ready".to_string();
    }

    fn is_copied(&self, target: CopyTarget) -> bool {
        self.copied
            .is_some_and(|(copied, at)| copied == target && at.elapsed() < COPIED_FEEDBACK)
    }

    fn render_message(
        ui: &mut egui::Ui,
        message: &ChatMessage,
        is_copied: impl Fn(CopyTarget) -> bool,
    ) -> RenderedMessage {
        let (label, fill, title_fill) = if message.is_user() {
            ("You", USER_BUBBLE, Color32::from_rgb(0, 72, 124))
        } else {
            ("Assistant", ASSISTANT_BUBBLE, WIN95_TITLE_BLUE)
        };
        let max_bubble_width = (ui.available_width() * 0.82).clamp(220.0, 760.0);
        let row_layout = if message.is_user() {
            Layout::right_to_left(Align::TOP)
        } else {
            Layout::left_to_right(Align::TOP)
        };

        let mut rendered = RenderedMessage {
            rect: egui::Rect::NOTHING,
            copied: None,
        };
        ui.horizontal(|ui| {
            ui.set_width(ui.available_width());
            ui.with_layout(row_layout, |ui| {
                rendered.rect = ui
                    .scope(|ui| {
                        ui.set_max_width(max_bubble_width);
                        raised_panel(ui, fill, 8, |ui| {
                            sunken_panel(ui, title_fill, 4, |ui| {
                                ui.horizontal(|ui| {
                                    ui.label(RichText::new(label).strong().color(WIN95_HIGHLIGHT));
                                    ui.label(
                                        RichText::new(message.created_at.format("%H:%M").to_string())
                                            .small()
                                            .color(WIN95_LIGHT),
                                    );
                                });
                            });
                            ui.add_space(6.0);
                            sunken_panel(ui, WIN95_INPUT_BG, 6, |ui| {
                                rendered.copied = render_segments(
                                    ui,
                                    message.id,
                                    &extract_segments(&message.text),
                                    &is_copied,
                                );
                            });
                        })
                        .response
                        .rect
                    })
                    .inner;
            });
        });

        rendered
    }

    fn render_settings(&mut self, ui: &mut egui::Ui, snapshot: &RegistrySnapshot) {
        ui.horizontal(|ui| {
            ui.label("API URL:");
            let url_changed = sunken_panel(ui, WIN95_INPUT_BG, 3, |ui| {
                ui.add_sized(
                    [260.0, 24.0],
                    egui::TextEdit::singleline(&mut self.url_input)
                        .hint_text(crate::ollama::DEFAULT_BASE_URL),
                )
                .changed()
            })
            .inner;
            if url_changed {
                self.registry.set_base_url(self.url_input.trim());
            }

            ui.label("Model:");
            let mut selected = snapshot.selected_model.clone();
            let shown = if snapshot.models.is_empty() {
                "No models available".to_string()
            } else {
                selected.clone()
            };
            sunken_panel(ui, WIN95_INPUT_BG, 3, |ui| {
                ui.add_enabled_ui(
                    !snapshot.loading_models && !snapshot.models.is_empty(),
                    |ui| {
                        egui::ComboBox::from_id_salt("model_selector")
                            .selected_text(shown)
                            .width(220.0)
                            .show_ui(ui, |ui| {
                                for model in &snapshot.models {
                                    ui.selectable_value(
                                        &mut selected,
                                        model.name.clone(),
                                        format!("{}  ({})", model.name, model.size_label()),
                                    );
                                }
                            });
                    },
                );
            });
            if selected != snapshot.selected_model {
                self.registry.select_model(&selected);
            }

            let refresh_label = if snapshot.loading_models {
                "Loading..."
            } else {
                "Refresh"
            };
            if ui
                .add_enabled(!snapshot.loading_models, win95_button(refresh_label, 90.0))
                .on_hover_text("Refresh model list")
                .clicked()
            {
                self.refresh_models();
            }
        });

        ui.horizontal(|ui| {
            ui.label(RichText::new("Status:").strong());
            ui.label(
                RichText::new(snapshot.connection.label())
                    .strong()
                    .color(status_color(snapshot.connection)),
            );
            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                if ui
                    .add_enabled(!self.transcript.is_empty(), win95_button("Clear Chat", 110.0))
                    .clicked()
                {
                    self.clear_chat();
                }
            });
        });

        if snapshot.connection == ConnectionState::Disconnected {
            sunken_panel(ui, WIN95_WINDOW_BG, 6, |ui| {
                ui.label(
                    RichText::new("Cannot connect to Ollama. Please ensure:")
                        .strong()
                        .color(STATUS_BAD),
                );
                ui.label("- Ollama is installed and running");
                ui.horizontal(|ui| {
                    ui.label("- Run");
                    ui.label(RichText::new("ollama serve").monospace());
                    ui.label("in a terminal");
                });
                ui.label(format!("- The API URL is correct: {}", snapshot.base_url));
            });
        }
    }

    fn render_welcome(&mut self, ui: &mut egui::Ui, snapshot: &RegistrySnapshot) {
        ui.vertical_centered(|ui| {
            ui.add_space(16.0);
            ui.heading(RichText::new("Welcome to Ollama Chat!").strong());
            ui.add_space(8.0);

            match snapshot.connection {
                ConnectionState::Connected if !snapshot.models.is_empty() => {
                    ui.label("Type your message below and press Enter or click Send.");
                    ui.add_space(6.0);
                    ui.label(RichText::new("Try asking:").strong());
                    for example in EXAMPLE_PROMPTS {
                        if ui.add(win95_button(example, 360.0)).clicked() {
                            self.input = example.to_string();
                        }
                    }
                }
                ConnectionState::Checking => {
                    ui.label(format!("Connecting to {}...", snapshot.base_url));
                }
                _ => {
                    ui.label(RichText::new("Cannot connect to Ollama. Set it up first:").strong());
                    ui.label("1. Install Ollama from https://ollama.com");
                    ui.label("2. Start the server with `ollama serve`");
                    ui.label("3. Pull a model, e.g. `ollama pull llama3`");
                    ui.label("4. Press Refresh to load the model list");
                }
            }
        });
    }

    fn render_compose(&mut self, ui: &mut egui::Ui, snapshot: &RegistrySnapshot) {
        let submit = self.compose_focused
            && ui.input_mut(|i| {
                let shortcut = i.key_pressed(egui::Key::Enter) && !i.modifiers.shift;
                if shortcut {
                    let modifiers = i.modifiers;
                    i.consume_key(modifiers, egui::Key::Enter);
                }
                shortcut
            });
        if submit {
            self.send_prompt();
        }

        ui.horizontal(|ui| {
            ui.label(RichText::new("Message:").strong());

            let send_width = 100.0;
            let input_width = (ui.available_width() - send_width - 24.0).max(120.0);
            let response = sunken_panel(ui, WIN95_INPUT_BG, 3, |ui| {
                ui.add_enabled_ui(!self.pending, |ui| {
                    ui.add_sized(
                        [input_width, 64.0],
                        egui::TextEdit::multiline(&mut self.input)
                            .desired_rows(3)
                            .hint_text("Type your message here..."),
                    )
                })
                .inner
            })
            .inner;
            self.compose_focused = response.has_focus();

            if ui
                .add_enabled(self.can_send(), win95_button("Send", send_width))
                .clicked()
            {
                self.send_prompt();
            }
        });

        ui.horizontal(|ui| {
            if self.pending {
                ui.label(RichText::new("Generating...").strong());
            } else if snapshot.selected_model.is_empty() {
                ui.label(RichText::new("No model selected").small());
            } else {
                ui.label(RichText::new(format!("Model: {}", snapshot.selected_model)).small());
            }
            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                ui.label(RichText::new("Enter to send, Shift+Enter for a new line").small());
            });
        });
    }
}

fn render_segments(
    ui: &mut egui::Ui,
    message_id: u64,
    segments: &[Segment],
    is_copied: &impl Fn(CopyTarget) -> bool,
) -> Option<CopyTarget> {
    if segments.is_empty() {
        ui.label(RichText::new("...").italics());
        return None;
    }

    let mut copied = None;
    let mut index = 0;
    while index < segments.len() {
        if segments[index].kind == SegmentKind::FencedCode {
            let target = CopyTarget {
                message_id,
                segment: index,
            };
            if render_code_block(ui, &segments[index], is_copied(target)) {
                copied = Some(target);
            }
            index += 1;
            continue;
        }

        let end = segments[index..]
            .iter()
            .position(|segment| segment.kind == SegmentKind::FencedCode)
            .map_or(segments.len(), |offset| index + offset);
        if let Some(segment) = render_text_run(ui, &segments[index..end], index) {
            copied = Some(CopyTarget {
                message_id,
                segment,
            });
        }
        index = end;
    }
    copied
}

/// Plain text and inline code flowing together. Clicking inline code copies it.
fn render_text_run(ui: &mut egui::Ui, run: &[Segment], first_index: usize) -> Option<usize> {
    if run.iter().all(|segment| segment.kind == SegmentKind::PlainText) {
        for segment in run {
            ui.add(egui::Label::new(segment.text.as_str()).wrap());
        }
        return None;
    }

    let mut copied = None;
    ui.horizontal_wrapped(|ui| {
        ui.spacing_mut().item_spacing.x = 0.0;
        for (offset, segment) in run.iter().enumerate() {
            if segment.kind == SegmentKind::InlineCode {
                let code = RichText::new(segment.text.as_str())
                    .monospace()
                    .color(INLINE_CODE_TEXT)
                    .background_color(INLINE_CODE_BG);
                if ui
                    .add(egui::Label::new(code).sense(egui::Sense::click()))
                    .on_hover_text("Click to copy")
                    .clicked()
                {
                    ui.ctx().copy_text(segment.copy_text().to_string());
                    copied = Some(first_index + offset);
                }
            } else {
                ui.add(egui::Label::new(segment.text.as_str()).wrap());
            }
        }
    });
    copied
}

fn render_code_block(ui: &mut egui::Ui, segment: &Segment, copied: bool) -> bool {
    let mut clicked = false;
    sunken_panel(ui, CODE_BG, 6, |ui| {
        ui.horizontal(|ui| {
            ui.label(RichText::new(segment.language().to_lowercase()).small().strong())
                .on_hover_text(language_class(segment.language()));
            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                let label = if copied { "Copied!" } else { "Copy" };
                if ui.add(win95_button(label, 70.0)).clicked() {
                    ui.ctx().copy_text(segment.copy_text().to_string());
                    clicked = true;
                }
            });
        });
        ui.separator();
        ui.add(egui::Label::new(RichText::new(segment.text.as_str()).monospace()).wrap());
    });
    clicked
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_worker_events();
        let snapshot = self.registry.state();

        egui::TopBottomPanel::top("window_chrome")
            .exact_height(56.0)
            .frame(
                Frame::default()
                    .fill(WIN95_FACE)
                    .inner_margin(egui::Margin::same(6)),
            )
            .show(ctx, |ui| {
                raised_panel(ui, WIN95_FACE, 4, |ui| {
                    let title_bar = Frame::default()
                        .fill(WIN95_TITLE_BLUE)
                        .inner_margin(egui::Margin::symmetric(8, 4))
                        .show(ui, |ui| {
                            ui.horizontal(|ui| {
                                ui.label(RichText::new(APP_TITLE).strong().color(WIN95_HIGHLIGHT));
                                ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                                    ui.label(
                                        RichText::new(format!("Status: {}", self.status))
                                            .small()
                                            .color(WIN95_HIGHLIGHT),
                                    );
                                });
                            });
                        });
                    paint_bevel(
                        ui,
                        title_bar.response.rect,
                        (Color32::from_rgb(0, 0, 168), Color32::from_rgb(0, 0, 72)),
                        (Color32::from_rgb(0, 0, 192), Color32::from_rgb(0, 0, 56)),
                    );
                });
            });

        egui::TopBottomPanel::bottom("input_bar")
            .resizable(false)
            .frame(
                Frame::default()
                    .fill(WIN95_FACE)
                    .inner_margin(egui::Margin::same(8)),
            )
            .show(ctx, |ui| {
                raised_panel(ui, WIN95_FACE, 8, |ui| {
                    sunken_panel(ui, WIN95_FACE, 6, |ui| {
                        self.render_compose(ui, &snapshot);
                    });
                });
            });

        egui::CentralPanel::default()
            .frame(
                Frame::default()
                    .fill(WIN95_DESKTOP)
                    .inner_margin(egui::Margin::same(10)),
            )
            .show(ctx, |ui| {
                raised_panel(ui, WIN95_FACE, 8, |ui| {
                    sunken_panel(ui, WIN95_FACE, 6, |ui| {
                        self.render_settings(ui, &snapshot);
                    });
                });

                ui.add_space(8.0);

                raised_panel(ui, WIN95_FACE, 6, |ui| {
                    sunken_panel(ui, WIN95_WINDOW_BG, 4, |ui| {
                        ui.horizontal(|ui| {
                            ui.label(RichText::new("Conversation").strong());
                            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                                ui.label(
                                    RichText::new(format!("{} message(s)", self.transcript.len()))
                                        .small(),
                                );
                            });
                        });
                    });
                    ui.add_space(6.0);
                    let content_height = ui.available_height().max(220.0);
                    sunken_panel(ui, WIN95_INPUT_BG, 8, |ui| {
                        ui.set_min_height((content_height - 16.0).max(160.0));
                        ScrollArea::vertical()
                            .id_salt("conversation_scroll")
                            .stick_to_bottom(true)
                            .auto_shrink([false, false])
                            .show(ui, |ui| {
                                if self.transcript.is_empty() {
                                    self.render_welcome(ui, &snapshot);
                                    return;
                                }
                                let mut copied = None;
                                for message in self.transcript.messages() {
                                    let rendered = Self::render_message(ui, message, |target| {
                                        self.is_copied(target)
                                    });
                                    copied = rendered.copied.or(copied);
                                    ui.add_space(6.0);
                                }
                                if let Some(target) = copied {
                                    debug!(message = target.message_id, segment = target.segment, "copied code to clipboard");
                                    self.copied = Some((target, Instant::now()));
                                }
                            });
                    });
                });
            });

        let refresh = if self.pending || snapshot.connection == ConnectionState::Checking {
            Duration::from_millis(50)
        } else {
            Duration::from_millis(250)
        };
        ctx.request_repaint_after(refresh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_app() -> ChatApp {
        ChatApp::new(AppConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            debounce_ms: 10,
            ..AppConfig::default()
        })
        .unwrap()
    }

    fn render_rect_for_message(message: ChatMessage, available_width: f32) -> egui::Rect {
        let ctx = egui::Context::default();
        let mut rendered_rect = None;

        let _ = ctx.run(egui::RawInput::default(), |ctx| {
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.allocate_ui_with_layout(
                    egui::vec2(available_width, 400.0),
                    Layout::top_down(Align::LEFT),
                    |ui| {
                        rendered_rect =
                            Some(ChatApp::render_message(ui, &message, |_| false).rect);
                    },
                );
            });
        });

        rendered_rect.expect("message should be rendered")
    }

    fn message(text: String, user: bool) -> ChatMessage {
        let mut transcript = Transcript::new();
        if user {
            transcript.push_user(text);
        } else {
            transcript.push_assistant(text);
        }
        transcript.messages()[0].clone()
    }

    #[test]
    fn send_requires_text_and_idle_state() {
        let mut app = offline_app();
        assert!(!app.can_send());

        app.input = "   \n".to_string();
        assert!(!app.can_send());

        app.input = "Hello, Ollama!".to_string();
        assert!(app.can_send());

        app.pending = true;
        assert!(!app.can_send());
    }

    #[test]
    fn send_without_model_reports_in_transcript() {
        let mut app = offline_app();
        app.input = "Bonjour ?".to_string();

        app.send_prompt();
        assert!(app.pending);
        assert!(app.input.is_empty());

        let deadline = Instant::now() + Duration::from_secs(5);
        while app.pending && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
            app.drain_worker_events();
        }

        let messages = app.transcript.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].is_user());
        assert_eq!(messages[1].text, GenerateError::NoModelSelected.to_string());
        assert_eq!(app.status, "Error");
    }

    #[test]
    fn dropped_worker_still_answers_in_transcript() {
        let mut app = offline_app();
        app.transcript.push_user("Bonjour ?");
        let (tx, rx) = mpsc::channel::<WorkerEvent>();
        app.worker_rx = Some(rx);
        app.pending = true;
        drop(tx);

        app.drain_worker_events();

        let messages = app.transcript.messages();
        assert_eq!(messages.len(), 2);
        assert!(!messages[1].is_user());
        assert_eq!(messages[1].text, "Error: the request ended without a reply");
        assert!(!app.pending);
        assert!(app.worker_rx.is_none());
        assert_eq!(app.status, "Error");
    }

    #[test]
    fn clear_chat_empties_transcript() {
        let mut app = offline_app();
        app.transcript.push_user("one");
        app.transcript.push_assistant("two");

        app.clear_chat();

        assert!(app.transcript.is_empty());
        assert_eq!(app.status, "Ready");
    }

    #[test]
    fn copied_feedback_targets_one_segment() {
        let mut app = offline_app();
        let target = CopyTarget {
            message_id: 3,
            segment: 1,
        };
        app.copied = Some((target, Instant::now()));

        assert!(app.is_copied(target));
        assert!(!app.is_copied(CopyTarget {
            message_id: 3,
            segment: 0
        }));
    }

    #[test]
    fn render_message_long_text_stays_within_expected_width() {
        let available_width = 420.0;
        let expected_max_width = (available_width * 0.82f32).clamp(220.0, 760.0);

        let rect = render_rect_for_message(message("very long word ".repeat(120), false), available_width);

        assert!(
            rect.width() <= expected_max_width + 1.0,
            "bubble width {} exceeded max {}",
            rect.width(),
            expected_max_width
        );
    }

    #[test]
    fn render_message_with_code_block_stays_within_row() {
        let text = format!(
            "Here is `main`:\n```rust\nfn main() {{ println!(\"{}\"); }}\n```\nDone.",
            "x".repeat(200)
        );
        let available_width = 500.0;

        let rect = render_rect_for_message(message(text, true), available_width);

        assert!(rect.width() > 0.0);
        assert!(
            rect.width() <= available_width + 1.0,
            "bubble width {} exceeded row width {}",
            rect.width(),
            available_width
        );
    }
}
