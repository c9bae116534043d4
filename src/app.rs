//! Companion chat window: egui/eframe application.
//!
//! # Architecture
//!
//! [`CompanionApp`] is the top-level [`eframe::App`].  It never blocks:
//!
//! * Chat replies run on the tokio runtime via [`ChatService::send`], which
//!   writes into [`SharedConversations`]; the app reads that every frame.
//! * A live call runs as a [`CallController`](crate::live::CallController)
//!   task; the app holds only the [`CallHandle`] and renders its status.
//! * Voice notes play through a [`VoiceNotePlayer`] owned by the UI thread.
//!
//! # Layout
//!
//! | Region  | Content |
//! |---------|---------|
//! | Left    | Persona list; selecting one switches the conversation |
//! | Top     | Persona name, typing hint, call button |
//! | Centre  | Scrolling messages: text, photos, voice-note buttons |
//! | Bottom  | Composer with send and photo buttons |
//! | Overlay | Call status while a call is open |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use eframe::egui;
use tokio::runtime::Handle;

use crate::audio::{DefaultMic, VoiceNotePlayer};
use crate::chat::{
    call_instruction, lock_conversations, new_shared_conversations, ChatMessage, ChatService,
    MessageKind, Persona, Sender, SharedConversations, PERSONAS, PHOTO_REQUEST_PROMPT,
};
use crate::config::AppConfig;
use crate::live::{self, CallHandle, GeminiLiveConnector, SessionSetup, SessionState};

// ---------------------------------------------------------------------------
// Palette
// ---------------------------------------------------------------------------

const BACKGROUND: egui::Color32 = egui::Color32::from_rgb(248, 250, 252);
const USER_BUBBLE: egui::Color32 = egui::Color32::from_rgb(30, 41, 59);
const PERSONA_BUBBLE: egui::Color32 = egui::Color32::WHITE;
const MUTED: egui::Color32 = egui::Color32::from_rgb(148, 163, 184);
const DANGER: egui::Color32 = egui::Color32::from_rgb(239, 68, 68);

fn accent(persona: &Persona) -> egui::Color32 {
    let [r, g, b] = persona.accent;
    egui::Color32::from_rgb(r, g, b)
}

// ---------------------------------------------------------------------------
// CompanionApp
// ---------------------------------------------------------------------------

pub struct CompanionApp {
    // ── Background work ──────────────────────────────────────────────────
    runtime: Handle,
    service: Arc<ChatService>,
    chat: SharedConversations,

    // ── UI state ─────────────────────────────────────────────────────────
    selected: &'static Persona,
    draft: String,
    /// One-line message shown under the header (e.g. missing API key).
    notice: Option<String>,
    /// Decoded photo bytes keyed by image URI; `None` for undecodable data.
    images: HashMap<String, Option<Arc<[u8]>>>,

    // ── Audio ────────────────────────────────────────────────────────────
    voice: VoiceNotePlayer,
    call: Option<CallHandle>,

    config: AppConfig,
}

impl CompanionApp {
    /// `runtime` runs chat requests and live calls.
    pub fn new(runtime: Handle, service: Arc<ChatService>, config: AppConfig) -> Self {
        let selected = Persona::find(&config.ui.start_persona).unwrap_or(&PERSONAS[0]);
        Self {
            runtime,
            service,
            chat: new_shared_conversations(),
            selected,
            draft: String::new(),
            notice: None,
            images: HashMap::new(),
            voice: VoiceNotePlayer::new(),
            call: None,
            config,
        }
    }

    // ── Actions ──────────────────────────────────────────────────────────

    fn select(&mut self, persona: &'static Persona) {
        if self.selected.id != persona.id {
            self.voice.stop();
            self.selected = persona;
            self.notice = None;
        }
    }

    fn send_message(&mut self, ctx: &egui::Context, text: String) {
        let service = Arc::clone(&self.service);
        let chat = Arc::clone(&self.chat);
        let persona = self.selected;
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            service.send(persona, &chat, &text).await;
            ctx.request_repaint();
        });
    }

    fn submit_draft(&mut self, ctx: &egui::Context) {
        let text = self.draft.trim().to_string();
        if text.is_empty() {
            return;
        }
        self.draft.clear();
        self.send_message(ctx, text);
    }

    fn start_call(&mut self) {
        let connector = match GeminiLiveConnector::from_config(&self.config) {
            Ok(connector) => connector,
            Err(e) => {
                log::warn!("call: cannot start: {e}");
                self.notice = Some(format!("Can't start a call: {e}"));
                return;
            }
        };

        let persona = self.selected;
        let setup = SessionSetup {
            model: self.config.api.live_model.clone(),
            voice_name: persona.voice_name().to_string(),
            system_instruction: call_instruction(persona),
        };

        self.voice.stop();
        let _guard = self.runtime.enter();
        log::info!("call: starting with {}", persona.id);
        self.call = Some(live::start_call(
            setup,
            Arc::new(connector),
            Arc::new(DefaultMic),
            self.config.audio.call_settings(),
        ));
    }

    fn end_call(&mut self) {
        if let Some(call) = self.call.take() {
            call.hang_up();
        }
    }

    fn toggle_voice_note(&mut self, message: &ChatMessage) {
        let Some(audio) = message.audio.as_deref() else {
            return;
        };
        if let Err(e) = self.voice.toggle(message.id, audio) {
            log::warn!("voice note {}: {e}", message.id);
            self.notice = Some("Couldn't play that voice note.".into());
        }
    }

    fn image_bytes(&mut self, uri: &str, content: &str) -> Option<Arc<[u8]>> {
        self.images
            .entry(uri.to_string())
            .or_insert_with(|| {
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map(Arc::from)
                    .map_err(|e| log::warn!("image {uri}: {e}"))
                    .ok()
            })
            .clone()
    }

    // ── Panels ───────────────────────────────────────────────────────────

    fn draw_sidebar(&mut self, ui: &mut egui::Ui) {
        ui.add_space(12.0);
        ui.heading("Soulmates");
        ui.add_space(8.0);

        for persona in PERSONAS {
            let selected = self.selected.id == persona.id;
            let response = ui
                .horizontal(|ui| {
                    draw_avatar(ui, persona, 18.0);
                    ui.vertical(|ui| {
                        ui.strong(persona.name);
                        ui.label(
                            egui::RichText::new(persona.interests.join(" · "))
                                .color(MUTED)
                                .size(11.0),
                        );
                    });
                })
                .response
                .interact(egui::Sense::click());

            if selected {
                ui.painter().rect_stroke(
                    response.rect.expand(2.0),
                    egui::CornerRadius::same(6),
                    egui::Stroke::new(1.5, accent(persona)),
                    egui::StrokeKind::Outside,
                );
            }
            if response.clicked() {
                self.select(persona);
            }
            ui.add_space(6.0);
        }
    }

    fn draw_header(&mut self, ui: &mut egui::Ui, pending: bool) {
        let persona = self.selected;
        ui.horizontal(|ui| {
            draw_avatar(ui, persona, 16.0);
            ui.vertical(|ui| {
                ui.strong(persona.name);
                let status = if pending { "typing..." } else { "online" };
                ui.label(egui::RichText::new(status).color(MUTED).size(11.0));
            });

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let button = egui::Button::new(
                    egui::RichText::new("Call").color(egui::Color32::WHITE),
                )
                .fill(accent(persona));
                if ui.add_enabled(self.call.is_none(), button).clicked() {
                    self.start_call();
                }
            });
        });

        if let Some(notice) = &self.notice {
            ui.label(egui::RichText::new(notice).color(DANGER).size(11.0));
        }
    }

    fn draw_messages(&mut self, ui: &mut egui::Ui) {
        let chat = Arc::clone(&self.chat);
        let all = lock_conversations(&chat);
        let Some(conversation) = all.get(self.selected.id) else {
            return;
        };

        egui::ScrollArea::vertical()
            .stick_to_bottom(true)
            .auto_shrink([false, false])
            .show(ui, |ui| {
                ui.add_space(8.0);
                for message in conversation.messages() {
                    self.draw_message(ui, message);
                    ui.add_space(6.0);
                }
                if conversation.pending {
                    ui.horizontal(|ui| {
                        ui.spinner();
                        ui.label(egui::RichText::new("Thinking...").color(MUTED).italics());
                    });
                }
            });
    }

    fn draw_message(&mut self, ui: &mut egui::Ui, message: &ChatMessage) {
        let (layout, fill, text_color) = match message.sender {
            Sender::User => (
                egui::Layout::right_to_left(egui::Align::TOP),
                USER_BUBBLE,
                egui::Color32::WHITE,
            ),
            Sender::Persona => (
                egui::Layout::left_to_right(egui::Align::TOP),
                PERSONA_BUBBLE,
                egui::Color32::from_rgb(51, 65, 85),
            ),
        };

        ui.with_layout(layout, |ui| {
            egui::Frame::new()
                .fill(fill)
                .corner_radius(egui::CornerRadius::same(12))
                .inner_margin(egui::Margin::same(10))
                .show(ui, |ui| {
                    ui.set_max_width(ui.available_width() * 0.7);
                    match message.kind {
                        MessageKind::Image => self.draw_image(ui, message),
                        MessageKind::Text => {
                            ui.label(egui::RichText::new(&message.content).color(text_color));
                        }
                    }
                    if message.audio.is_some() {
                        let playing = self.voice.playing_id() == Some(message.id);
                        let label = if playing { "■ Stop" } else { "▶ Voice note" };
                        if ui.small_button(label).clicked() {
                            self.toggle_voice_note(message);
                        }
                    }
                });
        });
    }

    fn draw_image(&mut self, ui: &mut egui::Ui, message: &ChatMessage) {
        let uri = format!("bytes://{}-{}.png", self.selected.id, message.id);
        match self.image_bytes(&uri, &message.content) {
            Some(bytes) => {
                ui.add(egui::Image::from_bytes(uri, bytes).max_width(260.0));
            }
            None => {
                ui.label(egui::RichText::new("(photo unavailable)").color(MUTED).italics());
            }
        }
    }

    fn draw_composer(&mut self, ui: &mut egui::Ui, ctx: &egui::Context, pending: bool) {
        ui.add_space(6.0);
        ui.horizontal(|ui| {
            if ui
                .add_enabled(!pending, egui::Button::new("Photo"))
                .on_hover_text(PHOTO_REQUEST_PROMPT)
                .clicked()
            {
                self.send_message(ctx, PHOTO_REQUEST_PROMPT.to_string());
            }

            let input = ui.add(
                egui::TextEdit::singleline(&mut self.draft)
                    .hint_text(format!("Message {}...", self.selected.name))
                    .desired_width(ui.available_width() - 70.0),
            );
            let enter = input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));

            let can_send = !pending && !self.draft.trim().is_empty();
            let clicked = ui.add_enabled(can_send, egui::Button::new("Send")).clicked();
            if (enter && can_send) || clicked {
                self.submit_draft(ctx);
                input.request_focus();
            }
        });
        ui.add_space(6.0);
    }

    /// Centered call window; returns nothing, ends the call on request.
    fn draw_call_overlay(&mut self, ctx: &egui::Context) {
        let Some(call) = &self.call else {
            return;
        };
        let status = call.status();
        let persona = self.selected;
        let mut close = false;

        egui::Window::new("call")
            .title_bar(false)
            .resizable(false)
            .collapsible(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .fixed_size([280.0, 240.0])
            .show(ctx, |ui| {
                ui.vertical_centered(|ui| {
                    ui.add_space(12.0);
                    draw_avatar(ui, persona, 36.0);
                    ui.add_space(8.0);
                    ui.heading(persona.name);

                    let headline_color = match status.state {
                        SessionState::Error => DANGER,
                        _ => accent(persona),
                    };
                    ui.label(egui::RichText::new(status.state.label()).color(headline_color));

                    if let Some(activity) = status.activity_label() {
                        ui.label(egui::RichText::new(activity).color(MUTED).italics());
                    }
                    if let Some(error) = &status.error_message {
                        ui.label(egui::RichText::new(error).color(MUTED).size(11.0));
                    }
                    if status.dropped_frames > 0 {
                        ui.label(
                            egui::RichText::new(format!(
                                "{} mic frames dropped",
                                status.dropped_frames
                            ))
                            .color(MUTED)
                            .size(10.0),
                        );
                    }

                    ui.add_space(12.0);
                    let text = if status.state.is_terminal() { "Close" } else { "End Call" };
                    let button = egui::Button::new(egui::RichText::new(text).color(egui::Color32::WHITE))
                        .fill(DANGER);
                    if ui.add(button).clicked() {
                        close = true;
                    }
                    ui.add_space(8.0);
                });
            });

        if close || status.state == SessionState::Closed {
            self.end_call();
        }
    }
}

/// Coloured circle with the persona's initial.
fn draw_avatar(ui: &mut egui::Ui, persona: &Persona, radius: f32) {
    let (rect, _) = ui.allocate_exact_size(egui::vec2(radius * 2.0, radius * 2.0), egui::Sense::hover());
    let painter = ui.painter();
    painter.circle_filled(rect.center(), radius, accent(persona));
    painter.text(
        rect.center(),
        egui::Align2::CENTER_CENTER,
        persona.initial(),
        egui::FontId::proportional(radius),
        egui::Color32::WHITE,
    );
}

// ---------------------------------------------------------------------------
// eframe::App impl
// ---------------------------------------------------------------------------

impl eframe::App for CompanionApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let pending = lock_conversations(&self.chat)
            .get(self.selected.id)
            .is_some_and(|c| c.pending);

        // Poll background state while something is in flight.
        if pending || self.call.is_some() {
            ctx.request_repaint_after(Duration::from_millis(100));
        } else if self.voice.playing_id().is_some() {
            ctx.request_repaint_after(Duration::from_millis(250));
        }

        egui::SidePanel::left("personas")
            .resizable(false)
            .exact_width(220.0)
            .show(ctx, |ui| self.draw_sidebar(ui));

        egui::TopBottomPanel::top("header")
            .frame(egui::Frame::new().fill(egui::Color32::WHITE).inner_margin(egui::Margin::same(10)))
            .show(ctx, |ui| self.draw_header(ui, pending));

        egui::TopBottomPanel::bottom("composer")
            .frame(egui::Frame::new().fill(egui::Color32::WHITE).inner_margin(egui::Margin::same(8)))
            .show(ctx, |ui| self.draw_composer(ui, ctx, pending));

        egui::CentralPanel::default()
            .frame(egui::Frame::new().fill(BACKGROUND).inner_margin(egui::Margin::same(12)))
            .show(ctx, |ui| self.draw_messages(ui));

        self.draw_call_overlay(ctx);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.end_call();
        self.voice.stop();
        log::info!("companion window closing");
    }
}
