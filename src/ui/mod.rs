//! egui layout for the gallery: menu, format tabs, the thumbnail list and the preview
//! viewport. The UI only reads the session; everything it wants changed comes back
//! as [`UiActions`].

use crate::app::input::ViewportGesture;
use crate::gallery::{Generation, ModelEntry, ThumbnailStatus, ViewerSession};
use egui::{
    Color32, PointerButton, Rect, RichText, Sense, TextureHandle, TextureId, TextureOptions,
};
use image::RgbaImage;

const LIST_WIDTH: f32 = 230.0;
const SPINNER_SIZE: f32 = 48.0;

#[derive(Debug, Default)]
pub struct UiActions {
    pub select_format: Option<String>,
    pub select_model: Option<String>,
    pub open_folder: bool,
    pub save_screenshot: bool,
    pub export_thumbnails: bool,
    pub frame_model: bool,
    pub reset_camera: bool,
    pub retry: bool,
    pub quit: bool,
    /// Viewport size in physical pixels, for the preview render target.
    pub viewport_px: Option<[u32; 2]>,
    pub viewport_height: f32,
    pub gesture: ViewportGesture,
}

/// egui textures mirroring the session's thumbnails.
pub struct GalleryUi {
    thumbnail_size: egui::Vec2,
    thumbnails_generation: Option<Generation>,
    thumbnails: Vec<Option<TextureHandle>>,
}

impl GalleryUi {
    pub fn new(thumbnail_width: u32, thumbnail_height: u32) -> Self {
        Self {
            thumbnail_size: egui::vec2(thumbnail_width as f32, thumbnail_height as f32),
            thumbnails_generation: None,
            thumbnails: Vec::new(),
        }
    }

    /// Drops every texture, e.g. when switching asset roots.
    pub fn reset(&mut self) {
        self.thumbnails_generation = None;
        self.thumbnails.clear();
    }

    fn sync_thumbnails(&mut self, ctx: &egui::Context, generation: Generation, entries: &[ModelEntry]) {
        if self.thumbnails_generation != Some(generation) {
            self.thumbnails.clear();
            self.thumbnails_generation = Some(generation);
        }
        self.thumbnails.resize_with(entries.len(), || None);
        for (slot, entry) in self.thumbnails.iter_mut().zip(entries) {
            if slot.is_some() {
                continue;
            }
            if let ThumbnailStatus::Ready(image) = &entry.thumbnail {
                *slot = Some(ctx.load_texture(
                    format!("thumbnail/{}", entry.name),
                    color_image(image),
                    TextureOptions::LINEAR,
                ));
            }
        }
    }

    /// `preview_texture` is the egui id the preview target is registered under.
    pub fn show_gallery(
        &mut self,
        ctx: &egui::Context,
        session: &ViewerSession,
        preview_texture: Option<TextureId>,
        source_label: &str,
    ) -> UiActions {
        let mut actions = UiActions::default();
        self.sync_thumbnails(ctx, session.thumbnails().generation(), session.entries());

        let preview = session.preview();
        let has_model = preview.current_model().is_some();
        let has_thumbnails = session
            .entries()
            .iter()
            .any(|entry| matches!(entry.thumbnail, ThumbnailStatus::Ready(_)));

        egui::TopBottomPanel::top("menu").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Open folder…").clicked() {
                        actions.open_folder = true;
                        ui.close_menu();
                    }
                    if ui
                        .add_enabled(has_model, egui::Button::new("Save screenshot…"))
                        .clicked()
                    {
                        actions.save_screenshot = true;
                        ui.close_menu();
                    }
                    if ui
                        .add_enabled(has_thumbnails, egui::Button::new("Export thumbnails…"))
                        .clicked()
                    {
                        actions.export_thumbnails = true;
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.button("Quit").clicked() {
                        actions.quit = true;
                    }
                });
                ui.menu_button("View", |ui| {
                    if ui
                        .add_enabled(
                            has_model,
                            egui::Button::new("Frame model").shortcut_text("F"),
                        )
                        .clicked()
                    {
                        actions.frame_model = true;
                        ui.close_menu();
                    }
                    if ui
                        .add(egui::Button::new("Reset camera").shortcut_text("R"))
                        .clicked()
                    {
                        actions.reset_camera = true;
                        ui.close_menu();
                    }
                });
            });
            ui.horizontal(|ui| {
                for format in session.formats() {
                    let active = session.active_format() == Some(format);
                    if ui.selectable_label(active, format).clicked() && !active {
                        actions.select_format = Some(format.to_string());
                    }
                }
            });
        });

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if let Some(tip) = preview.tip() {
                    ui.label(tip);
                }
                if let Some(status) = preview.status() {
                    ui.separator();
                    ui.colored_label(ui.visuals().warn_fg_color, status);
                }
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.weak(source_label);
                    ui.separator();
                    ui.label(thumbnail_progress(session.entries()));
                });
            });
        });

        let selected = preview
            .pending_model()
            .or_else(|| preview.current_model().map(|model| model.name.as_str()));
        egui::SidePanel::left("models")
            .resizable(true)
            .default_width(LIST_WIDTH)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .auto_shrink([false, false])
                    .show(ui, |ui| {
                        for (index, entry) in session.entries().iter().enumerate() {
                            let is_selected = selected == Some(entry.name.as_str());
                            if self.model_card(ui, index, entry, is_selected).clicked() {
                                actions.select_model = Some(entry.name.clone());
                            }
                        }
                        if session.entries().is_empty() {
                            ui.weak("No models in this format");
                        }
                    });
            });

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                let (rect, response) =
                    ui.allocate_exact_size(ui.available_size(), Sense::click_and_drag());
                let pixels_per_point = ctx.pixels_per_point();
                actions.viewport_px = Some([
                    (rect.width() * pixels_per_point).round().max(1.0) as u32,
                    (rect.height() * pixels_per_point).round().max(1.0) as u32,
                ]);
                actions.viewport_height = rect.height();

                if let Some(texture) = preview_texture {
                    ui.painter().image(
                        texture,
                        rect,
                        Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                        Color32::WHITE,
                    );
                }

                if session.loading_indicator_visible() {
                    ui.painter()
                        .rect_filled(rect, 0.0, Color32::from_black_alpha(80));
                    ui.put(
                        Rect::from_center_size(rect.center(), egui::Vec2::splat(SPINNER_SIZE)),
                        egui::Spinner::new().size(SPINNER_SIZE),
                    );
                    return;
                }

                let drag = response.drag_delta();
                if response.dragged_by(PointerButton::Primary) {
                    actions.gesture.orbit = [drag.x, drag.y];
                } else if response.dragged_by(PointerButton::Secondary) {
                    actions.gesture.pan = [drag.x, drag.y];
                } else if response.dragged_by(PointerButton::Middle) {
                    actions.gesture.dolly_drag = drag.y;
                }
                if response.hovered() {
                    actions.gesture.scroll = ui.input(|input| input.smooth_scroll_delta.y);
                }
            });

        actions
    }

    fn model_card(
        &self,
        ui: &mut egui::Ui,
        index: usize,
        entry: &ModelEntry,
        selected: bool,
    ) -> egui::Response {
        let mut frame = egui::Frame::group(ui.style());
        if selected {
            frame = frame.stroke(ui.visuals().selection.stroke);
        }
        frame
            .show(ui, |ui| {
                ui.set_width(ui.available_width());
                ui.label(RichText::new(&entry.name).strong());
                match &entry.thumbnail {
                    ThumbnailStatus::Pending => {
                        ui.add_sized(self.thumbnail_size, egui::Spinner::new());
                    }
                    ThumbnailStatus::Ready(_) => {
                        if let Some(Some(texture)) = self.thumbnails.get(index) {
                            ui.add(egui::Image::new((texture.id(), self.thumbnail_size)));
                        }
                    }
                    ThumbnailStatus::Failed(reason) => {
                        ui.add_sized(
                            self.thumbnail_size,
                            egui::Label::new(RichText::new("⚠ no thumbnail").weak()),
                        )
                        .on_hover_text(reason);
                    }
                }
            })
            .response
            .interact(Sense::click())
    }

    /// Full-window message for the index fetch. Offers a retry when `failed`.
    pub fn show_message(&mut self, ctx: &egui::Context, message: &str, failed: bool) -> UiActions {
        let mut actions = UiActions::default();
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(ui.available_height() * 0.35);
                if failed {
                    ui.heading("Could not load the model index");
                    ui.label(message);
                    ui.add_space(8.0);
                    ui.horizontal(|ui| {
                        if ui.button("Retry").clicked() {
                            actions.retry = true;
                        }
                        if ui.button("Open folder…").clicked() {
                            actions.open_folder = true;
                        }
                    });
                } else {
                    ui.add(egui::Spinner::new().size(SPINNER_SIZE));
                    ui.label(message);
                }
            });
        });
        actions
    }
}

fn color_image(image: &RgbaImage) -> egui::ColorImage {
    egui::ColorImage::from_rgba_unmultiplied(
        [image.width() as usize, image.height() as usize],
        image.as_raw(),
    )
}

/// "3/5 thumbnails", counting failures as finished.
pub fn thumbnail_progress(entries: &[ModelEntry]) -> String {
    let finished = entries
        .iter()
        .filter(|entry| !matches!(entry.thumbnail, ThumbnailStatus::Pending))
        .count();
    format!("{}/{} thumbnails", finished, entries.len())
}
