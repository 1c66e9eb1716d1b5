//! egui context for the gallery window and the routing of window input between
//! egui widgets and the preview camera.

use super::input::{InputAction, InputState};
use egui_winit::winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::Window;

pub struct EguiFrameOutput {
    pub clipped_primitives: Vec<egui::ClippedPrimitive>,
    pub textures_delta: egui::TexturesDelta,
    pub pixels_per_point: f32,
}

/// Where a window event ended up after egui saw it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowInput {
    /// egui used it, or a text widget holds the keyboard.
    Consumed,
    Quit,
    Camera(InputAction),
    Unhandled,
}

pub struct EguiHost {
    context: egui::Context,
    winit_state: egui_winit::State,
    keyboard_taken: bool,
}

impl EguiHost {
    pub fn new(window: &Window, max_texture_side: usize) -> Self {
        let context = egui::Context::default();
        context.style_mut(|style| {
            style.spacing.item_spacing = egui::vec2(8.0, 6.0);
            style.interaction.selectable_labels = false;
        });
        // +/- dolly the preview camera.
        context.options_mut(|options| options.zoom_with_keyboard = false);
        let winit_state = egui_winit::State::new(
            context.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
            Some(max_texture_side),
        );

        Self {
            context,
            winit_state,
            keyboard_taken: false,
        }
    }

    /// Feeds `event` to egui, then to `input` if egui left it alone.
    pub fn route(
        &mut self,
        window: &Window,
        event: &WindowEvent,
        input: &mut InputState,
    ) -> WindowInput {
        let response = self.winit_state.on_window_event(window, event);
        if response.repaint {
            window.request_redraw();
        }
        if response.consumed {
            return WindowInput::Consumed;
        }
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                route_key(event.physical_key, event.state, self.keyboard_taken, input)
            }
            WindowEvent::Focused(false) => {
                input.release_all();
                WindowInput::Unhandled
            }
            _ => WindowInput::Unhandled,
        }
    }

    /// Runs one UI pass. Afterwards the camera keys are blocked while a widget has
    /// keyboard focus or the viewport is busy loading.
    pub fn run_ui<F>(
        &mut self,
        window: &Window,
        input: &mut InputState,
        viewport_busy: bool,
        run_ui: F,
    ) -> EguiFrameOutput
    where
        F: FnMut(&egui::Context),
    {
        let raw_input = self.winit_state.take_egui_input(window);
        let full_output = self.context.run(raw_input, run_ui);
        self.winit_state
            .handle_platform_output(window, full_output.platform_output);

        self.keyboard_taken = self.context.wants_keyboard_input();
        input.set_blocked(self.keyboard_taken || viewport_busy);

        let pixels_per_point = full_output.pixels_per_point;
        EguiFrameOutput {
            clipped_primitives: self
                .context
                .tessellate(full_output.shapes, pixels_per_point),
            textures_delta: full_output.textures_delta,
            pixels_per_point,
        }
    }
}

fn route_key(
    key: PhysicalKey,
    state: ElementState,
    keyboard_taken: bool,
    input: &mut InputState,
) -> WindowInput {
    let pressed = state == ElementState::Pressed;
    if pressed && key == PhysicalKey::Code(KeyCode::Escape) {
        return WindowInput::Quit;
    }
    if keyboard_taken && pressed {
        return WindowInput::Consumed;
    }
    WindowInput::Camera(input.handle_key(key, pressed))
}

#[cfg(test)]
mod tests {
    use super::*;

    const F: PhysicalKey = PhysicalKey::Code(KeyCode::KeyF);

    #[test]
    fn escape_quits_even_with_a_focused_widget() {
        let mut input = InputState::default();
        let escape = PhysicalKey::Code(KeyCode::Escape);
        assert_eq!(
            route_key(escape, ElementState::Pressed, true, &mut input),
            WindowInput::Quit
        );
    }

    #[test]
    fn focused_widget_keeps_camera_keys() {
        let mut input = InputState::default();
        assert_eq!(
            route_key(F, ElementState::Pressed, true, &mut input),
            WindowInput::Consumed
        );
        assert_eq!(
            route_key(F, ElementState::Pressed, false, &mut input),
            WindowInput::Camera(InputAction::FrameModel)
        );
    }

    #[test]
    fn releases_reach_the_camera_while_typing() {
        let mut input = InputState::default();
        let left = PhysicalKey::Code(KeyCode::ArrowLeft);
        route_key(left, ElementState::Pressed, false, &mut input);
        assert!(input.orbit_left);
        route_key(left, ElementState::Released, true, &mut input);
        assert!(!input.orbit_left);
    }
}
