use std::collections::HashSet;

use winit::event::{ElementState, Event, MouseButton, VirtualKeyCode as KeyCode, WindowEvent};

/// Window input gathered between two frames.
#[derive(Debug, Default)]
pub struct Input {
    close_requested: bool,

    screen_size: [u32; 2],

    pressed_keys: HashSet<KeyCode>,

    held_mouse: HashSet<MouseButton>,
    cursor_position: Option<glam::Vec2>,
    cursor_delta: glam::Vec2,
}

impl Input {
    pub fn new(screen_size: [u32; 2]) -> Self {
        Self {
            screen_size,
            ..Default::default()
        }
    }

    /// Returns true once all events of the current frame have been seen.
    pub fn handle_event(&mut self, event: &Event<()>) -> bool {
        if let Event::WindowEvent { window_id: _, event } = event {
            self.handle_window_event(event);
        }

        matches!(event, Event::MainEventsCleared)
    }

    pub fn handle_window_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(new_size) => {
                self.screen_size = (*new_size).into();
            }
            WindowEvent::KeyboardInput { input, .. } => {
                if let (Some(key_code), ElementState::Pressed) = (input.virtual_keycode, input.state) {
                    self.pressed_keys.insert(key_code);
                }
            }
            WindowEvent::MouseInput { state, button, .. } => match state {
                ElementState::Pressed => {
                    self.held_mouse.insert(*button);
                }
                ElementState::Released => {
                    self.held_mouse.remove(button);
                }
            },
            WindowEvent::CursorMoved { position, .. } => {
                let position = glam::Vec2::new(position.x as f32, position.y as f32);
                if let Some(last) = self.cursor_position {
                    self.cursor_delta += position - last;
                }
                self.cursor_position = Some(position);
            }
            WindowEvent::CursorLeft { .. } => {
                self.cursor_position = None;
            }
            WindowEvent::Focused(false) => {
                self.held_mouse.clear();
            }
            _ => {}
        }
    }

    pub fn clear_frame(&mut self) {
        self.pressed_keys.clear();
        self.cursor_delta = glam::Vec2::ZERO;
    }

    pub fn screen_size(&self) -> [u32; 2] {
        self.screen_size
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub fn key_pressed(&self, key_code: KeyCode) -> bool {
        self.pressed_keys.contains(&key_code)
    }

    pub fn mouse_held(&self, button: MouseButton) -> bool {
        self.held_mouse.contains(&button)
    }

    /// Cursor movement in window pixels since the last frame, y pointing down.
    pub fn cursor_delta(&self) -> glam::Vec2 {
        self.cursor_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::PhysicalPosition;

    #[allow(deprecated)]
    fn cursor_moved(x: f64, y: f64) -> WindowEvent<'static> {
        WindowEvent::CursorMoved {
            device_id: unsafe { winit::event::DeviceId::dummy() },
            position: PhysicalPosition::new(x, y),
            modifiers: Default::default(),
        }
    }

    #[allow(deprecated)]
    fn mouse(state: ElementState, button: MouseButton) -> WindowEvent<'static> {
        WindowEvent::MouseInput {
            device_id: unsafe { winit::event::DeviceId::dummy() },
            state,
            button,
            modifiers: Default::default(),
        }
    }

    #[test]
    fn cursor_delta_accumulates_within_a_frame() {
        let mut input = Input::new([640, 480]);

        input.handle_window_event(&cursor_moved(10.0, 10.0));
        assert_eq!(input.cursor_delta(), glam::Vec2::ZERO);

        input.handle_window_event(&cursor_moved(15.0, 8.0));
        input.handle_window_event(&cursor_moved(20.0, 12.0));
        assert_eq!(input.cursor_delta(), glam::Vec2::new(10.0, 2.0));

        input.clear_frame();
        assert_eq!(input.cursor_delta(), glam::Vec2::ZERO);
    }

    #[test]
    fn buttons_are_held_until_released() {
        let mut input = Input::new([640, 480]);

        input.handle_window_event(&mouse(ElementState::Pressed, MouseButton::Left));
        input.clear_frame();
        assert!(input.mouse_held(MouseButton::Left));

        input.handle_window_event(&mouse(ElementState::Released, MouseButton::Left));
        assert!(!input.mouse_held(MouseButton::Left));
    }

    #[test]
    fn losing_focus_releases_everything() {
        let mut input = Input::new([640, 480]);

        input.handle_window_event(&mouse(ElementState::Pressed, MouseButton::Right));
        input.handle_window_event(&WindowEvent::Focused(false));
        assert!(!input.mouse_held(MouseButton::Right));
    }

    #[test]
    fn close_and_resize_are_recorded() {
        let mut input = Input::new([640, 480]);

        input.handle_window_event(&WindowEvent::Resized(winit::dpi::PhysicalSize::new(800, 600)));
        input.handle_window_event(&WindowEvent::CloseRequested);

        assert!(input.close_requested());
        assert_eq!(input.screen_size(), [800, 600]);
    }

    #[allow(deprecated)]
    fn key(state: ElementState, key_code: KeyCode) -> WindowEvent<'static> {
        WindowEvent::KeyboardInput {
            device_id: unsafe { winit::event::DeviceId::dummy() },
            input: winit::event::KeyboardInput {
                scancode: 0,
                state,
                virtual_keycode: Some(key_code),
                modifiers: Default::default(),
            },
            is_synthetic: false,
        }
    }

    #[test]
    fn key_presses_last_one_frame() {
        let mut input = Input::new([640, 480]);

        input.handle_window_event(&key(ElementState::Pressed, KeyCode::Escape));
        assert!(input.key_pressed(KeyCode::Escape));

        input.handle_window_event(&key(ElementState::Released, KeyCode::Escape));
        assert!(input.key_pressed(KeyCode::Escape));

        input.clear_frame();
        assert!(!input.key_pressed(KeyCode::Escape));
    }
}
