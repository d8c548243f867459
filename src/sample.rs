//! Window, device and frame loop shared by samples.

use ash::vk;
use winit::{
    dpi::PhysicalSize,
    event::{MouseButton, VirtualKeyCode as KeyCode},
    event_loop::EventLoop,
    platform::run_return::EventLoopExtRunReturn,
    window::WindowBuilder,
};

use crate::{error::SampleError, graphics, input::Input};

/// What a sample needs from the device and window.
#[derive(Debug, Clone, Copy)]
pub struct SampleDesc {
    pub name: &'static str,
    pub window_size: [u32; 2],
    pub api_version: u32,
    pub capabilities: &'static [graphics::Capability],
}

#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    pub window_size: [u32; 2],
    pub present_mode: vk::PresentModeKHR,
}

impl RunConfig {
    pub fn from_desc(desc: &SampleDesc) -> Self {
        Self {
            window_size: desc.window_size,
            present_mode: vk::PresentModeKHR::FIFO,
        }
    }
}

/// Camera controlled by mouse drags: left rotates, right moves along z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    /// `y` is the distance of the camera from the origin.
    pub translation: glam::Vec2,
    /// Degrees around the y axis (`x`) and the x axis (`y`).
    pub rotation: glam::Vec2,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            translation: glam::Vec2::new(0.0, 4.0),
            rotation: glam::Vec2::ZERO,
        }
    }
}

impl ViewState {
    const DEGREES_PER_PIXEL: f32 = 1.0;
    const UNITS_PER_PIXEL: f32 = 0.1;

    pub fn update(&mut self, input: &Input) {
        self.drag(
            input.cursor_delta(),
            input.mouse_held(MouseButton::Left),
            input.mouse_held(MouseButton::Right),
        );
    }

    pub fn drag(&mut self, delta: glam::Vec2, rotate: bool, translate: bool) {
        if rotate {
            self.rotation += delta * Self::DEGREES_PER_PIXEL;
        }

        if translate {
            self.translation += delta * Self::UNITS_PER_PIXEL;
        }
    }

    pub fn distance(&self) -> f32 {
        self.translation.y
    }
}

/// A program driven by [`run`]: set up once, drawn every frame, torn down once.
pub trait Sample: Sized {
    type Options;

    fn begin(context: &graphics::Context, options: Self::Options) -> Result<Self, SampleError>;

    fn display(&mut self, context: &mut graphics::Context, view: &ViewState) -> Result<(), SampleError>;

    fn end(self, context: &graphics::Context) -> Result<(), SampleError>;
}

/// Opens the window, creates the device and drives `S` until the window is
/// closed or Escape is pressed. A failing frame ends the session with its error.
pub fn run<S: Sample>(desc: &SampleDesc, config: &RunConfig, options: S::Options) -> Result<(), SampleError> {
    let mut event_loop = EventLoop::new();

    let [width, height] = config.window_size;
    let window = WindowBuilder::new()
        .with_title(desc.name)
        .with_inner_size(PhysicalSize::new(width, height))
        .build(&event_loop)
        .map_err(SampleError::Window)?;

    let mut context = graphics::Context::new(
        window,
        &graphics::ContextDesc {
            present_mode: config.present_mode,
            requirements: graphics::DeviceRequirements {
                api_version: desc.api_version,
                capabilities: desc.capabilities,
            },
        },
    )?;

    log::info!("running '{}' on {}", desc.name, context.device.gpu.name());

    let mut sample = S::begin(&context, options)?;
    if let Err(err) = context.device.check_errors("begin") {
        end_session(sample, &context)?;
        return Err(err);
    }

    let mut input = Input::new(context.window().inner_size().into());
    let mut view = ViewState::default();
    let mut session_result = Ok(());
    let mut frame_count: u64 = 0;

    event_loop.run_return(|event, _target, control_flow| {
        control_flow.set_poll();

        if session_result.is_err() || !input.handle_event(&event) {
            return;
        }

        if input.close_requested() || input.key_pressed(KeyCode::Escape) {
            control_flow.set_exit();
            return;
        }

        view.update(&input);
        input.clear_frame();

        let [width, height] = input.screen_size();
        if width == 0 || height == 0 {
            return;
        }

        let result = sample
            .display(&mut context, &view)
            .and_then(|()| context.device.check_errors("display"));

        match result {
            Ok(()) => frame_count += 1,
            Err(err) => {
                session_result = Err(err);
                control_flow.set_exit();
            }
        }
    });

    log::info!("session ended after {frame_count} frames");

    if let Err(err) = context.wait_idle() {
        log::error!("{err}");
    }

    let end_result = end_session(sample, &context);
    session_result.and(end_result)
}

fn end_session<S: Sample>(sample: S, context: &graphics::Context) -> Result<(), SampleError> {
    sample.end(context)?;
    context.device.check_errors("end")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_starts_four_units_away() {
        let view = ViewState::default();
        assert_eq!(view.distance(), 4.0);
        assert_eq!(view.rotation, glam::Vec2::ZERO);
    }

    #[test]
    fn left_drag_rotates_one_degree_per_pixel() {
        let mut view = ViewState::default();
        view.drag(glam::Vec2::new(30.0, -15.0), true, false);

        assert_eq!(view.rotation, glam::Vec2::new(30.0, -15.0));
        assert_eq!(view.distance(), 4.0);
    }

    #[test]
    fn right_drag_moves_a_tenth_per_pixel() {
        let mut view = ViewState::default();
        view.drag(glam::Vec2::new(0.0, 20.0), false, true);

        assert_eq!(view.distance(), 6.0);
        assert_eq!(view.rotation, glam::Vec2::ZERO);
    }

    #[test]
    fn run_config_takes_the_sample_window_size() {
        let desc = SampleDesc {
            name: "test",
            window_size: [640, 480],
            api_version: vk::API_VERSION_1_3,
            capabilities: &[],
        };

        let config = RunConfig::from_desc(&desc);
        assert_eq!(config.window_size, [640, 480]);
        assert_eq!(config.present_mode, vk::PresentModeKHR::FIFO);
    }
}
