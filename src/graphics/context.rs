use ash::vk;
use parking_lot::Mutex;
use winit::window::Window;

use crate::{
    error::{DeviceResultExt, SampleError},
    graphics,
};

pub const FRAME_COUNT: usize = 2;

struct Frame {
    in_flight_fence: vk::Fence,
    image_available_semaphore: vk::Semaphore,
    render_finished_semaphore: vk::Semaphore,
    command_pool: graphics::CommandPool,
}

impl Frame {
    fn new(device: &graphics::Device, index: usize) -> Result<Self, SampleError> {
        Ok(Self {
            in_flight_fence: device.create_fence(&format!("in_flight_fence_#{index}"), true)?,
            image_available_semaphore: device.create_semaphore(&format!("image_available_semaphore_#{index}"))?,
            render_finished_semaphore: device.create_semaphore(&format!("render_finished_semaphore_#{index}"))?,
            command_pool: graphics::CommandPool::new(device, &format!("frame_#{index}"))?,
        })
    }

    fn destroy(&self, device: &graphics::Device) {
        unsafe {
            device.raw.destroy_fence(self.in_flight_fence, None);
            device.raw.destroy_semaphore(self.image_available_semaphore, None);
            device.raw.destroy_semaphore(self.render_finished_semaphore, None);
        }
        self.command_pool.destroy(device);
    }
}

struct RecordSubmitStuff {
    command_pool: graphics::CommandPool,
    fence: vk::Fence,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextDesc<'a> {
    pub present_mode: vk::PresentModeKHR,
    pub requirements: graphics::DeviceRequirements<'a>,
}

/// Window, device, swapchain and the per-frame objects needed to render into them.
pub struct Context {
    pub swapchain: graphics::Swapchain,
    frames: Vec<Frame>,
    frame_index: usize,
    record_submit_stuff: Mutex<RecordSubmitStuff>,

    // the surface inside the device must go before the window
    pub device: graphics::Device,
    window: Window,
}

impl Context {
    pub fn new(window: Window, desc: &ContextDesc) -> Result<Self, SampleError> {
        let device = graphics::Device::new(&window, &desc.requirements)?;

        let swapchain = {
            let surface_info = &device.gpu.surface_info;

            let window_size = window.inner_size();
            let extent = vk::Extent2D {
                width: window_size.width,
                height: window_size.height,
            };

            let config = graphics::SwapchainConfig {
                extent,
                present_mode: desc.present_mode,
                surface_format: surface_info.choose_surface_format(),
                image_count: surface_info.choose_image_count(FRAME_COUNT as u32),
            };

            graphics::Swapchain::new(&device, config)?
        };

        let mut frames = Vec::with_capacity(FRAME_COUNT);
        for index in 0..FRAME_COUNT {
            match Frame::new(&device, index) {
                Ok(frame) => frames.push(frame),
                Err(err) => {
                    for frame in frames.iter() {
                        frame.destroy(&device);
                    }
                    swapchain.destroy(&device);
                    return Err(err);
                }
            }
        }

        let record_submit_stuff = graphics::CommandPool::new(&device, "record_submit").and_then(|command_pool| {
            match device.create_fence("record_submit_fence", false) {
                Ok(fence) => Ok(RecordSubmitStuff { command_pool, fence }),
                Err(err) => {
                    command_pool.destroy(&device);
                    Err(err)
                }
            }
        });

        let record_submit_stuff = match record_submit_stuff {
            Ok(stuff) => Mutex::new(stuff),
            Err(err) => {
                for frame in frames.iter() {
                    frame.destroy(&device);
                }
                swapchain.destroy(&device);
                return Err(err);
            }
        };

        Ok(Self {
            swapchain,
            frames,
            frame_index: 0,
            record_submit_stuff,

            device,
            window,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.format()
    }

    pub fn wait_idle(&self) -> Result<(), SampleError> {
        self.device.wait_idle()
    }

    /// Records with `f`, submits and blocks until the device is done.
    pub fn record_and_submit(&self, f: impl FnOnce(&graphics::CommandRecorder)) -> Result<(), SampleError> {
        let mut record_submit_stuff = self.record_submit_stuff.lock();
        let RecordSubmitStuff { command_pool, fence } = &mut *record_submit_stuff;

        command_pool.reset(&self.device)?;
        let buffer = command_pool.begin_new(&self.device)?;
        let recorder = buffer.record(&self.device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        f(&recorder);
        drop(recorder);

        unsafe { self.device.raw.reset_fences(&[*fence]) }.tagged("reset_fences")?;
        let submit_info = command_pool.buffers()[0].submit_info();
        self.device.queue_submit(&[submit_info], *fence)?;
        unsafe { self.device.raw.wait_for_fences(&[*fence], false, u64::MAX) }.tagged("wait_for_fences")?;

        Ok(())
    }

    /// Renders one frame into the next swapchain image with `f` and presents it.
    /// Skips the frame when the swapchain had to be recreated.
    ///
    /// Once an image is acquired it is always submitted and presented, so an
    /// error from `f` is returned only after the frame has been handed back.
    pub fn draw_frame(
        &mut self,
        f: impl FnOnce(&graphics::CommandRecorder, &graphics::AcquiredImage) -> Result<(), SampleError>,
    ) -> Result<(), SampleError> {
        let frame = &mut self.frames[self.frame_index];

        unsafe { self.device.raw.wait_for_fences(&[frame.in_flight_fence], false, u64::MAX) }
            .tagged("wait_for_fences")?;

        let window_size = self.window.inner_size();
        self.swapchain.resize([window_size.width, window_size.height]);

        let Some(acquired_image) = self.swapchain.acquire_image(&self.device, frame.image_available_semaphore)? else {
            return Ok(());
        };

        frame.command_pool.reset(&self.device)?;
        let command_buffer = frame.command_pool.begin_new(&self.device)?;
        command_buffer.wait_semaphore(
            frame.image_available_semaphore,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        );
        command_buffer.signal_semaphore(frame.render_finished_semaphore, vk::PipelineStageFlags2::ALL_COMMANDS);

        let recorded = {
            let recorder = command_buffer.record(&self.device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

            recorder.barrier(
                &[],
                &[graphics::image_barrier(
                    &acquired_image,
                    graphics::AccessKind::None,
                    graphics::AccessKind::ColorAttachmentWrite,
                )],
                &[],
            );

            let recorded = f(&recorder, &acquired_image);

            recorder.barrier(
                &[],
                &[graphics::image_barrier(
                    &acquired_image,
                    graphics::AccessKind::ColorAttachmentWrite,
                    graphics::AccessKind::Present,
                )],
                &[],
            );

            recorded
        };

        unsafe { self.device.raw.reset_fences(&[frame.in_flight_fence]) }.tagged("reset_fences")?;
        let submit_info = frame.command_pool.buffers()[0].submit_info();
        self.device.queue_submit(&[submit_info], frame.in_flight_fence)?;

        self.swapchain.queue_present(&self.device, acquired_image, frame.render_finished_semaphore)?;

        self.frame_index = (self.frame_index + 1) % FRAME_COUNT;

        recorded
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        if let Err(err) = self.device.wait_idle() {
            log::error!("{err}");
        }

        let record_submit_stuff = self.record_submit_stuff.get_mut();
        unsafe {
            self.device.raw.destroy_fence(record_submit_stuff.fence, None);
        }
        record_submit_stuff.command_pool.destroy(&self.device);

        for frame in self.frames.iter() {
            frame.destroy(&self.device);
        }

        self.swapchain.destroy(&self.device);
    }
}
