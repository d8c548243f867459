use crate::{
    error::{DeviceResultExt, SampleError},
    graphics,
};

use ash::vk;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub image_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct SwapchainImage {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub subresource_range: vk::ImageSubresourceRange,
}

impl SwapchainImage {
    pub fn full_rect(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: self.extent,
        }
    }
}

struct SwapchainInner {
    handle: vk::SwapchainKHR,
    images: Vec<SwapchainImage>,

    config: SwapchainConfig,
}

impl SwapchainInner {
    fn new(
        device: &graphics::Device,
        old_swapchain: vk::SwapchainKHR,
        config: SwapchainConfig,
        surface_info: &graphics::SurfaceInfo,
    ) -> Result<Self, SampleError> {
        let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .present_mode(surface_info.try_select_present_mode(&[config.present_mode]))
            .pre_transform(surface_info.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle =
            unsafe { device.swapchain_fns.create_swapchain(&swapchain_create_info, None) }.tagged("create_swapchain")?;

        let mut inner = Self {
            handle,
            images: Vec::new(),
            config,
        };

        let images = match unsafe { device.swapchain_fns.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(result) => {
                inner.destroy(device);
                return Err(SampleError::Device {
                    tag: "get_swapchain_images",
                    result,
                });
            }
        };

        for (index, image) in images.into_iter().enumerate() {
            let subresource_range = vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            };

            let image_view_create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(inner.config.surface_format.format)
                .subresource_range(subresource_range);

            let view = match unsafe { device.raw.create_image_view(&image_view_create_info, None) } {
                Ok(view) => view,
                Err(result) => {
                    inner.destroy(device);
                    return Err(SampleError::Device {
                        tag: "create_image_view",
                        result,
                    });
                }
            };
            device.set_debug_name(view, &format!("swapchain_image_view_#{index}"));

            inner.images.push(SwapchainImage {
                handle: image,
                view,
                format: inner.config.surface_format.format,
                extent: inner.config.extent,
                subresource_range,
            });
        }

        Ok(inner)
    }

    fn destroy(&self, device: &graphics::Device) {
        unsafe {
            for image in self.images.iter() {
                device.raw.destroy_image_view(image.view, None);
            }

            device.swapchain_fns.destroy_swapchain(self.handle, None);
        }
    }
}

impl graphics::SurfaceInfo {
    pub fn choose_surface_format(&self) -> vk::SurfaceFormatKHR {
        for surface_format in self.formats.iter().copied() {
            if surface_format.format == vk::Format::B8G8R8A8_SRGB
                && surface_format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            {
                return surface_format;
            }
        }

        self.formats.first().copied().unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        })
    }

    pub fn choose_extent(&self, target: vk::Extent2D) -> vk::Extent2D {
        if self.capabilities.current_extent.width != u32::MAX {
            self.capabilities.current_extent
        } else {
            let width = target.width.clamp(
                self.capabilities.min_image_extent.width,
                self.capabilities.max_image_extent.width,
            );
            let height = target.height.clamp(
                self.capabilities.min_image_extent.height,
                self.capabilities.max_image_extent.height,
            );

            vk::Extent2D { width, height }
        }
    }

    fn max_image_count(&self) -> u32 {
        if self.capabilities.max_image_count == 0 {
            u32::MAX
        } else {
            self.capabilities.max_image_count
        }
    }

    pub fn choose_image_count(&self, frame_count: u32) -> u32 {
        u32::max(self.capabilities.min_image_count + 1, frame_count).min(self.max_image_count())
    }

    pub fn try_select_present_mode(&self, target_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
        target_modes
            .iter()
            .copied()
            .find(|target_mode| self.present_modes.contains(target_mode))
            .unwrap_or(vk::PresentModeKHR::FIFO)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AcquiredImage {
    pub image: SwapchainImage,
    pub image_index: u32,
    pub suboptimal: bool,
}

impl std::ops::Deref for AcquiredImage {
    type Target = SwapchainImage;

    fn deref(&self) -> &Self::Target {
        &self.image
    }
}

pub struct Swapchain {
    inner: SwapchainInner,

    config: SwapchainConfig,
    surface_info: graphics::SurfaceInfo,
    outdated: bool,
}

impl Swapchain {
    pub fn new(device: &graphics::Device, config: SwapchainConfig) -> Result<Self, SampleError> {
        let mut surface_info = device.gpu.surface_info.clone();
        surface_info.refresh_capabilities(device)?;

        let mut config = config;
        config.extent = surface_info.choose_extent(config.extent);

        Ok(Self {
            inner: SwapchainInner::new(device, vk::SwapchainKHR::null(), config.clone(), &surface_info)?,
            config,
            surface_info,
            outdated: false,
        })
    }

    pub fn resize(&mut self, new_size: [u32; 2]) {
        self.config.extent = vk::Extent2D {
            width: new_size[0],
            height: new_size[1],
        }
    }

    pub fn format(&self) -> vk::Format {
        self.config.surface_format.format
    }

    fn recreate_if_needed(&mut self, device: &graphics::Device) -> Result<(), SampleError> {
        if self.config == self.inner.config && !self.outdated {
            return Ok(());
        }

        // no frame may still use the old images
        device.wait_idle()?;

        self.surface_info.refresh_capabilities(device)?;
        self.config.extent = self.surface_info.choose_extent(self.config.extent);

        let swapchain = SwapchainInner::new(device, self.inner.handle, self.config.clone(), &self.surface_info)?;
        let old = std::mem::replace(&mut self.inner, swapchain);
        old.destroy(device);

        self.outdated = false;

        log::debug!("swapchain recreated: {}x{}", self.config.extent.width, self.config.extent.height);

        Ok(())
    }

    /// `Ok(None)` when the swapchain went out of date; it is recreated on the next call.
    pub fn acquire_image(
        &mut self,
        device: &graphics::Device,
        acquired_semaphore: vk::Semaphore,
    ) -> Result<Option<AcquiredImage>, SampleError> {
        self.recreate_if_needed(device)?;

        let (image_index, suboptimal) = match unsafe {
            device.swapchain_fns.acquire_next_image(self.inner.handle, u64::MAX, acquired_semaphore, vk::Fence::null())
        } {
            Ok(ok) => ok,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.outdated = true;
                return Ok(None);
            }
            Err(result) => {
                return Err(SampleError::Device {
                    tag: "acquire_next_image",
                    result,
                })
            }
        };

        Ok(Some(AcquiredImage {
            image: self.inner.images[image_index as usize],
            image_index,
            suboptimal,
        }))
    }

    pub fn queue_present(
        &mut self,
        device: &graphics::Device,
        image: AcquiredImage,
        finished_semaphore: vk::Semaphore,
    ) -> Result<(), SampleError> {
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(std::slice::from_ref(&finished_semaphore))
            .swapchains(std::slice::from_ref(&self.inner.handle))
            .image_indices(std::slice::from_ref(&image.image_index));

        match unsafe { device.swapchain_fns.queue_present(device.queue.handle, &present_info) } {
            Ok(suboptimal) => {
                if suboptimal || image.suboptimal {
                    self.outdated = true;
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.outdated = true;
                Ok(())
            }
            Err(result) => Err(SampleError::Device {
                tag: "queue_present",
                result,
            }),
        }
    }

    pub fn destroy(&self, device: &graphics::Device) {
        self.inner.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_info(min_image_count: u32, max_image_count: u32) -> graphics::SurfaceInfo {
        graphics::SurfaceInfo {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count,
                max_image_count,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                ..Default::default()
            },
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
        }
    }

    #[test]
    fn prefers_srgb_format() {
        assert_eq!(surface_info(2, 0).choose_surface_format().format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn image_count_respects_limits() {
        assert_eq!(surface_info(2, 0).choose_image_count(2), 3);
        assert_eq!(surface_info(2, 2).choose_image_count(2), 2);
        assert_eq!(surface_info(1, 8).choose_image_count(4), 4);
    }

    #[test]
    fn extent_is_clamped_when_surface_lets_us_choose() {
        let extent = surface_info(2, 0).choose_extent(vk::Extent2D {
            width: 640,
            height: 8000,
        });
        assert_eq!((extent.width, extent.height), (640, 4096));
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let info = surface_info(2, 0);
        assert_eq!(info.try_select_present_mode(&[vk::PresentModeKHR::MAILBOX]), vk::PresentModeKHR::MAILBOX);
        assert_eq!(info.try_select_present_mode(&[vk::PresentModeKHR::IMMEDIATE]), vk::PresentModeKHR::FIFO);
    }
}
