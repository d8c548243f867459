use std::{borrow::Cow, path::PathBuf};

use ash::{prelude::VkResult, vk};

use crate::{geometry::GeometryError, graphics::DeviceCreateError, indirect::IndirectDrawError};

#[derive(Debug)]
pub enum SampleError {
    Compile { path: PathBuf, message: String },
    Link { message: String },
    UnsupportedFeature(String),
    DeviceAllocation {
        name: Cow<'static, str>,
        source: gpu_allocator::AllocationError,
    },
    Device { tag: &'static str, result: vk::Result },
    Validation { tag: &'static str, count: u32 },
    InvalidDraw(IndirectDrawError),
    InvalidGeometry(GeometryError),
    Window(winit::error::OsError),
    DeviceCreate(DeviceCreateError),
}

impl std::error::Error for SampleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SampleError::DeviceAllocation { source, .. } => Some(source),
            SampleError::InvalidDraw(err) => Some(err),
            SampleError::InvalidGeometry(err) => Some(err),
            SampleError::Window(err) => Some(err),
            SampleError::DeviceCreate(err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::Compile { path, message } => {
                write!(f, "failed to compile shader '{}':\n{message}", path.display())
            }
            SampleError::Link { message } => write!(f, "failed to link program: {message}"),
            SampleError::UnsupportedFeature(feature) => write!(f, "unsupported feature: {feature}"),
            SampleError::DeviceAllocation { name, source } => {
                write!(f, "failed to allocate device memory for '{name}': {source}")
            }
            SampleError::Device { tag, result } => write!(f, "device error in {tag}: {result}"),
            SampleError::Validation { tag, count } => {
                write!(f, "{count} validation error(s) reported in {tag}")
            }
            SampleError::InvalidDraw(err) => write!(f, "invalid indirect draw: {err}"),
            SampleError::InvalidGeometry(err) => write!(f, "invalid geometry: {err}"),
            SampleError::Window(err) => write!(f, "failed to create window: {err}"),
            SampleError::DeviceCreate(err) => write!(f, "failed to create device: {err}"),
        }
    }
}

impl From<DeviceCreateError> for SampleError {
    fn from(value: DeviceCreateError) -> Self {
        match value {
            DeviceCreateError::UnsupportedVersion { .. } | DeviceCreateError::MissingCapabilities(_) => {
                Self::UnsupportedFeature(value.to_string())
            }
            _ => Self::DeviceCreate(value),
        }
    }
}

impl From<IndirectDrawError> for SampleError {
    fn from(value: IndirectDrawError) -> Self {
        match value {
            IndirectDrawError::MultiDrawUnsupported { .. } => Self::UnsupportedFeature(value.to_string()),
            _ => Self::InvalidDraw(value),
        }
    }
}

impl From<GeometryError> for SampleError {
    fn from(value: GeometryError) -> Self {
        Self::InvalidGeometry(value)
    }
}

/// Attaches a diagnostic tag to a failed Vulkan call.
pub trait DeviceResultExt<T> {
    fn tagged(self, tag: &'static str) -> Result<T, SampleError>;
}

impl<T> DeviceResultExt<T> for VkResult<T> {
    #[inline]
    fn tagged(self, tag: &'static str) -> Result<T, SampleError> {
        self.map_err(|result| SampleError::Device { tag, result })
    }
}
