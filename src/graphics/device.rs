use ash::{
    extensions::{ext, khr},
    prelude::VkResult,
    vk,
};

use std::{
    collections::HashSet,
    ffi::{c_void, CStr, CString},
    mem::ManuallyDrop,
    sync::atomic::{AtomicU32, Ordering},
};

use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc},
    AllocationError, AllocationSizes, AllocatorDebugSettings,
};

use parking_lot::Mutex;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::window::Window;

use crate::error::{DeviceResultExt, SampleError};

const VALIDATION_LAYER: &CStr = cstr::cstr!("VK_LAYER_KHRONOS_validation");

pub struct InstanceMetadata {
    pub api_version: u32,
    pub layers: HashSet<CString>,
    pub extensions: HashSet<CString>,
}

impl InstanceMetadata {
    pub fn available(entry: &ash::Entry) -> VkResult<Self> {
        // a 1.0 loader doesn't know vkEnumerateInstanceVersion
        let api_version = entry.try_enumerate_instance_version()?.unwrap_or(vk::API_VERSION_1_0);
        let layers = entry
            .enumerate_instance_layer_properties()?
            .into_iter()
            .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()).to_owned() })
            .collect();
        let extensions = entry
            .enumerate_instance_extension_properties(None)?
            .into_iter()
            .map(|extension| unsafe { CStr::from_ptr(extension.extension_name.as_ptr()).to_owned() })
            .collect();

        Ok(Self {
            api_version,
            layers,
            extensions,
        })
    }

    #[inline]
    pub fn has_layer(&self, query: &CStr) -> bool {
        self.layers.contains(query)
    }

    #[inline]
    pub fn has_extension(&self, query: &CStr) -> bool {
        self.extensions.contains(query)
    }
}

/// Optional physical device features a sample can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// More than one record per indirect draw call.
    MultiDrawIndirect,
    /// Non-zero `firstInstance` in indirect records.
    DrawIndirectFirstInstance,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::MultiDrawIndirect, Capability::DrawIndirectFirstInstance];

    pub fn name(self) -> &'static str {
        match self {
            Capability::MultiDrawIndirect => "multiDrawIndirect",
            Capability::DrawIndirectFirstInstance => "drawIndirectFirstInstance",
        }
    }

    pub fn supported_by(self, features: &vk::PhysicalDeviceFeatures) -> bool {
        let supported = match self {
            Capability::MultiDrawIndirect => features.multi_draw_indirect,
            Capability::DrawIndirectFirstInstance => features.draw_indirect_first_instance,
        };

        supported == vk::TRUE
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceRequirements<'a> {
    pub api_version: u32,
    pub capabilities: &'a [Capability],
}

impl DeviceRequirements<'_> {
    pub fn version_supported(&self, available: u32) -> bool {
        let required = (vk::api_version_major(self.api_version), vk::api_version_minor(self.api_version));
        let available = (vk::api_version_major(available), vk::api_version_minor(available));
        available >= required
    }

    pub fn missing_capabilities(&self, features: &vk::PhysicalDeviceFeatures) -> Vec<Capability> {
        self.capabilities.iter().copied().filter(|capability| !capability.supported_by(features)).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueFamily {
    pub index: u32,
    pub flags: vk::QueueFlags,
    pub supports_present: bool,
}

impl QueueFamily {
    #[inline]
    pub fn is_universal(&self) -> bool {
        self.flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER) && self.supports_present
    }
}

#[derive(Debug, Clone, Default)]
pub struct SurfaceInfo {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub formats: Vec<vk::SurfaceFormatKHR>,
}

impl SurfaceInfo {
    fn query(surface_fns: &khr::Surface, physical_device: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VkResult<Self> {
        unsafe {
            let capabilities = surface_fns.get_physical_device_surface_capabilities(physical_device, surface)?;
            let present_modes = surface_fns.get_physical_device_surface_present_modes(physical_device, surface)?;
            let formats = surface_fns.get_physical_device_surface_formats(physical_device, surface)?;

            Ok(Self {
                capabilities,
                present_modes,
                formats,
            })
        }
    }

    pub fn refresh_capabilities(&mut self, device: &Device) -> Result<(), SampleError> {
        self.capabilities = unsafe {
            device.surface_fns.get_physical_device_surface_capabilities(device.gpu.handle, device.surface)
        }
        .tagged("get_physical_device_surface_capabilities")?;

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GpuInfo {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: Vec<QueueFamily>,
    pub extensions: HashSet<CString>,

    pub surface_info: SurfaceInfo,
}

impl GpuInfo {
    #[inline]
    pub fn name(&self) -> &str {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }.to_str().unwrap_or("<invalid name>")
    }

    pub fn device_type(&self) -> vk::PhysicalDeviceType {
        self.properties.device_type
    }

    #[inline]
    pub fn queues(&self) -> impl Iterator<Item = &QueueFamily> {
        self.queue_families.iter()
    }

    #[inline]
    pub fn has_all_extensions(&self, query: &[&CStr]) -> bool {
        query.iter().all(|&query| self.extensions.contains(query))
    }

    pub fn max_draw_indirect_count(&self) -> u32 {
        self.properties.limits.max_draw_indirect_count
    }
}

fn enumerate_gpus(
    instance: &ash::Instance,
    surface_fns: &khr::Surface,
    surface: vk::SurfaceKHR,
) -> VkResult<Vec<GpuInfo>> {
    let handles = unsafe { instance.enumerate_physical_devices()? };
    let mut gpus = Vec::with_capacity(handles.len());

    for handle in handles {
        unsafe {
            let properties = instance.get_physical_device_properties(handle);
            let features = instance.get_physical_device_features(handle);

            let mut queue_families = Vec::new();
            for (index, queue_family) in instance.get_physical_device_queue_family_properties(handle).into_iter().enumerate()
            {
                let index = index as u32;
                let supports_present = surface_fns.get_physical_device_surface_support(handle, index, surface)?;

                queue_families.push(QueueFamily {
                    index,
                    flags: queue_family.queue_flags,
                    supports_present,
                });
            }

            let extensions = instance
                .enumerate_device_extension_properties(handle)?
                .into_iter()
                .map(|extension| CStr::from_ptr(extension.extension_name.as_ptr()).to_owned())
                .collect();

            let surface_info = if queue_families.iter().any(|queue| queue.supports_present) {
                SurfaceInfo::query(surface_fns, handle, surface)?
            } else {
                SurfaceInfo::default() // never read for gpus that can't present
            };

            gpus.push(GpuInfo {
                handle,
                properties,
                features,
                queue_families,
                extensions,
                surface_info,
            });
        }
    }

    Ok(gpus)
}

fn gpu_score(gpu: &GpuInfo) -> u32 {
    match gpu.device_type() {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        _ => 0,
    }
}

/// Picks the best gpu that can present and meets `requirements`. When some gpu could
/// present but none has every capability, reports what the best of them lacks.
pub fn select_gpu(
    gpus: Vec<GpuInfo>,
    required_extensions: &[&CStr],
    requirements: &DeviceRequirements,
) -> Result<GpuInfo, DeviceCreateError> {
    let candidates: Vec<GpuInfo> = gpus
        .into_iter()
        .filter(|gpu| gpu.queues().any(QueueFamily::is_universal) && gpu.has_all_extensions(required_extensions))
        .collect();

    let best_version = candidates.iter().map(|gpu| gpu.properties.api_version).max();

    let mut usable: Vec<&GpuInfo> =
        candidates.iter().filter(|gpu| requirements.version_supported(gpu.properties.api_version)).collect();

    if usable.is_empty() {
        return match best_version {
            Some(available) => Err(DeviceCreateError::UnsupportedVersion {
                required: requirements.api_version,
                available,
            }),
            None => Err(DeviceCreateError::NoSuitableGpu),
        };
    }

    usable.sort_by_key(|gpu| std::cmp::Reverse(gpu_score(gpu)));

    let selected = usable.iter().find(|gpu| requirements.missing_capabilities(&gpu.features).is_empty());

    match selected {
        Some(gpu) => Ok((*gpu).clone()),
        None => Err(DeviceCreateError::MissingCapabilities(requirements.missing_capabilities(&usable[0].features))),
    }
}

#[derive(Debug)]
pub enum DeviceCreateError {
    LoadError(ash::LoadingError),
    Vulkan(vk::Result),
    UnsupportedVersion { required: u32, available: u32 },
    MissingInstanceExtensions(Vec<CString>),
    MissingCapabilities(Vec<Capability>),
    NoSuitableGpu,
    Allocator(AllocationError),
}

impl std::error::Error for DeviceCreateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeviceCreateError::LoadError(err) => Some(err),
            DeviceCreateError::Vulkan(err) => Some(err),
            DeviceCreateError::Allocator(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ash::LoadingError> for DeviceCreateError {
    fn from(value: ash::LoadingError) -> Self {
        Self::LoadError(value)
    }
}

impl From<vk::Result> for DeviceCreateError {
    fn from(value: vk::Result) -> Self {
        Self::Vulkan(value)
    }
}

fn version_string(version: u32) -> String {
    format!("{}.{}", vk::api_version_major(version), vk::api_version_minor(version))
}

impl std::fmt::Display for DeviceCreateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceCreateError::LoadError(err) => write!(f, "vulkan loading error: {err}"),
            DeviceCreateError::Vulkan(err) => write!(f, "vulkan error: {err}"),
            DeviceCreateError::UnsupportedVersion { required, available } => write!(
                f,
                "vulkan {} required, {} available",
                version_string(*required),
                version_string(*available)
            ),
            DeviceCreateError::MissingInstanceExtensions(ext) => write!(f, "missing instance extensions: {ext:?}"),
            DeviceCreateError::MissingCapabilities(capabilities) => {
                write!(f, "missing device features:")?;
                for capability in capabilities {
                    write!(f, " {capability}")?;
                }
                Ok(())
            }
            DeviceCreateError::NoSuitableGpu => write!(f, "no suitable graphics device found"),
            DeviceCreateError::Allocator(err) => write!(f, "failed to create allocator: {err}"),
        }
    }
}

/// Live device allocations, counted on successful allocate and free.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct AllocationCounter {
    live: usize,
}

impl AllocationCounter {
    fn allocated(&mut self) {
        self.live += 1;
    }

    fn freed(&mut self) {
        match self.live.checked_sub(1) {
            Some(live) => self.live = live,
            None => log::error!("freed more allocations than were made"),
        }
    }

    fn count(&self) -> usize {
        self.live
    }
}

struct AllocatorStuff {
    allocator: ManuallyDrop<Allocator>,
    live_allocations: AllocationCounter,
}

pub struct Queue {
    pub handle: vk::Queue,
    pub family: QueueFamily,
}

pub struct Device {
    pub entry: ash::Entry,

    pub instance: ash::Instance,
    pub instance_metadata: InstanceMetadata,

    pub debug_utils_fns: Option<ext::DebugUtils>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    // read by the debug messenger through its user data pointer
    validation_errors: Box<AtomicU32>,

    pub surface_fns: khr::Surface,
    pub surface: vk::SurfaceKHR,

    pub gpu: GpuInfo,
    pub capabilities: HashSet<Capability>,

    pub raw: ash::Device,
    pub queue: Queue,

    allocator_stuff: Mutex<AllocatorStuff>,

    pub swapchain_fns: khr::Swapchain,
}

// Instance level objects created before the logical device.
struct InstanceObjects<'a> {
    instance: &'a ash::Instance,
    debug_utils_fns: Option<&'a ext::DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface_fns: &'a khr::Surface,
    surface: vk::SurfaceKHR,
}

impl InstanceObjects<'_> {
    unsafe fn destroy(&self) {
        if self.surface != vk::SurfaceKHR::null() {
            self.surface_fns.destroy_surface(self.surface, None);
        }

        if let (Some(debug_utils), Some(messenger)) = (self.debug_utils_fns, self.debug_messenger) {
            debug_utils.destroy_debug_utils_messenger(messenger, None);
        }

        self.instance.destroy_instance(None);
    }
}

impl Device {
    pub fn new(window: &Window, requirements: &DeviceRequirements) -> Result<Self, DeviceCreateError> {
        let entry = unsafe { ash::Entry::load()? };
        let name = cstr::cstr!("draw_indirect");
        let version = vk::make_api_version(0, 0, 1, 0);

        let application_info = vk::ApplicationInfo::builder()
            .application_name(name)
            .application_version(version)
            .engine_name(name)
            .engine_version(version)
            .api_version(requirements.api_version);

        let available_metadata = InstanceMetadata::available(&entry)?;

        if !requirements.version_supported(available_metadata.api_version) {
            return Err(DeviceCreateError::UnsupportedVersion {
                required: requirements.api_version,
                available: available_metadata.api_version,
            });
        }

        let mut layers: Vec<*const i8> = Vec::new();
        let mut extensions: Vec<*const i8> = Vec::new();

        if available_metadata.has_layer(VALIDATION_LAYER) {
            layers.push(VALIDATION_LAYER.as_ptr())
        } else {
            log::warn!("validation layer not available, device errors won't be reported");
        }

        let required_instance_extensions = ash_window::enumerate_required_extensions(window.raw_display_handle())?;

        let required_extension_names = required_instance_extensions
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr).to_owned() })
            .collect::<HashSet<_>>();

        if required_extension_names.is_subset(&available_metadata.extensions) {
            extensions.extend(required_instance_extensions);
        } else {
            let missing_extensions =
                required_extension_names.difference(&available_metadata.extensions).cloned().collect();

            return Err(DeviceCreateError::MissingInstanceExtensions(missing_extensions));
        }

        let debug_utils_supported = available_metadata.has_extension(ext::DebugUtils::name());

        if debug_utils_supported {
            extensions.push(ext::DebugUtils::name().as_ptr());
        }

        let validation_errors = Box::new(AtomicU32::new(0));
        let user_data = &*validation_errors as *const AtomicU32 as *mut c_void;

        let mut instance_create_info = vk::InstanceCreateInfo::builder()
            .application_info(&application_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);

        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        use vk::DebugUtilsMessageTypeFlagsEXT as MessageType;

        // MUST be the last in the instance create info pointer chain!!!
        let mut debug_messenger_create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(Severity::VERBOSE | Severity::WARNING | Severity::ERROR | Severity::INFO)
            .message_type(MessageType::GENERAL | MessageType::VALIDATION | MessageType::PERFORMANCE)
            .pfn_user_callback(Some(vk_debug_log_callback))
            .user_data(user_data);

        if debug_utils_supported {
            instance_create_info = instance_create_info.push_next(&mut debug_messenger_create_info);
        }

        let instance = unsafe { entry.create_instance(&instance_create_info, None)? };

        let layers = layers.into_iter().map(|ptr| unsafe { CStr::from_ptr(ptr).to_owned() }).collect();
        let extensions = extensions.into_iter().map(|ptr| unsafe { CStr::from_ptr(ptr).to_owned() }).collect();

        let instance_metadata = InstanceMetadata {
            api_version: available_metadata.api_version,
            layers,
            extensions,
        };

        let debug_utils_fns = debug_utils_supported.then(|| ext::DebugUtils::new(&entry, &instance));
        let surface_fns = khr::Surface::new(&entry, &instance);

        let mut instance_objects = InstanceObjects {
            instance: &instance,
            debug_utils_fns: debug_utils_fns.as_ref(),
            debug_messenger: None,
            surface_fns: &surface_fns,
            surface: vk::SurfaceKHR::null(),
        };

        let gpu = match unsafe {
            Self::create_surface_and_select_gpu(&entry, window, requirements, &debug_messenger_create_info, &mut instance_objects)
        } {
            Ok(gpu) => gpu,
            Err(err) => {
                unsafe { instance_objects.destroy() };
                return Err(err);
            }
        };

        let debug_messenger = instance_objects.debug_messenger;
        let surface = instance_objects.surface;

        log::info!("selected gpu: {}", gpu.name());

        // present and graphics on one queue, the sample never needs more
        let Some(queue_family) = gpu.queues().find(|queue| queue.is_universal()).copied() else {
            unsafe { instance_objects.destroy() };
            return Err(DeviceCreateError::NoSuitableGpu);
        };

        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family.index)
            .queue_priorities(&queue_priorities)
            .build();

        let capabilities: HashSet<Capability> =
            Capability::ALL.into_iter().filter(|capability| capability.supported_by(&gpu.features)).collect();

        for capability in Capability::ALL {
            log::info!("{capability}: {}", capabilities.contains(&capability));
        }

        let vulkan10_features = vk::PhysicalDeviceFeatures::builder()
            .multi_draw_indirect(capabilities.contains(&Capability::MultiDrawIndirect))
            .draw_indirect_first_instance(capabilities.contains(&Capability::DrawIndirectFirstInstance))
            .build();

        let mut vulkan13_features =
            vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true).synchronization2(true);

        let mut device_features =
            vk::PhysicalDeviceFeatures2::builder().features(vulkan10_features).push_next(&mut vulkan13_features);

        let device_extensions = [khr::Swapchain::name().as_ptr()];

        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&device_extensions)
            .push_next(&mut device_features);

        let device = match unsafe { instance.create_device(gpu.handle, &device_create_info, None) } {
            Ok(device) => device,
            Err(err) => {
                unsafe { instance_objects.destroy() };
                return Err(err.into());
            }
        };

        let queue = Queue {
            handle: unsafe { device.get_device_queue(queue_family.index, 0) },
            family: queue_family,
        };

        let swapchain_fns = khr::Swapchain::new(&instance, &device);

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device: gpu.handle,
            debug_settings: AllocatorDebugSettings::default(),
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        }) {
            Ok(allocator) => allocator,
            Err(err) => {
                unsafe {
                    device.destroy_device(None);
                    instance_objects.destroy();
                }
                return Err(DeviceCreateError::Allocator(err));
            }
        };

        let allocator_stuff = Mutex::new(AllocatorStuff {
            allocator: ManuallyDrop::new(allocator),
            live_allocations: AllocationCounter::default(),
        });

        let device = Self {
            entry,

            instance,
            instance_metadata,

            debug_utils_fns,
            debug_messenger,
            validation_errors,

            surface_fns,
            surface,

            gpu,
            capabilities,

            raw: device,
            queue,

            allocator_stuff,

            swapchain_fns,
        };

        device.set_debug_name(device.queue.handle, "graphics_queue");

        Ok(device)
    }

    unsafe fn create_surface_and_select_gpu(
        entry: &ash::Entry,
        window: &Window,
        requirements: &DeviceRequirements,
        debug_messenger_create_info: &vk::DebugUtilsMessengerCreateInfoEXT,
        objects: &mut InstanceObjects,
    ) -> Result<GpuInfo, DeviceCreateError> {
        if let Some(debug_utils) = objects.debug_utils_fns {
            objects.debug_messenger = Some(debug_utils.create_debug_utils_messenger(debug_messenger_create_info, None)?);
        }

        objects.surface = ash_window::create_surface(
            entry,
            objects.instance,
            window.raw_display_handle(),
            window.raw_window_handle(),
            None,
        )?;

        let gpus = enumerate_gpus(objects.instance, objects.surface_fns, objects.surface)?;

        for gpu in gpus.iter() {
            log::debug!("found gpu: {} ({:?})", gpu.name(), gpu.device_type());
        }

        select_gpu(gpus, &[khr::Swapchain::name()], requirements)
    }

    #[inline]
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn queue_submit(&self, submits: &[vk::SubmitInfo2], fence: vk::Fence) -> Result<(), SampleError> {
        unsafe { self.raw.queue_submit2(self.queue.handle, submits, fence) }.tagged("queue_submit")
    }

    pub fn wait_idle(&self) -> Result<(), SampleError> {
        unsafe { self.raw.device_wait_idle() }.tagged("device_wait_idle")
    }

    pub fn create_fence(&self, name: &str, signaled: bool) -> Result<vk::Fence, SampleError> {
        let create_info = vk::FenceCreateInfo::builder().flags(if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        });

        let handle = unsafe { self.raw.create_fence(&create_info, None) }.tagged("create_fence")?;
        self.set_debug_name(handle, name);
        Ok(handle)
    }

    pub fn create_semaphore(&self, name: &str) -> Result<vk::Semaphore, SampleError> {
        let handle = unsafe { self.raw.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .tagged("create_semaphore")?;
        self.set_debug_name(handle, name);
        Ok(handle)
    }

    pub fn set_debug_name<T: vk::Handle>(&self, handle: T, name: &str) {
        let Some(debug_utils) = &self.debug_utils_fns else {
            return;
        };
        let Ok(cname) = CString::new(name) else {
            return;
        };

        let name_info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(T::TYPE)
            .object_handle(handle.as_raw())
            .object_name(cname.as_c_str());

        if let Err(err) = unsafe { debug_utils.set_debug_utils_object_name(self.raw.handle(), &name_info) } {
            log::warn!("failed to set debug name '{name}': {err}");
        }
    }

    pub fn allocate(&self, alloc_desc: &AllocationCreateDesc) -> Result<Allocation, AllocationError> {
        let mut allocator_stuff = self.allocator_stuff.lock();
        let allocation = allocator_stuff.allocator.allocate(alloc_desc)?;
        allocator_stuff.live_allocations.allocated();
        log::trace!("allocated '{}' ({} bytes)", alloc_desc.name, alloc_desc.requirements.size);
        Ok(allocation)
    }

    pub fn deallocate(&self, allocation: Allocation) {
        let mut allocator_stuff = self.allocator_stuff.lock();
        match allocator_stuff.allocator.free(allocation) {
            Ok(()) => allocator_stuff.live_allocations.freed(),
            Err(err) => log::error!("failed to deallocate memory: {err}"),
        }
    }

    /// Number of device memory allocations currently alive.
    pub fn allocation_count(&self) -> usize {
        self.allocator_stuff.lock().live_allocations.count()
    }

    /// Fails if the validation layer reported errors since the last call.
    pub fn check_errors(&self, tag: &'static str) -> Result<(), SampleError> {
        take_validation_errors(&self.validation_errors, tag)
    }
}

fn take_validation_errors(counter: &AtomicU32, tag: &'static str) -> Result<(), SampleError> {
    match counter.swap(0, Ordering::Relaxed) {
        0 => Ok(()),
        count => Err(SampleError::Validation { tag, count }),
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            {
                let allocator_stuff = self.allocator_stuff.get_mut();
                let leaked = allocator_stuff.live_allocations.count();
                if leaked > 0 {
                    log::warn!("{leaked} device allocation(s) leaked");
                    allocator_stuff.allocator.report_memory_leaks(log::Level::Warn);
                }
                ManuallyDrop::drop(&mut allocator_stuff.allocator);
            }

            self.raw.destroy_device(None);

            self.surface_fns.destroy_surface(self.surface, None);

            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils_fns, &self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn vk_debug_log_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    if std::thread::panicking() {
        return vk::FALSE;
    }

    use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
    let level = match message_severity {
        Severity::WARNING => log::Level::Warn,
        Severity::ERROR => log::Level::Error,
        Severity::INFO => log::Level::Trace, // INFO has too much clutter
        Severity::VERBOSE => log::Level::Trace,
        _ => log::Level::Debug,
    };

    if message_severity == Severity::ERROR && !p_user_data.is_null() {
        (*(p_user_data as *const AtomicU32)).fetch_add(1, Ordering::Relaxed);
    }

    let message_cstr = CStr::from_ptr((*p_callback_data).p_message);
    let Ok(message) = message_cstr.to_str() else {
        log::error!("failed to parse debug callback message, displaying cstr...");
        log::log!(target: "vulkan", level, "{:?}", message_cstr);
        return vk::FALSE;
    };

    log::log!(target: "vulkan", level, "{}", message);

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu(name: &str, device_type: vk::PhysicalDeviceType, multi_draw_indirect: bool) -> GpuInfo {
        let mut properties = vk::PhysicalDeviceProperties {
            api_version: vk::API_VERSION_1_3,
            device_type,
            ..Default::default()
        };
        for (dst, src) in properties.device_name.iter_mut().zip(name.bytes()) {
            *dst = src as _;
        }

        let features = vk::PhysicalDeviceFeatures {
            multi_draw_indirect: multi_draw_indirect as vk::Bool32,
            ..Default::default()
        };

        GpuInfo {
            handle: vk::PhysicalDevice::null(),
            properties,
            features,
            queue_families: vec![QueueFamily {
                index: 0,
                flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                supports_present: true,
            }],
            extensions: [khr::Swapchain::name().to_owned()].into_iter().collect(),
            surface_info: SurfaceInfo::default(),
        }
    }

    const MULTI_DRAW: DeviceRequirements = DeviceRequirements {
        api_version: vk::API_VERSION_1_3,
        capabilities: &[Capability::MultiDrawIndirect],
    };

    #[test]
    fn missing_multi_draw_indirect_fails_selection() {
        let gpus = vec![gpu("lavapipe", vk::PhysicalDeviceType::CPU, false)];

        match select_gpu(gpus, &[khr::Swapchain::name()], &MULTI_DRAW) {
            Err(DeviceCreateError::MissingCapabilities(missing)) => {
                assert_eq!(missing, vec![Capability::MultiDrawIndirect]);
            }
            other => panic!("unexpected selection: {other:?}"),
        }
    }

    #[test]
    fn prefers_discrete_gpu_with_capabilities() {
        let gpus = vec![
            gpu("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU, true),
            gpu("discrete", vk::PhysicalDeviceType::DISCRETE_GPU, true),
            gpu("discrete_old", vk::PhysicalDeviceType::DISCRETE_GPU, false),
        ];

        let selected = select_gpu(gpus, &[khr::Swapchain::name()], &MULTI_DRAW).unwrap();
        assert_eq!(selected.name(), "discrete");
    }

    #[test]
    fn falls_back_to_capable_gpu() {
        let gpus = vec![
            gpu("discrete", vk::PhysicalDeviceType::DISCRETE_GPU, false),
            gpu("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU, true),
        ];

        let selected = select_gpu(gpus, &[khr::Swapchain::name()], &MULTI_DRAW).unwrap();
        assert_eq!(selected.name(), "integrated");
    }

    #[test]
    fn old_api_version_is_rejected() {
        let mut old = gpu("old", vk::PhysicalDeviceType::DISCRETE_GPU, true);
        old.properties.api_version = vk::API_VERSION_1_1;

        match select_gpu(vec![old], &[khr::Swapchain::name()], &MULTI_DRAW) {
            Err(DeviceCreateError::UnsupportedVersion { required, available }) => {
                assert_eq!(required, vk::API_VERSION_1_3);
                assert_eq!(available, vk::API_VERSION_1_1);
            }
            other => panic!("unexpected selection: {other:?}"),
        }
    }

    #[test]
    fn gpu_without_present_queue_is_unsuitable() {
        let mut headless = gpu("headless", vk::PhysicalDeviceType::DISCRETE_GPU, true);
        headless.queue_families[0].supports_present = false;

        assert!(matches!(
            select_gpu(vec![headless], &[khr::Swapchain::name()], &MULTI_DRAW),
            Err(DeviceCreateError::NoSuitableGpu)
        ));
    }

    #[test]
    fn version_check() {
        let requirements = DeviceRequirements {
            api_version: vk::make_api_version(0, 1, 3, 0),
            capabilities: &[],
        };

        assert!(requirements.version_supported(vk::make_api_version(0, 1, 3, 250)));
        assert!(requirements.version_supported(vk::make_api_version(0, 2, 0, 0)));
        assert!(!requirements.version_supported(vk::make_api_version(0, 1, 2, 0)));
    }

    #[test]
    fn validation_errors_are_drained() {
        let counter = AtomicU32::new(0);
        assert!(take_validation_errors(&counter, "begin").is_ok());

        counter.fetch_add(2, Ordering::Relaxed);
        match take_validation_errors(&counter, "display") {
            Err(SampleError::Validation { tag, count }) => {
                assert_eq!(tag, "display");
                assert_eq!(count, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(take_validation_errors(&counter, "end").is_ok());
    }

    #[test]
    fn allocation_counter_returns_to_zero() {
        let mut counter = AllocationCounter::default();
        assert_eq!(counter.count(), 0);

        counter.allocated();
        counter.allocated();
        assert_eq!(counter.count(), 2);

        counter.freed();
        assert_eq!(counter.count(), 1);
        counter.freed();
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn allocation_counter_does_not_underflow() {
        let mut counter = AllocationCounter::default();
        counter.freed();
        assert_eq!(counter.count(), 0);
    }
}
