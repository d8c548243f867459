//! GPU resident draw records and the buffer that holds them.
//!
//! An [`IndirectBuffer`] is uploaded once from a [`CommandStream`] and then drawn
//! from every frame. The device walks `count` records starting at `offset`,
//! `stride` bytes apart, so the CPU never sees the draw parameters at draw time.

use std::{borrow::Cow, fmt::Debug, marker::PhantomData, mem::size_of};

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::{error::SampleError, graphics};

/// Parameters of one indexed draw, laid out as `VkDrawIndexedIndirectCommand`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct DrawIndexedIndirectCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    /// `firstInstance`, which has to stay zero without `drawIndirectFirstInstance`.
    pub reserved_must_be_zero: u32,
}

impl DrawIndexedIndirectCommand {
    pub const fn new(index_count: u32, instance_count: u32, first_index: u32, base_vertex: i32) -> Self {
        Self {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            reserved_must_be_zero: 0,
        }
    }
}

/// Parameters of one non-indexed draw, laid out as `VkDrawIndirectCommand`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct DrawIndirectCommand {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub reserved_must_be_zero: u32,
}

impl DrawIndirectCommand {
    pub const fn new(vertex_count: u32, instance_count: u32, first_vertex: u32) -> Self {
        Self {
            vertex_count,
            instance_count,
            first_vertex,
            reserved_must_be_zero: 0,
        }
    }
}

const _: [(); 20] = [(); size_of::<DrawIndexedIndirectCommand>()];
const _: [(); 16] = [(); size_of::<DrawIndirectCommand>()];
const _: [(); 4] = [(); std::mem::align_of::<DrawIndexedIndirectCommand>()];
const _: [(); 4] = [(); std::mem::align_of::<DrawIndirectCommand>()];

pub trait IndirectCommand: bytemuck::Pod + Debug + PartialEq {
    const NAME: &'static str;

    fn reserved(&self) -> u32;
}

impl IndirectCommand for DrawIndexedIndirectCommand {
    const NAME: &'static str = "draw_indexed_indirect";

    #[inline]
    fn reserved(&self) -> u32 {
        self.reserved_must_be_zero
    }
}

impl IndirectCommand for DrawIndirectCommand {
    const NAME: &'static str = "draw_indirect";

    #[inline]
    fn reserved(&self) -> u32 {
        self.reserved_must_be_zero
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectDrawError {
    UnalignedOffset(u64),
    InvalidStride { stride: u32, record_size: u32 },
    OutOfBounds { required: u64, size: u64 },
    MultiDrawUnsupported { count: u32 },
    TooManyDraws { count: u32, max: u32 },
    NonZeroReserved { index: usize },
    ReadBackMismatch { index: usize },
    Empty,
}

impl std::error::Error for IndirectDrawError {}

impl std::fmt::Display for IndirectDrawError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndirectDrawError::UnalignedOffset(offset) => write!(f, "offset {offset} is not a multiple of 4"),
            IndirectDrawError::InvalidStride { stride, record_size } => {
                write!(f, "stride {stride} must be a multiple of 4 and at least {record_size}")
            }
            IndirectDrawError::OutOfBounds { required, size } => {
                write!(f, "draw reads {required} bytes from a buffer of {size} bytes")
            }
            IndirectDrawError::MultiDrawUnsupported { count } => {
                write!(f, "multiDrawIndirect is required to draw {count} records in one call")
            }
            IndirectDrawError::TooManyDraws { count, max } => {
                write!(f, "draw count {count} exceeds maxDrawIndirectCount {max}")
            }
            IndirectDrawError::NonZeroReserved { index } => {
                write!(f, "record {index} has a non-zero reserved field")
            }
            IndirectDrawError::ReadBackMismatch { index } => {
                write!(f, "record {index} reads back differently from what was uploaded")
            }
            IndirectDrawError::Empty => write!(f, "no draw records"),
        }
    }
}

/// What the device allows an indirect draw to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectLimits {
    pub multi_draw: bool,
    pub max_draw_count: u32,
}

impl IndirectLimits {
    pub fn from_device(device: &graphics::Device) -> Self {
        Self {
            multi_draw: device.has_capability(graphics::Capability::MultiDrawIndirect),
            max_draw_count: device.gpu.max_draw_indirect_count(),
        }
    }
}

/// Where in an indirect buffer the device reads records from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectDraw {
    pub offset: u64,
    pub count: u32,
    pub stride: u32,
}

impl IndirectDraw {
    pub fn packed<C: IndirectCommand>(count: u32) -> Self {
        Self {
            offset: 0,
            count,
            stride: size_of::<C>() as u32,
        }
    }

    /// Byte offset of every record the device reads, in draw order.
    /// Stops early if an offset does not fit in a `u64`.
    pub fn record_offsets(&self) -> impl Iterator<Item = u64> {
        let Self { offset, count, stride } = *self;
        (0..count as u64).map_while(move |index| offset.checked_add(index * stride as u64))
    }

    /// Bytes the buffer needs for the last record to be in bounds, `None` if
    /// that does not fit in a `u64`.
    pub fn required_size<C: IndirectCommand>(&self) -> Option<u64> {
        let Some(last) = self.count.checked_sub(1) else {
            return Some(0);
        };

        self.offset
            .checked_add(last as u64 * self.stride as u64)?
            .checked_add(size_of::<C>() as u64)
    }

    pub fn validate<C: IndirectCommand>(&self, buffer_size: u64, limits: &IndirectLimits) -> Result<(), IndirectDrawError> {
        let record_size = size_of::<C>() as u32;

        if self.offset % 4 != 0 {
            return Err(IndirectDrawError::UnalignedOffset(self.offset));
        }

        if self.count == 0 {
            return Ok(());
        }

        if self.count > 1 {
            if !limits.multi_draw {
                return Err(IndirectDrawError::MultiDrawUnsupported { count: self.count });
            }

            if self.stride % 4 != 0 || self.stride < record_size {
                return Err(IndirectDrawError::InvalidStride {
                    stride: self.stride,
                    record_size,
                });
            }

            if self.count > limits.max_draw_count {
                return Err(IndirectDrawError::TooManyDraws {
                    count: self.count,
                    max: limits.max_draw_count,
                });
            }
        }

        match self.required_size::<C>() {
            Some(required) if required <= buffer_size => Ok(()),
            required => Err(IndirectDrawError::OutOfBounds {
                required: required.unwrap_or(u64::MAX),
                size: buffer_size,
            }),
        }
    }
}

/// Reads the records a draw would consume from `bytes`, in draw order.
pub fn resolve_records<C: IndirectCommand>(bytes: &[u8], draw: &IndirectDraw) -> Result<Vec<C>, IndirectDrawError> {
    let record_size = size_of::<C>() as u64;
    let out_of_bounds = |required| IndirectDrawError::OutOfBounds {
        required,
        size: bytes.len() as u64,
    };

    // every record ends at or before this, so the sums below cannot overflow
    draw.required_size::<C>().ok_or(out_of_bounds(u64::MAX))?;

    draw.record_offsets()
        .map(|offset| {
            let end = offset + record_size;
            usize::try_from(offset)
                .ok()
                .zip(usize::try_from(end).ok())
                .and_then(|(start, end)| bytes.get(start..end))
                .map(bytemuck::pod_read_unaligned)
                .ok_or(out_of_bounds(end))
        })
        .collect()
}

/// Index of the first record where `read_back` differs from `uploaded`.
/// A missing record counts as a difference.
pub fn first_mismatch<C: PartialEq>(uploaded: &[C], read_back: &[C]) -> Option<usize> {
    uploaded
        .iter()
        .zip(read_back)
        .position(|(uploaded, read_back)| uploaded != read_back)
        .or_else(|| (uploaded.len() != read_back.len()).then(|| uploaded.len().min(read_back.len())))
}

/// CPU side image of an indirect buffer plus the draw that walks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStream<C> {
    bytes: Vec<u8>,
    draw: IndirectDraw,
    _phantom: PhantomData<C>,
}

impl<C: IndirectCommand> CommandStream<C> {
    pub fn packed(commands: &[C]) -> Self {
        Self {
            bytes: bytemuck::cast_slice(commands).to_vec(),
            draw: IndirectDraw::packed::<C>(commands.len() as u32),
            _phantom: PhantomData,
        }
    }

    /// Places record `i` at `offset + i * stride`; the gaps stay zeroed.
    pub fn strided(commands: &[C], offset: u64, stride: u32) -> Result<Self, IndirectDrawError> {
        let record_size = size_of::<C>();

        if offset % 4 != 0 {
            return Err(IndirectDrawError::UnalignedOffset(offset));
        }

        if stride % 4 != 0 || (stride as usize) < record_size {
            return Err(IndirectDrawError::InvalidStride {
                stride,
                record_size: record_size as u32,
            });
        }

        let draw = IndirectDraw {
            offset,
            count: commands.len() as u32,
            stride,
        };

        let size = draw
            .required_size::<C>()
            .and_then(|size| usize::try_from(size).ok())
            .ok_or(IndirectDrawError::OutOfBounds {
                required: u64::MAX,
                size: usize::MAX as u64,
            })?;

        let mut bytes = vec![0u8; size];
        for (command, record_offset) in commands.iter().zip(draw.record_offsets()) {
            let start = record_offset as usize;
            bytes[start..start + record_size].copy_from_slice(bytemuck::bytes_of(command));
        }

        Ok(Self {
            bytes,
            draw,
            _phantom: PhantomData,
        })
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn draw(&self) -> IndirectDraw {
        self.draw
    }

    /// The records the device will read, in draw order.
    pub fn records(&self) -> Result<Vec<C>, IndirectDrawError> {
        resolve_records(&self.bytes, &self.draw)
    }
}

/// A device buffer of `C` records, read by indirect draws.
#[derive(Debug)]
pub struct IndirectBuffer<C> {
    buffer: graphics::Buffer,
    draw: IndirectDraw,
    limits: IndirectLimits,
    _phantom: PhantomData<C>,
}

impl<C: IndirectCommand> IndirectBuffer<C> {
    pub fn create(
        context: &graphics::Context,
        name: impl Into<Cow<'static, str>>,
        stream: &CommandStream<C>,
    ) -> Result<Self, SampleError> {
        let draw = stream.draw();

        if draw.count == 0 {
            return Err(IndirectDrawError::Empty.into());
        }

        if let Some(index) = stream.records()?.iter().position(|command| command.reserved() != 0) {
            return Err(IndirectDrawError::NonZeroReserved { index }.into());
        }

        let limits = IndirectLimits::from_device(&context.device);
        draw.validate::<C>(stream.bytes().len() as u64, &limits)?;

        let buffer = context.create_buffer_init(
            name,
            &graphics::BufferDesc {
                size: stream.bytes().len(),
                usage: vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
                memory_location: MemoryLocation::GpuOnly,
            },
            stream.bytes(),
        )?;

        log::debug!(
            "created {} buffer '{}': {} bytes, {:?}",
            C::NAME,
            buffer.name,
            buffer.size(),
            draw
        );

        Ok(Self {
            buffer,
            draw,
            limits,
            _phantom: PhantomData,
        })
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.buffer.size()
    }

    /// The draw the buffer was uploaded for.
    #[inline]
    pub fn default_draw(&self) -> IndirectDraw {
        self.draw
    }

    pub fn read_back(&self, context: &graphics::Context) -> Result<Vec<u8>, SampleError> {
        context.read_buffer(&self.buffer)
    }

    pub fn read_back_records(&self, context: &graphics::Context) -> Result<Vec<C>, SampleError> {
        let bytes = self.read_back(context)?;
        Ok(resolve_records(&bytes, &self.draw)?)
    }

    /// Reads the buffer back and checks it holds the records of `stream`.
    pub fn verify_upload(&self, context: &graphics::Context, stream: &CommandStream<C>) -> Result<Vec<C>, SampleError> {
        let uploaded = stream.records()?;
        let records = self.read_back_records(context)?;

        match first_mismatch(&uploaded, &records) {
            None => Ok(records),
            Some(index) => {
                log::error!(
                    "'{}' record {index} reads back as {:?}, uploaded {:?}",
                    self.buffer.name,
                    records.get(index),
                    uploaded.get(index)
                );
                Err(IndirectDrawError::ReadBackMismatch { index }.into())
            }
        }
    }

    pub fn destroy(self, context: &graphics::Context) {
        context.destroy_buffer(self.buffer);
    }
}

impl IndirectBuffer<DrawIndexedIndirectCommand> {
    /// Indexed draw using the bound vertex and index buffers and the pipeline's topology.
    pub fn draw(&self, binding: &graphics::IndexedBinding, draw: IndirectDraw) -> Result<(), IndirectDrawError> {
        draw.validate::<DrawIndexedIndirectCommand>(self.size(), &self.limits)?;

        if draw.count > 0 {
            binding.recorder().draw_indexed_indirect(&self.buffer, draw.offset, draw.count, draw.stride);
        }

        Ok(())
    }
}

impl IndirectBuffer<DrawIndirectCommand> {
    pub fn draw(&self, binding: &graphics::VertexBinding, draw: IndirectDraw) -> Result<(), IndirectDrawError> {
        draw.validate::<DrawIndirectCommand>(self.size(), &self.limits)?;

        if draw.count > 0 {
            binding.recorder().draw_indirect(&self.buffer, draw.offset, draw.count, draw.stride);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTI: IndirectLimits = IndirectLimits {
        multi_draw: true,
        max_draw_count: u32::MAX,
    };

    const SINGLE: IndirectLimits = IndirectLimits {
        multi_draw: false,
        max_draw_count: 1,
    };

    #[test]
    fn record_layouts_match_vulkan() {
        use std::mem::offset_of;

        assert_eq!(size_of::<DrawIndexedIndirectCommand>(), size_of::<vk::DrawIndexedIndirectCommand>());
        assert_eq!(offset_of!(DrawIndexedIndirectCommand, index_count), 0);
        assert_eq!(offset_of!(DrawIndexedIndirectCommand, instance_count), 4);
        assert_eq!(offset_of!(DrawIndexedIndirectCommand, first_index), 8);
        assert_eq!(offset_of!(DrawIndexedIndirectCommand, base_vertex), 12);
        assert_eq!(offset_of!(DrawIndexedIndirectCommand, reserved_must_be_zero), 16);

        assert_eq!(size_of::<DrawIndirectCommand>(), size_of::<vk::DrawIndirectCommand>());
        assert_eq!(offset_of!(DrawIndirectCommand, vertex_count), 0);
        assert_eq!(offset_of!(DrawIndirectCommand, instance_count), 4);
        assert_eq!(offset_of!(DrawIndirectCommand, first_vertex), 8);
        assert_eq!(offset_of!(DrawIndirectCommand, reserved_must_be_zero), 12);
    }

    #[test]
    fn single_record_is_twenty_bytes() {
        let stream = CommandStream::packed(&[DrawIndexedIndirectCommand::new(6, 1, 0, 0)]);

        assert_eq!(stream.bytes().len(), 20);
        assert_eq!(
            stream.bytes(),
            &[6, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            stream.draw(),
            IndirectDraw {
                offset: 0,
                count: 1,
                stride: 20
            }
        );
    }

    #[test]
    fn negative_base_vertex_is_twos_complement() {
        let stream = CommandStream::packed(&[DrawIndexedIndirectCommand::new(3, 1, 0, -1)]);
        assert_eq!(&stream.bytes()[12..16], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn records_are_read_at_offset_plus_index_times_stride() {
        let commands = [
            DrawIndexedIndirectCommand::new(3, 1, 0, 0),
            DrawIndexedIndirectCommand::new(3, 1, 3, 0),
            DrawIndexedIndirectCommand::new(3, 2, 6, 4),
        ];
        let stream = CommandStream::strided(&commands, 32, 32).unwrap();

        assert_eq!(stream.draw().record_offsets().collect::<Vec<_>>(), vec![32, 64, 96]);
        assert_eq!(stream.bytes().len(), 96 + 20);
        assert!(stream.bytes()[..32].iter().all(|&byte| byte == 0));
        assert!(stream.bytes()[52..64].iter().all(|&byte| byte == 0));
        assert_eq!(stream.records().unwrap(), commands.to_vec());
    }

    #[test]
    fn packed_and_strided_streams_resolve_to_the_same_records() {
        let commands = [DrawIndexedIndirectCommand::new(3, 1, 0, 0), DrawIndexedIndirectCommand::new(3, 1, 3, 0)];

        let packed = CommandStream::packed(&commands);
        let strided = CommandStream::strided(&commands, 4, 24).unwrap();

        assert_eq!(packed.records().unwrap(), strided.records().unwrap());
        assert_eq!(
            resolve_records::<DrawIndexedIndirectCommand>(strided.bytes(), &strided.draw()).unwrap(),
            commands.to_vec()
        );
    }

    #[test]
    fn read_back_mismatch_points_at_the_first_differing_record() {
        let uploaded = [DrawIndexedIndirectCommand::new(3, 1, 0, 0), DrawIndexedIndirectCommand::new(3, 1, 3, 0)];

        assert_eq!(first_mismatch(&uploaded, &uploaded), None);

        let mut corrupted = uploaded;
        corrupted[1].first_index = 0;
        assert_eq!(first_mismatch(&uploaded, &corrupted), Some(1));

        assert_eq!(first_mismatch(&uploaded, &uploaded[..1]), Some(1));
        assert_eq!(first_mismatch(&uploaded[..0], &uploaded), Some(0));
    }

    #[test]
    fn strided_rejects_bad_layouts() {
        let commands = [DrawIndirectCommand::new(3, 1, 0)];

        assert_eq!(CommandStream::strided(&commands, 2, 16), Err(IndirectDrawError::UnalignedOffset(2)));
        assert_eq!(
            CommandStream::strided(&commands, 0, 12),
            Err(IndirectDrawError::InvalidStride {
                stride: 12,
                record_size: 16
            })
        );
        assert_eq!(
            CommandStream::strided(&commands, 0, 18),
            Err(IndirectDrawError::InvalidStride {
                stride: 18,
                record_size: 16
            })
        );
    }

    #[test]
    fn zero_count_is_a_no_op() {
        let draw = IndirectDraw {
            offset: 0,
            count: 0,
            stride: 0,
        };

        assert_eq!(draw.required_size::<DrawIndexedIndirectCommand>(), Some(0));
        assert_eq!(draw.validate::<DrawIndexedIndirectCommand>(0, &SINGLE), Ok(()));
        assert_eq!(resolve_records::<DrawIndexedIndirectCommand>(&[], &draw), Ok(Vec::new()));
    }

    #[test]
    fn single_draw_ignores_stride() {
        let draw = IndirectDraw {
            offset: 0,
            count: 1,
            stride: 0,
        };

        assert_eq!(draw.validate::<DrawIndexedIndirectCommand>(20, &SINGLE), Ok(()));
    }

    #[test]
    fn multi_draw_needs_the_capability() {
        let draw = IndirectDraw::packed::<DrawIndexedIndirectCommand>(2);

        assert_eq!(
            draw.validate::<DrawIndexedIndirectCommand>(40, &SINGLE),
            Err(IndirectDrawError::MultiDrawUnsupported { count: 2 })
        );
        assert_eq!(draw.validate::<DrawIndexedIndirectCommand>(40, &MULTI), Ok(()));
    }

    #[test]
    fn draw_count_is_limited() {
        let draw = IndirectDraw::packed::<DrawIndirectCommand>(3);
        let limits = IndirectLimits {
            multi_draw: true,
            max_draw_count: 2,
        };

        assert_eq!(
            draw.validate::<DrawIndirectCommand>(48, &limits),
            Err(IndirectDrawError::TooManyDraws { count: 3, max: 2 })
        );
    }

    #[test]
    fn reads_past_the_end_are_rejected() {
        let draw = IndirectDraw {
            offset: 4,
            count: 1,
            stride: 20,
        };

        assert_eq!(
            draw.validate::<DrawIndexedIndirectCommand>(20, &SINGLE),
            Err(IndirectDrawError::OutOfBounds { required: 24, size: 20 })
        );
        assert_eq!(
            resolve_records::<DrawIndexedIndirectCommand>(&[0; 20], &draw),
            Err(IndirectDrawError::OutOfBounds { required: 24, size: 20 })
        );
    }

    #[test]
    fn huge_offset_is_out_of_bounds() {
        let draw = IndirectDraw {
            offset: u64::MAX - 3,
            count: 1,
            stride: 20,
        };

        assert_eq!(draw.required_size::<DrawIndexedIndirectCommand>(), None);
        assert_eq!(
            draw.validate::<DrawIndexedIndirectCommand>(20, &SINGLE),
            Err(IndirectDrawError::OutOfBounds {
                required: u64::MAX,
                size: 20
            })
        );
        assert_eq!(
            resolve_records::<DrawIndexedIndirectCommand>(&[0; 20], &draw),
            Err(IndirectDrawError::OutOfBounds {
                required: u64::MAX,
                size: 20
            })
        );
    }

    #[test]
    fn far_record_of_a_multi_draw_is_out_of_bounds() {
        let draw = IndirectDraw {
            offset: 0,
            count: u32::MAX,
            stride: u32::MAX - 3,
        };

        assert_eq!(
            draw.required_size::<DrawIndexedIndirectCommand>(),
            Some((u32::MAX as u64 - 1) * (u32::MAX as u64 - 3) + 20)
        );
        assert!(matches!(
            draw.validate::<DrawIndexedIndirectCommand>(1 << 20, &MULTI),
            Err(IndirectDrawError::OutOfBounds { size, .. }) if size == 1 << 20
        ));
    }

    #[test]
    fn strided_offset_past_the_address_space_is_rejected() {
        let commands = [DrawIndirectCommand::new(3, 1, 0)];

        assert!(matches!(
            CommandStream::strided(&commands, u64::MAX - 3, 16),
            Err(IndirectDrawError::OutOfBounds { required: u64::MAX, .. })
        ));
    }

    #[test]
    fn unaligned_offset_is_rejected() {
        let draw = IndirectDraw {
            offset: 6,
            count: 1,
            stride: 20,
        };

        assert_eq!(
            draw.validate::<DrawIndexedIndirectCommand>(64, &MULTI),
            Err(IndirectDrawError::UnalignedOffset(6))
        );
    }

    // winit allows one event loop per process, so everything that needs a
    // device is checked here.
    #[test]
    #[ignore = "needs a Vulkan 1.3 device with multiDrawIndirect and a display"]
    fn indirect_buffer_round_trip_on_device() {
        let mut builder = winit::event_loop::EventLoopBuilder::<()>::new();
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            use winit::platform::x11::EventLoopBuilderExtX11;
            builder.with_any_thread(true);
        }
        let event_loop = builder.build();
        let window = winit::window::WindowBuilder::new()
            .with_visible(false)
            .build(&event_loop)
            .unwrap();

        let mut context = graphics::Context::new(
            window,
            &graphics::ContextDesc {
                present_mode: vk::PresentModeKHR::FIFO,
                requirements: graphics::DeviceRequirements {
                    api_version: vk::API_VERSION_1_3,
                    capabilities: &[graphics::Capability::MultiDrawIndirect],
                },
            },
        )
        .unwrap();

        let commands = [
            DrawIndexedIndirectCommand::new(3, 1, 0, 0),
            DrawIndexedIndirectCommand::new(3, 2, 3, -1),
        ];
        let stream = CommandStream::strided(&commands, 32, 32).unwrap();
        let allocations = context.device.allocation_count();

        let buffer = IndirectBuffer::create(&context, "round_trip", &stream).unwrap();
        assert_eq!(buffer.read_back(&context).unwrap(), stream.bytes());
        assert_eq!(buffer.read_back_records(&context).unwrap(), commands.to_vec());
        assert_eq!(buffer.verify_upload(&context, &stream).unwrap(), commands.to_vec());
        assert_eq!(context.device.allocation_count(), allocations + 1);

        buffer.destroy(&context);
        assert_eq!(context.device.allocation_count(), allocations);
        assert!(context.device.check_errors("round_trip").is_ok());

        // a frame whose recording fails is still presented
        let failed = context.draw_frame(|_, _| Err(IndirectDrawError::Empty.into()));
        assert!(matches!(failed, Err(SampleError::InvalidDraw(IndirectDrawError::Empty))));
        assert!(context.draw_frame(|_, _| Ok(())).is_ok());
        context.wait_idle().unwrap();
        assert!(context.device.check_errors("draw_frame").is_ok());
    }

    #[test]
    fn overlapping_stride_is_rejected() {
        let draw = IndirectDraw {
            offset: 0,
            count: 2,
            stride: 16,
        };

        assert_eq!(
            draw.validate::<DrawIndexedIndirectCommand>(64, &MULTI),
            Err(IndirectDrawError::InvalidStride {
                stride: 16,
                record_size: 20
            })
        );
    }
}
