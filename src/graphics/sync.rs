use crate::graphics;
use ash::vk;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessKind {
    #[default]
    None,
    IndirectBuffer,
    IndexBuffer,
    VertexBuffer,
    ColorAttachmentWrite,
    TransferRead,
    TransferWrite,
    HostRead,
    Present,
}

impl AccessKind {
    #[rustfmt::skip]
    #[inline(always)]
    pub fn writes(self) -> bool {
        match self {
            AccessKind::None                 => false,
            AccessKind::IndirectBuffer       => false,
            AccessKind::IndexBuffer          => false,
            AccessKind::VertexBuffer         => false,
            AccessKind::ColorAttachmentWrite => true,
            AccessKind::TransferRead         => false,
            AccessKind::TransferWrite        => true,
            AccessKind::HostRead             => false,
            AccessKind::Present              => false,
        }
    }

    #[rustfmt::skip]
    #[inline(always)]
    pub fn stage_mask(self) -> vk::PipelineStageFlags2 {
        match self {
            AccessKind::None                 => vk::PipelineStageFlags2::NONE,
            AccessKind::IndirectBuffer       => vk::PipelineStageFlags2::DRAW_INDIRECT,
            AccessKind::IndexBuffer          => vk::PipelineStageFlags2::INDEX_INPUT,
            AccessKind::VertexBuffer         => vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
            AccessKind::ColorAttachmentWrite => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            AccessKind::TransferRead         => vk::PipelineStageFlags2::TRANSFER,
            AccessKind::TransferWrite        => vk::PipelineStageFlags2::TRANSFER,
            AccessKind::HostRead             => vk::PipelineStageFlags2::HOST,
            AccessKind::Present              => vk::PipelineStageFlags2::NONE,
        }
    }

    #[rustfmt::skip]
    #[inline(always)]
    pub fn access_mask(self) -> vk::AccessFlags2 {
        match self {
            AccessKind::None                 => vk::AccessFlags2::NONE,
            AccessKind::IndirectBuffer       => vk::AccessFlags2::INDIRECT_COMMAND_READ,
            AccessKind::IndexBuffer          => vk::AccessFlags2::INDEX_READ,
            AccessKind::VertexBuffer         => vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
            AccessKind::ColorAttachmentWrite => vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            AccessKind::TransferRead         => vk::AccessFlags2::TRANSFER_READ,
            AccessKind::TransferWrite        => vk::AccessFlags2::TRANSFER_WRITE,
            AccessKind::HostRead             => vk::AccessFlags2::HOST_READ,
            AccessKind::Present              => vk::AccessFlags2::NONE,
        }
    }

    /// Only writes have to be made available to later accesses.
    #[inline]
    pub fn available_mask(self) -> vk::AccessFlags2 {
        if self.writes() {
            self.access_mask()
        } else {
            vk::AccessFlags2::NONE
        }
    }

    #[rustfmt::skip]
    #[inline(always)]
    pub fn image_layout(self) -> vk::ImageLayout {
        match self {
            AccessKind::ColorAttachmentWrite => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            AccessKind::TransferRead         => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            AccessKind::TransferWrite        => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            AccessKind::Present              => vk::ImageLayout::PRESENT_SRC_KHR,
            _                                => vk::ImageLayout::UNDEFINED,
        }
    }

    /// The read a freshly uploaded buffer with `usage` will see first.
    pub fn first_read_for_usage(usage: vk::BufferUsageFlags) -> Self {
        if usage.contains(vk::BufferUsageFlags::INDIRECT_BUFFER) {
            AccessKind::IndirectBuffer
        } else if usage.contains(vk::BufferUsageFlags::INDEX_BUFFER) {
            AccessKind::IndexBuffer
        } else if usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER) {
            AccessKind::VertexBuffer
        } else if usage.contains(vk::BufferUsageFlags::TRANSFER_SRC) {
            AccessKind::TransferRead
        } else {
            AccessKind::None
        }
    }
}

#[inline]
pub fn buffer_barrier(buffer: &graphics::Buffer, src_access: AccessKind, dst_access: AccessKind) -> vk::BufferMemoryBarrier2 {
    vk::BufferMemoryBarrier2 {
        src_stage_mask: src_access.stage_mask(),
        src_access_mask: src_access.available_mask(),
        dst_stage_mask: dst_access.stage_mask(),
        dst_access_mask: dst_access.access_mask(),
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        buffer: buffer.handle,
        offset: 0,
        size: vk::WHOLE_SIZE,
        ..Default::default()
    }
}

#[inline]
pub fn image_barrier(
    image: &graphics::SwapchainImage,
    src_access: AccessKind,
    dst_access: AccessKind,
) -> vk::ImageMemoryBarrier2 {
    vk::ImageMemoryBarrier2 {
        src_stage_mask: src_access.stage_mask(),
        src_access_mask: src_access.available_mask(),
        dst_stage_mask: dst_access.stage_mask(),
        dst_access_mask: dst_access.access_mask(),
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        old_layout: src_access.image_layout(),
        new_layout: dst_access.image_layout(),
        image: image.handle,
        subresource_range: image.subresource_range,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploads_are_made_visible_to_their_consumer() {
        let indirect = vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC;
        assert_eq!(AccessKind::first_read_for_usage(indirect), AccessKind::IndirectBuffer);
        assert_eq!(AccessKind::first_read_for_usage(vk::BufferUsageFlags::INDEX_BUFFER), AccessKind::IndexBuffer);
        assert_eq!(AccessKind::first_read_for_usage(vk::BufferUsageFlags::VERTEX_BUFFER), AccessKind::VertexBuffer);
        assert_eq!(AccessKind::first_read_for_usage(vk::BufferUsageFlags::UNIFORM_BUFFER), AccessKind::None);
    }

    #[test]
    fn indirect_reads_happen_at_draw_indirect() {
        assert_eq!(AccessKind::IndirectBuffer.stage_mask(), vk::PipelineStageFlags2::DRAW_INDIRECT);
        assert_eq!(AccessKind::IndirectBuffer.access_mask(), vk::AccessFlags2::INDIRECT_COMMAND_READ);
        assert!(!AccessKind::IndirectBuffer.writes());
        assert!(AccessKind::TransferWrite.writes());
    }

    #[test]
    fn only_writes_are_made_available() {
        assert_eq!(AccessKind::TransferWrite.available_mask(), vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(AccessKind::ColorAttachmentWrite.available_mask(), vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert_eq!(AccessKind::TransferRead.available_mask(), vk::AccessFlags2::NONE);
        assert_eq!(AccessKind::IndirectBuffer.available_mask(), vk::AccessFlags2::NONE);
    }

    #[test]
    fn present_layout() {
        assert_eq!(AccessKind::None.image_layout(), vk::ImageLayout::UNDEFINED);
        assert_eq!(AccessKind::ColorAttachmentWrite.image_layout(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(AccessKind::Present.image_layout(), vk::ImageLayout::PRESENT_SRC_KHR);
    }
}
