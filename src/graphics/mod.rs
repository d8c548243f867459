mod device;
pub use device::*;

mod swapchain;
pub use swapchain::*;

mod commands;
pub use commands::*;

mod sync;
pub use sync::*;

mod context;
pub use context::*;

mod buffer;
pub use buffer::*;

mod pipeline;
pub use pipeline::*;

mod shader;
pub use shader::*;
