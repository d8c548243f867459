#![allow(dead_code)]
use std::{path::PathBuf, process::ExitCode};

use ash::vk;
use onlyargs_derive::OnlyArgs;

mod draw_indirect;
mod error;
mod geometry;
mod graphics;
mod indirect;
mod input;
mod sample;
mod utils;

use draw_indirect::{CommandLayout, DrawIndirect, DrawIndirectOptions, DrawPath};

/// Draws a quad from a device-resident indirect draw buffer.
#[derive(Debug, OnlyArgs)]
struct Args {
    /// Window width in pixels.
    width: Option<u32>,
    /// Window height in pixels.
    #[short('H')]
    height: Option<u32>,
    /// Indirect buffer layout: single, split or strided.
    layout: Option<String>,
    /// Issue the same draws directly instead of indirectly.
    direct: bool,
    /// Directory holding flat_color.vert and flat_color.frag.
    shader_dir: Option<PathBuf>,
    /// Present without waiting for vertical sync.
    no_vsync: bool,
    /// Write the log to log.txt instead of stdout.
    #[short('L')]
    log_to_file: bool,
}

fn main() -> ExitCode {
    let args: Args = match onlyargs::parse() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = utils::init_logger(args.log_to_file) {
        eprintln!("failed to initialize logger: {err}");
    }

    let layout = match args.layout.as_deref().map(str::parse::<CommandLayout>).transpose() {
        Ok(layout) => layout.unwrap_or_default(),
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let desc = draw_indirect::SAMPLE;
    let mut config = sample::RunConfig::from_desc(&desc);
    config.window_size = [
        args.width.unwrap_or(config.window_size[0]),
        args.height.unwrap_or(config.window_size[1]),
    ];
    if args.no_vsync {
        config.present_mode = vk::PresentModeKHR::IMMEDIATE;
    }

    let mut options = DrawIndirectOptions {
        layout,
        ..Default::default()
    };
    if let Some(shader_dir) = args.shader_dir {
        options.shader_dir = shader_dir;
    }
    if args.direct {
        options.draw_path = DrawPath::Direct;
    }

    match sample::run::<DrawIndirect>(&desc, &config, options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use onlyargs::OnlyArgs;

    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse(args.iter().map(OsString::from).collect()).unwrap()
    }

    #[test]
    fn short_flags_do_not_collide() {
        let args = parse(&["-w", "800", "-H", "600", "-l", "strided", "-L", "-d", "-n"]);

        assert_eq!(args.width, Some(800));
        assert_eq!(args.height, Some(600));
        assert_eq!(args.layout.as_deref(), Some("strided"));
        assert!(args.log_to_file);
        assert!(args.direct);
        assert!(args.no_vsync);
    }

    #[test]
    fn long_flags_use_dashes() {
        let args = parse(&["--shader-dir", "assets", "--log-to-file", "--no-vsync"]);

        assert_eq!(args.shader_dir, Some(PathBuf::from("assets")));
        assert!(args.log_to_file);
        assert!(args.no_vsync);
        assert_eq!(args.width, None);
        assert!(!args.direct);
    }
}
