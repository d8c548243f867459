pub fn div_ceil(lhs: usize, rhs: usize) -> usize {
    let d = lhs / rhs;
    let r = lhs % rhs;
    if r > 0 && rhs > 0 {
        d + 1
    } else {
        d
    }
}

pub fn aligned_size(size: usize, align: usize) -> usize {
    div_ceil(size, align) * align
}

pub fn init_logger(log_to_file: bool) -> std::io::Result<()> {
    let target = if log_to_file {
        let file = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open("log.txt")?,
        );

        env_logger::Target::Pipe(file)
    } else {
        env_logger::Target::Stdout
    };

    env_logger::builder()
        .parse_filters("panic,draw_indirect,vulkan=warn")
        .target(target)
        .init();
    log_panics::init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_size_test() {
        assert_eq!(aligned_size(8, 16), 16);
        assert_eq!(aligned_size(16, 16), 16);
        assert_eq!(aligned_size(0, 16), 0);
        assert_eq!(aligned_size(24, 16), 32);
        assert_eq!(aligned_size(20, 32), 32);
    }

    #[test]
    fn div_ceil_test() {
        assert_eq!(div_ceil(0, 4), 0);
        assert_eq!(div_ceil(1, 4), 1);
        assert_eq!(div_ceil(8, 4), 2);
        assert_eq!(div_ceil(9, 4), 3);
    }
}
