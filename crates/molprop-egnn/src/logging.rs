use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};

/// Install a stderr subscriber; `-v` raises the level from WARN to INFO,
/// DEBUG and TRACE.
pub fn setup_logging(verbosity: u8, quiet: bool) -> anyhow::Result<()> {
    let level_filter = if quiet {
        LevelFilter::OFF
    } else {
        match verbosity {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(level_filter)
        .with(stderr_layer)
        .try_init()?;
    Ok(())
}
