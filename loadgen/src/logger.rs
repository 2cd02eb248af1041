use std::{fs, path::Path};

use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

use crate::config::LogConfig;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// Noisy dependencies are capped at warn whatever the level asked for
const QUIET_TARGETS: [&str; 4] = ["reqwest", "hyper", "hyper_util", "rustls"];

/// Install the global logger: colored console output, plus a plain text
/// copy in `logs_path/filename_log` unless file logging is disabled.
pub fn init(config: &LogConfig) -> Result<(), fern::InitError> {
    let level: LevelFilter = config.log_level.into();
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Cyan)
        .trace(Color::BrightBlack);
    let use_colors = !config.disable_log_color;

    let mut dispatch = fern::Dispatch::new().level(level);
    for target in QUIET_TARGETS {
        dispatch = dispatch.level_for(target, level.min(LevelFilter::Warn));
    }

    let console = fern::Dispatch::new()
        .format(move |out, message, record| {
            let now = chrono::Local::now().format(DATETIME_FORMAT);
            if use_colors {
                out.finish(format_args!(
                    "[{}] [{}] [{}] {}",
                    now,
                    colors.color(record.level()),
                    record.target(),
                    message
                ))
            } else {
                out.finish(format_args!(
                    "[{}] [{}] [{}] {}",
                    now,
                    record.level(),
                    record.target(),
                    message
                ))
            }
        })
        .chain(std::io::stdout());
    dispatch = dispatch.chain(console);

    if !config.disable_file_logging {
        let dir = Path::new(&config.logs_path);
        fs::create_dir_all(dir)?;
        let file = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{}] [{}] [{}] {}",
                    chrono::Local::now().format(DATETIME_FORMAT),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .chain(fern::log_file(dir.join(&config.filename_log))?);
        dispatch = dispatch.chain(file);
    }

    dispatch.apply()?;
    Ok(())
}
