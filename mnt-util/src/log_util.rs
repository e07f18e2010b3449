use super::dirs::get_service_dir;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, detailed_format};

pub struct LogConfig {
    pub service_name: String,
    pub level: String,
    pub file: bool,
    pub console: bool,
}

impl LogConfig {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            level: "info".to_string(),
            file: true,
            console: false,
        }
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    pub fn enable_file(mut self, enable: bool) -> Self {
        self.file = enable;
        self
    }

    pub fn enable_console(mut self, enable: bool) -> Self {
        self.console = enable;
        self
    }
}

/// Start the global logger. The returned handle must be kept alive for the lifetime of the
/// process, dropping it flushes and stops the file writer.
pub fn init_log(config: LogConfig) -> Result<LoggerHandle, String> {
    let logger = Logger::try_with_str(&config.level)
        .map_err(|e| format!("Invalid log level {}: {}", config.level, e))?
        .format(detailed_format);

    let logger = if config.file {
        let log_dir = get_service_dir(&config.service_name).join("logs");
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| format!("Failed to create log directory {}: {}", log_dir.display(), e))?;

        let logger = logger
            .log_to_file(
                FileSpec::default()
                    .directory(log_dir)
                    .basename(&config.service_name),
            )
            .rotate(
                Criterion::Size(100_000_000), // Rotate when file size reaches 100 MB
                Naming::Timestamps,
                Cleanup::KeepLogFiles(20),
            );

        if config.console {
            logger.duplicate_to_stderr(flexi_logger::Duplicate::All)
        } else {
            logger
        }
    } else {
        logger.log_to_stderr()
    };

    logger
        .start()
        .map_err(|e| format!("Failed to initialize flexi_logger: {}", e))
}
