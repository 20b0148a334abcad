pub mod config;
pub mod data;
pub mod metrics;
pub mod model;
pub mod tensor;
pub mod trainer;

// Re-export common types
pub use config::{load_config, Config};
pub use trainer::Trainer;

pub mod logging {
    use anyhow::{Context, Result};
    use env_logger::Builder;
    use log::LevelFilter;
    use std::fs::{File, OpenOptions};
    use std::io::Write;
    use std::path::Path;

    pub fn init_logger(debug: bool) {
        let level = if debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{}] - {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.args()
                )
            })
            .filter(None, level)
            .init();
    }

    /// File-backed run logs. One handle for the general training log and a
    /// dedicated one for validation results, both under the configured log
    /// directory. Passed explicitly to whoever needs to write log lines.
    pub struct RunLogs {
        base: File,
        val: File,
    }

    impl RunLogs {
        pub fn new(log_dir: &Path) -> Result<Self> {
            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
            let open = |name: &str| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log_dir.join(name))
                    .with_context(|| format!("Failed to open log file: {}", name))
            };
            Ok(Self {
                base: open("train.log")?,
                val: open("val.log")?,
            })
        }

        /// Write a line to the general log, mirrored to the screen logger.
        pub fn base(&mut self, message: &str) -> Result<()> {
            log::info!("{}", message);
            writeln!(
                self.base,
                "{} INFO {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                message
            )?;
            Ok(())
        }

        /// Write a line to the validation log only.
        pub fn val(&mut self, message: &str) -> Result<()> {
            writeln!(
                self.val,
                "{} INFO {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                message
            )?;
            Ok(())
        }
    }
}
