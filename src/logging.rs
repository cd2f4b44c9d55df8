use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Could not create the log file {}", .0.display())]
    LogFile(PathBuf),
    #[error("Could not configure the logger")]
    Config,
}

/// Set up logging to stderr and, if `log_file` is given, to that file as well.
///
/// An existing log file is overwritten.
pub fn init_logging(level: log::LevelFilter, log_file: Option<&Path>) -> error_stack::Result<(), LoggingError> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{h({d(%Y-%m-%d %H:%M:%S)} [{l}] from line {L} in {M})} - {m}{n}",
        )))
        .target(Target::Stderr)
        .build();

    let mut builder = Config::builder().appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");

    if let Some(path) = log_file {
        let logfile = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "{d(%Y-%m-%d %H:%M:%S)} [{l}] {T} {M} - {m}{n}",
            )))
            .append(false)
            .build(path)
            .change_context_lazy(|| LoggingError::LogFile(path.to_path_buf()))?;
        builder = builder.appender(Appender::builder().build("logfile", Box::new(logfile)));
        root = root.appender("logfile");
    }

    let config = builder
        .build(root.build(level))
        .change_context(LoggingError::Config)?;

    log4rs::init_config(config).change_context(LoggingError::Config)?;
    Ok(())
}
