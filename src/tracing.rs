use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::Config;

/// Console output follows `RUST_LOG` (info by default). If a logging directory
/// is configured, everything down to debug also goes to a daily log file there.
pub fn init_tracing(config: &Config) {
    let mut layers = Vec::new();

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    layers.push(
        tracing_subscriber::fmt::layer()
            .with_filter(env_filter)
            .boxed(),
    );

    if let Some(logging_dir) = &config.logging_dir {
        let file_appender = tracing_appender::rolling::daily(logging_dir, "portranks.log");

        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_appender)
                .with_filter(LevelFilter::DEBUG)
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).init();
}
