use serde::Deserialize;
use tracing_subscriber::fmt::SubscriberBuilder;

#[derive(Default)]
pub(super) struct LoggerConfig {
    pub format: LoggerFormat,
}

#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LoggerFormat {
    #[default]
    Json,
    Text,
}

pub(super) fn init_logger(config: LoggerConfig) {
    let builder = SubscriberBuilder::default();

    match config.format {
        LoggerFormat::Json => builder.json().init(),
        LoggerFormat::Text => builder.init(),
    }
}
