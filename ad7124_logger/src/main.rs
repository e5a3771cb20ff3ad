use ad7124_logger::{ad7124_logger, LoggerConfig};

#[tokio::main]
async fn main() {
    // construct a subscriber that prints formatted traces to stdout
    let subscriber = tracing_subscriber::FmtSubscriber::new();
    // use that subscriber to process traces emitted after this point
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global tracing subscriber.");

    let config = LoggerConfig::from_env().expect("Invalid AD7124_* environment");

    ad7124_logger(config)
        .await
        .expect("Failed to run the AD7124 logger");
}
