use std::sync::Arc;

use thesis_session::config::{load_config, print_schema};
use thesis_session::startup;
use thesis_session::utils::init_logging;

const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

#[tokio::main]
async fn main() {
    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("schema") {
        print_schema();
        return;
    }

    let path = arg.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&path);

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    if let Err(e) = startup::run(Arc::new(config)).await {
        tracing::error!("Agent failed: {}", e);
        std::process::exit(1);
    }
}
