use anyhow::Context;

use drama_ocr::config::Config;
use drama_ocr::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config.log_level, config.log_format);

    drama_ocr::run(config).await.context("drama-ocr exited with an error")
}
