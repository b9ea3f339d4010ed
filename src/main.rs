use skills_feedback::app;
use skills_feedback::config::AppConfig;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = AppConfig::load()?;

    // Optional positional override for the source file
    if let Some(path) = env::args().nth(1) {
        config.source.path = path.into();
    }

    // Start the web application
    app::run(config).await?;

    Ok(())
}
