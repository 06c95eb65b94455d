use std::sync::Arc;

use product_server::{self, app, cli::Cli, configs::Configuration, logger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_args();

    let destination = logger::LogDestination::from_env(&cli.log_directory);
    let _guard = logger::setup(
        &destination,
        product_server::service_name!(),
        [product_server::service_name!(), "tower_http"],
    )?;

    let config = Configuration::load(&cli.config).inspect_err(|error| {
        logger::error!(%error, "Error loading configuration");
    })?;
    logger::info!(path = %cli.config.display(), "Load configuration");

    app::server_builder(Arc::new(config)).await?;

    Ok(())
}
