use actix_web::{web::Data, App, HttpServer};

mod aws;
mod cloud_provider;
mod config;
mod gcp;
mod instance;
mod payload;
#[cfg(test)]
mod util;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = config::Config::from_env()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let provider = Data::from(cloud_provider::build_provider(&config).await?);
    let target = config.function_target;
    if let Some(target) = target {
        log::info!("Serving {} at /", target.function_name());
    }

    log::info!("Listening on {}:{}", config.bind_address, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(provider.clone())
            .configure(instance::configure_routes)
            .configure(|cfg| {
                if let Some(target) = target {
                    instance::configure_target(cfg, target);
                }
            })
    })
    .bind((config.bind_address.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
