use actix_web::{http::header::ContentType, web, HttpResponse, Responder};
use futures::future::try_join_all;

use crate::{
    cloud_provider::{CloudInstance, ComputeProvider, PowerAction, ProviderError},
    payload::validate_payload,
};

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Starts or stops every instance matched by the request's label filters.
///
/// Filters are handled one after another; the instances matched by a single
/// filter are switched concurrently and all of their operations must finish
/// before the next filter is looked up. The first failure aborts the request.
pub async fn power_instances(
    provider: &dyn ComputeProvider,
    action: PowerAction,
    body: &[u8],
) -> anyhow::Result<&'static str> {
    let payload = validate_payload(body)?;

    for nodes in &payload.instances {
        let vms = provider.list_instances(&nodes.labels).await?;
        log::debug!("{} instance(s) match labels {}", vms.len(), nodes.labels);

        try_join_all(vms.iter().map(|instance| power_one(provider, action, instance))).await?;
    }

    Ok(action.success_message())
}

async fn power_one(
    provider: &dyn ComputeProvider,
    action: PowerAction,
    instance: &CloudInstance,
) -> Result<(), ProviderError> {
    let operation = match action {
        PowerAction::Start => provider.start_instance(instance).await?,
        PowerAction::Stop => provider.stop_instance(instance).await?,
    };

    provider.wait_for_operation(&operation).await
}

async fn respond(
    provider: &dyn ComputeProvider,
    action: PowerAction,
    body: &[u8],
) -> HttpResponse {
    let message = match power_instances(provider, action, body).await {
        Ok(message) => {
            log::info!("{}", message);
            message.to_string()
        }
        Err(err) => {
            log::error!("{} failed: {}", action.function_name(), err);
            err.to_string()
        }
    };

    HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body(message)
}

// -----------------------------------------------------------------------------
// Handlers
// -----------------------------------------------------------------------------

pub async fn start_instance_handler(
    provider: web::Data<dyn ComputeProvider>,
    body: web::Bytes,
) -> impl Responder {
    respond(provider.get_ref(), PowerAction::Start, &body).await
}

pub async fn stop_instance_handler(
    provider: web::Data<dyn ComputeProvider>,
    body: web::Bytes,
) -> impl Responder {
    respond(provider.get_ref(), PowerAction::Stop, &body).await
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/startInstance", web::post().to(start_instance_handler))
        .route("/stopInstance", web::post().to(stop_instance_handler));
}

/// Mounts one handler at `/`, for deployments that serve a single function.
pub fn configure_target(cfg: &mut web::ServiceConfig, target: PowerAction) {
    match target {
        PowerAction::Start => cfg.route("/", web::post().to(start_instance_handler)),
        PowerAction::Stop => cfg.route("/", web::post().to(stop_instance_handler)),
    };
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
