//! Roteamento HTTP (secao 6)
//!
//! `/health*` e `/metrics` ficam fora do middleware de chave de API: sao
//! consultados por orquestradores de container e por scrapers de
//! metricas, que nao carregam credenciais de cliente.
//!
//! Dentro de `/v1`, os recursos estaticos (`/nfse`, `/nfse/xml`,
//! `/nfse/status`, `/nfse/status/{request_id}`) sao registrados antes do
//! recurso dinamico `/nfse/{chave_acesso}` para que uma chave de acesso
//! literalmente igual a `"xml"` ou `"status"` nunca sombreie essas rotas
//! (o roteador do actix-web casa na ordem de registro).

use super::handlers;
use super::middleware::{ApiKeyAuth, RateLimit};
use actix_web::{web, HttpResponse};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)));
    cfg.service(web::resource("/health/live").route(web::get().to(handlers::health_live)));
    cfg.service(web::resource("/health/ready").route(web::get().to(handlers::health_ready)));
    cfg.service(web::resource("/metrics").route(web::get().to(metrics_placeholder)));

    cfg.service(
        web::scope("/v1")
            .wrap(RateLimit)
            .wrap(ApiKeyAuth)
            .service(
                web::resource("/nfse")
                    .route(web::post().to(handlers::create_structured_emission)),
            )
            .service(
                web::resource("/nfse/xml")
                    .route(web::post().to(handlers::create_presigned_emission)),
            )
            .service(
                web::resource("/nfse/status")
                    .route(web::get().to(handlers::list_status)),
            )
            .service(
                web::resource("/nfse/status/{request_id}")
                    .route(web::get().to(handlers::get_status)),
            )
            .service(
                web::resource("/nfse/{chave_acesso}/eventos")
                    .route(web::get().to(handlers::get_events)),
            )
            .service(
                web::resource("/nfse/{chave_acesso}")
                    .route(web::get().to(handlers::get_by_access_key)),
            )
            .service(
                web::resource("/dps/{id}")
                    .route(web::get().to(handlers::dps_lookup))
                    .route(web::head().to(handlers::dps_lookup)),
            ),
    );
}

/// Exposicao minima de metricas no formato texto do Prometheus.
///
/// O dimensionamento completo (contadores por rota/status, histogramas
/// de latencia) fica fora do escopo deste servico; aqui so garantimos
/// que o endpoint existe e responde ao content-type esperado.
async fn metrics_placeholder() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body("# nfse_service metrics are emitted via tracing, not scraped here\n")
}
