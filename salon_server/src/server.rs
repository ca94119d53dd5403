use std::time::Duration;

use actix_web::{
    dev::{Server, Service},
    http::KeepAlive,
    middleware::Logger,
    web,
    App,
    HttpServer,
};
use futures::{future::ok, FutureExt};
use log::*;
use salon_engine::{
    events::EventProducers,
    AvailabilityApi,
    PaymentFlowApi,
    PointLedgerApi,
    ReservationFlowApi,
    SqliteDatabase,
    WebhookApi,
};

use crate::{
    config::{ServerConfig, ServerOptions},
    errors::{AuthError, ServerError},
    helpers::get_remote_ip,
    integrations::{gateway::GatewayAdapter, notifications::create_notification_handlers},
    middleware::{HmacMiddlewareFactory, IdentityMiddlewareFactory},
    reconciliation_worker::start_reconciliation_worker,
    routes::{
        health,
        AvailabilityRoute,
        CancelReservationRoute,
        CompleteReservationRoute,
        ConfirmPaymentRoute,
        ConfirmReservationRoute,
        CreateReservationRoute,
        MarkNoShowRoute,
        MyPointsRoute,
        MyReservationsRoute,
        PayDepositRoute,
        PayFinalRoute,
        PaymentWebhookRoute,
        ReconcileRoute,
        ReservationByIdRoute,
        ReservationHistoryRoute,
    },
};

/// The header the payment gateway puts its HMAC signature in.
pub const GATEWAY_SIGNATURE_HEADER: &str = "X-Gateway-Signature";

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let gateway = GatewayAdapter::new(config.gateway.clone()).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let handlers = create_notification_handlers();
    let producers = handlers.producers();
    handlers.start_handlers().await;
    let _worker = start_reconciliation_worker(
        db.clone(),
        gateway.clone(),
        config.booking.clone(),
        producers.clone(),
        config.reconcile_interval,
        config.reconcile_after,
    );
    let srv = create_server_instance(config, db, gateway, producers)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    gateway: GatewayAdapter,
    producers: EventProducers,
) -> Result<Server, ServerError> {
    let host = config.host.clone();
    let port = config.port;
    let srv = HttpServer::new(move || {
        let policy = config.booking.clone();
        let reservations_api = ReservationFlowApi::new(db.clone(), policy.clone(), producers.clone());
        let payments_api = PaymentFlowApi::new(db.clone(), gateway.clone(), policy.clone(), producers.clone());
        let availability_api = AvailabilityApi::new(db.clone(), policy.slot_minutes);
        let points_api = PointLedgerApi::new(db.clone());
        let webhook_api = WebhookApi::new(db.clone(), policy.settlement_policy(), producers.clone());
        let app = App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("salon::access_log"))
            .app_data(json_config())
            .app_data(query_config())
            .app_data(path_config())
            .app_data(web::Data::new(ServerOptions::from_config(&config)))
            .app_data(web::Data::new(reservations_api))
            .app_data(web::Data::new(payments_api))
            .app_data(web::Data::new(availability_api))
            .app_data(web::Data::new(points_api))
            .app_data(web::Data::new(webhook_api));
        // Routes that require a caller identity
        let api_scope = web::scope("/api")
            .wrap(IdentityMiddlewareFactory::new(&config.identity))
            .service(AvailabilityRoute::<SqliteDatabase>::new())
            .service(CreateReservationRoute::<SqliteDatabase, GatewayAdapter>::new())
            .service(MyReservationsRoute::<SqliteDatabase>::new())
            .service(ReservationByIdRoute::<SqliteDatabase>::new())
            .service(ReservationHistoryRoute::<SqliteDatabase>::new())
            .service(ConfirmReservationRoute::<SqliteDatabase>::new())
            .service(CompleteReservationRoute::<SqliteDatabase, GatewayAdapter>::new())
            .service(MarkNoShowRoute::<SqliteDatabase>::new())
            .service(CancelReservationRoute::<SqliteDatabase, GatewayAdapter>::new())
            .service(PayDepositRoute::<SqliteDatabase, GatewayAdapter>::new())
            .service(PayFinalRoute::<SqliteDatabase, GatewayAdapter>::new())
            .service(ConfirmPaymentRoute::<SqliteDatabase, GatewayAdapter>::new())
            .service(MyPointsRoute::<SqliteDatabase>::new())
            .service(ReconcileRoute::<SqliteDatabase, GatewayAdapter>::new());
        let use_x_forwarded_for = config.use_x_forwarded_for;
        let use_forwarded = config.use_forwarded;
        let whitelist = config.webhook.whitelist.clone();
        let hmac_middleware = HmacMiddlewareFactory::new(
            GATEWAY_SIGNATURE_HEADER,
            config.webhook.hmac_secret.clone(),
            config.webhook.hmac_checks,
        );
        let webhook_scope = web::scope("/webhooks")
            .wrap(hmac_middleware)
            .wrap_fn(move |req, srv| {
                // Only the X-Forwarded-For and Forwarded headers that have been enabled in the configuration are
                // trusted. Otherwise, the peer address of the connection is used.
                let peer_ip = get_remote_ip(req.request(), use_x_forwarded_for, use_forwarded);
                let whitelisted = match (peer_ip, &whitelist) {
                    (Some(ip), Some(whitelist)) => {
                        debug!("💻️ Gateway webhook from {ip}");
                        whitelist.contains(&ip)
                    },
                    (_, None) => true,
                    (None, Some(_)) => {
                        warn!("💻️ No IP address found for the webhook request. Denying access.");
                        false
                    },
                };
                if whitelisted {
                    srv.call(req).boxed_local()
                } else {
                    ok(req.error_response(ServerError::AuthenticationError(AuthError::ForbiddenPeer))).boxed_local()
                }
            })
            .service(PaymentWebhookRoute::<SqliteDatabase>::new());
        app.service(health).service(api_scope).service(webhook_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| ServerError::InvalidRequestBody(err.to_string()).into())
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| ServerError::InvalidRequestPath(err.to_string()).into())
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _req| ServerError::InvalidRequestPath(err.to_string()).into())
}
