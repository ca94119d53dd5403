use actix_web::{
    body::MessageBody,
    http::StatusCode,
    test,
    test::TestRequest,
    web,
    App,
    HttpResponse,
    ResponseError,
};
use log::debug;
use salon_common::Secret;
use salon_engine::{
    events::EventProducers,
    gateway::PaymentGateway,
    test_utils::fixtures::TestSalon,
    AvailabilityApi,
    BookingPolicy,
    PaymentFlowApi,
    PointLedgerApi,
    ReservationFlowApi,
    SqliteDatabase,
    WebhookApi,
};
use serde_json::Value;

use crate::{
    auth::{Identity, ROLE_HEADER, SHOP_HEADER, SIGNATURE_HEADER, USER_HEADER},
    config::{IdentityConfig, ServerOptions},
    helpers::calculate_hmac,
    middleware::{HmacMiddlewareFactory, IdentityMiddlewareFactory},
    routes::*,
    server::{json_config, path_config, query_config, GATEWAY_SIGNATURE_HEADER},
};

// DO NOT re-use these secrets anywhere.
pub const IDENTITY_SECRET: &str = "endpoint-test-identity-secret";
pub const WEBHOOK_SECRET: &str = "endpoint-test-webhook-secret";

pub fn identity_config() -> IdentityConfig {
    IdentityConfig { secret: Secret::new(IDENTITY_SECRET.to_string()), checks: true }
}

/// Adds correctly signed identity headers for `identity` to the request.
pub fn as_user(req: TestRequest, identity: &Identity) -> TestRequest {
    let req = req
        .insert_header((USER_HEADER, identity.user_id.as_str()))
        .insert_header((ROLE_HEADER, identity.role.to_string()))
        .insert_header((SIGNATURE_HEADER, identity.sign(IDENTITY_SECRET)));
    match &identity.shop_id {
        Some(shop) => req.insert_header((SHOP_HEADER, shop.as_str())),
        None => req,
    }
}

/// A webhook request with `body` signed the way the gateway signs it.
pub fn signed_webhook(body: &Value) -> TestRequest {
    let body = body.to_string();
    let signature = calculate_hmac(WEBHOOK_SECRET, body.as_bytes());
    TestRequest::post()
        .uri("/webhooks/payment")
        .insert_header(("Content-Type", "application/json"))
        .insert_header((GATEWAY_SIGNATURE_HEADER, signature))
        .set_payload(body)
}

/// Sends `req` to a server backed by the test salon's database and scripted gateway.
pub async fn send(salon: &TestSalon, req: TestRequest) -> (StatusCode, Value) {
    send_with_gateway(&salon.db, salon.gateway.clone(), salon.policy.clone(), req).await
}

/// Sends `req` to a server backed by `db` and `gateway`. Errors raised by middleware are turned into responses the
/// way the HTTP server would.
pub async fn send_with_gateway<G>(
    db: &SqliteDatabase,
    gateway: G,
    policy: BookingPolicy,
    req: TestRequest,
) -> (StatusCode, Value)
where
    G: PaymentGateway + 'static,
{
    let producers = EventProducers::default();
    let app = App::new()
        .app_data(json_config())
        .app_data(query_config())
        .app_data(path_config())
        .app_data(web::Data::new(ServerOptions::default()))
        .app_data(web::Data::new(ReservationFlowApi::new(db.clone(), policy.clone(), producers.clone())))
        .app_data(web::Data::new(PaymentFlowApi::new(db.clone(), gateway, policy.clone(), producers.clone())))
        .app_data(web::Data::new(AvailabilityApi::new(db.clone(), policy.slot_minutes)))
        .app_data(web::Data::new(PointLedgerApi::new(db.clone())))
        .app_data(web::Data::new(WebhookApi::new(db.clone(), policy.settlement_policy(), producers)))
        .service(health)
        .service(
            web::scope("/api")
                .wrap(IdentityMiddlewareFactory::new(&identity_config()))
                .service(AvailabilityRoute::<SqliteDatabase>::new())
                .service(CreateReservationRoute::<SqliteDatabase, G>::new())
                .service(MyReservationsRoute::<SqliteDatabase>::new())
                .service(ReservationByIdRoute::<SqliteDatabase>::new())
                .service(ReservationHistoryRoute::<SqliteDatabase>::new())
                .service(ConfirmReservationRoute::<SqliteDatabase>::new())
                .service(CompleteReservationRoute::<SqliteDatabase, G>::new())
                .service(MarkNoShowRoute::<SqliteDatabase>::new())
                .service(CancelReservationRoute::<SqliteDatabase, G>::new())
                .service(PayDepositRoute::<SqliteDatabase, G>::new())
                .service(PayFinalRoute::<SqliteDatabase, G>::new())
                .service(ConfirmPaymentRoute::<SqliteDatabase, G>::new())
                .service(MyPointsRoute::<SqliteDatabase>::new())
                .service(ReconcileRoute::<SqliteDatabase, G>::new()),
        )
        .service(
            web::scope("/webhooks")
                .wrap(HmacMiddlewareFactory::new(GATEWAY_SIGNATURE_HEADER, Secret::new(WEBHOOK_SECRET.to_string()), true))
                .service(PaymentWebhookRoute::<SqliteDatabase>::new()),
        );
    let service = test::init_service(app).await;
    let res = match test::try_call_service(&service, req.to_request()).await {
        Ok(res) => res.into_parts().1,
        Err(e) => {
            debug!("Request failed in middleware: {e}");
            e.as_response_error().error_response()
        },
    };
    into_parts(res)
}

fn into_parts(res: HttpResponse) -> (StatusCode, Value) {
    let status = res.status();
    let bytes = res.into_body().try_into_bytes().unwrap_or_default();
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()));
    (status, body)
}
