//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests:
//! ```nocompile
//!     fn my_handler() -> impl Responder {
//!         std::thread::sleep(Duration::from_secs(5)); // <-- Bad practice! Will cause the current worker thread to
//! hang!
//!     }
//! ```
//! For this reason, any long, non-cpu-bound operation (e.g. I/O, database operations, etc.) should be expressed as
//! futures or asynchronous functions. Async handlers get executed concurrently by worker threads and thus don’t block
//! execution:
//!
//! ```nocompile
//!     async fn my_handler() -> impl Responder {
//!         tokio::time::sleep(Duration::from_secs(5)).await; // <-- Ok. Worker thread will handle other requests here
//!     }
//! ```
//!
//! Every route under `/api` sees the caller's [`Identity`]. Role requirements are enforced by the ACL middleware the
//! `route!` macro attaches; ownership of individual reservations is checked in the handlers.
use actix_web::{get, web, HttpResponse, Responder};
use log::*;
use salon_engine::{
    db_types::PaymentLeg,
    gateway::PaymentGateway,
    reservation_objects::ReservationQueryFilter,
    state_machine::TransitionError,
    traits::WebhookGateResult,
    AvailabilityApi,
    PaymentDatabase,
    PaymentFlowApi,
    PointLedgerApi,
    PointLedgerDatabase,
    ReservationDatabase,
    ReservationError,
    ReservationFlowApi,
    ServiceCatalog,
    WebhookApi,
    WebhookDatabase,
};

use crate::{
    auth::{Identity, Role},
    config::ServerOptions,
    data_objects::{
        AvailabilityParams,
        AvailabilityResponse,
        BookingResponse,
        CancelRequest,
        CheckoutInfo,
        ClosureResponse,
        ConfirmPaymentBody,
        FinalPaymentRequired,
        NewReservationRequest,
        ReconcileParams,
        ReservationListParams,
        WebhookPayload,
        WebhookResponse,
    },
    errors::{AuthError, ServerError},
};

/// Everything a storage backend must provide to serve the full API.
pub trait SalonDatabase:
    ReservationDatabase + PaymentDatabase + PointLedgerDatabase + ServiceCatalog + WebhookDatabase
{
}

impl<T> SalonDatabase for T where T: ReservationDatabase + PaymentDatabase + PointLedgerDatabase + ServiceCatalog + WebhookDatabase
{}

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ident),+ where requires [$($roles:expr),+]) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds >],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds >] >,)+ );}
        paste::paste! { impl< $( [< T $bounds >],)+ > [<$name:camel Route>]< $( [< T $bounds >],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds >] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds>],)+>
        where
            $([<T $bounds>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds >], )+>)
                    .wrap($crate::middleware::AclMiddlewareFactory::new(&[$($roles),+]));
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:ident),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds >],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds >] >,)+ );}
        paste::paste! { impl< $( [< T $bounds >],)+ > [<$name:camel Route>]< $( [< T $bounds >],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds >] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds>],)+>
        where
            $([<T $bounds>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Availability  ----------------------------------------------------

route!(availability => Get "/shops/{shop_id}/availability" impl SalonDatabase);
/// Start times at which a booking of `duration` minutes can begin on `date`. A closed shop has none.
pub async fn availability<B: SalonDatabase>(
    path: web::Path<String>,
    params: web::Query<AvailabilityParams>,
    api: web::Data<AvailabilityApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let shop_id = path.into_inner();
    let AvailabilityParams { date, duration } = params.into_inner();
    let report = api.available_slots(&shop_id, date, duration).await?;
    let response = AvailabilityResponse {
        start_times: report.start_times(),
        open: report.opening_hours.is_some(),
        shop_id: report.shop_id,
        date: report.date,
        duration_minutes: report.duration_minutes,
    };
    Ok(HttpResponse::Ok().json(response))
}

//----------------------------------------------   Reservations  ----------------------------------------------------

route!(create_reservation => Post "/reservations" impl SalonDatabase, PaymentGateway where requires [Role::Customer]);
/// Books a reservation for the caller.
///
/// If a deposit is due, a checkout for it is opened straight away. The booking stands even if the gateway cannot open
/// one, in which case `deposit` is empty and the customer retries through `/reservations/{id}/payments/deposit`.
pub async fn create_reservation<B: SalonDatabase, G: PaymentGateway>(
    identity: Identity,
    body: web::Json<NewReservationRequest>,
    reservations: web::Data<ReservationFlowApi<B>>,
    payments: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let booking = body.into_inner().into_booking(&identity.user_id)?;
    let reservation = reservations.create_reservation(booking).await?;
    let deposit = if reservation.requires_deposit() {
        match payments.initiate_payment(reservation.id, PaymentLeg::Deposit).await {
            Ok(initiation) => Some(CheckoutInfo::from(initiation)),
            Err(e) => {
                warn!("💻️ Reservation #{} was booked but its deposit checkout could not be opened. {e}", reservation.id);
                None
            },
        }
    } else {
        None
    };
    Ok(HttpResponse::Created().json(BookingResponse::new(&reservation, deposit)))
}

route!(my_reservations => Get "/reservations" impl SalonDatabase);
/// Customers see their own reservations, shop owners their shop's and admins everyone's.
pub async fn my_reservations<B: SalonDatabase>(
    identity: Identity,
    params: web::Query<ReservationListParams>,
    api: web::Data<ReservationFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let ReservationListParams { date, status } = params.into_inner();
    let mut filter = match (identity.role, identity.shop_id.as_deref()) {
        (Role::Customer, _) => ReservationQueryFilter::default().with_customer_id(identity.user_id.as_str()),
        (Role::ShopOwner, Some(shop)) => ReservationQueryFilter::default().with_shop_id(shop),
        (Role::ShopOwner, None) => {
            return Err(AuthError::MissingIdentity("Shop owners must identify their shop".into()).into())
        },
        (Role::Admin, _) => ReservationQueryFilter::default(),
    };
    if let Some(date) = date {
        filter = filter.on_date(date);
    }
    if let Some(status) = status {
        filter = filter.with_status(status);
    }
    debug!("💻️ {} searches reservations: {filter}", identity.user_id);
    let reservations = api.search_reservations(filter).await?;
    Ok(HttpResponse::Ok().json(reservations))
}

route!(reservation_by_id => Get "/reservations/{id}" impl SalonDatabase);
pub async fn reservation_by_id<B: SalonDatabase>(
    identity: Identity,
    path: web::Path<i64>,
    api: web::Data<ReservationFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let details = api.fetch_details(path.into_inner()).await?;
    identity.check_access(&details.reservation)?;
    Ok(HttpResponse::Ok().json(details))
}

route!(reservation_history => Get "/reservations/{id}/history" impl SalonDatabase);
/// The audit trail of status changes for a reservation.
pub async fn reservation_history<B: SalonDatabase>(
    identity: Identity,
    path: web::Path<i64>,
    api: web::Data<ReservationFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let reservation = api.fetch_reservation(id).await?;
    identity.check_access(&reservation)?;
    let log = api.status_log(id).await?;
    Ok(HttpResponse::Ok().json(log))
}

route!(confirm_reservation => Put "/reservations/{id}/confirm" impl SalonDatabase where requires [Role::ShopOwner, Role::Admin]);
pub async fn confirm_reservation<B: SalonDatabase>(
    identity: Identity,
    path: web::Path<i64>,
    api: web::Data<ReservationFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let reservation = api.fetch_reservation(id).await?;
    identity.check_access(&reservation)?;
    let reservation = api.confirm_reservation(id).await?;
    info!("💻️ {} confirmed reservation #{id}", identity.user_id);
    Ok(HttpResponse::Ok().json(reservation))
}

route!(complete_reservation => Put "/reservations/{id}/complete" impl SalonDatabase, PaymentGateway where requires [Role::ShopOwner, Role::Admin]);
/// Marks the appointment as done.
///
/// If the customer still owes part of the bill, the reservation stays confirmed and a checkout for the final payment
/// is returned with `202 Accepted`. The reservation completes when that payment settles.
pub async fn complete_reservation<B: SalonDatabase, G: PaymentGateway>(
    identity: Identity,
    path: web::Path<i64>,
    reservations: web::Data<ReservationFlowApi<B>>,
    payments: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let reservation = reservations.fetch_reservation(id).await?;
    identity.check_access(&reservation)?;
    match reservations.complete_reservation(id).await {
        Ok(reservation) => {
            info!("💻️ {} completed reservation #{id}", identity.user_id);
            Ok(HttpResponse::Ok().json(reservation))
        },
        Err(ReservationError::InvalidTransition(TransitionError::FinalOutstanding(due))) => {
            debug!("💻️ Reservation #{id} cannot be completed yet. {due} is outstanding");
            let checkout = CheckoutInfo::from(payments.initiate_payment(id, PaymentLeg::Final).await?);
            let message = format!("The final payment of {} must be settled before completion", checkout.amount);
            Ok(HttpResponse::Accepted().json(FinalPaymentRequired { reservation_id: id, message, checkout }))
        },
        Err(e) => Err(e.into()),
    }
}

route!(mark_no_show => Put "/reservations/{id}/no_show" impl SalonDatabase where requires [Role::ShopOwner, Role::Admin]);
/// The customer did not turn up. Any deposit is kept and points used at booking go back to the customer.
pub async fn mark_no_show<B: SalonDatabase>(
    identity: Identity,
    path: web::Path<i64>,
    api: web::Data<ReservationFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let reservation = api.fetch_reservation(id).await?;
    identity.check_access(&reservation)?;
    let outcome = api.mark_no_show(id).await?;
    let refunds = outcome.refunds.clone();
    Ok(HttpResponse::Ok().json(ClosureResponse::new(outcome, refunds)))
}

route!(cancel_reservation => Put "/reservations/{id}/cancel" impl SalonDatabase, PaymentGateway);
/// Cancels a reservation on behalf of the caller and sends any refunds it owes to the gateway.
///
/// A refund the gateway does not accept right away stays pending and is retried by reconciliation. The cancellation
/// itself always stands.
pub async fn cancel_reservation<B: SalonDatabase, G: PaymentGateway>(
    identity: Identity,
    path: web::Path<i64>,
    body: Option<web::Json<CancelRequest>>,
    reservations: web::Data<ReservationFlowApi<B>>,
    payments: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let reservation = reservations.fetch_reservation(id).await?;
    identity.check_access(&reservation)?;
    let reason = body.and_then(|b| b.into_inner().reason);
    let outcome = reservations.cancel_reservation(id, identity.cancelling_party(), reason).await?;
    info!("💻️ {} cancelled reservation #{id}. {} refunds queued", identity.user_id, outcome.refunds.len());
    let refunds = if outcome.refunds.is_empty() {
        Vec::new()
    } else {
        if let Err(e) = payments.execute_refunds(Some(id)).await {
            warn!("💻️ Refunds for reservation #{id} will be retried later. {e}");
        }
        reservations.fetch_details(id).await?.refunds
    };
    Ok(HttpResponse::Ok().json(ClosureResponse::new(outcome, refunds)))
}

//----------------------------------------------   Payments  ----------------------------------------------------

route!(pay_deposit => Post "/reservations/{id}/payments/deposit" impl SalonDatabase, PaymentGateway where requires [Role::Customer]);
/// Opens (or hands back) the deposit checkout for one of the caller's reservations.
pub async fn pay_deposit<B: SalonDatabase, G: PaymentGateway>(
    identity: Identity,
    path: web::Path<i64>,
    reservations: web::Data<ReservationFlowApi<B>>,
    payments: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    start_checkout(identity, path.into_inner(), PaymentLeg::Deposit, reservations, payments).await
}

route!(pay_final => Post "/reservations/{id}/payments/final" impl SalonDatabase, PaymentGateway where requires [Role::Customer, Role::ShopOwner]);
/// Opens (or hands back) the checkout for the rest of the bill. The shop can open it on the customer's behalf at the
/// counter.
pub async fn pay_final<B: SalonDatabase, G: PaymentGateway>(
    identity: Identity,
    path: web::Path<i64>,
    reservations: web::Data<ReservationFlowApi<B>>,
    payments: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    start_checkout(identity, path.into_inner(), PaymentLeg::Final, reservations, payments).await
}

async fn start_checkout<B: SalonDatabase, G: PaymentGateway>(
    identity: Identity,
    id: i64,
    leg: PaymentLeg,
    reservations: web::Data<ReservationFlowApi<B>>,
    payments: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let reservation = reservations.fetch_reservation(id).await?;
    identity.check_access(&reservation)?;
    let checkout = CheckoutInfo::from(payments.initiate_payment(id, leg).await?);
    if checkout.reused {
        Ok(HttpResponse::Ok().json(checkout))
    } else {
        Ok(HttpResponse::Created().json(checkout))
    }
}

route!(confirm_payment => Post "/payments/confirm" impl SalonDatabase, PaymentGateway where requires [Role::Customer]);
/// Called when the customer returns from the gateway's checkout page.
pub async fn confirm_payment<B: SalonDatabase, G: PaymentGateway>(
    identity: Identity,
    body: web::Json<ConfirmPaymentBody>,
    reservations: web::Data<ReservationFlowApi<B>>,
    payments: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let body = body.into_inner();
    let payment = reservations
        .db()
        .fetch_payment_by_order_id(&body.order_id)
        .await
        .map_err(ReservationError::from)?
        .ok_or_else(|| ReservationError::NotFound(format!("Payment {}", body.order_id)))?;
    let reservation = reservations.fetch_reservation(payment.reservation_id).await?;
    identity.check_access(&reservation)?;
    let confirmation = payments.confirm_payment(body.into()).await?;
    Ok(HttpResponse::Ok().json(confirmation))
}

//----------------------------------------------   Points  ----------------------------------------------------

route!(my_points => Get "/points" impl SalonDatabase where requires [Role::Customer]);
pub async fn my_points<B: SalonDatabase>(
    identity: Identity,
    api: web::Data<PointLedgerApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let summary = api.summary(&identity.user_id).await?;
    Ok(HttpResponse::Ok().json(summary))
}

//----------------------------------------------   Admin  ----------------------------------------------------

route!(reconcile => Post "/admin/reconcile" impl SalonDatabase, PaymentGateway where requires [Role::Admin]);
/// Runs a reconciliation pass now, instead of waiting for the background worker.
pub async fn reconcile<B: SalonDatabase, G: PaymentGateway>(
    params: web::Query<ReconcileParams>,
    options: web::Data<ServerOptions>,
    payments: web::Data<PaymentFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let older_than = match params.older_than_mins {
        Some(mins) if mins < 0 => {
            return Err(ReservationError::Validation(format!("olderThanMins must not be negative. Got {mins}")).into())
        },
        Some(mins) => chrono::Duration::minutes(mins),
        None => options.reconcile_after,
    };
    let report = payments.reconcile(older_than).await?;
    info!("💻️ Manual reconciliation finished. {report}");
    Ok(HttpResponse::Ok().json(report))
}

//----------------------------------------------   Webhooks  ----------------------------------------------------

route!(payment_webhook => Post "/payment" impl SalonDatabase);
/// Notifications pushed by the payment gateway.
///
/// The gateway retries anything that is not a 2xx, so duplicates and events that cannot be applied are acknowledged
/// with 200 and described in the body. Only storage failures are reported as errors, which makes the gateway try
/// again later.
pub async fn payment_webhook<B: SalonDatabase>(
    body: web::Json<WebhookPayload>,
    api: web::Data<WebhookApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let payload = body.into_inner();
    trace!("💻️ Received webhook event {} ({})", payload.event_id, payload.status);
    let result = api.handle_event(payload.into()).await?;
    match &result {
        WebhookGateResult::Applied { record, .. } => info!("💻️ Webhook event {} applied", record.event_id),
        WebhookGateResult::AlreadyApplied(record) => debug!("💻️ Webhook event {} was already applied", record.event_id),
        WebhookGateResult::Rejected(record) => {
            warn!("💻️ Webhook event {} rejected. {}", record.event_id, record.reason.as_deref().unwrap_or_default())
        },
    }
    Ok(HttpResponse::Ok().json(WebhookResponse::from(&result)))
}
