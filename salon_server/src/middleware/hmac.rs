//! Webhook signature middleware for Actix Web.
//!
//! The payment gateway signs the body of every notification it pushes with a shared secret
//! (`SALON_WEBHOOK_HMAC_SECRET`). The base64 encoded HMAC-SHA256 signature travels in a request header.
//!
//! Wrap the webhook scope with this middleware so that handlers only ever see notifications that really came from the
//! gateway. The body is buffered to check the signature and then handed on to the handler untouched.
use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_http::h1;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    web,
    Error,
};
use futures::future::LocalBoxFuture;
use log::{debug, trace, warn};
use salon_common::Secret;

use crate::{
    errors::{AuthError, ServerError},
    helpers::verify_hmac,
};

#[derive(Clone)]
struct SignatureCheck {
    header: String,
    secret: Secret<String>,
    // When false, every request is let through unchecked
    enforced: bool,
}

impl SignatureCheck {
    fn verify(&self, req: &ServiceRequest, body: &[u8]) -> Result<(), AuthError> {
        if self.secret.reveal().is_empty() {
            return Err(AuthError::UnsignedWebhook("No webhook secret is configured".into()));
        }
        let signature = req
            .headers()
            .get(&self.header)
            .ok_or_else(|| AuthError::UnsignedWebhook(format!("The {} header is missing", self.header)))?
            .to_str()
            .map_err(|_| AuthError::UnsignedWebhook(format!("The {} header is not readable", self.header)))?;
        if verify_hmac(self.secret.reveal(), body, signature) {
            Ok(())
        } else {
            Err(AuthError::UnsignedWebhook("The signature does not match the body".into()))
        }
    }
}

pub struct HmacMiddlewareFactory {
    check: SignatureCheck,
}

impl HmacMiddlewareFactory {
    /// `header` names the request header carrying the signature. If `enforced` is false, signatures are not checked.
    pub fn new(header: &str, secret: Secret<String>, enforced: bool) -> Self {
        Self { check: SignatureCheck { header: header.to_string(), secret, enforced } }
    }
}

impl<S, B> Transform<S, ServiceRequest> for HmacMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = HmacMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(HmacMiddlewareService { check: self.check.clone(), service: Rc::new(service) }))
    }
}

pub struct HmacMiddlewareService<S> {
    check: SignatureCheck,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for HmacMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let check = self.check.clone();
        Box::pin(async move {
            if !check.enforced {
                trace!("🔐️ Webhook signature checks are disabled. Letting {} through", req.path());
                return service.call(req).await;
            }
            let body = req
                .extract::<web::Bytes>()
                .await
                .map_err(|e| ServerError::InvalidRequestBody(format!("Could not read the webhook body. {e}")))?;
            if let Err(e) = check.verify(&req, body.as_ref()) {
                warn!("🔐️ Rejected webhook to {}. {e}", req.path());
                return Err(ServerError::from(e).into());
            }
            debug!("🔐️ Webhook signature verified ({} bytes)", body.len());
            req.set_payload(bytes_to_payload(body));
            service.call(req).await
        })
    }
}

fn bytes_to_payload(buf: web::Bytes) -> Payload {
    let (_, mut pl) = h1::Payload::create(true);
    pl.unread_data(buf);
    Payload::from(pl)
}
