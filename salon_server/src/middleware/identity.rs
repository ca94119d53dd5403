//! Resolves the caller's [`Identity`] from the headers forwarded by the upstream authenticator.
//!
//! Place this middleware on the `/api` scope. Requests without a valid identity are rejected with 401 before they
//! reach a handler. Accepted requests carry the identity in their extensions, for [`super::AclMiddlewareFactory`] and
//! for handlers that take an [`Identity`] argument.
use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
    HttpMessage,
};
use futures::future::LocalBoxFuture;
use log::*;
use salon_common::Secret;

use crate::{
    auth::{identity_from_headers, Identity},
    config::IdentityConfig,
    errors::{AuthError, ServerError},
};

pub struct IdentityMiddlewareFactory {
    secret: Secret<String>,
    // If false, the identity headers are trusted without checking their signature
    checks: bool,
}

impl IdentityMiddlewareFactory {
    pub fn new(config: &IdentityConfig) -> Self {
        Self { secret: config.secret.clone(), checks: config.checks }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IdentityMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = IdentityMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdentityMiddlewareService {
            secret: self.secret.clone(),
            checks: self.checks,
            service: Rc::new(service),
        }))
    }
}

pub struct IdentityMiddlewareService<S> {
    secret: Secret<String>,
    checks: bool,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for IdentityMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let secret = self.checks.then(|| self.secret.reveal().clone());
        Box::pin(async move {
            if secret.as_deref().is_some_and(str::is_empty) {
                warn!("🔐️ No identity secret is configured. Denying access.");
                return Err(ServerError::from(AuthError::InvalidSignature).into());
            }
            let identity: Identity = identity_from_headers(req.request(), secret.as_deref()).map_err(|e| {
                debug!("🔐️ Rejecting request to {}. {e}", req.path());
                ServerError::from(e)
            })?;
            req.extensions_mut().insert(identity);
            service.call(req).await
        })
    }
}
