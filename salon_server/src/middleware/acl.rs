//! Access control list middleware for the salon server.
//! This middleware can be placed on any route or service that sits behind the identity middleware.
//!
//! It reads the caller's [`Identity`] from the request extensions and checks that the caller holds one of the roles
//! the route allows. If so, the request continues. Otherwise, a 403 Forbidden response is returned.
use std::{future::Future, pin::Pin, rc::Rc};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
    HttpMessage,
};
use futures::future::{ok, Ready};
use log::*;

use crate::{
    auth::{Identity, Role},
    errors::{AuthError, ServerError},
};

pub struct AclMiddlewareFactory {
    allowed_roles: Vec<Role>,
}

impl AclMiddlewareFactory {
    pub fn new(allowed_roles: &[Role]) -> Self {
        AclMiddlewareFactory { allowed_roles: allowed_roles.to_vec() }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AclMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = AclMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AclMiddlewareService { allowed_roles: self.allowed_roles.clone(), service: Rc::new(service) })
    }
}

pub struct AclMiddlewareService<S> {
    allowed_roles: Vec<Role>,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AclMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let allowed_roles = self.allowed_roles.clone();
        Box::pin(async move {
            let identity = req.extensions().get::<Identity>().cloned().ok_or_else(|| {
                warn!("🔐️ No identity found in request extensions");
                ServerError::from(AuthError::MissingIdentity("No identity was resolved for this request".into()))
            })?;
            if identity.has_role(&allowed_roles) {
                service.call(req).await
            } else {
                let roles = allowed_roles.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", ");
                debug!("🔐️ {} ({}) tried to use {}. Allowed: {roles}", identity.user_id, identity.role, req.path());
                Err(ServerError::from(AuthError::InsufficientPermissions(format!("Only {roles} may do this"))).into())
            }
        })
    }
}
