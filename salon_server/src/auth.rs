//! Caller identity.
//!
//! The booking service does not log users in itself. An upstream authenticator forwards who the caller is in four
//! request headers, and signs the first three with a secret it shares with this server:
//!
//! * `X-Salon-User` - the user id
//! * `X-Salon-Role` - one of `customer`, `shop_owner` or `admin`
//! * `X-Salon-Shop` - the shop a shop owner manages. Empty for everyone else.
//! * `X-Salon-Identity-Signature` - base64 HMAC-SHA256 of `user|role|shop`
//!
//! The [`crate::middleware::IdentityMiddlewareFactory`] verifies the headers and stores the resulting [`Identity`] in
//! the request extensions, from where handlers extract it.
use std::{
    fmt::Display,
    future::{ready, Ready},
    str::FromStr,
};

use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use log::*;
use salon_engine::db_types::{CancellingParty, Reservation};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{AuthError, ServerError},
    helpers::{calculate_hmac, verify_hmac},
};

pub const USER_HEADER: &str = "X-Salon-User";
pub const ROLE_HEADER: &str = "X-Salon-Role";
pub const SHOP_HEADER: &str = "X-Salon-Shop";
pub const SIGNATURE_HEADER: &str = "X-Salon-Identity-Signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    ShopOwner,
    Admin,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Customer => "customer",
            Self::ShopOwner => "shop_owner",
            Self::Admin => "admin",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "customer" => Ok(Self::Customer),
            "shop_owner" => Ok(Self::ShopOwner),
            "admin" => Ok(Self::Admin),
            _ => Err(AuthError::UnknownRole(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    pub shop_id: Option<String>,
}

impl Identity {
    pub fn customer<S: Into<String>>(user_id: S) -> Self {
        Self { user_id: user_id.into(), role: Role::Customer, shop_id: None }
    }

    pub fn shop_owner<S: Into<String>>(user_id: S, shop_id: S) -> Self {
        Self { user_id: user_id.into(), role: Role::ShopOwner, shop_id: Some(shop_id.into()) }
    }

    pub fn admin<S: Into<String>>(user_id: S) -> Self {
        Self { user_id: user_id.into(), role: Role::Admin, shop_id: None }
    }

    /// The string the upstream authenticator signs.
    pub fn signing_payload(&self) -> String {
        format!("{}|{}|{}", self.user_id, self.role, self.shop_id.as_deref().unwrap_or_default())
    }

    pub fn sign(&self, secret: &str) -> String {
        calculate_hmac(secret, self.signing_payload().as_bytes())
    }

    pub fn has_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }

    /// Customers see their own reservations, shop owners those of their shop and admins everything.
    pub fn can_access(&self, reservation: &Reservation) -> bool {
        match self.role {
            Role::Customer => reservation.customer_id == self.user_id,
            Role::ShopOwner => self.shop_id.as_deref() == Some(reservation.shop_id.as_str()),
            Role::Admin => true,
        }
    }

    pub fn check_access(&self, reservation: &Reservation) -> Result<(), ServerError> {
        if self.can_access(reservation) {
            Ok(())
        } else {
            debug!("🔐️ {} ({}) may not access reservation #{}", self.user_id, self.role, reservation.id);
            Err(AuthError::InsufficientPermissions(format!("Reservation #{} belongs to someone else", reservation.id))
                .into())
        }
    }

    /// Who the engine should treat as the cancelling party. Admins act on behalf of the shop.
    pub fn cancelling_party(&self) -> CancellingParty {
        match self.role {
            Role::Customer => CancellingParty::Customer,
            Role::ShopOwner | Role::Admin => CancellingParty::Shop,
        }
    }
}

/// Builds an [`Identity`] from the request headers. If `secret` is given, the signature header must match.
pub fn identity_from_headers(req: &HttpRequest, secret: Option<&str>) -> Result<Identity, AuthError> {
    let header = |name: &str| {
        req.headers().get(name).map(|v| v.to_str().map(|s| s.trim().to_string())).transpose().map_err(|e| {
            debug!("🔐️ Could not read the {name} header. {e}");
            AuthError::MissingIdentity(format!("{name} is not valid text"))
        })
    };
    let user_id = header(USER_HEADER)?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::MissingIdentity(format!("{USER_HEADER} is missing")))?;
    let role = header(ROLE_HEADER)?
        .ok_or_else(|| AuthError::MissingIdentity(format!("{ROLE_HEADER} is missing")))?
        .parse::<Role>()?;
    let shop_id = header(SHOP_HEADER)?.filter(|s| !s.is_empty());
    let identity = Identity { user_id, role, shop_id };
    if let Some(secret) = secret {
        let signature = header(SIGNATURE_HEADER)?.ok_or(AuthError::InvalidSignature)?;
        if !verify_hmac(secret, identity.signing_payload().as_bytes(), &signature) {
            warn!("🔐️ Invalid identity signature for {}. Denying access.", identity.user_id);
            return Err(AuthError::InvalidSignature);
        }
    }
    if identity.role == Role::ShopOwner && identity.shop_id.is_none() {
        return Err(AuthError::MissingIdentity(format!("Shop owners must supply {SHOP_HEADER}")));
    }
    trace!("🔐️ Request identity: {} ({})", identity.user_id, identity.role);
    Ok(identity)
}

impl FromRequest for Identity {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let identity = req.extensions().get::<Identity>().cloned().ok_or_else(|| {
            warn!("🔐️ No identity found in request extensions");
            ServerError::from(AuthError::MissingIdentity("No identity was resolved for this request".into()))
        });
        ready(identity)
    }
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    const SECRET: &str = "identity-secret";

    #[test]
    fn roles() {
        assert_eq!("shop_owner".parse::<Role>().unwrap(), Role::ShopOwner);
        assert_eq!(" Admin ".parse::<Role>().unwrap(), Role::Admin);
        assert!("stylist".parse::<Role>().is_err());
        assert_eq!(Role::ShopOwner.to_string(), "shop_owner");
    }

    #[test]
    fn signed_headers() {
        let identity = Identity::shop_owner("owner-1", "gangnam-01");
        assert_eq!(identity.signing_payload(), "owner-1|shop_owner|gangnam-01");
        let req = TestRequest::default()
            .insert_header((USER_HEADER, "owner-1"))
            .insert_header((ROLE_HEADER, "shop_owner"))
            .insert_header((SHOP_HEADER, "gangnam-01"))
            .insert_header((SIGNATURE_HEADER, identity.sign(SECRET)))
            .to_http_request();
        assert_eq!(identity_from_headers(&req, Some(SECRET)).unwrap(), identity);
        let err = identity_from_headers(&req, Some("another-secret")).unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[test]
    fn unsigned_headers_when_checks_are_off() {
        let req =
            TestRequest::default().insert_header((USER_HEADER, "alice")).insert_header((ROLE_HEADER, "customer")).to_http_request();
        assert_eq!(identity_from_headers(&req, None).unwrap(), Identity::customer("alice"));
        let err = identity_from_headers(&req, Some(SECRET)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[test]
    fn missing_headers() {
        let req = TestRequest::default().insert_header((ROLE_HEADER, "customer")).to_http_request();
        assert!(matches!(identity_from_headers(&req, None), Err(AuthError::MissingIdentity(_))));
        let req =
            TestRequest::default().insert_header((USER_HEADER, "owner")).insert_header((ROLE_HEADER, "shop_owner")).to_http_request();
        assert!(matches!(identity_from_headers(&req, None), Err(AuthError::MissingIdentity(_))));
    }

    #[test]
    fn cancelling_parties() {
        assert_eq!(Identity::customer("a").cancelling_party(), CancellingParty::Customer);
        assert_eq!(Identity::admin("root").cancelling_party(), CancellingParty::Shop);
    }
}
