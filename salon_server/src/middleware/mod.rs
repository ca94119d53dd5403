mod acl;
mod hmac;
mod identity;

pub use acl::{AclMiddlewareFactory, AclMiddlewareService};
pub use hmac::{HmacMiddlewareFactory, HmacMiddlewareService};
pub use identity::{IdentityMiddlewareFactory, IdentityMiddlewareService};
