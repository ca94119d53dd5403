use std::{net::IpAddr, str::FromStr};

use actix_web::HttpRequest;
use hmac::{Hmac, Mac};
use log::{debug, trace, warn};
use regex::Regex;
use sha2::Sha256;

/// Get the remote IP address from the request. It uses 3 sources to determine the IP address, in decreasing order
/// of preference:
/// 1. The `X-Forwarded-For` header, iif `use_x_forwarded_for` is set to true in the configuration.
/// 2. The `Forwarded` header, iif `use_forwarded` is set to true in the configuration.
/// 3. The peer address from the connection info.
pub fn get_remote_ip(req: &HttpRequest, use_x_forwarded_for: bool, use_forwarded: bool) -> Option<IpAddr> {
    let mut result = None;
    if use_x_forwarded_for {
        trace!("Checking X-Forwarded-For header");
        // The left-most entry is the original client
        result = req
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| IpAddr::from_str(s.trim()).ok());
        if let Some(ip) = result {
            debug!("Using X-Forwarded-For header for remote address: {ip}");
        }
    }
    if use_forwarded && result.is_none() {
        trace!("Checking Forwarded header");
        result = req.headers().get("Forwarded").and_then(|v| v.to_str().ok()).and_then(ip_from_forwarded);
        if let Some(ip) = result {
            debug!("Using Forwarded header for remote address: {ip}");
        }
    }
    result.or_else(|| {
        let peer_addr = req.peer_addr().map(|a| a.ip());
        trace!("Using Peer address for remote address: {:?}", peer_addr);
        peer_addr
    })
}

fn ip_from_forwarded(header: &str) -> Option<IpAddr> {
    let re = Regex::new(r#"for="?\[?(?P<ip>[^;,"\]]+)"#)
        .map_err(|e| warn!("Could not compile the Forwarded header pattern. {e}"))
        .ok()?;
    let caps = re.captures(header)?;
    IpAddr::from_str(caps.name("ip")?.as_str()).ok()
}

/// Base64-encoded HMAC-SHA256 of `data`, keyed with `secret`.
pub fn calculate_hmac(secret: &str, data: &[u8]) -> String {
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(e) => {
            // HMAC accepts keys of any length, so this branch is unreachable in practice
            warn!("🔐️ Could not create an HMAC with the given key. {e}");
            return String::default();
        },
    };
    mac.update(data);
    base64::encode(mac.finalize().into_bytes())
}

/// Checks a base64-encoded HMAC-SHA256 `signature` of `data` in constant time.
pub fn verify_hmac(secret: &str, data: &[u8], signature: &str) -> bool {
    let Ok(expected) = base64::decode(signature.trim()) else {
        debug!("🔐️ The signature is not valid base64");
        return false;
    };
    match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(data);
            mac.verify_slice(&expected).is_ok()
        },
        Err(e) => {
            warn!("🔐️ Could not create an HMAC with the given key. {e}");
            false
        },
    }
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    #[test]
    fn hmac_matches_known_value() {
        // echo -n "The quick brown fox jumps over the lazy dog" | openssl dgst -sha256 -hmac key -binary | base64
        let hmac = calculate_hmac("key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(hmac, "97yD9DBThCSxMpjmqm+xQ+9NWaFJRhdZl0edvC0aPNg=");
    }

    #[test]
    fn hmac_verification() {
        let body = br#"{"eventId":"evt-1","status":"DONE"}"#;
        let signature = calculate_hmac("webhook-secret", body);
        assert!(verify_hmac("webhook-secret", body, &signature));
        assert!(verify_hmac("webhook-secret", body, &format!(" {signature}\n")));
        assert!(!verify_hmac("other-secret", body, &signature));
        assert!(!verify_hmac("webhook-secret", b"{}", &signature));
        assert!(!verify_hmac("webhook-secret", body, "%%%"));
    }

    #[test]
    fn remote_ip_sources() {
        let req = TestRequest::default()
            .peer_addr("10.1.1.1:4000".parse().unwrap())
            .insert_header(("X-Forwarded-For", "192.168.1.5, 10.0.0.1"))
            .insert_header(("Forwarded", "for=172.16.0.9;proto=https"))
            .to_http_request();
        assert_eq!(get_remote_ip(&req, true, true), Some("192.168.1.5".parse().unwrap()));
        assert_eq!(get_remote_ip(&req, false, true), Some("172.16.0.9".parse().unwrap()));
        assert_eq!(get_remote_ip(&req, false, false), Some("10.1.1.1".parse().unwrap()));
    }

    #[test]
    fn forwarded_ipv6() {
        assert_eq!(ip_from_forwarded(r#"for="[2001:db8::1]";proto=http"#), Some("2001:db8::1".parse().unwrap()));
        assert_eq!(ip_from_forwarded("proto=http"), None);
    }
}
