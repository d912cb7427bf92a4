//! Derives who is viewing and from where, given what a request carries.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use rand::Rng;

pub const UNKNOWN_ADDRESS: &str = "unknown";

pub const FORWARDED_FOR: &str = "x-forwarded-for";
pub const REAL_IP: &str = "x-real-ip";

/// Header carrying the anonymous viewer token, both on requests and responses.
pub const VIEWER_TOKEN: &str = "x-viewer-id";

const ANONYMOUS_PREFIX: &str = "anon";
const SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Everything the resolver looks at. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerRequest<'a> {
    pub authenticated: Option<&'a str>,
    pub viewer_token: Option<&'a str>,
    pub forwarded_for: Option<&'a str>,
    pub real_ip: Option<&'a str>,
    pub peer: Option<IpAddr>,
}

impl<'a> ViewerRequest<'a> {
    pub fn from_headers(
        headers: &'a HeaderMap, authenticated: Option<&'a str>, peer: Option<SocketAddr>,
    ) -> Self {
        let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

        Self {
            authenticated,
            viewer_token: header(VIEWER_TOKEN),
            forwarded_for: header(FORWARDED_FOR),
            real_ip: header(REAL_IP),
            peer: peer.map(|address| address.ip()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub viewer_id: String,
    pub client_ip: String,
    /// Whether `viewer_id` was freshly generated for this request.
    pub minted: bool,
}

pub fn resolve(request: &ViewerRequest<'_>) -> Identity {
    let known = non_blank(request.authenticated).or(non_blank(request.viewer_token));

    let (viewer_id, minted) = match known {
        Some(id) => (id.to_string(), false),
        None => (anonymous_id(), true),
    };

    Identity {
        viewer_id,
        client_ip: client_ip(request),
        minted,
    }
}

/// Generates `anon-{unix millis}-{base36 suffix}`.
pub fn anonymous_id() -> String {
    anonymous_id_at(chrono::Utc::now().timestamp_millis(), &mut rand::thread_rng())
}

fn anonymous_id_at(millis: i64, rng: &mut impl Rng) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();

    format!("{ANONYMOUS_PREFIX}-{millis}-{suffix}")
}

fn client_ip(request: &ViewerRequest<'_>) -> String {
    let forwarded = request
        .forwarded_for
        .and_then(|list| list.split(',').map(str::trim).find(|entry| !entry.is_empty()));

    forwarded
        .or(non_blank(request.real_ip))
        .map(str::to_string)
        .or_else(|| request.peer.map(|ip| ip.to_string()))
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn authenticated_identity_wins_over_token() {
        let request = ViewerRequest {
            authenticated: Some("user-42"),
            viewer_token: Some("anon-1-abc"),
            ..Default::default()
        };

        let identity = resolve(&request);
        assert_eq!(identity.viewer_id, "user-42");
        assert!(!identity.minted);
    }

    #[test]
    fn client_token_is_replayed() {
        let request = ViewerRequest {
            viewer_token: Some("anon-1700000000000-k3j2h1g0f"),
            ..Default::default()
        };

        let identity = resolve(&request);
        assert_eq!(identity.viewer_id, "anon-1700000000000-k3j2h1g0f");
        assert!(!identity.minted);
    }

    #[test]
    fn blank_identities_fall_through_to_a_minted_one() {
        let request = ViewerRequest {
            authenticated: Some("  "),
            viewer_token: Some(""),
            ..Default::default()
        };

        let identity = resolve(&request);
        assert!(identity.minted);
        assert!(identity.viewer_id.starts_with("anon-"));
    }

    #[test]
    fn anonymous_ids_have_the_expected_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let id = anonymous_id_at(1_700_000_000_000, &mut rng);

        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "anon");
        assert_eq!(parts[1], "1700000000000");
        assert_eq!(parts[2].len(), SUFFIX_LEN);
        assert!(parts[2]
            .bytes()
            .all(|byte| byte.is_ascii_digit() || byte.is_ascii_lowercase()));
    }

    #[test]
    fn forwarded_for_takes_the_first_entry() {
        let request = ViewerRequest {
            forwarded_for: Some(" 203.0.113.9 , 10.0.0.1"),
            real_ip: Some("10.0.0.2"),
            peer: Some([127, 0, 0, 1].into()),
            ..Default::default()
        };

        assert_eq!(resolve(&request).client_ip, "203.0.113.9");
    }

    #[test]
    fn address_falls_back_to_real_ip_then_peer_then_unknown() {
        let mut request = ViewerRequest {
            forwarded_for: Some(" , "),
            real_ip: Some("10.0.0.2"),
            peer: Some([127, 0, 0, 1].into()),
            ..Default::default()
        };
        assert_eq!(resolve(&request).client_ip, "10.0.0.2");

        request.real_ip = None;
        assert_eq!(resolve(&request).client_ip, "127.0.0.1");

        request.peer = None;
        assert_eq!(resolve(&request).client_ip, UNKNOWN_ADDRESS);
    }

    #[test]
    fn headers_feed_the_resolver() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("198.51.100.4"));
        headers.insert(VIEWER_TOKEN, HeaderValue::from_static("anon-5-abcdefghi"));

        let request = ViewerRequest::from_headers(&headers, None, None);
        let identity = resolve(&request);

        assert_eq!(identity.client_ip, "198.51.100.4");
        assert_eq!(identity.viewer_id, "anon-5-abcdefghi");
    }
}
