use std::{net::IpAddr, sync::Arc};

use bytes::Bytes;
use culvert_core::{
    container::{Exchange, Next, Outcome, Valve},
    AnyResult,
};
use http::StatusCode;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::common::parse_params;

pub const VALVE_NAME: &str = "remote_addr";

#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    deny: Vec<String>,
    #[serde(default)]
    deny_status: Option<u16>,
}

/// Filters requests by peer address using CIDR lists.
///
/// A non-empty allow list admits only matching peers; the deny list is
/// applied afterwards. Requests without a known peer pass only when the
/// allow list is empty.
pub struct RemoteAddrValve {
    allow: Vec<IpNetwork>,
    deny: Vec<IpNetwork>,
    deny_status: StatusCode,
}

impl RemoteAddrValve {
    pub fn new(allow: Vec<IpNetwork>, deny: Vec<IpNetwork>, deny_status: StatusCode) -> Self {
        Self {
            allow,
            deny,
            deny_status,
        }
    }

    pub fn is_allowed(&self, peer: Option<IpAddr>) -> bool {
        let Some(ip) = peer else {
            return self.allow.is_empty();
        };
        if !self.allow.is_empty() && !self.allow.iter().any(|net| net.contains(ip)) {
            return false;
        }
        !self.deny.iter().any(|net| net.contains(ip))
    }
}

impl Valve for RemoteAddrValve {
    fn name(&self) -> &str {
        VALVE_NAME
    }

    fn invoke(&self, exchange: &mut Exchange, next: Next<'_>) -> AnyResult<Outcome> {
        let peer = exchange.peer_addr().map(|addr| addr.ip());
        if self.is_allowed(peer) {
            return next.proceed(exchange);
        }
        debug!(?peer, container = %next.container(), "request denied by address filter");
        exchange.respond_text(self.deny_status, Bytes::new());
        Ok(Outcome::Handled)
    }
}

fn parse_networks(list: Vec<String>, which: &str) -> AnyResult<Vec<IpNetwork>> {
    list.into_iter()
        .map(|s| {
            s.parse::<IpNetwork>()
                .map_err(|e| anyhow::anyhow!("invalid {which} network {s:?}: {e}"))
        })
        .collect()
}

pub fn create_remote_addr_valve(params: &JsonValue) -> AnyResult<Arc<dyn Valve>> {
    let raw: RawConfig = parse_params(params)?;
    let deny_status = StatusCode::from_u16(raw.deny_status.unwrap_or(403))?;
    Ok(Arc::new(RemoteAddrValve::new(
        parse_networks(raw.allow, "allow")?,
        parse_networks(raw.deny, "deny")?,
        deny_status,
    )))
}

#[cfg(test)]
mod tests {
    use culvert_core::{container::RequestHandler, Container};
    use serde_json::json;

    use super::*;

    struct Ok200;

    impl RequestHandler for Ok200 {
        fn name(&self) -> &str {
            "ok"
        }

        fn handle(&self, exchange: &mut Exchange) -> AnyResult<()> {
            exchange.respond_text(StatusCode::OK, "ok");
            Ok(())
        }
    }

    fn status_for(wrapper: &Container, peer: &str) -> StatusCode {
        let request = http::Request::builder().uri("/").body(Bytes::new()).unwrap();
        let mut ex = Exchange::new(request).with_peer(peer.parse().unwrap());
        wrapper.invoke(&mut ex).unwrap();
        ex.response().status()
    }

    #[test]
    fn allow_then_deny() {
        let wrapper = Container::wrapper("w");
        wrapper.set_request_handler(Some(Arc::new(Ok200)));
        wrapper.add_valve(
            create_remote_addr_valve(&json!({
                "allow": ["10.0.0.0/8", "::1/128"],
                "deny": ["10.9.0.0/16"],
            }))
            .unwrap(),
        );

        assert_eq!(status_for(&wrapper, "10.1.2.3:4000"), StatusCode::OK);
        assert_eq!(status_for(&wrapper, "[::1]:4000"), StatusCode::OK);
        assert_eq!(status_for(&wrapper, "10.9.2.3:4000"), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&wrapper, "192.168.1.1:4000"), StatusCode::FORBIDDEN);
    }

    #[test]
    fn unknown_peers_and_bad_networks() {
        let open = RemoteAddrValve::new(vec![], vec![], StatusCode::FORBIDDEN);
        assert!(open.is_allowed(None));
        let closed = RemoteAddrValve::new(
            vec!["127.0.0.0/8".parse().unwrap()],
            vec![],
            StatusCode::FORBIDDEN,
        );
        assert!(!closed.is_allowed(None));

        let err = create_remote_addr_valve(&json!({"deny": ["not-a-net"]}))
            .err()
            .unwrap();
        assert!(err.to_string().contains("invalid deny network"));
    }
}
