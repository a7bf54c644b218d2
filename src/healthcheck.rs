// Dead-man's-switch pings around a run

use reqwest::blocking::Client;
use std::time::Duration;
use tracing::debug;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Pings `<base>/start`, `<base>` or `<base>/fail`. Failures are logged, never raised.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    base_url: Option<String>,
}

impl HealthCheck {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
        }
    }

    pub fn start(&self) -> bool {
        self.ping("/start")
    }

    pub fn success(&self) -> bool {
        self.ping("")
    }

    pub fn fail(&self) -> bool {
        self.ping("/fail")
    }

    /// Returns whether a ping was delivered with a 2xx response.
    pub fn ping(&self, suffix: &str) -> bool {
        let Some(base) = self.base_url.as_deref() else {
            return false;
        };
        let url = format!("{}{}", base, suffix);

        let result = Client::builder()
            .timeout(PING_TIMEOUT)
            .build()
            .and_then(|client| client.get(&url).send());

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!(url = %url, status = resp.status().as_u16(), "Health-check ping rejected");
                false
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Health-check ping failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[test]
    fn test_unconfigured_does_nothing() {
        assert!(!HealthCheck::new(None).start());
        assert!(!HealthCheck::new(Some("  ")).success());
    }

    #[test]
    fn test_pings_each_endpoint() {
        let mut server = Server::new();
        let start = server.mock("GET", "/ping/abc/start").with_status(200).create();
        let ok = server.mock("GET", "/ping/abc").with_status(200).create();
        let fail = server.mock("GET", "/ping/abc/fail").with_status(200).create();

        let hc = HealthCheck::new(Some(&format!("{}/ping/abc/", server.url())));
        assert!(hc.start());
        assert!(hc.success());
        assert!(hc.fail());

        start.assert();
        ok.assert();
        fail.assert();
    }

    #[test]
    fn test_unreachable_is_swallowed() {
        assert!(!HealthCheck::new(Some("http://127.0.0.1:9")).fail());
    }
}
