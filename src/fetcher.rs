use crate::delay_manager::Pacer;
use crate::error::{CatalogError, Result};
use log::{debug, error, warn};
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::StatusCode;
use std::time::Duration;

const USER_AGENTS: [&str; 8] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_5_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Safari/605.1.15",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:123.0) Gecko/20100101 Firefox/123.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_6_3) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.5993.90 Safari/537.36",
];

/// Anything that can turn a URL into page content.
pub trait Fetch {
    fn fetch(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub proxy: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfig {
            timeout: Duration::from_secs(25),
            max_attempts: 5,
            proxy: None,
        }
    }
}

pub struct Fetcher {
    client: Client,
    pacer: Box<dyn Pacer>,
    max_attempts: u32,
}

impl Fetcher {
    pub fn new(config: FetcherConfig, pacer: Box<dyn Pacer>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .cookie_store(true);
        builder = match &config.proxy {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.as_str())?),
            None => builder.no_proxy(),
        };

        Ok(Fetcher {
            client: builder.build()?,
            pacer,
            max_attempts: config.max_attempts.max(1),
        })
    }

    fn get_random_user_agent(&self) -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
    }

    fn visit_page(&self, url: &str) -> std::result::Result<(String, StatusCode), reqwest::Error> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, self.get_random_user_agent())
            .send()?;

        let status = resp.status();
        let text = resp.text()?;
        Ok((text, status))
    }
}

impl Fetch for Fetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let mut reason = String::from("no attempt made");
        for attempt in 1..=self.max_attempts {
            self.pacer.request_delay();
            match self.visit_page(url) {
                Ok((text, status)) if status.is_success() => {
                    debug!("Request success attempt={} status={} URL={}", attempt, status, url);
                    return Ok(text);
                }
                Ok((_, status)) => {
                    warn!("Non-success status={} attempt={} URL={}", status, attempt, url);
                    reason = format!("HTTP {}", status);
                    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Request failed attempt={} URL={}: {}", attempt, url, e);
                    reason = e.to_string();
                }
            }
        }

        error!("Failed all retries for URL={}", url);
        Err(CatalogError::FetchFailure {
            url: url.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay_manager::NoDelay;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    const UNAVAILABLE: &str = "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 13\r\nConnection: close\r\n\r\n<p>hello</p>\n";

    fn serve(responses: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        format!("http://{}/search", addr)
    }

    fn fetcher(max_attempts: u32) -> Fetcher {
        let config = FetcherConfig {
            timeout: Duration::from_secs(5),
            max_attempts,
            proxy: None,
        };
        Fetcher::new(config, Box::new(NoDelay)).unwrap()
    }

    #[test]
    fn test_retries_until_success() {
        let url = serve(vec![UNAVAILABLE, UNAVAILABLE, OK]);
        assert_eq!(fetcher(3).fetch(&url).unwrap(), "<p>hello</p>\n");
    }

    #[test]
    fn test_gives_up_after_bounded_attempts() {
        let url = serve(vec![UNAVAILABLE, UNAVAILABLE]);
        match fetcher(2).fetch(&url) {
            Err(CatalogError::FetchFailure { reason, .. }) => assert!(reason.contains("503")),
            other => panic!("expected fetch failure, got {:?}", other),
        }
    }

    #[test]
    fn test_not_found_is_not_retried() {
        let url = serve(vec![NOT_FOUND, OK]);
        assert!(matches!(fetcher(5).fetch(&url), Err(CatalogError::FetchFailure { .. })));
    }

    #[test]
    fn test_random_user_agent_comes_from_pool() {
        let fetcher = fetcher(1);
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&fetcher.get_random_user_agent()));
        }
    }
}
