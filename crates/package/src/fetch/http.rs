use crate::fetch::error::{ErrorKind, Result};
use crate::fetch::{FetchOptions, PackageBuffer, PackageSource, read_capped};
use exn::ResultExt;
use tracing::instrument;
use ureq::{Agent, AgentBuilder};
use url::Url;

/// Fetches packages with a single blocking GET.
pub struct HttpFetcher {
    agent: Agent,
    referer: Option<String>,
    limit: u64,
}
impl HttpFetcher {
    pub fn new(options: &FetchOptions) -> Self {
        let agent = AgentBuilder::new()
            .timeout_connect(options.timeout)
            .timeout_read(options.timeout)
            .user_agent(&options.user_agent)
            .build();
        Self { agent, referer: options.referer.clone(), limit: options.max_bytes }
    }

    #[instrument(skip_all, fields(url = %url))]
    pub fn fetch_url(&self, url: Url) -> Result<PackageBuffer> {
        let mut request = self.agent.request_url("GET", &url);
        if let Some(referer) = &self.referer {
            request = request.set("Referer", referer);
        }
        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => exn::bail!(ErrorKind::Status(code)),
            Err(err) => return Err(err).or_raise(|| ErrorKind::Network),
        };
        let declared = response.header("Content-Length").and_then(|v| v.trim().parse::<u64>().ok());
        if let Some(declared) = declared
            && declared > self.limit
        {
            tracing::warn!(declared, limit = self.limit, "Declared package size exceeds the memory ceiling");
            exn::bail!(ErrorKind::TooLarge { limit: self.limit });
        }
        let buffer = read_capped(response.into_reader(), declared.unwrap_or_default(), self.limit, || {
            ErrorKind::Network
        })?;
        tracing::info!(bytes = buffer.len(), "Package downloaded");
        Ok(buffer)
    }
}
impl PackageSource for HttpFetcher {
    fn fetch(&self, locator: &str) -> Result<PackageBuffer> {
        let url = Url::parse(locator).or_raise(|| ErrorKind::UnsupportedLocator(locator.to_string()))?;
        self.fetch_url(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::mpsc::{Receiver, channel};
    use std::thread;

    /// Serves one canned response and hands back the request head.
    fn serve_once(response: Vec<u8>) -> (String, Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/package.zip", listener.local_addr().unwrap());
        let (tx, rx) = channel();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
                head.push_str(&line);
            }
            let mut stream = stream;
            let _ = stream.write_all(&response);
            let _ = tx.send(head);
        });
        (url, rx)
    }

    fn options(limit: u64) -> FetchOptions {
        FetchOptions {
            max_bytes: limit,
            user_agent: "lectern-test/1.0".into(),
            referer: Some("https://example.org/course".into()),
            ..FetchOptions::default()
        }
    }

    #[test]
    fn sends_identity_headers() {
        let (url, head) = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\nzip".to_vec());
        let buffer = HttpFetcher::new(&options(1024)).fetch(&url).unwrap();
        assert_eq!(buffer.as_slice(), b"zip");
        let head = head.recv().unwrap().to_ascii_lowercase();
        assert!(head.contains("user-agent: lectern-test/1.0"));
        assert!(head.contains("referer: https://example.org/course"));
    }

    #[test]
    fn non_success_status() {
        let (url, _head) = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec());
        let err = HttpFetcher::new(&options(1024)).fetch(&url).unwrap_err();
        assert_eq!(*err, ErrorKind::Status(404));
        assert!(!err.is_retryable());
    }

    #[test]
    fn declared_length_over_ceiling() {
        let (url, _head) = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\nConnection: close\r\n\r\n".to_vec());
        let err = HttpFetcher::new(&options(1024)).fetch(&url).unwrap_err();
        assert_eq!(*err, ErrorKind::TooLarge { limit: 1024 });
    }

    #[test]
    fn undeclared_length_is_still_capped() {
        let mut response = b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_vec();
        response.extend(std::iter::repeat_n(b'x', 64));
        let (url, _head) = serve_once(response);
        let err = HttpFetcher::new(&options(32)).fetch(&url).unwrap_err();
        assert_eq!(*err, ErrorKind::TooLarge { limit: 32 });
    }

    #[test]
    fn connection_refused_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/package.zip", listener.local_addr().unwrap());
        drop(listener);
        let err = HttpFetcher::new(&options(32)).fetch(&url).unwrap_err();
        assert_eq!(*err, ErrorKind::Network);
        assert!(err.is_retryable());
    }
}
