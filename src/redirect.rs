//! One-shot loopback listener for the authorization redirect.

use std::{io, net::Ipv4Addr, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use url::Url;

const MAX_REQUEST_LINE: usize = 16 * 1024;

/// How long a single connection may take to send its request head.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><title>Signed in</title></head>\
<body><p>Authentication complete. You can close this window.</p></body></html>";

const FAILURE_PAGE: &str = "<!DOCTYPE html><html><head><title>Sign-in failed</title></head>\
<body><p>Authentication failed. Return to the terminal for details.</p></body></html>";

pub(crate) struct RedirectListener {
    listener: TcpListener,
    port: u16,
    read_timeout: Duration,
}

impl RedirectListener {
    /// Bind to `port` on the loopback interface. Port 0 picks a free port.
    pub(crate) async fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            read_timeout: REQUEST_READ_TIMEOUT,
        })
    }

    #[cfg(test)]
    fn with_read_timeout(self, read_timeout: Duration) -> Self {
        Self {
            read_timeout,
            ..self
        }
    }

    pub(crate) fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Wait for the browser to be redirected back with either a code or an error.
    ///
    /// Unrelated requests (favicons, preconnects) are answered with a 404 and skipped. A
    /// connection that sends nothing within the read timeout is dropped.
    pub(crate) async fn wait(self) -> io::Result<AuthorizationRedirect> {
        loop {
            let (mut stream, peer) = self.listener.accept().await?;
            let read = tokio::time::timeout(self.read_timeout, read_request_target(&mut stream));
            let target = match read.await {
                Ok(Ok(target)) => target,
                Ok(Err(error)) => {
                    tracing::debug!(%peer, %error, "ignoring unreadable request");
                    continue;
                }
                Err(_) => {
                    tracing::debug!(%peer, "dropping idle connection");
                    continue;
                }
            };

            match parse_redirect(&target) {
                Some(redirect) => {
                    let page = match redirect {
                        AuthorizationRedirect::Code { .. } => SUCCESS_PAGE,
                        AuthorizationRedirect::Error { .. } => FAILURE_PAGE,
                    };
                    // The browser page is a courtesy, the redirect has already been received.
                    if let Err(error) = respond(&mut stream, "200 OK", page).await {
                        tracing::debug!(%error, "failed to answer the browser");
                    }
                    return Ok(redirect);
                }
                None => {
                    tracing::debug!(
                        %peer,
                        request_target = %target,
                        "ignoring request without authorization response"
                    );
                    let _ = respond(&mut stream, "404 Not Found", "").await;
                }
            }
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum AuthorizationRedirect {
    Code {
        code: String,
        state: Option<String>,
    },
    Error {
        error: String,
        description: Option<String>,
    },
}

fn parse_redirect(target: &str) -> Option<AuthorizationRedirect> {
    let url = Url::parse("http://localhost").ok()?.join(target).ok()?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    match (error, code) {
        (Some(error), _) => Some(AuthorizationRedirect::Error { error, description }),
        (None, Some(code)) => Some(AuthorizationRedirect::Code { code, state }),
        (None, None) => None,
    }
}

/// Read the request line and headers, returning the request target.
async fn read_request_target(stream: &mut TcpStream) -> io::Result<String> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    let read = (&mut reader)
        .take(MAX_REQUEST_LINE as u64)
        .read_line(&mut request_line)
        .await?;
    if read == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "empty request"));
    }

    let mut parts = request_line.split_whitespace();
    let target = match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => target.to_string(),
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected request line {:?}", request_line.trim_end()),
            ))
        }
    };

    // Drain headers so the browser sees a well-behaved server.
    loop {
        let mut header = String::new();
        let read = (&mut reader)
            .take(MAX_REQUEST_LINE as u64)
            .read_line(&mut header)
            .await?;
        if read == 0 || header.trim_end().is_empty() {
            break;
        }
    }

    Ok(target)
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}
