// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{sleep, timeout};

use inspect_http::hub::Hub;
use inspect_http::manage::run_management;
use inspect_http::proxy::run_proxy;

/// Handles to a running proxy + management pair wired to a shared hub.
pub struct Harness {
    pub hub: Arc<Hub>,
    pub proxy_addr: SocketAddr,
    pub mng_addr: SocketAddr,
    pub proxy_task: tokio::task::JoinHandle<()>,
    pub mng_task: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub fn shutdown(self) {
        self.proxy_task.abort();
        self.mng_task.abort();
    }
}

async fn wait_accepting(addr: SocketAddr) -> anyhow::Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if Instant::now() > deadline {
            return Err(anyhow::anyhow!("timeout waiting for {addr} to accept"));
        }
        if let Ok(mut s) = tokio::net::TcpStream::connect(addr).await {
            let _ = s.shutdown().await;
            return Ok(());
        }
        sleep(Duration::from_millis(50)).await;
    }
}

fn free_port() -> anyhow::Result<SocketAddr> {
    // Choose a free port by binding then dropping
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?)
}

/// Start both listeners against `upstream` and wait until they accept.
pub async fn start_harness(upstream: &str) -> anyhow::Result<Harness> {
    let hub = Arc::new(Hub::new());
    let proxy_addr = free_port()?;
    let mng_addr = free_port()?;

    let upstream: hyper::Uri = upstream.parse()?;
    let hub_for_proxy = hub.clone();
    let proxy_task = tokio::spawn(async move {
        let _ = run_proxy(proxy_addr, upstream, hub_for_proxy).await;
    });
    let hub_for_mng = hub.clone();
    let mng_task = tokio::spawn(async move {
        let _ = run_management(mng_addr, hub_for_mng).await;
    });

    wait_accepting(proxy_addr).await?;
    wait_accepting(mng_addr).await?;

    Ok(Harness {
        hub,
        proxy_addr,
        mng_addr,
        proxy_task,
        mng_task,
    })
}

/// Toy upstream: answers every HTTP/1.1 request with the given status and
/// body, closing the connection after each response.
pub async fn start_toy_upstream(
    status: u16,
    body: &'static str,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                if read_http_request(&mut socket).await.is_err() {
                    return;
                }
                let reply = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
            });
        }
    });
    Ok((addr, task))
}

/// Read one HTTP request (headers plus a Content-Length body) off a socket.
pub async fn read_http_request(socket: &mut tokio::net::TcpStream) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if Instant::now() > deadline {
            anyhow::bail!("timeout reading request");
        }
        if let Some(pos) = find_header_end(&buf) {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
            let want = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= pos + 4 + want {
                return Ok(buf);
            }
        }
        let n = timeout(Duration::from_millis(500), socket.read(&mut tmp)).await??;
        if n == 0 {
            anyhow::bail!("unexpected EOF reading request");
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Send one request through the proxy and return (status-line, headers, body).
pub async fn proxy_request(
    proxy_addr: SocketAddr,
    raw_request: &str,
) -> anyhow::Result<(String, String, String)> {
    let mut stream = tokio::net::TcpStream::connect(proxy_addr).await?;
    stream.write_all(raw_request.as_bytes()).await?;

    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if Instant::now() > deadline {
            anyhow::bail!("timeout reading proxied response");
        }
        match timeout(Duration::from_millis(500), stream.read(&mut tmp)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => buf.extend_from_slice(&tmp[..n]),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                // rely on Content-Length once headers are complete
                if let Some(pos) = find_header_end(&buf) {
                    let headers = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
                    let want = headers
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok());
                    if let Some(want) = want {
                        if buf.len() >= pos + 4 + want {
                            break;
                        }
                    }
                }
            }
        }
    }

    let pos = find_header_end(&buf).ok_or_else(|| anyhow::anyhow!("no header terminator"))?;
    let head = String::from_utf8_lossy(&buf[..pos]).to_string();
    let body = String::from_utf8_lossy(&buf[pos + 4..]).to_string();
    let (status_line, headers) = head
        .split_once("\r\n")
        .map(|(s, h)| (s.to_string(), h.to_string()))
        .unwrap_or((head.clone(), String::new()));
    Ok((status_line, headers, body))
}

/// One attached inspection client: a long-lived management connection plus
/// the unconsumed tail of its chunked NDJSON stream.
pub struct InspectorClient {
    pub stream: tokio::net::TcpStream,
    buf: Vec<u8>,
}

/// Attach to the management stream, verifying the streaming headers.
pub async fn attach_inspector(mng_addr: SocketAddr) -> anyhow::Result<InspectorClient> {
    let mut stream = tokio::net::TcpStream::connect(mng_addr).await?;
    stream
        .write_all(b"GET /events HTTP/1.1\r\nHost: mng\r\n\r\n")
        .await?;

    // read until end of response headers
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if Instant::now() > deadline {
            anyhow::bail!("timeout reading stream headers");
        }
        if find_header_end(&buf).is_some() {
            break;
        }
        let n = timeout(Duration::from_millis(500), stream.read(&mut tmp)).await??;
        if n == 0 {
            anyhow::bail!("unexpected EOF reading stream headers");
        }
        buf.extend_from_slice(&tmp[..n]);
    }
    let pos = find_header_end(&buf).expect("checked above");
    let head = String::from_utf8_lossy(&buf[..pos]).to_string();
    anyhow::ensure!(head.starts_with("HTTP/1.1 200"), "unexpected status: {head}");
    anyhow::ensure!(
        head.to_ascii_lowercase()
            .contains("x-content-type-options: nosniff"),
        "missing nosniff header"
    );
    let leftover = buf[pos + 4..].to_vec();
    Ok(InspectorClient {
        stream,
        buf: leftover,
    })
}

impl InspectorClient {
    /// Read the next newline-delimited JSON event, skipping chunked-transfer
    /// framing lines. Consumes the returned record from the buffer.
    pub async fn read_event(&mut self) -> anyhow::Result<serde_json::Value> {
        let mut tmp = [0u8; 4096];
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if Instant::now() > deadline {
                anyhow::bail!("timeout waiting for event");
            }
            if let Some((v, consumed)) = next_record(&self.buf) {
                self.buf.drain(..consumed);
                return Ok(v);
            }
            let n = match timeout(Duration::from_millis(500), self.stream.read(&mut tmp)).await {
                Ok(Ok(0)) => anyhow::bail!("stream closed before event arrived"),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => continue,
            };
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }
}

/// Find the first complete JSON record in the buffer, returning it along
/// with the byte offset just past its newline.
fn next_record(buf: &[u8]) -> Option<(serde_json::Value, usize)> {
    let mut offset = 0;
    for line in buf.split_inclusive(|&b| b == b'\n') {
        let end = offset + line.len();
        if line.last() == Some(&b'\n') {
            let trimmed = trim_chunk_framing(line);
            if trimmed.first() == Some(&b'{') {
                if let Ok(v) = serde_json::from_slice::<serde_json::Value>(trimmed) {
                    return Some((v, end));
                }
            }
        }
        offset = end;
    }
    None
}

fn trim_chunk_framing(line: &[u8]) -> &[u8] {
    // chunked framing puts "<hex>\r\n" before payload and "\r\n" after;
    // strip framing bytes and locate the JSON start
    let start = line.iter().position(|&b| b == b'{').unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|&b| b == b'}')
        .map(|p| p + 1)
        .unwrap_or(start);
    if start < end {
        &line[start..end]
    } else {
        &[]
    }
}
