//! In-process tick server for session testing.
//!
//! Speaks just enough of the server side of the protocol to exercise a
//! session end to end: answer (or refuse) the upgrade, unmask and record
//! client frames, and optionally close early or stream binary ticks.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use tickload::Endpoint;
use tickload::protocol::accept_for;

const OP_TEXT: u8 = 0x1;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;

/// How the server treats each connection.
#[derive(Debug, Clone, Copy)]
pub enum ServerMode {
    /// Complete the upgrade and sit on the connection.
    Accept,
    /// Refuse the upgrade with the given HTTP status.
    Reject(u16),
    /// Complete the upgrade, then close from the server side after the delay.
    CloseAfter(Duration),
    /// Complete the upgrade and stream binary ticks at the given period.
    Stream(Duration),
}

/// A scriptable tick server bound to a random local port.
pub struct TickServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl TickServer {
    pub async fn spawn(mode: ServerMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle_connection(stream, mode, sink.clone()));
            }
        });

        Self {
            addr,
            received,
            handle,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.addr.ip().to_string(), self.addr.port())
    }

    /// Text payloads received so far, in arrival order per connection.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

async fn handle_connection(mut stream: TcpStream, mode: ServerMode, sink: Arc<Mutex<Vec<String>>>) {
    let Some(key) = read_upgrade_key(&mut stream).await else {
        return;
    };

    if let ServerMode::Reject(status) = mode {
        let response = format!("HTTP/1.1 {status} Load Shed\r\nContent-Length: 0\r\n\r\n");
        let _ = stream.write_all(response.as_bytes()).await;
        return;
    }

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_for(&key)
    );
    if stream.write_all(response.as_bytes()).await.is_err() {
        return;
    }

    match mode {
        ServerMode::Accept => serve_quiet(stream, sink).await,
        ServerMode::CloseAfter(delay) => serve_close_after(stream, delay, sink).await,
        ServerMode::Stream(period) => serve_streaming(stream, period, sink).await,
        ServerMode::Reject(_) => unreachable!(),
    }
}

/// Read request headers and pull out the Sec-WebSocket-Key.
async fn read_upgrade_key(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if buf.len() > 16 * 1024 {
            return None;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    text.lines()
        .find_map(|line| line.strip_prefix("Sec-WebSocket-Key:"))
        .map(|v| v.trim().to_string())
}

/// Record client frames until the client closes.
async fn serve_quiet(mut stream: TcpStream, sink: Arc<Mutex<Vec<String>>>) {
    let mut buf = Vec::new();
    loop {
        match read_client_frame(&mut stream, &mut buf).await {
            Some((OP_TEXT, payload)) => {
                sink.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&payload).into_owned());
            }
            Some((OP_CLOSE, _)) => {
                let _ = stream.write_all(&close_frame(1000)).await;
                return;
            }
            Some((OP_PING, payload)) => {
                let _ = stream.write_all(&control_frame(0xA, &payload)).await;
            }
            Some(_) => {}
            None => return,
        }
    }
}

/// Record client frames, then close from the server side after `delay`.
async fn serve_close_after(mut stream: TcpStream, delay: Duration, sink: Arc<Mutex<Vec<String>>>) {
    let deadline = tokio::time::Instant::now() + delay;
    let mut buf = Vec::new();

    loop {
        match tokio::time::timeout_at(deadline, read_client_frame(&mut stream, &mut buf)).await {
            Ok(Some((OP_TEXT, payload))) => {
                sink.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&payload).into_owned());
            }
            Ok(Some((OP_CLOSE, _))) => {
                let _ = stream.write_all(&close_frame(1000)).await;
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(_) => break, // deadline hit
        }
    }

    let _ = stream.write_all(&close_frame(1000)).await;

    // Give the client a beat to answer with its close echo.
    let _ = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match read_client_frame(&mut stream, &mut buf).await {
                Some((OP_CLOSE, _)) | None => break,
                Some(_) => {}
            }
        }
    })
    .await;
}

/// Record client frames while streaming binary ticks.
async fn serve_streaming(stream: TcpStream, period: Duration, sink: Arc<Mutex<Vec<String>>>) {
    let (mut rd, mut wr) = stream.into_split();

    let reader = tokio::spawn(async move {
        let mut buf = Vec::new();
        loop {
            match read_client_frame_half(&mut rd, &mut buf).await {
                Some((OP_TEXT, payload)) => {
                    sink.lock()
                        .unwrap()
                        .push(String::from_utf8_lossy(&payload).into_owned());
                }
                Some((OP_CLOSE, _)) | None => return,
                Some(_) => {}
            }
        }
    });

    let mut ticker = tokio::time::interval(period);
    let tick_payload = [0u8; 8]; // stand-in for a timestamped quote
    loop {
        ticker.tick().await;
        if reader.is_finished() {
            return;
        }
        let mut frame = vec![0x82, tick_payload.len() as u8];
        frame.extend_from_slice(&tick_payload);
        if wr.write_all(&frame).await.is_err() {
            return;
        }
    }
}

async fn read_client_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<(u8, Vec<u8>)> {
    loop {
        if let Some((op, payload, consumed)) = parse_client_frame(buf) {
            buf.drain(..consumed);
            return Some((op, payload));
        }
        let mut chunk = [0u8; 1024];
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

async fn read_client_frame_half(
    rd: &mut tokio::net::tcp::OwnedReadHalf,
    buf: &mut Vec<u8>,
) -> Option<(u8, Vec<u8>)> {
    loop {
        if let Some((op, payload, consumed)) = parse_client_frame(buf) {
            buf.drain(..consumed);
            return Some((op, payload));
        }
        let mut chunk = [0u8; 1024];
        match rd.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Decode one masked client frame, returning opcode, unmasked payload and
/// bytes consumed. Client payloads in these tests never need 64-bit lengths.
fn parse_client_frame(buf: &[u8]) -> Option<(u8, Vec<u8>, usize)> {
    if buf.len() < 2 {
        return None;
    }
    let op = buf[0] & 0x0F;
    let masked = buf[1] & 0x80 != 0;
    let (len, mut offset) = match buf[1] & 0x7F {
        len @ 0..=125 => (len as usize, 2),
        126 => {
            if buf.len() < 4 {
                return None;
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        }
        _ => return None,
    };

    let mask = if masked {
        if buf.len() < offset + 4 {
            return None;
        }
        let mask = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        mask
    } else {
        [0; 4]
    };

    if buf.len() < offset + len {
        return None;
    }
    let mut payload = buf[offset..offset + len].to_vec();
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
    Some((op, payload, offset + len))
}

fn close_frame(code: u16) -> Vec<u8> {
    let bytes = code.to_be_bytes();
    vec![0x88, 0x02, bytes[0], bytes[1]]
}

fn control_frame(op: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x80 | op, payload.len() as u8];
    frame.extend_from_slice(payload);
    frame
}
