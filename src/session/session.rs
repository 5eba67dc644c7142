//! One iteration of load: connect, subscribe once per second, close on a
//! timer.
//!
//! The whole session runs on a single task. Send timer, close timer and
//! socket reads are branches of one `select!` loop, so lifecycle events for
//! a session can never race each other. Dropping the session drops both
//! timers with it.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until, timeout, timeout_at};

use crate::check::CheckOutcome;
use crate::config::{Endpoint, SessionConfig};
use crate::error::{Error, Result};
use crate::observer::{SessionEvent, SessionObserver, TracingObserver};
use crate::payload::Subscription;
use crate::protocol::{Frame, MaskSource, OpCode, UpgradeRequest, UpgradeResponse};
use crate::session::SessionState;

/// Close code sent when the session's close timer fires.
const CLOSE_NORMAL: u16 = 1000;

/// What the handshake produced, kept even when the status is not 101.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeSummary {
    /// Raw HTTP status code from the upgrade response.
    pub status: u16,
}

/// Everything one iteration hands back to its runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    /// Handshake result; `None` when no response was ever received.
    pub handshake: Option<HandshakeSummary>,
    /// Subscribe messages written to the socket.
    pub messages_sent: u64,
    /// Data frames the server streamed at the session.
    pub server_messages: u64,
    /// Terminal state the session ended in.
    pub state: SessionState,
    /// Check outcomes recorded by this iteration.
    pub checks: Vec<CheckOutcome>,
}

impl IterationReport {
    /// True when every recorded check held.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

/// Drives one session per [`run_iteration`](SessionRunner::run_iteration)
/// call against a fixed endpoint.
///
/// Cloning is cheap; clones share the observer and drive independent
/// sessions.
#[derive(Clone)]
pub struct SessionRunner {
    endpoint: Endpoint,
    config: SessionConfig,
    observer: Arc<dyn SessionObserver>,
}

impl SessionRunner {
    /// Create a runner with the default cadence, logging through `tracing`.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            config: SessionConfig::default(),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Set the session timing configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the lifecycle observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The endpoint this runner connects to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Run one full iteration and report on it.
    ///
    /// Never returns an error: a failed handshake is an expected outcome
    /// that fails the `status is 101` check, not a reason to stop the run.
    pub async fn run_iteration(&self, session: u64) -> IterationReport {
        let upgraded = timeout(self.config.handshake_timeout, self.upgrade()).await;
        let (stream, read_buf, response) = match upgraded {
            Err(_) => return self.handshake_failed(session, None, &Error::HandshakeTimeout),
            Ok(Err(err)) => return self.handshake_failed(session, None, &err),
            Ok(Ok(parts)) => parts,
        };

        if response.status != 101 {
            let status = response.status;
            return self.handshake_failed(
                session,
                Some(status),
                &Error::UnexpectedStatus { status },
            );
        }

        let (rd, wr) = stream.into_split();
        let active = ActiveSession {
            id: session,
            rd,
            wr,
            read_buf,
            write_buf: BytesMut::with_capacity(64),
            masks: MaskSource::new(),
            subscription: Subscription::seed(),
            rng: StdRng::from_os_rng(),
            sent: 0,
            received: 0,
        };
        let (state, sent, received) = active.run(&self.config, &self.observer).await;

        IterationReport {
            handshake: Some(HandshakeSummary {
                status: response.status,
            }),
            messages_sent: sent,
            server_messages: received,
            state,
            checks: vec![CheckOutcome::status_is_101(Some(response.status))],
        }
    }

    /// Connect and perform the upgrade exchange.
    ///
    /// A parseable non-101 response is returned as a success so the caller
    /// can record its status; only transport-level failures and malformed
    /// responses error. Bytes the server sent past the response head (tick
    /// servers start streaming immediately) are returned for the open phase.
    async fn upgrade(&self) -> Result<(TcpStream, BytesMut, UpgradeResponse)> {
        let mut stream = TcpStream::connect(self.endpoint.authority())
            .await
            .map_err(|e| Error::Handshake(format!("Connect to {} failed: {e}", self.endpoint)))?;

        let request = UpgradeRequest::new(&self.endpoint);
        stream
            .write_all(request.encode().as_bytes())
            .await
            .map_err(|e| Error::Handshake(format!("Upgrade request failed: {e}")))?;

        let mut buf = BytesMut::with_capacity(1024);
        let head = loop {
            if let Some(end) = response_head_end(&buf) {
                break buf.split_to(end);
            }
            if buf.len() > self.config.max_handshake_size {
                return Err(Error::HandshakeTooLarge {
                    size: buf.len(),
                    max: self.config.max_handshake_size,
                });
            }
            let n = stream
                .read_buf(&mut buf)
                .await
                .map_err(|e| Error::Handshake(format!("Upgrade response read failed: {e}")))?;
            if n == 0 {
                return Err(Error::Handshake(
                    "Connection closed during handshake".into(),
                ));
            }
        };

        let response = UpgradeResponse::parse(&head)?;
        if response.status == 101 {
            response.verify(request.key())?;
        }
        Ok((stream, buf, response))
    }

    fn handshake_failed(&self, session: u64, status: Option<u16>, err: &Error) -> IterationReport {
        self.observer.on_event(
            session,
            &SessionEvent::Error {
                message: err.to_string(),
            },
        );
        IterationReport {
            handshake: status.map(|status| HandshakeSummary { status }),
            messages_sent: 0,
            server_messages: 0,
            state: SessionState::Failed,
            checks: vec![CheckOutcome::status_is_101(status)],
        }
    }
}

/// Byte offset just past the `\r\n\r\n` response terminator, if present.
fn response_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

enum Wake {
    CloseTimer,
    SendTick,
    Read(std::io::Result<usize>),
}

/// An open connection with its payload, timers and counters.
struct ActiveSession {
    id: u64,
    rd: OwnedReadHalf,
    wr: OwnedWriteHalf,
    read_buf: BytesMut,
    write_buf: BytesMut,
    masks: MaskSource,
    subscription: Subscription,
    rng: StdRng,
    sent: u64,
    received: u64,
}

impl ActiveSession {
    /// Run the open phase to completion.
    ///
    /// Returns the terminal state plus send/receive counts.
    async fn run(
        mut self,
        config: &SessionConfig,
        observer: &Arc<dyn SessionObserver>,
    ) -> (SessionState, u64, u64) {
        observer.on_event(self.id, &SessionEvent::Open);
        let opened = Instant::now();

        // Frames the server pushed while the handshake was still being read
        // are already buffered and will see no further socket readiness.
        if !self.read_buf.is_empty() {
            match self.handle_incoming().await {
                Ok(None) => {}
                Ok(Some(code)) => {
                    observer.on_event(self.id, &SessionEvent::Closed { code });
                    return (SessionState::Closed, self.sent, self.received);
                }
                Err(err) => {
                    observer.on_event(
                        self.id,
                        &SessionEvent::Error {
                            message: err.to_string(),
                        },
                    );
                    observer.on_event(self.id, &SessionEvent::Closed { code: None });
                    return (SessionState::Closed, self.sent, self.received);
                }
            }
        }

        let mut send_timer = interval_at(opened + config.send_interval, config.send_interval);
        send_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let close_timer = sleep_until(opened + config.session_duration);
        tokio::pin!(close_timer);

        let state = loop {
            let wake = tokio::select! {
                _ = &mut close_timer => Wake::CloseTimer,
                _ = send_timer.tick() => Wake::SendTick,
                read = self.rd.read_buf(&mut self.read_buf) => Wake::Read(read),
            };

            match wake {
                Wake::CloseTimer => {
                    let code = self.initiate_close(config.close_grace).await;
                    observer.on_event(self.id, &SessionEvent::Closed { code });
                    break SessionState::Closed;
                }
                Wake::SendTick => {
                    if let Err(err) = self.send_subscribe().await {
                        // Socket is gone; the close timer dies with the session.
                        observer.on_event(
                            self.id,
                            &SessionEvent::Error {
                                message: err.to_string(),
                            },
                        );
                        observer.on_event(self.id, &SessionEvent::Closed { code: None });
                        break SessionState::Closed;
                    }
                    observer.on_event(self.id, &SessionEvent::Sent { seq: self.sent });
                }
                Wake::Read(Ok(0)) => {
                    // EOF without a close frame.
                    observer.on_event(
                        self.id,
                        &SessionEvent::Error {
                            message: "Connection closed by server without close frame".into(),
                        },
                    );
                    observer.on_event(self.id, &SessionEvent::Closed { code: None });
                    break SessionState::Closed;
                }
                Wake::Read(Ok(_)) => match self.handle_incoming().await {
                    Ok(None) => {}
                    Ok(Some(code)) => {
                        observer.on_event(self.id, &SessionEvent::Closed { code });
                        break SessionState::Closed;
                    }
                    Err(err) => {
                        observer.on_event(
                            self.id,
                            &SessionEvent::Error {
                                message: err.to_string(),
                            },
                        );
                        observer.on_event(self.id, &SessionEvent::Closed { code: None });
                        break SessionState::Closed;
                    }
                },
                Wake::Read(Err(err)) => {
                    observer.on_event(
                        self.id,
                        &SessionEvent::Error {
                            message: Error::from(err).to_string(),
                        },
                    );
                    observer.on_event(self.id, &SessionEvent::Closed { code: None });
                    break SessionState::Closed;
                }
            }
        };

        (state, self.sent, self.received)
    }

    /// Serialize and send the current subscription, then re-roll the
    /// instruments for the next send.
    async fn send_subscribe(&mut self) -> Result<()> {
        let json = self.subscription.to_json()?;
        self.write_frame(&Frame::text(json.into_bytes())).await?;
        self.sent += 1;
        self.subscription.reroll(&mut self.rng);
        Ok(())
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_buf.clear();
        frame.encode(self.masks.next_key(), &mut self.write_buf);
        self.wr.write_all(&self.write_buf).await?;
        self.wr.flush().await?;
        Ok(())
    }

    /// Process everything decodable in the read buffer.
    ///
    /// Returns the close code if the server initiated close.
    async fn handle_incoming(&mut self) -> Result<Option<Option<u16>>> {
        loop {
            let frame = match Frame::parse(&self.read_buf) {
                Ok((frame, consumed)) => {
                    self.read_buf.advance(consumed);
                    frame
                }
                Err(Error::IncompleteFrame { .. }) => return Ok(None),
                Err(err) => return Err(err),
            };

            match frame.opcode {
                OpCode::Ping => {
                    let pong = Frame::pong(frame.payload().to_vec());
                    self.write_frame(&pong).await?;
                }
                OpCode::Close => {
                    let code = frame.close_code();
                    // Echo the close; the server may already be gone.
                    let _ = self.write_frame(&Frame::close(CLOSE_NORMAL, "")).await;
                    return Ok(Some(code));
                }
                OpCode::Pong => {}
                _ => self.received += 1,
            }
        }
    }

    /// Timer-driven close: send our close frame and wait briefly for the
    /// peer to confirm.
    async fn initiate_close(&mut self, grace: Duration) -> Option<u16> {
        let _ = self.write_frame(&Frame::close(CLOSE_NORMAL, "done")).await;

        let deadline = Instant::now() + grace;
        loop {
            // Drain anything already buffered before waiting on the socket.
            loop {
                match Frame::parse(&self.read_buf) {
                    Ok((frame, consumed)) => {
                        self.read_buf.advance(consumed);
                        match frame.opcode {
                            OpCode::Close => return frame.close_code(),
                            op if op.is_data() => self.received += 1,
                            _ => {}
                        }
                    }
                    Err(Error::IncompleteFrame { .. }) => break,
                    Err(_) => return None,
                }
            }

            match timeout_at(deadline, self.rd.read_buf(&mut self.read_buf)).await {
                Ok(Ok(n)) if n > 0 => {}
                _ => return None,
            }
        }
    }
}
