//! TCP server for SMTP sessions.
//!
//! Accepts connections, takes an admission permit for each one and runs
//! the session on its own task. The permit moves into that task and is
//! dropped after the connection has been closed.

use crate::admission::{Admission, AdmissionError, Permit};
use crate::config::{Config, Overflow, SessionConfig};
use crate::delivery::Delivery;
use crate::protocols::smtp::error::SessionError;
use crate::protocols::smtp::{handle_connection, Reply};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Server instance
pub struct Server {
    config: Config,
    session: Arc<SessionConfig>,
    admission: Admission,
    delivery: Arc<dyn Delivery>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, delivery: Arc<dyn Delivery>) -> Self {
        let admission = Admission::new(config.max_sessions);
        let session = Arc::new(config.session.clone());

        Server {
            config,
            session,
            admission,
            delivery,
        }
    }

    /// Permit pool shared with every session.
    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    pub fn listen_address(&self) -> &str {
        &self.config.listen
    }

    /// Bind the configured address.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let addr: SocketAddr = self
            .config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(self.config.backlog)?;

        TcpListener::from_std(socket.into())
    }

    /// Accept connections until the admission pool is closed.
    ///
    /// Failed accepts are logged and skipped.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), AdmissionError> {
        info!(
            address = %listener.local_addr().map_or_else(|_| self.config.listen.clone(), |a| a.to_string()),
            max_sessions = self.admission.capacity(),
            "Server listening"
        );

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");

                    let permit = match self.config.overflow {
                        Overflow::Wait => self.admission.acquire().await?,
                        Overflow::Reject => match self.admission.try_acquire()? {
                            Some(permit) => permit,
                            None => {
                                self.turn_away(stream, peer);
                                continue;
                            }
                        },
                    };

                    self.dispatch(stream, peer, permit);
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Run one session on its own task.
    fn dispatch(&self, stream: TcpStream, peer: SocketAddr, permit: Permit) {
        let session = Arc::clone(&self.session);
        let delivery = Arc::clone(&self.delivery);
        let span = info_span!("session", peer = %peer);

        tokio::spawn(
            async move {
                match handle_connection(stream, &session, delivery.as_ref()).await {
                    Ok(outcome) => debug!(?outcome, "Session finished"),
                    Err(SessionError::Io(e)) => debug!(error = %e, "Connection error"),
                    Err(e) => warn!(error = %e, "Session aborted"),
                }
                drop(permit);
            }
            .instrument(span),
        );
    }

    /// Tell a client the server is full and hang up.
    fn turn_away(&self, mut stream: TcpStream, peer: SocketAddr) {
        warn!(peer = %peer, "Session limit reached, rejecting connection");
        let reply = Reply::unavailable(&self.session.hostname).to_bytes();
        let limit = self.session.timeout;

        tokio::spawn(async move {
            let write = async {
                stream.write_all(&reply).await?;
                stream.shutdown().await
            };
            if let Ok(Err(e)) = tokio::time::timeout(limit, write).await {
                debug!(peer = %peer, error = %e, "Failed to send rejection");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{ChannelDelivery, Message};
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_config(max_sessions: usize, overflow: Overflow, session: SessionConfig) -> Config {
        Config {
            listen: "127.0.0.1:0".to_string(),
            max_sessions,
            backlog: 128,
            overflow,
            workers: None,
            log_level: "info".to_string(),
            session,
        }
    }

    struct Harness {
        addr: SocketAddr,
        admission: Admission,
        messages: UnboundedReceiver<Message>,
    }

    async fn start(max_sessions: usize, overflow: Overflow, session: SessionConfig) -> Harness {
        let (delivery, messages) = ChannelDelivery::new();
        let server = Server::new(
            test_config(max_sessions, overflow, session),
            Arc::new(delivery),
        );
        let listener = server.bind().unwrap();
        let addr = listener.local_addr().unwrap();
        let admission = server.admission().clone();

        tokio::spawn(async move { server.serve(listener).await });

        Harness {
            addr,
            admission,
            messages,
        }
    }

    struct Client {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            let (reader, writer) = TcpStream::connect(addr).await.unwrap().into_split();
            Client {
                reader: BufReader::new(reader),
                writer,
            }
        }

        async fn line(&mut self) -> String {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            line
        }

        async fn send(&mut self, data: &str) -> String {
            self.writer.write_all(data.as_bytes()).await.unwrap();
            self.line().await
        }

        /// Read whatever is left until the server closes the connection.
        async fn drain(&mut self) -> Vec<u8> {
            let mut rest = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                match self.reader.read(&mut buf).await {
                    Ok(0) | Err(_) => return rest,
                    Ok(n) => rest.extend_from_slice(&buf[..n]),
                }
            }
        }
    }

    async fn wait_idle(admission: &Admission) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while admission.in_use() != 0 {
            assert!(Instant::now() < deadline, "permits still held: {}", admission.in_use());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_full_session() {
        let mut harness = start(10, Overflow::Wait, SessionConfig::new("mx.test")).await;
        let mut client = Client::connect(harness.addr).await;

        assert_eq!(client.line().await, "220 mx.test ready\r\n");
        assert_eq!(client.send("EHLO a\r\n").await, "250 mx.test Hello\r\n");
        assert_eq!(client.send("MAIL FROM:<x@y>\r\n").await, "250 OK\r\n");
        assert_eq!(client.send("RCPT TO:<z@y>\r\n").await, "250 Accepted\r\n");
        assert!(client.send("DATA\r\n").await.starts_with("354 "));
        assert_eq!(client.send("hello\r\n.\r\n").await, "250 OK\r\n");
        assert_eq!(client.send("QUIT\r\n").await, "221 Bye\r\n");
        assert!(client.drain().await.is_empty());

        let message = harness.messages.recv().await.unwrap();
        assert_eq!(&message.payload[..], b"hello\r\n");
        assert_eq!(message.mail_from, "<x@y>");
        assert_eq!(message.mail_to, "<z@y>");

        wait_idle(&harness.admission).await;
    }

    #[tokio::test]
    async fn test_saturated_server_stalls_new_sessions() {
        let harness = start(10, Overflow::Wait, SessionConfig::new("mx.test")).await;

        let mut clients = Vec::new();
        for _ in 0..10 {
            let mut client = Client::connect(harness.addr).await;
            assert!(client.line().await.starts_with("220 "));
            clients.push(client);
        }
        assert_eq!(harness.admission.in_use(), 10);

        let mut late = Client::connect(harness.addr).await;
        let stalled = tokio::time::timeout(Duration::from_millis(300), late.line()).await;
        assert!(stalled.is_err(), "11th session was admitted early");
        assert_eq!(harness.admission.in_use(), 10);

        assert_eq!(clients[0].send("QUIT\r\n").await, "221 Bye\r\n");
        let greeting = tokio::time::timeout(Duration::from_secs(5), late.line())
            .await
            .unwrap();
        assert!(greeting.starts_with("220 "));
        assert!(harness.admission.in_use() <= 10);

        drop(clients);
        drop(late);
        wait_idle(&harness.admission).await;
    }

    #[tokio::test]
    async fn test_reject_policy_turns_clients_away() {
        let harness = start(1, Overflow::Reject, SessionConfig::new("mx.test")).await;

        let mut first = Client::connect(harness.addr).await;
        assert!(first.line().await.starts_with("220 "));

        let mut second = Client::connect(harness.addr).await;
        assert!(second.line().await.starts_with("421 mx.test "));
        assert!(second.drain().await.is_empty());

        assert_eq!(first.send("QUIT\r\n").await, "221 Bye\r\n");
        wait_idle(&harness.admission).await;
    }

    #[tokio::test]
    async fn test_oversized_data_ends_session_without_ok() {
        let mut session = SessionConfig::new("mx.test");
        session.max_data_size = 1024;
        let mut harness = start(2, Overflow::Wait, session).await;
        let mut client = Client::connect(harness.addr).await;

        client.line().await;
        assert!(client.send("DATA\r\n").await.starts_with("354 "));

        let line = format!("{}\r\n", "a".repeat(98));
        for _ in 0..20 {
            if client.writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }

        let rest = client.drain().await;
        assert!(!String::from_utf8_lossy(&rest).contains("250"));
        assert!(harness.messages.try_recv().is_err());
        wait_idle(&harness.admission).await;
    }

    #[tokio::test]
    async fn test_idle_session_is_closed() {
        let mut session = SessionConfig::new("mx.test");
        session.timeout = Duration::from_millis(200);
        let harness = start(2, Overflow::Wait, session).await;
        let mut client = Client::connect(harness.addr).await;

        assert!(client.line().await.starts_with("220 "));
        let started = Instant::now();
        let rest = tokio::time::timeout(Duration::from_secs(5), client.drain())
            .await
            .unwrap();
        assert!(rest.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(150));

        wait_idle(&harness.admission).await;
    }

    #[tokio::test]
    async fn test_permits_return_on_every_exit_path() {
        let mut session = SessionConfig::new("mx.test");
        session.timeout = Duration::from_millis(300);
        session.max_data_size = 256;
        let harness = start(3, Overflow::Wait, session).await;

        let mut quitter = Client::connect(harness.addr).await;
        let mut dropper = Client::connect(harness.addr).await;
        let mut idler = Client::connect(harness.addr).await;
        for client in [&mut quitter, &mut dropper, &mut idler] {
            assert!(client.line().await.starts_with("220 "));
        }
        assert_eq!(harness.admission.in_use(), 3);

        assert_eq!(quitter.send("QUIT\r\n").await, "221 Bye\r\n");
        drop(dropper);
        wait_idle(&harness.admission).await;
        drop(idler);

        let mut oversized = Client::connect(harness.addr).await;
        oversized.line().await;
        let _ = oversized.writer.write_all(&[b'x'; 512]).await;
        oversized.drain().await;
        wait_idle(&harness.admission).await;
    }

    #[tokio::test]
    async fn test_bind_failure_reported() {
        let session = SessionConfig::new("mx.test");
        let mut config = test_config(1, Overflow::Wait, session);
        config.listen = "not an address".to_string();
        let server = Server::new(config, Arc::new(ChannelDelivery::new().0));

        let err = server.bind().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
