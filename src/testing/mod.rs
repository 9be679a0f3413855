//! An in-process RESP server answering canned replies, for tests that need
//! a peer but not a real Redis.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

type Handler = Arc<dyn Fn(&[String]) -> String + Send + Sync>;

struct State {
    handler: Handler,
    commands: Mutex<Vec<Vec<String>>>,
    replacements: Mutex<Vec<(String, String)>>,
    connections: AtomicUsize,
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<State>,
    handle: JoinHandle<()>,
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockServer {
    /// Serve every command with `handler`, which returns the encoded reply.
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> String + Send + Sync + 'static,
    {
        Self::spawn(handler, None).await
    }

    /// Like `start`, but clients have to speak TLS, with the certificate
    /// of `TlsConfig::test_server_config`.
    pub async fn start_tls<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> String + Send + Sync + 'static,
    {
        let config = framework::tls::TlsConfig::test_server_config()
            .server_config()
            .unwrap();
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));

        Self::spawn(handler, Some(acceptor)).await
    }

    async fn spawn<F>(handler: F, tls: Option<tokio_rustls::TlsAcceptor>) -> Self
    where
        F: Fn(&[String]) -> String + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State {
            handler: Arc::new(handler),
            commands: Mutex::new(vec![]),
            replacements: Mutex::new(vec![]),
            connections: AtomicUsize::new(0),
        });

        let shared = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    return;
                };
                shared.connections.fetch_add(1, Ordering::SeqCst);

                let state = Arc::clone(&shared);
                let tls = tls.clone();
                tokio::spawn(async move {
                    match tls {
                        Some(acceptor) => {
                            if let Ok(stream) = acceptor.accept(stream).await {
                                serve(stream, state).await;
                            }
                        }
                        None => serve(stream, state).await,
                    }
                });
            }
        });

        MockServer {
            addr,
            state,
            handle,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn host_port(&self) -> (String, u16) {
        (self.addr.ip().to_string(), self.addr.port())
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.commands.lock().clone()
    }

    /// Number of accepted connections.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Substitute `from` with `to` in every reply, for replies that refer
    /// to addresses only known after the servers started.
    pub fn replace(&self, from: &str, to: &str) {
        self.state
            .replacements
            .lock()
            .push((from.to_string(), to.to_string()));
    }
}

async fn serve<S>(mut stream: S, state: Arc<State>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        while let Some((cmd, consumed)) = parse_command(&buf) {
            buf.advance(consumed);

            state.commands.lock().push(cmd.clone());
            let mut reply = (state.handler)(&cmd);
            for (from, to) in state.replacements.lock().iter() {
                reply = reply.replace(from.as_str(), to.as_str());
            }

            if stream.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }

        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Parse one `*N` array of bulk strings, as clients send commands.
fn parse_command(buf: &[u8]) -> Option<(Vec<String>, usize)> {
    fn line(buf: &[u8], pos: &mut usize) -> Option<String> {
        let len = buf[*pos..].windows(2).position(|w| w == b"\r\n")?;
        let s = String::from_utf8_lossy(&buf[*pos..*pos + len]).to_string();
        *pos += len + 2;
        Some(s)
    }

    let mut pos = 0;
    let header = line(buf, &mut pos)?;
    let n = header.strip_prefix('*')?.parse::<usize>().ok()?;

    let mut args = Vec::with_capacity(n);
    for _ in 0..n {
        let len = line(buf, &mut pos)?.strip_prefix('$')?.parse::<usize>().ok()?;
        if buf.len() < pos + len + 2 {
            return None;
        }

        args.push(String::from_utf8_lossy(&buf[pos..pos + len]).to_string());
        pos += len + 2;
    }

    Some((args, pos))
}

pub fn simple(s: &str) -> String {
    format!("+{s}\r\n")
}

pub fn error(s: &str) -> String {
    format!("-{s}\r\n")
}

pub fn int(i: i64) -> String {
    format!(":{i}\r\n")
}

pub fn bulk(s: &str) -> String {
    format!("${}\r\n{s}\r\n", s.len())
}

pub fn null() -> String {
    "$-1\r\n".to_string()
}

pub fn array(items: Vec<String>) -> String {
    let mut reply = format!("*{}\r\n", items.len());
    for item in items {
        reply.push_str(&item);
    }
    reply
}

/// An `INFO` style bulk reply, `\n` in `text` becomes `\r\n`.
pub fn info(text: &str) -> String {
    let text = text.trim_start().replace("\r\n", "\n").replace('\n', "\r\n");
    bulk(&text)
}

#[test]
fn parse_commands() {
    let input = b"*2\r\n$4\r\nINFO\r\n$6\r\nmemory\r\n*1\r\n$4\r\nPI";

    let (cmd, consumed) = parse_command(input).unwrap();
    assert_eq!(cmd, vec!["INFO", "memory"]);
    assert_eq!(parse_command(&input[consumed..]), None);
}
