use std::time::Duration;

use bytes::BytesMut;
use framework::config::SecretString;
use framework::tls::{MaybeTlsStream, TlsConnector};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::Error;
use super::frame::{Frame, FromFrame};

/// Everything needed to open and prepare a connection.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub database: u32,
    /// Send `READONLY` after connecting, cluster replicas only serve reads
    /// after it.
    pub read_only: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub tls: Option<TlsConnector>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            database: 0,
            read_only: false,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
            tls: None,
        }
    }
}

pub struct Connection {
    stream: MaybeTlsStream,
    buf: BytesMut,
    read_timeout: Duration,
    write_timeout: Duration,
    /// Set once the stream is in an unknown state, the connection must not
    /// be reused.
    broken: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("tls", &self.stream.is_tls())
            .field("broken", &self.broken)
            .finish()
    }
}

impl Connection {
    /// Dial `addr`, then authenticate and select the database.
    pub async fn connect(addr: &str, opts: &ConnectOptions) -> Result<Self, Error> {
        let stream = tokio::time::timeout(
            opts.connect_timeout,
            framework::tls::connect(addr, opts.tls.as_ref()),
        )
        .await
        .map_err(|_| Error::Timeout("connect"))??;

        let mut conn = Connection {
            stream,
            buf: BytesMut::with_capacity(4 * 1024),
            read_timeout: opts.read_timeout,
            write_timeout: opts.write_timeout,
            broken: false,
        };

        if let Some(password) = &opts.password {
            match &opts.username {
                Some(username) => {
                    conn.request::<()>(&["AUTH", username, password.expose()])
                        .await?
                }
                None => conn.request::<()>(&["AUTH", password.expose()]).await?,
            }
        }

        if opts.database > 0 {
            let db = opts.database.to_string();
            conn.request::<()>(&["SELECT", &db]).await?;
        }

        if opts.read_only {
            conn.request::<()>(&["READONLY"]).await?;
        }

        Ok(conn)
    }

    #[inline]
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Send one command and wait for its reply. Error replies are returned
    /// as `Err`, and leave the connection usable.
    pub async fn request<T: FromFrame>(&mut self, cmds: &[&str]) -> Result<T, Error> {
        match self.round_trip(cmds).await {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_connection_error() || matches!(err, Error::Parse(_)) {
                    self.broken = true;
                }

                Err(err)
            }
        }
    }

    /// `ASKING` followed by the command, on the same connection.
    pub async fn asking<T: FromFrame>(&mut self, cmds: &[&str]) -> Result<T, Error> {
        self.request::<()>(&["ASKING"]).await?;
        self.request(cmds).await
    }

    async fn round_trip<T: FromFrame>(&mut self, cmds: &[&str]) -> Result<T, Error> {
        let mut buf = BytesMut::with_capacity(256);

        buf.extend_from_slice(format!("*{}\r\n", cmds.len()).as_bytes());
        for cmd in cmds {
            buf.extend_from_slice(format!("${}\r\n", cmd.len()).as_bytes());
            buf.extend_from_slice(cmd.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        tokio::time::timeout(self.write_timeout, self.stream.write_all(&buf))
            .await
            .map_err(|_| Error::Timeout("write"))??;

        tokio::time::timeout(self.read_timeout, self.read_reply())
            .await
            .map_err(|_| Error::Timeout("read"))?
    }

    async fn read_reply<T: FromFrame>(&mut self) -> Result<T, Error> {
        self.buf.clear();

        loop {
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }

            let result = match Frame::parse(&self.buf)? {
                Some(Frame::Error(err)) => Err(Error::from_reply(err)),
                Some(frame) => T::from_frame(frame),
                // we need more data
                None => continue,
            };

            self.buf.clear();
            return result;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sources::redis::client::Value;
    use crate::testing::{MockServer, bulk, error, int, simple};

    #[tokio::test]
    async fn auth_and_select() {
        let server = MockServer::start(|cmd| match cmd[0].as_str() {
            "AUTH" => simple("OK"),
            "SELECT" => simple("OK"),
            "GET" => bulk("bar"),
            "DBSIZE" => int(7),
            _ => error("ERR unknown command"),
        })
        .await;

        let opts = ConnectOptions {
            username: Some("monitor".into()),
            password: Some("secret".into()),
            database: 3,
            ..Default::default()
        };
        let mut conn = Connection::connect(&server.addr(), &opts).await.unwrap();

        assert_eq!(conn.request::<String>(&["GET", "foo"]).await.unwrap(), "bar");
        assert_eq!(conn.request::<Value>(&["DBSIZE"]).await.unwrap(), Value::Int(7));
        assert_eq!(
            server.commands(),
            vec![
                vec!["AUTH", "monitor", "secret"],
                vec!["SELECT", "3"],
                vec!["GET", "foo"],
                vec!["DBSIZE"],
            ]
        );
    }

    #[tokio::test]
    async fn error_replies_keep_the_connection() {
        let server = MockServer::start(|cmd| match cmd[0].as_str() {
            "PING" => simple("PONG"),
            "LATENCY" => error("ERR unknown subcommand 'HISTOGRAM'. Try LATENCY HELP."),
            _ => error("WRONGTYPE Operation against a key holding the wrong kind of value"),
        })
        .await;

        let mut conn = Connection::connect(&server.addr(), &ConnectOptions::default())
            .await
            .unwrap();

        let err = conn.request::<Value>(&["LATENCY", "HISTOGRAM"]).await.unwrap_err();
        assert!(matches!(err, Error::UnknownCommand(_)));
        let err = conn.request::<Value>(&["XLEN", "foo"]).await.unwrap_err();
        assert!(matches!(err, Error::Server(_)));
        assert!(!conn.is_broken());

        assert_eq!(conn.request::<String>(&["PING"]).await.unwrap(), "PONG");
    }

    #[tokio::test]
    async fn connect_refused() {
        let addr = testify::next_addr();
        let err = Connection::connect(&addr.to_string(), &ConnectOptions::default())
            .await
            .unwrap_err();

        assert!(err.is_connection_error(), "{err:?}");
    }

    #[tokio::test]
    async fn tls() {
        let server = MockServer::start_tls(|cmd| match cmd[0].as_str() {
            "PING" => simple("PONG"),
            _ => error("ERR unknown command"),
        })
        .await;

        let opts = ConnectOptions {
            tls: framework::tls::TlsConfig::test_client_config()
                .connector()
                .unwrap(),
            ..Default::default()
        };
        let mut conn = Connection::connect(&server.addr(), &opts).await.unwrap();

        assert_eq!(conn.request::<String>(&["PING"]).await.unwrap(), "PONG");
    }
}
