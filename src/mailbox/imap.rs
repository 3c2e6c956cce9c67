//! IMAP mailbox over TLS (rustls + webpki roots).
//!
//! Blocking socket I/O runs under `spawn_blocking`. Each call opens its own
//! session; nothing is held between polls. Messages are fetched with
//! `BODY.PEEK[]` so fetching alone never sets `\Seen`; `acknowledge` does.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use super::{Mailbox, parse_rfc822};
use crate::error::MailboxError;
use crate::pipeline::types::RawMessage;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// IMAP connection settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Polls `INBOX` for unseen messages.
pub struct ImapMailbox {
    config: ImapConfig,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn name(&self) -> &str {
        "imap"
    }

    async fn fetch_unseen(&self) -> Result<Vec<RawMessage>, MailboxError> {
        let cfg = self.config.clone();
        let messages = tokio::task::spawn_blocking(move || fetch_unseen_blocking(&cfg))
            .await
            .map_err(|e| MailboxError::Protocol(format!("IMAP fetch task failed: {e}")))??;
        debug!(count = messages.len(), host = %self.config.host, "Fetched unseen messages");
        Ok(messages)
    }

    async fn acknowledge(&self, message_id: &str) -> Result<(), MailboxError> {
        let cfg = self.config.clone();
        let uid = message_id.to_string();
        tokio::task::spawn_blocking(move || mark_seen_blocking(&cfg, &uid))
            .await
            .map_err(|e| MailboxError::Protocol(format!("IMAP store task failed: {e}")))?
    }
}

// ── Blocking operations ─────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn connect(config: &ImapConfig) -> Result<ImapSession<TlsStream>, MailboxError> {
    let connect_err = |reason: String| MailboxError::Connect {
        host: config.host.clone(),
        reason,
    };

    let tcp = TcpStream::connect((&*config.host, config.port))
        .map_err(|e| connect_err(e.to_string()))?;
    tcp.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(config.host.clone())
        .map_err(|e| connect_err(format!("invalid server name: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connect_err(e.to_string()))?;

    let mut session = ImapSession::new(rustls::StreamOwned::new(conn, tcp));
    session.greeting()?;
    session.login(&config.username, config.password.expose_secret())?;
    session.select("INBOX")?;
    Ok(session)
}

fn fetch_unseen_blocking(config: &ImapConfig) -> Result<Vec<RawMessage>, MailboxError> {
    let mut session = connect(config)?;
    let uids = session.search_unseen()?;

    let mut messages = Vec::with_capacity(uids.len());
    for uid in &uids {
        match session.fetch_peek(uid)? {
            Some(raw) => match parse_rfc822(uid.clone(), &raw) {
                Some(msg) => messages.push(msg),
                None => warn!(uid = %uid, "Unparseable message skipped"),
            },
            None => warn!(uid = %uid, "FETCH returned no body"),
        }
    }

    session.logout();
    Ok(messages)
}

fn mark_seen_blocking(config: &ImapConfig, uid: &str) -> Result<(), MailboxError> {
    let mut session = connect(config)?;
    session.mark_seen(uid)?;
    session.logout();
    info!(uid = %uid, "Marked message as seen");
    Ok(())
}

// ── Session ─────────────────────────────────────────────────────────

/// A tagged command's untagged lines, literals, and final status line.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
    status: String,
}

/// Minimal IMAP4rev1 client over any byte stream.
struct ImapSession<S> {
    stream: S,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    fn new(stream: S) -> Self {
        Self { stream, next_tag: 1 }
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(MailboxError::Protocol("IMAP connection closed".into())),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        buf.truncate(buf.len() - 2);
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn greeting(&mut self) -> Result<(), MailboxError> {
        let line = self.read_line()?;
        if line.starts_with("* OK") || line.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(MailboxError::Protocol(format!("unexpected greeting: {line}")))
        }
    }

    fn command(&mut self, cmd: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        self.stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.stream.flush()?;

        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(size) = literal_size(&line) {
                let mut literal = vec![0u8; size];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
                response.lines.push(line);
                continue;
            }
            if line.starts_with(&format!("{tag} ")) {
                response.status = line;
                return Ok(response);
            }
            response.lines.push(line);
        }
    }

    fn expect_ok(&mut self, cmd: &str) -> Result<Response, MailboxError> {
        let response = self.command(cmd)?;
        if status_is_ok(&response.status) {
            Ok(response)
        } else {
            Err(MailboxError::Protocol(format!(
                "{} failed: {}",
                cmd.split_whitespace().next().unwrap_or(cmd),
                response.status
            )))
        }
    }

    fn login(&mut self, user: &str, password: &str) -> Result<(), MailboxError> {
        let response = self.command(&format!("LOGIN {} {}", quote(user), quote(password)))?;
        if status_is_ok(&response.status) {
            Ok(())
        } else {
            Err(MailboxError::AuthFailed {
                user: user.to_string(),
            })
        }
    }

    fn select(&mut self, mailbox: &str) -> Result<(), MailboxError> {
        self.expect_ok(&format!("SELECT {}", quote(mailbox)))?;
        Ok(())
    }

    fn search_unseen(&mut self) -> Result<Vec<String>, MailboxError> {
        let response = self.expect_ok("UID SEARCH UNSEEN")?;
        let mut uids = Vec::new();
        for line in &response.lines {
            if let Some(rest) = line.strip_prefix("* SEARCH") {
                uids.extend(rest.split_whitespace().map(str::to_string));
            }
        }
        Ok(uids)
    }

    fn fetch_peek(&mut self, uid: &str) -> Result<Option<Vec<u8>>, MailboxError> {
        let mut response = self.expect_ok(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        Ok(response.literals.pop())
    }

    fn mark_seen(&mut self, uid: &str) -> Result<(), MailboxError> {
        self.expect_ok(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
        Ok(())
    }

    fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP logout failed");
        }
    }
}

/// Size of a `{n}` literal announced at the end of a line.
fn literal_size(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].trim_end_matches('+').parse().ok()
}

fn status_is_ok(status: &str) -> bool {
    status.split_whitespace().nth(1) == Some("OK")
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
