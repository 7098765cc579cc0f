#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use meftahi::engine::Engine;
use meftahi::notify::NotifyHub;
use meftahi::wire;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("meftahi_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("meftahi.wal"), Arc::new(NotifyHub::new())).unwrap());

    let server_engine = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = server_engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine).await;
            });
        }
    });

    (addr, engine)
}

/// Line client that sets notifications aside while waiting for replies.
pub struct Client {
    framed: Framed<TcpStream, LinesCodec>,
    notifications: VecDeque<Value>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
            notifications: VecDeque::new(),
        }
    }

    pub async fn recv(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(TIMEOUT, self.framed.next()).await.ok()??.ok()?;
        Some(serde_json::from_str(&line).expect("reply is JSON"))
    }

    /// Send one statement and return its reply.
    pub async fn query(&mut self, sql: &str) -> Value {
        self.framed.send(sql.to_string()).await.unwrap();
        loop {
            let msg = self.recv().await.expect("reply before timeout");
            if msg["type"] == "notification" {
                self.notifications.push_back(msg);
            } else {
                return msg;
            }
        }
    }

    /// Reply must be ok; returns its rows.
    pub async fn ok(&mut self, sql: &str) -> Vec<Value> {
        let reply = self.query(sql).await;
        assert_eq!(reply["type"], "ok", "{sql} -> {reply}");
        reply["rows"].as_array().cloned().unwrap_or_default()
    }

    /// Reply must be an error; returns its code.
    pub async fn err(&mut self, sql: &str) -> String {
        let reply = self.query(sql).await;
        assert_eq!(reply["type"], "error", "{sql} -> {reply}");
        reply["code"].as_str().unwrap_or_default().to_string()
    }

    pub async fn notification(&mut self, timeout: Duration) -> Option<Value> {
        if let Some(n) = self.notifications.pop_front() {
            return Some(n);
        }
        let line = tokio::time::timeout(timeout, self.framed.next()).await.ok()??.ok()?;
        Some(serde_json::from_str(&line).expect("notification is JSON"))
    }

    pub async fn send_raw(&mut self, line: String) {
        self.framed.send(line).await.unwrap();
    }
}

pub async fn create_rental(client: &mut Client, title: &str) -> Ulid {
    let id = Ulid::new();
    client
        .ok(&format!(
            "INSERT INTO listings VALUES ('{id}', '{title}', 'location', 'appartement', 900, NULL, 'Bizerte', 80, 2, 'publie')"
        ))
        .await;
    id
}

pub fn reservation_sql(id: Ulid, listing: Ulid, start: &str, end: &str) -> String {
    format!("INSERT INTO reservations VALUES ('{id}', '{listing}', '{start}', '{end}', 'guest@example.tn')")
}
