//! In-process fake of the subset of the Redis protocol the networked
//! backend uses: PING, AUTH, SELECT, SET [PX|EX], GET, DEL, MGET, INCR,
//! PTTL and SCAN with MATCH on a literal prefix.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keel_state::resp::{RespValue, read_value};

/// Keys returned per SCAN page, small so tests walk the cursor.
const PAGE: usize = 3;

#[derive(Default)]
struct Data {
    values: BTreeMap<Vec<u8>, Vec<u8>>,
    ttls: BTreeMap<Vec<u8>, u64>,
}

pub struct FakeRespServer {
    addr: SocketAddr,
    data: Arc<Mutex<Data>>,
    streams: Arc<Mutex<Vec<TcpStream>>>,
    password: Option<String>,
}

impl FakeRespServer {
    pub fn start() -> Self {
        Self::start_with_password(None)
    }

    pub fn start_with_password(password: Option<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind to random port");
        let addr = listener.local_addr().expect("local addr");
        let data = Arc::new(Mutex::new(Data::default()));
        let streams = Arc::new(Mutex::new(Vec::new()));
        let password = password.map(str::to_string);

        let server = Self {
            addr,
            data: data.clone(),
            streams: streams.clone(),
            password: password.clone(),
        };

        std::thread::spawn(move || {
            while let Ok((stream, _)) = listener.accept() {
                if let Ok(clone) = stream.try_clone() {
                    streams.lock().unwrap().push(clone);
                }
                let data = data.clone();
                let password = password.clone();
                std::thread::spawn(move || serve(stream, data, password));
            }
        });
        // Give the listener thread time to start.
        std::thread::sleep(Duration::from_millis(10));
        server
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> keel_core::NetworkedConfig {
        keel_core::NetworkedConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            password: self.password.clone(),
            io_timeout_secs: 2,
            connect_timeout_secs: 2,
            ..Default::default()
        }
    }

    /// Close every accepted connection.
    pub fn disconnect_all(&self) {
        for stream in self.streams.lock().unwrap().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn raw_keys(&self) -> Vec<String> {
        self.data
            .lock()
            .unwrap()
            .values
            .keys()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect()
    }

    pub fn ttl_ms(&self, raw_key: &str) -> Option<u64> {
        self.data.lock().unwrap().ttls.get(raw_key.as_bytes()).copied()
    }
}

fn serve(stream: TcpStream, data: Arc<Mutex<Data>>, password: Option<String>) {
    let Ok(mut writer) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let mut authenticated = password.is_none();

    loop {
        let Ok(RespValue::Array(Some(items))) = read_value(&mut reader) else {
            return;
        };
        let args: Vec<Vec<u8>> = items
            .into_iter()
            .filter_map(|item| match item {
                RespValue::Bulk(Some(bytes)) => Some(bytes),
                _ => None,
            })
            .collect();
        if args.is_empty() {
            return;
        }

        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        let reply = if name == "AUTH" {
            let given = args.last().map(|p| String::from_utf8_lossy(p).into_owned());
            if given == password {
                authenticated = true;
                simple("OK")
            } else {
                error("WRONGPASS invalid username-password pair")
            }
        } else if !authenticated {
            error("NOAUTH Authentication required.")
        } else {
            execute(&name, &args[1..], &mut data.lock().unwrap())
        };

        if writer.write_all(&reply).is_err() {
            return;
        }
    }
}

fn execute(name: &str, args: &[Vec<u8>], data: &mut Data) -> Vec<u8> {
    match name {
        "PING" => simple("PONG"),
        "SELECT" => simple("OK"),
        "SET" => {
            let (key, value) = (args[0].clone(), args[1].clone());
            data.ttls.remove(&key);
            if args.len() >= 4 {
                let unit = String::from_utf8_lossy(&args[2]).to_ascii_uppercase();
                let amount: u64 = String::from_utf8_lossy(&args[3]).parse().unwrap_or(0);
                let ms = if unit == "EX" { amount * 1000 } else { amount };
                data.ttls.insert(key.clone(), ms);
            }
            data.values.insert(key, value);
            simple("OK")
        }
        "GET" => bulk(data.values.get(&args[0]).cloned()),
        "DEL" => {
            let mut removed = 0;
            for key in args {
                data.ttls.remove(key);
                if data.values.remove(key).is_some() {
                    removed += 1;
                }
            }
            integer(removed)
        }
        "MGET" => {
            let items: Vec<Vec<u8>> = args
                .iter()
                .map(|k| bulk(data.values.get(k).cloned()))
                .collect();
            array(items)
        }
        "INCR" => {
            let current: i64 = data
                .values
                .get(&args[0])
                .map(|v| String::from_utf8_lossy(v).parse().unwrap_or(0))
                .unwrap_or(0);
            let next = current + 1;
            data.values.insert(args[0].clone(), next.to_string().into_bytes());
            integer(next)
        }
        "PTTL" => match (data.values.contains_key(&args[0]), data.ttls.get(&args[0])) {
            (false, _) => integer(-2),
            (true, None) => integer(-1),
            (true, Some(ms)) => integer(*ms as i64),
        },
        "SCAN" => {
            let cursor: usize = String::from_utf8_lossy(&args[0]).parse().unwrap_or(0);
            let prefix = args
                .iter()
                .position(|a| a.eq_ignore_ascii_case(b"MATCH"))
                .map(|i| literal_prefix(&args[i + 1]))
                .unwrap_or_default();
            let matching: Vec<Vec<u8>> = data
                .values
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            let page: Vec<Vec<u8>> = matching
                .iter()
                .skip(cursor)
                .take(PAGE)
                .map(|k| bulk(Some(k.clone())))
                .collect();
            let next = if cursor + PAGE >= matching.len() {
                0
            } else {
                cursor + PAGE
            };
            array(vec![bulk(Some(next.to_string().into_bytes())), array(page)])
        }
        other => error(&format!("ERR unknown command '{other}'")),
    }
}

/// Unescape a glob made of a literal prefix followed by `*`.
fn literal_prefix(pattern: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut escaped = false;
    for &b in pattern {
        match (escaped, b) {
            (true, _) => {
                out.push(b);
                escaped = false;
            }
            (false, b'\\') => escaped = true,
            (false, b'*') => break,
            (false, _) => out.push(b),
        }
    }
    out
}

fn simple(s: &str) -> Vec<u8> {
    format!("+{s}\r\n").into_bytes()
}

fn error(s: &str) -> Vec<u8> {
    format!("-{s}\r\n").into_bytes()
}

fn integer(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

fn bulk(value: Option<Vec<u8>>) -> Vec<u8> {
    match value {
        None => b"$-1\r\n".to_vec(),
        Some(v) => {
            let mut out = format!("${}\r\n", v.len()).into_bytes();
            out.extend_from_slice(&v);
            out.extend_from_slice(b"\r\n");
            out
        }
    }
}

fn array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend_from_slice(&item);
    }
    out
}
