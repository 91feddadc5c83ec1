//! CDP Transport Layer
//!
//! Speaks the DevTools protocol to Chrome over a plain WebSocket. One reader
//! thread routes responses back to the awaiting command by message id.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::Child;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Upper bound on a single command round trip
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// How long Chrome gets to exit on its own after Browser.close
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// A command waiting for its response
type PendingRequest = oneshot::Sender<Result<Value>>;
type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;

/// Minimal RFC 6455 framing, client side
pub(crate) mod ws {
    use std::io::{self, Read};

    pub const OPCODE_CONTINUATION: u8 = 0x0;
    pub const OPCODE_TEXT: u8 = 0x1;
    pub const OPCODE_BINARY: u8 = 0x2;
    pub const OPCODE_CLOSE: u8 = 0x8;
    pub const OPCODE_PING: u8 = 0x9;
    pub const OPCODE_PONG: u8 = 0xA;

    /// One decoded frame
    #[derive(Debug, PartialEq, Eq)]
    pub struct Frame {
        pub fin: bool,
        pub opcode: u8,
        pub payload: Vec<u8>,
    }

    /// Encode a single final frame. Client frames are always masked.
    pub fn encode(opcode: u8, data: &[u8], mask: [u8; 4]) -> Vec<u8> {
        let len = data.len();
        let mut frame = Vec::with_capacity(14 + len);
        frame.push(0x80 | (opcode & 0x0F));

        if len < 126 {
            frame.push(0x80 | len as u8);
        } else if len <= u16::MAX as usize {
            frame.push(0x80 | 126);
            frame.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            frame.push(0x80 | 127);
            frame.extend_from_slice(&(len as u64).to_be_bytes());
        }

        frame.extend_from_slice(&mask);
        frame.extend(data.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        frame
    }

    /// Read one frame, unmasking if the peer masked it
    pub fn read_frame<R: Read>(stream: &mut R) -> io::Result<Frame> {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header)?;

        let fin = header[0] & 0x80 != 0;
        let opcode = header[0] & 0x0F;
        let masked = header[1] & 0x80 != 0;
        let len = match header[1] & 0x7F {
            126 => {
                let mut ext = [0u8; 2];
                stream.read_exact(&mut ext)?;
                u16::from_be_bytes(ext) as usize
            }
            127 => {
                let mut ext = [0u8; 8];
                stream.read_exact(&mut ext)?;
                usize::try_from(u64::from_be_bytes(ext))
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame too large"))?
            }
            n => n as usize,
        };

        let mask = if masked {
            let mut m = [0u8; 4];
            stream.read_exact(&mut m)?;
            Some(m)
        } else {
            None
        };

        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload)?;
        if let Some(mask) = mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        Ok(Frame {
            fin,
            opcode,
            payload,
        })
    }

    /// Reassembles fragmented data messages
    #[derive(Default)]
    pub struct Assembler {
        buffer: Vec<u8>,
        in_message: bool,
    }

    impl Assembler {
        /// Feed a data or continuation frame; returns the message once complete
        pub fn push(&mut self, frame: Frame) -> Option<Vec<u8>> {
            match frame.opcode {
                OPCODE_TEXT | OPCODE_BINARY if frame.fin && !self.in_message => {
                    Some(frame.payload)
                }
                OPCODE_TEXT | OPCODE_BINARY => {
                    self.buffer = frame.payload;
                    self.in_message = true;
                    None
                }
                OPCODE_CONTINUATION if self.in_message => {
                    self.buffer.extend_from_slice(&frame.payload);
                    if frame.fin {
                        self.in_message = false;
                        Some(std::mem::take(&mut self.buffer))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
    }
}

/// CDP Transport - sends commands and receives responses via WebSocket
pub struct Transport {
    /// The Chrome child process
    child: Mutex<Child>,
    /// Shared with the reader thread, which answers pings
    writer: Arc<Mutex<TcpStream>>,
    next_id: AtomicU64,
    pending: PendingMap,
}

impl Transport {
    /// Connect to Chrome's DevTools WebSocket and start the reader thread
    pub fn new(child: Child, ws_url: &str) -> Result<Self> {
        let url = ws_url.trim_start_matches("ws://");
        let (host_port, path) = url.split_once('/').unwrap_or((url, ""));

        let mut stream = TcpStream::connect(host_port)
            .map_err(|e| Error::transport_io("Failed to connect to Chrome", e))?;
        handshake(&mut stream, host_port, path)?;
        tracing::debug!("WebSocket connected to {}", ws_url);

        let reader_stream = stream
            .try_clone()
            .map_err(|e| Error::transport_io("Failed to clone stream", e))?;

        let writer = Arc::new(Mutex::new(stream));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_writer = Arc::clone(&writer);
        let reader_pending = Arc::clone(&pending);
        std::thread::Builder::new()
            .name("cdp-reader".into())
            .spawn(move || reader_loop(reader_stream, reader_writer, reader_pending))
            .map_err(|e| Error::transport_io("Failed to spawn reader thread", e))?;

        Ok(Self {
            child: Mutex::new(child),
            writer,
            next_id: AtomicU64::new(1),
            pending,
        })
    }

    /// Send a CDP command, optionally addressed to an attached session
    pub async fn send<C, R>(&self, session_id: Option<&str>, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": serde_json::to_value(params)?
        });
        if let Some(session_id) = session_id {
            msg["sessionId"] = Value::String(session_id.to_string());
        }
        let data = serde_json::to_vec(&msg)?;

        let frame = ws::encode(ws::OPCODE_TEXT, &data, rand::random());
        if let Err(e) = write_all(&self.writer, &frame) {
            lock(&self.pending).remove(&id);
            return Err(Error::transport_io("WebSocket write failed", e));
        }

        tracing::trace!("Sent CDP command: {} (id={})", method, id);

        let result = match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => return Err(Error::transport("Response channel closed")),
            Err(_) => {
                lock(&self.pending).remove(&id);
                return Err(Error::Timeout(format!(
                    "{} got no response within {}s",
                    method,
                    COMMAND_TIMEOUT.as_secs()
                )));
            }
        };

        let value = result.map_err(|e| match e {
            Error::Cdp { code, message, .. } => Error::cdp(method, code, message),
            other => other,
        })?;
        Ok(serde_json::from_value(value)?)
    }

    /// Close the WebSocket and wait for Chrome to exit
    pub async fn close(&self) -> Result<()> {
        let _ = write_all(
            &self.writer,
            &ws::encode(ws::OPCODE_CLOSE, &[], rand::random()),
        );

        // Chrome writes the profile (cookies, session) on a clean exit
        let deadline = tokio::time::Instant::now() + CLOSE_GRACE;
        loop {
            let exited = matches!(lock(&self.child).try_wait(), Ok(Some(_)));
            if exited {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tracing::debug!("Chrome still running after {}s, killing it", CLOSE_GRACE.as_secs());
        let mut child = lock(&self.child);
        let _ = child.kill();
        let _ = child.wait();
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_all(writer: &Mutex<TcpStream>, frame: &[u8]) -> std::io::Result<()> {
    let mut stream = lock(writer);
    stream.write_all(frame)?;
    stream.flush()
}

fn handshake(stream: &mut TcpStream, host_port: &str, path: &str) -> Result<()> {
    let key = base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        rand::random::<[u8; 16]>(),
    );

    let request = format!(
        "GET /{} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        path, host_port, key
    );
    stream
        .write_all(request.as_bytes())
        .map_err(|e| Error::transport_io("Handshake write failed", e))?;

    // Read byte-wise up to the blank line so no frame bytes are swallowed
    let mut response = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        let n = stream
            .read(&mut byte)
            .map_err(|e| Error::transport_io("Handshake read failed", e))?;
        if n == 0 || response.len() > 8192 {
            break;
        }
        response.push(byte[0]);
    }

    let status_line = String::from_utf8_lossy(&response);
    let status_line = status_line.lines().next().unwrap_or_default();
    if !status_line.contains(" 101") {
        return Err(Error::transport(format!(
            "WebSocket handshake failed: {}",
            status_line
        )));
    }
    Ok(())
}

/// Route one decoded CDP message to its waiting command
fn dispatch(text: &[u8], pending: &PendingMap) {
    let msg: Value = match serde_json::from_slice(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Failed to parse CDP message: {}", e);
            return;
        }
    };

    let Some(id) = msg.get("id").and_then(Value::as_u64) else {
        // Events are not consumed; waits poll the page instead
        if let Some(method) = msg.get("method").and_then(Value::as_str) {
            tracing::trace!("CDP event: {}", method);
        }
        return;
    };

    let result = match msg.get("error") {
        Some(error) => Err(Error::cdp(
            "unknown",
            error.get("code").and_then(Value::as_i64).unwrap_or(-1),
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        )),
        None => Ok(msg.get("result").cloned().unwrap_or(json!({}))),
    };

    match lock(pending).remove(&id) {
        Some(sender) => {
            let _ = sender.send(result);
        }
        None => tracing::trace!("Response for unknown id: {}", id),
    }
}

fn reader_loop(mut stream: TcpStream, writer: Arc<Mutex<TcpStream>>, pending: PendingMap) {
    let mut assembler = ws::Assembler::default();

    loop {
        let frame = match ws::read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("WebSocket read error: {}", e);
                break;
            }
        };

        match frame.opcode {
            ws::OPCODE_PING => {
                let pong = ws::encode(ws::OPCODE_PONG, &frame.payload, rand::random());
                let _ = write_all(&writer, &pong);
            }
            ws::OPCODE_CLOSE => {
                tracing::debug!("WebSocket closed by Chrome");
                break;
            }
            ws::OPCODE_PONG => {}
            _ => {
                if let Some(message) = assembler.push(frame) {
                    dispatch(&message, &pending);
                }
            }
        }
    }

    // Fail anything still waiting so callers don't sit out the full timeout
    for (_, sender) in lock(&pending).drain() {
        let _ = sender.send(Err(Error::transport("Connection to Chrome lost")));
    }
    tracing::debug!("CDP reader loop ended");
}

#[cfg(test)]
mod tests {
    use super::ws::*;
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_masked_frame_decodes() {
        let data = br#"{"id":1,"method":"Page.enable"}"#;
        let bytes = encode(OPCODE_TEXT, data, [0x12, 0x34, 0x56, 0x78]);
        assert_eq!(bytes[0], 0x81);
        assert_eq!(bytes[1] & 0x80, 0x80);

        let frame = read_frame(&mut Cursor::new(bytes)).unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OPCODE_TEXT);
        assert_eq!(frame.payload, data);
    }

    #[test]
    fn test_extended_lengths() {
        for len in [125usize, 126, 65_535, 65_536] {
            let data = vec![b'x'; len];
            let bytes = encode(OPCODE_TEXT, &data, [1, 2, 3, 4]);
            let frame = read_frame(&mut Cursor::new(bytes)).unwrap();
            assert_eq!(frame.payload.len(), len);
        }
    }

    #[test]
    fn test_unmasked_server_frame() {
        let bytes = vec![0x81, 0x02, b'o', b'k'];
        let frame = read_frame(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(frame.payload, b"ok");
    }

    #[test]
    fn test_fragmented_message_reassembled() {
        let mut assembler = Assembler::default();
        let first = Frame {
            fin: false,
            opcode: OPCODE_TEXT,
            payload: b"{\"id\":".to_vec(),
        };
        let last = Frame {
            fin: true,
            opcode: OPCODE_CONTINUATION,
            payload: b"7}".to_vec(),
        };
        assert_eq!(assembler.push(first), None);
        assert_eq!(assembler.push(last), Some(b"{\"id\":7}".to_vec()));
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_id() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx_ok, rx_ok) = oneshot::channel();
        let (tx_err, rx_err) = oneshot::channel();
        lock(&pending).insert(3, tx_ok);
        lock(&pending).insert(4, tx_err);

        dispatch(br#"{"id":3,"result":{"frameId":"F"}}"#, &pending);
        dispatch(
            br#"{"id":4,"error":{"code":-32000,"message":"Cannot find context"}}"#,
            &pending,
        );
        dispatch(br#"{"method":"Page.loadEventFired","params":{}}"#, &pending);

        assert_eq!(rx_ok.await.unwrap().unwrap()["frameId"], "F");
        assert!(matches!(
            rx_err.await.unwrap(),
            Err(Error::Cdp { code: -32000, .. })
        ));
        assert!(lock(&pending).is_empty());
    }
}
