//! Inbound reader thread.
//!
//! Owns the listening socket. Each [`Reader::start`] spawns a thread that
//! accepts exactly one launcher connection and pumps its bytes through a
//! [`FrameBuffer`]. Complete frame bodies cross to the update thread over an
//! mpsc channel; parsing into [`InboundMessage`]s happens on the update
//! thread in [`Reader::drain`].
//!
//! ```text
//!  launcher ──TCP──► reader thread ──Vec<u8>──► drain() ──► InboundMessage
//!                    (FrameBuffer)     mpsc       (update thread)
//! ```
//!
//! Faults (peer closed, read error, oversized frame) latch a sticky error
//! flag. The owner polls [`Reader::has_error`] and restarts.

use std::io::{ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use super::codec::{InboundMessage, LengthPrefix};
use super::frame_buffer::FrameBuffer;
use crate::constants::{ACCEPT_POLL_INTERVAL, MAX_FRAME_BODY, READER_IDLE_SLEEP, READ_CHUNK_SIZE};

/// Flags shared between the owner and the reader thread.
#[derive(Debug, Default)]
struct ReaderFlags {
    running: AtomicBool,
    connected: AtomicBool,
    error: AtomicBool,
}

/// Background reader for launcher → app frames.
pub struct Reader {
    listener: TcpListener,
    prefix: LengthPrefix,
    flags: Arc<ReaderFlags>,
    frame_rx: Option<mpsc::Receiver<Vec<u8>>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("addr", &self.listener.local_addr().ok())
            .field("running", &self.flags.running.load(Ordering::SeqCst))
            .field("connected", &self.flags.connected.load(Ordering::SeqCst))
            .field("error", &self.flags.error.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Reader {
    /// Binds the listening socket. Port 0 picks a free port.
    pub fn bind(addr: &str, prefix: LengthPrefix) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).with_context(|| format!("Failed to bind reader on {addr}"))?;
        listener
            .set_nonblocking(true)
            .context("Failed to make reader listener non-blocking")?;
        log::info!("[Reader] Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            prefix,
            flags: Arc::new(ReaderFlags::default()),
            frame_rx: None,
            thread_handle: None,
        })
    }

    /// Address the reader is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Starts (or restarts) the reader thread.
    ///
    /// Any previous thread is stopped first and its buffered frames dropped.
    pub fn start(&mut self) -> Result<()> {
        self.stop();

        let listener = self
            .listener
            .try_clone()
            .context("Failed to clone reader listener")?;
        let (frame_tx, frame_rx) = mpsc::channel();
        let flags = Arc::clone(&self.flags);
        let prefix = self.prefix;

        flags.error.store(false, Ordering::SeqCst);
        flags.running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("launchlink-reader".to_string())
            .spawn(move || {
                Self::reader_loop(&listener, prefix, &flags, &frame_tx);
                flags.connected.store(false, Ordering::SeqCst);
                flags.running.store(false, Ordering::SeqCst);
            })
            .context("Failed to spawn reader thread")?;

        self.frame_rx = Some(frame_rx);
        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stops and joins the reader thread. Idempotent.
    pub fn stop(&mut self) {
        self.flags.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            log::debug!("[Reader] Stopped");
        }
        self.frame_rx = None;
    }

    /// Whether the reader thread is running.
    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some() && self.flags.running.load(Ordering::SeqCst)
    }

    /// Whether a launcher connection has been accepted.
    pub fn is_connected(&self) -> bool {
        self.flags.connected.load(Ordering::SeqCst)
    }

    /// Sticky fault flag; cleared by the next [`start`](Self::start).
    pub fn has_error(&self) -> bool {
        self.flags.error.load(Ordering::SeqCst)
    }

    /// Takes every complete message received so far, in arrival order.
    pub fn drain(&mut self) -> Vec<InboundMessage> {
        let Some(rx) = &self.frame_rx else {
            return Vec::new();
        };
        rx.try_iter().map(|body| InboundMessage::parse(&body)).collect()
    }

    /// Reader loop - runs on the reader thread.
    fn reader_loop(
        listener: &TcpListener,
        prefix: LengthPrefix,
        flags: &ReaderFlags,
        frame_tx: &mpsc::Sender<Vec<u8>>,
    ) {
        let Some(mut stream) = Self::accept(listener, flags) else {
            return;
        };

        let mut buffer = FrameBuffer::new(MAX_FRAME_BODY, prefix);
        while flags.running.load(Ordering::SeqCst) {
            loop {
                match buffer.next_frame() {
                    Ok(Some(body)) => {
                        if frame_tx.send(body).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("[Reader] {e:#}");
                        flags.error.store(true, Ordering::SeqCst);
                        return;
                    }
                }
            }

            if buffer.free_tail().len() < READ_CHUNK_SIZE {
                buffer.compact();
            }
            let tail = buffer.free_tail();
            let chunk = tail.len().min(READ_CHUNK_SIZE);

            match stream.read(&mut tail[..chunk]) {
                Ok(0) => {
                    log::info!("[Reader] Launcher closed the connection");
                    flags.error.store(true, Ordering::SeqCst);
                    break;
                }
                Ok(n) => buffer.commit(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(READER_IDLE_SLEEP),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    log::warn!("[Reader] Read failed: {e}");
                    flags.error.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }

        let _ = stream.shutdown(Shutdown::Both);
    }

    fn accept(listener: &TcpListener, flags: &ReaderFlags) -> Option<TcpStream> {
        while flags.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        log::warn!("[Reader] Failed to make client socket non-blocking: {e}");
                        flags.error.store(true, Ordering::SeqCst);
                        return None;
                    }
                    log::info!("[Reader] Accepted launcher connection from {peer}");
                    flags.connected.store(true, Ordering::SeqCst);
                    return Some(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) => {
                    log::error!("[Reader] Accept failed: {e}");
                    flags.error.store(true, Ordering::SeqCst);
                    return None;
                }
            }
        }
        None
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::codec::encode;
    use std::io::Write;
    use std::time::{Duration, Instant};

    fn wait_for<T>(mut f: impl FnMut() -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(v) = f() {
                return v;
            }
            assert!(Instant::now() < deadline, "timed out waiting");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn started() -> (Reader, TcpStream) {
        let mut reader = Reader::bind("127.0.0.1:0", LengthPrefix::Three).unwrap();
        reader.start().unwrap();
        let client = TcpStream::connect(reader.local_addr().unwrap()).unwrap();
        wait_for(|| reader.is_connected().then_some(()));
        (reader, client)
    }

    #[test]
    fn test_reads_frames_split_across_writes() {
        let (mut reader, mut client) = started();

        let mut bytes = encode(LengthPrefix::Three, b"SERVERVERSION:6").unwrap();
        bytes.extend(encode(LengthPrefix::Three, br#"STATE_REQUEST:{"a":1}"#).unwrap());
        client.write_all(&bytes[..5]).unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(20));
        client.write_all(&bytes[5..]).unwrap();

        let mut got = Vec::new();
        wait_for(|| {
            got.extend(reader.drain());
            (got.len() == 2).then_some(())
        });
        assert_eq!(got[0].name, "SERVERVERSION");
        assert_eq!(got[0].data, "6");
        assert_eq!(got[1].name, "STATE_REQUEST");
        assert_eq!(got[1].json, Some(serde_json::json!({"a": 1})));
        assert!(!reader.has_error());
    }

    #[test]
    fn test_peer_close_sets_sticky_error() {
        let (reader, client) = started();
        drop(client);
        wait_for(|| reader.has_error().then_some(()));
        assert!(reader.has_error());
    }

    #[test]
    fn test_restart_accepts_a_new_client() {
        let (mut reader, client) = started();
        drop(client);
        wait_for(|| reader.has_error().then_some(()));

        reader.start().unwrap();
        assert!(!reader.has_error());
        let mut client = TcpStream::connect(reader.local_addr().unwrap()).unwrap();
        client
            .write_all(&encode(LengthPrefix::Three, b"CLOUD_CONNECTED:1").unwrap())
            .unwrap();

        let msgs = wait_for(|| {
            let msgs = reader.drain();
            (!msgs.is_empty()).then_some(msgs)
        });
        assert_eq!(msgs[0].name, "CLOUD_CONNECTED");
    }

    #[test]
    fn test_stop_without_client_returns() {
        let mut reader = Reader::bind("127.0.0.1:0", LengthPrefix::Three).unwrap();
        reader.start().unwrap();
        assert!(reader.is_running());
        reader.stop();
        assert!(!reader.is_running());
        assert!(reader.drain().is_empty());
    }
}
