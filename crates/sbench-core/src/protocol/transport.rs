//! Framed connection transport.
//!
//! Sends are atomic (a lock serializes whole frames) and return once the
//! frame is handed to the OS. Receives either block on the calling thread or,
//! after `install_channel`, are pumped by a background reader thread into a
//! tagged event channel. The switch is one-way and allowed exactly once.

use std::io::Write as _;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::error::ProtocolError;
use super::frame::{read_frame, write_frame};
use super::message::{decode, encode, Encoding, Received};
use super::opcode::Opcode;

/// What the background reader delivers for one connection.
#[derive(Debug)]
pub enum SessionEvent {
    Message(Received),
    /// The peer half-closed or the stream failed; no further events follow.
    Closed,
}

enum ReaderSlot {
    Blocking(TcpStream),
    Channel,
}

pub struct Transport {
    peer: String,
    encoding: Encoding,
    writer: Mutex<TcpStream>,
    reader: Mutex<ReaderSlot>,
}

impl Transport {
    /// Dial `addr` and wrap the stream. `encoding` is the default used by
    /// `send`; both peers must be constructed with the same one.
    pub fn connect(addr: impl ToSocketAddrs, encoding: Encoding) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream, encoding)
    }

    /// Wrap an already-accepted stream (foreman side).
    pub fn from_stream(stream: TcpStream, encoding: Encoding) -> Result<Self, ProtocolError> {
        stream.set_nodelay(true)?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".into());
        let reader = stream.try_clone()?;
        Ok(Self {
            peer,
            encoding,
            writer: Mutex::new(stream),
            reader: Mutex::new(ReaderSlot::Blocking(reader)),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send one message in the transport's default encoding.
    pub fn send<T: Serialize>(&self, opcode: Opcode, data: &T) -> Result<(), ProtocolError> {
        self.send_inner(opcode, false, data, self.encoding)
    }

    /// Send one message flagged as an error reply.
    pub fn send_error<T: Serialize>(&self, opcode: Opcode, data: &T) -> Result<(), ProtocolError> {
        self.send_inner(opcode, true, data, self.encoding)
    }

    /// Send with an explicit encoding, overriding the connection default.
    /// Bulk stat uploads use this to put MessagePack on a JSON control plane.
    pub fn send_with<T: Serialize>(
        &self,
        opcode: Opcode,
        data: &T,
        encoding: Encoding,
    ) -> Result<(), ProtocolError> {
        self.send_inner(opcode, false, data, encoding)
    }

    fn send_inner<T: Serialize>(
        &self,
        opcode: Opcode,
        is_error: bool,
        data: &T,
        encoding: Encoding,
    ) -> Result<(), ProtocolError> {
        let payload = encode(opcode, is_error, data, encoding)?;
        let mut stream = self.writer.lock().unwrap();
        write_frame(&mut *stream, &payload)?;
        stream.flush()?;
        Ok(())
    }

    /// Block until one complete message arrives. Returns `None` when the peer
    /// half-closed. Fails once the connection has been switched to channel
    /// delivery.
    pub fn receive(&self) -> Result<Option<Received>, ProtocolError> {
        let mut slot = self.reader.lock().unwrap();
        match &mut *slot {
            ReaderSlot::Blocking(stream) => match read_frame(stream)? {
                Some(payload) => Ok(Some(decode(payload)?)),
                None => Ok(None),
            },
            ReaderSlot::Channel => Err(ProtocolError::ChannelInstalled),
        }
    }

    /// Switch to channel delivery: a background thread reads frames and sends
    /// `(tag, event)` pairs until the stream closes. Allowed exactly once.
    pub fn install_channel(
        &self,
        tag: usize,
        tx: UnboundedSender<(usize, SessionEvent)>,
    ) -> Result<(), ProtocolError> {
        let mut slot = self.reader.lock().unwrap();
        let stream = match std::mem::replace(&mut *slot, ReaderSlot::Channel) {
            ReaderSlot::Blocking(stream) => stream,
            ReaderSlot::Channel => return Err(ProtocolError::ChannelInstalled),
        };
        drop(slot);

        let peer = self.peer.clone();
        std::thread::Builder::new()
            .name(format!("transport-rx-{}", tag))
            .spawn(move || {
                let mut stream = stream;
                loop {
                    match read_frame(&mut stream) {
                        Ok(Some(payload)) => match decode(payload) {
                            Ok(msg) => {
                                if tx.send((tag, SessionEvent::Message(msg))).is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(peer = %peer, "dropping session, bad frame: {}", e);
                                let _ = tx.send((tag, SessionEvent::Closed));
                                return;
                            }
                        },
                        Ok(None) => {
                            let _ = tx.send((tag, SessionEvent::Closed));
                            return;
                        }
                        Err(e) => {
                            tracing::debug!(peer = %peer, "receive loop ended: {}", e);
                            let _ = tx.send((tag, SessionEvent::Closed));
                            return;
                        }
                    }
                }
            })
            .expect("spawn transport reader");
        Ok(())
    }

    /// Shut the socket down in both directions, unblocking any reader.
    pub fn shutdown(&self) {
        if let Ok(stream) = self.writer.lock() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
