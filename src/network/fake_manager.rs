//! In-memory treasure manager for tests.
//!
//! Speaks the wire protocol over `tokio::io::duplex`. Sessions are shared by
//! every connection made from the same [`FakeManager`], so credentials can be
//! resumed on a fresh connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::map::{Coordinate, MAP_HEIGHT, MAP_WIDTH};
use crate::protocol::{
    decode_header, encode_response, input_lengths, Command, Direction, Frame, Message, Param,
    SessionCommand, HEADER_SIZE, PRIVATE_ID_LEN, PRIVATE_ID_OFFSET, PUBLIC_ID_LEN, SCRATCH_SIZE,
};

const FAILURE: u64 = 1;

#[derive(Default)]
struct StoredSession {
    private_id: Vec<u8>,
    treasures: HashMap<Vec<u8>, Vec<u8>>,
    destroyed: bool,
}

#[derive(Default)]
struct Store {
    sessions: HashMap<Vec<u8>, StoredSession>,
    created: u64,
}

#[derive(Clone, Default)]
pub struct FakeManager {
    store: Arc<Mutex<Store>>,
}

/// Per-connection state
#[derive(Default)]
struct Conn {
    session: Option<Vec<u8>>,
    open: Option<Vec<u8>>,
}

impl FakeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection served by a background task
    pub fn connect(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let manager = self.clone();
        tokio::spawn(async move { manager.serve(server).await });
        client
    }

    async fn serve(self, mut stream: DuplexStream) {
        let mut conn = Conn::default();
        loop {
            let mut header = [0u8; HEADER_SIZE];
            if stream.read_exact(&mut header).await.is_err() {
                return;
            }
            let message = decode_header(&header).expect("fake manager: malformed request");
            let lengths = input_lengths(&message).expect("fake manager: oversized request");

            let mut inputs = [Bytes::new(), Bytes::new()];
            for (slot, len) in lengths.into_iter().enumerate() {
                let mut payload = vec![0u8; len];
                if stream.read_exact(&mut payload).await.is_err() {
                    return;
                }
                inputs[slot] = Bytes::from(payload);
            }

            let reply = self.handle(&mut conn, message, &inputs);
            let mut buf = BytesMut::new();
            encode_response(&reply, &mut buf).expect("fake manager: bad reply");
            if stream.write_all(&buf).await.is_err() {
                return;
            }
        }
    }

    fn handle(&self, conn: &mut Conn, message: Message, inputs: &[Bytes; 2]) -> Frame {
        let mut store = self.store.lock().unwrap();
        let mut reply = message;
        let mut output = [Bytes::new(), Bytes::new()];

        match message.session_command {
            SessionCommand::Open => {
                let status = match message.params[0] {
                    Param::Memref {
                        direction: Direction::Output,
                        ..
                    } => {
                        store.created += 1;
                        let public_id = format!("PUB{:08}", store.created).into_bytes();
                        let private_id = format!("{:0>31}", store.created).into_bytes();
                        let mut scratch = vec![0u8; SCRATCH_SIZE];
                        scratch[..PUBLIC_ID_LEN].copy_from_slice(&public_id);
                        scratch[PRIVATE_ID_OFFSET..PRIVATE_ID_OFFSET + PRIVATE_ID_LEN]
                            .copy_from_slice(&private_id);
                        output[0] = Bytes::from(scratch);
                        store.sessions.insert(
                            public_id.clone(),
                            StoredSession {
                                private_id,
                                ..Default::default()
                            },
                        );
                        conn.session = Some(public_id);
                        0
                    }
                    _ => {
                        let scratch = &inputs[0];
                        let public_id = scratch[..PUBLIC_ID_LEN].to_vec();
                        let private_id =
                            &scratch[PRIVATE_ID_OFFSET..PRIVATE_ID_OFFSET + PRIVATE_ID_LEN];
                        match store.sessions.get(&public_id) {
                            Some(s) if !s.destroyed && s.private_id == private_id => {
                                conn.session = Some(public_id);
                                0
                            }
                            _ => FAILURE,
                        }
                    }
                };
                reply.params[1] = Param::value(Direction::Output, status, 0);
            }
            SessionCommand::Close => {
                if let Some(public_id) = conn.session.take() {
                    if let Some(s) = store.sessions.get_mut(&public_id) {
                        s.destroyed = true;
                    }
                }
                conn.open = None;
                reply.params[0] = Param::value(Direction::Output, 0, 0);
            }
            SessionCommand::Invoke => {
                let session = conn
                    .session
                    .as_ref()
                    .and_then(|id| store.sessions.get_mut(id));
                let (status_slot, status) = match (session, message.command) {
                    (None, Some(Command::Open | Command::Store | Command::Retrieve)) => {
                        (1, FAILURE)
                    }
                    (None, _) => (0, FAILURE),
                    (Some(session), Some(command)) => {
                        Self::invoke(session, conn, command, inputs, &message, &mut output)
                    }
                    (Some(_), None) => (0, FAILURE),
                };
                reply.params[status_slot] = Param::value(Direction::Output, status, 0);
            }
        }

        // Output memrefs are always sent at their declared size
        for (slot, param) in reply.params.iter().enumerate() {
            let len = param.output_len() as usize;
            if output[slot].len() != len {
                output[slot] = Bytes::from(vec![0u8; len]);
            }
        }

        let mut frame = Frame::new(reply);
        frame.payloads = output;
        frame
    }

    fn invoke(
        session: &mut StoredSession,
        conn: &mut Conn,
        command: Command,
        inputs: &[Bytes; 2],
        message: &Message,
        output: &mut [Bytes; 2],
    ) -> (usize, u64) {
        match command {
            Command::Open => {
                if conn.open.is_some() {
                    return (1, FAILURE);
                }
                let name: Vec<u8> = inputs[0].iter().copied().take_while(|b| *b != 0).collect();
                session.treasures.entry(name.clone()).or_default();
                conn.open = Some(name);
                (1, 0)
            }
            Command::Store => {
                let Some(data) = conn.open.as_ref().and_then(|n| session.treasures.get_mut(n))
                else {
                    return (1, FAILURE);
                };
                // Overwrites from the start without truncating
                let input = &inputs[0];
                if data.len() < input.len() {
                    data.resize(input.len(), 0);
                }
                data[..input.len()].copy_from_slice(input);
                (1, 0)
            }
            Command::Retrieve => {
                let len = message.params[0].output_len() as usize;
                let mut out = vec![0u8; len];
                let Some(data) = conn.open.as_ref().and_then(|n| session.treasures.get(n)) else {
                    output[0] = Bytes::from(out);
                    return (1, FAILURE);
                };
                let n = len.min(data.len());
                out[..n].copy_from_slice(&data[..n]);
                output[0] = Bytes::from(out);
                (1, 0)
            }
            Command::Map => {
                let Some(name) = conn.open.clone() else {
                    return (0, FAILURE);
                };
                let marks: Vec<Coordinate> = session
                    .treasures
                    .keys()
                    .filter_map(|k| Coordinate::from_name(k))
                    .collect();
                session.treasures.insert(name, render(&marks));
                (0, 0)
            }
            Command::Check => match conn.open.as_ref().and_then(|n| session.treasures.get(n)) {
                Some(data) => (0, data.len() as u64),
                None => (0, FAILURE),
            },
            Command::Close => match conn.open.take() {
                Some(_) => (0, 0),
                None => (0, FAILURE),
            },
        }
    }
}

/// Island of `#` in a sea of `~`, with `$` on every treasure
fn render(marks: &[Coordinate]) -> Vec<u8> {
    let mut out = String::with_capacity(MAP_HEIGHT * (MAP_WIDTH + 1));
    for row in 0..MAP_HEIGHT {
        for col in 0..MAP_WIDTH {
            let y = (row as f64 - MAP_HEIGHT as f64 / 2.0) / (MAP_HEIGHT as f64 / 2.0);
            let x = (col as f64 - MAP_WIDTH as f64 / 2.0) / (MAP_WIDTH as f64 / 2.0);
            let marked = marks
                .iter()
                .any(|c| c.row as usize == row && c.col as usize == col);
            out.push(if marked {
                '$'
            } else if 1.0 - (x * x * 1.5 + y * y * 2.0) >= 0.0 {
                '#'
            } else {
                '~'
            });
        }
        out.push('\n');
    }
    out.into_bytes()
}
