//! Scripted fake server shared by the driver tests.
#![expect(dead_code, reason = "each test binary uses a subset of the helpers")]

use std::collections::VecDeque;

pub fn msg(code: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![code];
    out.extend_from_slice(&(payload.len() as u32 + 4).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn copy_response(code: u8, format: u8, columns: u16) -> Vec<u8> {
    let mut payload = vec![format];
    payload.extend_from_slice(&columns.to_be_bytes());
    for _ in 0..columns {
        payload.extend_from_slice(&u16::from(format).to_be_bytes());
    }
    msg(code, &payload)
}

pub fn copy_out_response(columns: u16) -> Vec<u8> {
    copy_response(b'H', 0, columns)
}

pub fn copy_in_response(columns: u16) -> Vec<u8> {
    copy_response(b'G', 0, columns)
}

pub fn copy_both_response() -> Vec<u8> {
    copy_response(b'W', 1, 0)
}

pub fn copy_data(data: &[u8]) -> Vec<u8> {
    msg(b'd', data)
}

pub fn copy_done() -> Vec<u8> {
    msg(b'c', b"")
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    msg(b'C', format!("{tag}\0").as_bytes())
}

pub fn empty_query_response() -> Vec<u8> {
    msg(b'I', b"")
}

pub fn ready() -> Vec<u8> {
    msg(b'Z', b"I")
}

pub fn error(code: &str, message: &str) -> Vec<u8> {
    msg(
        b'E',
        format!("SERROR\0VERROR\0C{code}\0M{message}\0\0").as_bytes(),
    )
}

pub fn notice(message: &str) -> Vec<u8> {
    msg(b'N', format!("SNOTICE\0C00000\0M{message}\0\0").as_bytes())
}

pub fn notification(pid: u32, channel: &str, payload: &str) -> Vec<u8> {
    let mut body = pid.to_be_bytes().to_vec();
    body.extend_from_slice(format!("{channel}\0{payload}\0").as_bytes());
    msg(b'A', &body)
}

/// A frontend message as the server saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub code: u8,
    pub payload: Vec<u8>,
}

impl Sent {
    pub fn query(sql: &str) -> Self {
        Self {
            code: b'Q',
            payload: format!("{sql}\0").into_bytes(),
        }
    }

    pub fn copy_data(data: &[u8]) -> Self {
        Self {
            code: b'd',
            payload: data.to_vec(),
        }
    }

    pub fn copy_done() -> Self {
        Self {
            code: b'c',
            payload: Vec::new(),
        }
    }

    pub fn copy_fail(message: &str) -> Self {
        Self {
            code: b'f',
            payload: format!("{message}\0").into_bytes(),
        }
    }

    pub fn terminate() -> Self {
        Self {
            code: b'X',
            payload: Vec::new(),
        }
    }
}

/// Server replies, each released when the client sends the message it waits for.
#[derive(Debug, Default)]
pub struct Script {
    steps: VecDeque<(u8, Vec<u8>)>,
    incoming: Vec<u8>,
    pub sent: Vec<Sent>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with the concatenation of `messages` once the client sends `code`.
    pub fn on(mut self, code: u8, messages: &[Vec<u8>]) -> Self {
        self.steps.push_back((code, messages.concat()));
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.steps.is_empty()
    }

    /// Feed bytes written by the client. Returns the replies they release.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<u8> {
        self.incoming.extend_from_slice(bytes);
        let mut replies = Vec::new();
        while self.incoming.len() >= 5 {
            let len = u32::from_be_bytes([
                self.incoming[1],
                self.incoming[2],
                self.incoming[3],
                self.incoming[4],
            ]) as usize;
            if self.incoming.len() < 1 + len {
                break;
            }
            let frame: Vec<u8> = self.incoming.drain(..1 + len).collect();
            let code = frame[0];
            self.sent.push(Sent {
                code,
                payload: frame[5..].to_vec(),
            });
            if self.steps.front().is_some_and(|(trigger, _)| *trigger == code)
                && let Some((_, reply)) = self.steps.pop_front()
            {
                replies.extend(reply);
            }
        }
        replies
    }
}
