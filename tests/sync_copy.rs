//! COPY over the synchronous driver against a scripted server.

mod common;

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use common::*;
use zero_pg_copy::sync::Conn;
use zero_pg_copy::{AsyncMessage, CopyOpts, Error};

/// In-memory stream that answers the client according to a [`Script`].
struct ScriptedStream {
    script: Script,
    readable: VecDeque<u8>,
    max_read: usize,
}

impl ScriptedStream {
    fn new(script: Script) -> Self {
        Self {
            script,
            readable: VecDeque::new(),
            max_read: usize::MAX,
        }
    }

    /// Return at most `n` bytes per read.
    fn trickle(mut self, n: usize) -> Self {
        self.max_read = n;
        self
    }

    fn sent(&self) -> &[Sent] {
        &self.script.sent
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.max_read).min(self.readable.len());
        for (slot, byte) in buf.iter_mut().zip(self.readable.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let replies = self.script.feed(buf);
        self.readable.extend(replies);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn conn(script: Script) -> Conn<ScriptedStream> {
    Conn::new(ScriptedStream::new(script))
}

#[test]
fn copy_out_streams_every_byte() {
    let script = Script::new().on(
        b'Q',
        &[
            copy_out_response(2),
            copy_data(b"1\tapple\n"),
            copy_data(b"2\tbanana\n"),
            copy_done(),
            command_complete("COPY 2"),
            ready(),
        ],
    );
    let stream = ScriptedStream::new(script).trickle(3);
    let mut conn = Conn::with_opts(stream, CopyOpts::default().read_chunk_size(3));

    let (data, rows) = conn
        .copy_out("COPY items TO STDOUT")
        .unwrap()
        .read_to_end()
        .unwrap();
    assert_eq!(data, b"1\tapple\n2\tbanana\n");
    assert_eq!(rows, 2);
    assert_eq!(conn.get_ref().sent(), [Sent::query("COPY items TO STDOUT")]);
}

#[test]
fn copy_out_reports_response_and_rows() {
    let script = Script::new().on(
        b'Q',
        &[
            copy_out_response(3),
            copy_data(b"a\n"),
            copy_done(),
            command_complete("COPY 1"),
            ready(),
        ],
    );
    let mut conn = conn(script);
    let mut copy = conn.copy_out("COPY t TO STDOUT").unwrap();
    assert_eq!(copy.read().unwrap().unwrap(), b"a\n");
    let response = copy.response().unwrap();
    assert_eq!(response.column_formats.len(), 3);
    assert!(!response.is_binary());
    assert_eq!(copy.row_count(), 1);
    assert!(copy.read().unwrap().is_none());
    assert_eq!(copy.finish().unwrap(), 1);
}

#[test]
fn copy_out_server_error_mid_stream() {
    let script = Script::new()
        .on(
            b'Q',
            &[
                copy_out_response(1),
                copy_data(b"1\n"),
                error("22P02", "invalid input syntax"),
                ready(),
            ],
        )
        .on(b'Q', &[command_complete("SELECT 1"), ready()]);
    let mut conn = conn(script);

    let mut copy = conn.copy_out("COPY t TO STDOUT").unwrap();
    let mut data = Vec::new();
    let err = loop {
        match copy.read() {
            Ok(Some(chunk)) => data.extend(chunk),
            Ok(None) => panic!("COPY ended without the server error"),
            Err(err) => break err,
        }
    };
    assert_eq!(data, b"1\n");
    assert_eq!(err.sqlstate(), Some("22P02"));
    drop(copy);

    assert!(!conn.is_broken());
    assert_eq!(conn.query_drop("SELECT 1").unwrap(), Some(1));
}

#[test]
fn copy_out_notices_reach_the_handler() {
    let script = Script::new().on(
        b'Q',
        &[
            copy_out_response(1),
            notice("first"),
            copy_data(b"x\n"),
            notification(42, "jobs", "wake"),
            copy_done(),
            command_complete("COPY 1"),
            ready(),
        ],
    );
    let mut conn = conn(script);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    conn.set_async_message_handler(move |message: &AsyncMessage| {
        sink.lock().unwrap().push(message.clone());
    });

    let (data, _) = conn
        .copy_out("COPY t TO STDOUT")
        .unwrap()
        .read_to_end()
        .unwrap();
    assert_eq!(data, b"x\n");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(matches!(&seen[0], AsyncMessage::Notice(fields) if fields.message.as_deref() == Some("first")));
    assert!(matches!(
        &seen[1],
        AsyncMessage::Notification { pid: 42, channel, .. } if channel == "jobs"
    ));
}

#[test]
fn copy_in_round_trip() {
    let script = Script::new()
        .on(b'Q', &[copy_in_response(2)])
        .on(b'c', &[command_complete("COPY 3"), ready()]);
    let mut conn = conn(script);

    let mut copy = conn.copy_in("COPY items FROM STDIN").unwrap();
    copy.write(b"1\tapple\n").unwrap();
    copy.write(b"").unwrap();
    copy.write(b"2\tbanana\n3\tcherry\n").unwrap();
    assert_eq!(copy.finish().unwrap(), 3);

    assert_eq!(
        conn.get_ref().sent(),
        [
            Sent::query("COPY items FROM STDIN"),
            Sent::copy_data(b"1\tapple\n"),
            Sent::copy_data(b"2\tbanana\n3\tcherry\n"),
            Sent::copy_done(),
        ]
    );
}

#[test]
fn copy_in_waits_for_the_server_when_full() {
    let script = Script::new()
        .on(b'Q', &[copy_in_response(1)])
        .on(b'c', &[command_complete("COPY 2"), ready()]);
    let opts = CopyOpts::default().write_high_water_mark(4);
    let mut conn = conn(script);

    let mut copy = conn.copy_in_with("COPY t FROM STDIN", &opts).unwrap();
    copy.write(b"1234\n").unwrap();
    copy.write(b"5\n").unwrap();
    assert!(copy.response().is_some());
    assert_eq!(copy.finish().unwrap(), 2);

    assert_eq!(
        conn.get_ref().sent()[1..],
        [
            Sent::copy_data(b"1234\n"),
            Sent::copy_data(b"5\n"),
            Sent::copy_done(),
        ]
    );
}

#[test]
fn copy_in_rejected_by_server() {
    let script = Script::new()
        .on(b'Q', &[error("42P01", "relation \"nope\" does not exist"), ready()])
        .on(b'Q', &[command_complete("SELECT 1"), ready()]);
    let mut conn = conn(script);

    let mut copy = conn.copy_in("COPY nope FROM STDIN").unwrap();
    copy.write(b"1\n").unwrap();
    let err = copy.finish().unwrap_err();
    assert_eq!(err.sqlstate(), Some("42P01"));
    assert!(!conn.is_broken());
    assert_eq!(conn.query_drop("SELECT 1").unwrap(), Some(1));
}

#[test]
fn copy_in_abort_surfaces_copy_failure() {
    let script = Script::new()
        .on(b'Q', &[copy_in_response(1)])
        .on(
            b'f',
            &[error("57014", "COPY from stdin failed: bad batch"), ready()],
        )
        .on(b'Q', &[command_complete("SELECT 1"), ready()]);
    let opts = CopyOpts::default().write_high_water_mark(1);
    let mut conn = conn(script);

    let mut copy = conn.copy_in_with("COPY t FROM STDIN", &opts).unwrap();
    copy.write(b"1\n").unwrap();
    copy.write(b"2\n").unwrap();
    assert!(copy.response().is_some());
    let err = copy.abort("bad batch");
    assert_eq!(err.sqlstate(), Some("57014"));
    assert!(err.to_string().contains("COPY from stdin failed"));

    assert_eq!(
        conn.get_ref().sent(),
        [
            Sent::query("COPY t FROM STDIN"),
            Sent::copy_data(b"1\n"),
            Sent::copy_data(b"2\n"),
            Sent::copy_fail("bad batch"),
        ]
    );
    assert!(!conn.is_broken());
    assert_eq!(conn.query_drop("SELECT 1").unwrap(), Some(1));
}

#[test]
fn copy_in_abort_before_response_is_sent_on_confirmation() {
    let script = Script::new()
        .on(b'Q', &[copy_in_response(1)])
        .on(
            b'f',
            &[error("57014", "COPY from stdin failed: too early"), ready()],
        );
    let mut conn = conn(script);

    let mut copy = conn.copy_in("COPY t FROM STDIN").unwrap();
    copy.write(b"1\n").unwrap();
    assert!(copy.response().is_none());
    let err = copy.abort("too early");
    assert_eq!(err.sqlstate(), Some("57014"));
    assert!(err.to_string().contains("COPY from stdin failed"));

    assert_eq!(
        conn.get_ref().sent(),
        [Sent::query("COPY t FROM STDIN"), Sent::copy_fail("too early")]
    );
    assert!(!conn.is_broken());
}

#[test]
fn dropped_copy_in_is_failed_before_next_query() {
    let script = Script::new()
        .on(b'Q', &[copy_in_response(1)])
        .on(
            b'f',
            &[error("57014", "COPY from stdin failed: dropped"), ready()],
        )
        .on(b'Q', &[command_complete("SELECT 1"), ready()]);
    let opts = CopyOpts::default().abort_message("dropped");
    let mut conn = Conn::with_opts(ScriptedStream::new(script), opts);

    {
        let mut copy = conn.copy_in("COPY t FROM STDIN").unwrap();
        copy.write(b"1\n").unwrap();
    }
    assert_eq!(conn.query_drop("SELECT 1").unwrap(), Some(1));
    assert_eq!(
        conn.get_ref().sent(),
        [
            Sent::query("COPY t FROM STDIN"),
            Sent::copy_fail("dropped"),
            Sent::query("SELECT 1"),
        ]
    );
}

#[test]
fn dropped_copy_out_is_drained_before_next_query() {
    let script = Script::new()
        .on(
            b'Q',
            &[
                copy_out_response(1),
                copy_data(b"1\n"),
                copy_data(b"2\n"),
                copy_data(b"3\n"),
                copy_done(),
                command_complete("COPY 3"),
                ready(),
            ],
        )
        .on(b'Q', &[command_complete("SELECT 1"), ready()]);
    let stream = ScriptedStream::new(script).trickle(4);
    let mut conn = Conn::with_opts(stream, CopyOpts::default().read_chunk_size(4));

    {
        let mut copy = conn.copy_out("COPY t TO STDOUT").unwrap();
        assert!(copy.read().unwrap().is_some());
    }
    assert_eq!(conn.query_drop("SELECT 1").unwrap(), Some(1));
    assert!(!conn.is_broken());
}

#[test]
fn copy_both_exchanges_messages() {
    let script = Script::new()
        .on(
            b'Q',
            &[
                copy_both_response(),
                copy_data(b"wal-1"),
                copy_data(b"wal-2"),
                copy_done(),
            ],
        )
        .on(b'c', &[command_complete("START_REPLICATION"), ready()]);
    let opts = CopyOpts::default().align_on_frame(true);
    let mut conn = conn(script);

    let mut copy = conn.copy_both("START_REPLICATION SLOT s PHYSICAL 0/0", &opts).unwrap();
    assert_eq!(copy.read().unwrap().unwrap(), b"wal-1");
    copy.write(b"feedback").unwrap();
    assert_eq!(copy.read().unwrap().unwrap(), b"wal-2");
    assert!(copy.read().unwrap().is_none());
    assert!(copy.response().unwrap().is_binary());
    assert_eq!(copy.finish().unwrap(), 2);

    let sent = conn.get_ref().sent();
    assert_eq!(sent[1], Sent::copy_data(b"feedback"));
    assert_eq!(sent[2], Sent::copy_done());
}

#[test]
fn copy_both_reads_after_closing_write_side() {
    let script = Script::new()
        .on(b'Q', &[copy_both_response(), copy_data(b"wal-1")])
        .on(
            b'c',
            &[
                copy_data(b"wal-2"),
                copy_data(b"wal-3"),
                copy_done(),
                command_complete("START_REPLICATION"),
                ready(),
            ],
        );
    let opts = CopyOpts::default().align_on_frame(true);
    let mut conn = conn(script);

    let mut copy = conn.copy_both("START_REPLICATION SLOT s PHYSICAL 0/0", &opts).unwrap();
    assert_eq!(copy.read().unwrap().unwrap(), b"wal-1");
    copy.close_write().unwrap();
    assert!(copy.write(b"late").is_err());
    assert_eq!(copy.read().unwrap().unwrap(), b"wal-2");
    assert_eq!(copy.read().unwrap().unwrap(), b"wal-3");
    assert!(copy.read().unwrap().is_none());
    assert_eq!(copy.finish().unwrap(), 3);

    assert_eq!(
        conn.get_ref().sent(),
        [
            Sent::query("START_REPLICATION SLOT s PHYSICAL 0/0"),
            Sent::copy_done(),
        ]
    );
}

#[test]
fn copy_both_connection_loss_is_an_error() {
    let script = Script::new().on(b'Q', &[copy_both_response(), copy_data(b"wal-1")]);
    let opts = CopyOpts::default().align_on_frame(true);
    let mut conn = conn(script);

    let mut copy = conn.copy_both("START_REPLICATION SLOT s PHYSICAL 0/0", &opts).unwrap();
    assert_eq!(copy.read().unwrap().unwrap(), b"wal-1");
    let err = copy.read().unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(err.to_string().contains("Connection terminated unexpectedly"));
    drop(copy);

    assert!(conn.is_broken());
    assert!(matches!(
        conn.query_drop("SELECT 1"),
        Err(Error::ConnectionBroken)
    ));
}

#[test]
fn close_sends_terminate() {
    let mut conn = conn(Script::new().on(b'Q', &[empty_query_response(), ready()]));
    conn.ping().unwrap();
    assert_eq!(conn.get_ref().sent(), [Sent::query("")]);
    conn.close().unwrap();
}
