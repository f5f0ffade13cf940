//! Sans-I/O session: bytes written by copy-in come back unchanged through copy-out.

mod common;

use common::*;
use zero_pg_copy::{Action, CopyMode, CopyOpts, Session};

fn flush(session: &mut Session) -> Vec<u8> {
    assert_eq!(session.poll_io(), Action::Write);
    let bytes = session.write_buffer().to_vec();
    session.flushed();
    bytes
}

/// Run a copy-in of `rows` and return the frames sent after the query.
fn copy_in(rows: &[&str]) -> Vec<u8> {
    let mut session = Session::new();
    session
        .start_copy("COPY t FROM STDIN", CopyMode::In, &CopyOpts::default())
        .unwrap();
    flush(&mut session);

    for row in rows {
        session.write_copy(row.as_bytes().to_vec()).unwrap();
    }
    session.finish_copy().unwrap();
    assert_eq!(session.poll_io(), Action::Read);

    session.receive(&copy_in_response(1)).unwrap();
    let frames = flush(&mut session);

    let count = format!("COPY {}", rows.len());
    session
        .receive(&[command_complete(&count), ready()].concat())
        .unwrap();
    assert_eq!(
        session.take_copy_outcome().unwrap().unwrap(),
        rows.len() as u64
    );
    frames
}

#[test]
fn chunks_before_confirmation_are_sent_in_order() {
    let frames = copy_in(&["1\n", "2\n", "3\n"]);
    let expected = [
        copy_data(b"1\n"),
        copy_data(b"2\n"),
        copy_data(b"3\n"),
        copy_done(),
    ]
    .concat();
    assert_eq!(frames, expected);
}

#[test]
fn copy_in_frames_replay_through_copy_out() {
    let rows = ["10\talpha\n", "20\tbeta\n", "30\tgamma\n"];
    let frames = copy_in(&rows);
    let server = [
        copy_out_response(2),
        frames,
        command_complete("COPY 3"),
        ready(),
        notice("after"),
    ]
    .concat();

    for split in 0..=server.len() {
        let mut session = Session::new();
        session
            .start_copy("COPY t TO STDOUT", CopyMode::Out, &CopyOpts::default())
            .unwrap();
        flush(&mut session);

        let (head, tail) = server.split_at(split);
        session.receive(head).unwrap();
        session.receive(tail).unwrap();

        let mut data = Vec::new();
        while let Some(chunk) = session.next_chunk().unwrap() {
            data.extend(chunk);
        }
        assert_eq!(data, rows.concat().as_bytes(), "split at {split}");
        assert_eq!(session.take_copy_outcome().unwrap().unwrap(), 3);
        assert!(session.pop_async_message().is_some(), "split at {split}");
    }
}
