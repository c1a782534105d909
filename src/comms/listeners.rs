//! Inbound surface: newline-delimited JSON messages on a reader.
//!
//! Wire decoding happens upstream; whatever produces [`Message`] values
//! writes one JSON object per line. Each listener runs on its own blocking
//! thread and forwards into the writer's inbox, blocking when it is full.

use std::{
    io::{self, BufRead},
    thread,
};
use tokio::sync::mpsc;

use crate::comms::events::Message;

/// Forward every parseable line of `reader` into `tx`.
///
/// Blank lines are skipped, malformed ones logged and skipped. Stops at EOF,
/// on a read error, or when the inbox is closed. Returns the number of
/// messages forwarded.
pub fn forward_json_lines<R: BufRead>(reader: R, tx: &mpsc::Sender<Message>) -> usize {
    let mut forwarded = 0;
    for (n, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::warn!("listener read failed after {} line(s): {}", n, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(&line) {
            Ok(msg) => {
                if tx.blocking_send(msg).is_err() {
                    log::warn!("writer inbox closed, listener stopping");
                    break;
                }
                forwarded += 1;
            }
            Err(e) => log::warn!("line {}: not a message: {}", n + 1, e),
        }
    }
    forwarded
}

/// Read messages from stdin on a dedicated thread.
pub fn spawn_stdin_listener(tx: mpsc::Sender<Message>) -> io::Result<thread::JoinHandle<usize>> {
    thread::Builder::new()
        .name("stdin-listener".into())
        .spawn(move || {
            log::info!("listener 'stdin' started");
            let forwarded = forward_json_lines(io::stdin().lock(), &tx);
            log::info!("listener 'stdin' exited after {} message(s)", forwarded);
            forwarded
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::events::MessageKind;
    use std::io::Cursor;

    #[test]
    fn skips_blank_and_malformed_lines() {
        let input = concat!(
            r#"{"kind":"data","rx_time_ms_epoch":1,"travel_time_ms":0,"network_id":1,"source_address":2,"destination_address":1,"source_endpoint":1,"destination_endpoint":1,"qos":0}"#,
            "\n\n",
            "not json\n",
            r#"{"kind":"boot","rx_time_ms_epoch":2,"travel_time_ms":0,"network_id":1,"source_address":3,"destination_address":1,"source_endpoint":254,"destination_endpoint":255,"qos":0,"apdu":{"boot_count":1}}"#,
            "\n",
        );
        let (tx, mut rx) = mpsc::channel(8);
        assert_eq!(forward_json_lines(Cursor::new(input), &tx), 2);
        drop(tx);

        assert_eq!(rx.blocking_recv().map(|m| m.kind), Some(MessageKind::Data));
        assert_eq!(rx.blocking_recv().map(|m| m.source_address), Some(3));
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn stops_when_inbox_closes() {
        let line = r#"{"kind":"data","rx_time_ms_epoch":1,"travel_time_ms":0,"network_id":1,"source_address":2,"destination_address":1,"source_endpoint":1,"destination_endpoint":1,"qos":0}"#;
        let input = format!("{line}\n{line}\n");
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        assert_eq!(forward_json_lines(Cursor::new(input), &tx), 0);
    }
}
