//! Request handling against a hosted log.

use inkshare_core::shared_log::MemoryLog;
use inkshare_core::shared_log::protocol::{ClientMessage, RequestId, ServerMessage};
use inkshare_core::LogError;

fn failed(request_id: RequestId, error: LogError) -> ServerMessage {
    ServerMessage::Error {
        request_id: Some(request_id),
        message: error.to_string(),
    }
}

/// Apply one request to `log` and build the reply.
///
/// `Subscribe` is handled by the connection itself and yields `None`.
pub fn handle_request(log: &MemoryLog, msg: ClientMessage) -> Option<ServerMessage> {
    let reply = match msg {
        ClientMessage::Subscribe { .. } => return None,
        ClientMessage::Append { request_id, record } => match log.append_record(record) {
            Ok(record_id) => ServerMessage::Appended { request_id, record_id },
            Err(e) => failed(request_id, e),
        },
        ClientMessage::Remove { request_id, record_id } => match log.remove_record(&record_id) {
            Ok(()) => ServerMessage::Done { request_id },
            Err(e) => failed(request_id, e),
        },
        ClientMessage::RemoveAll { request_id } => match log.remove_all_records() {
            Ok(()) => ServerMessage::Done { request_id },
            Err(e) => failed(request_id, e),
        },
        ClientMessage::Query {
            request_id,
            field,
            value,
        } => match log.query(&field, &value) {
            Ok(entries) => ServerMessage::QueryResult { request_id, entries },
            Err(e) => failed(request_id, e),
        },
    };
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkshare_core::primitives::Record;
    use serde_json::json;

    fn record(shape_id: &str) -> Record {
        let mut r = Record::new();
        r.insert("shapeId".into(), json!(shape_id));
        r
    }

    #[test]
    fn test_append_query_remove() {
        let log = MemoryLog::new();
        let Some(ServerMessage::Appended { request_id, record_id }) = handle_request(
            &log,
            ClientMessage::Append {
                request_id: 1,
                record: record("s1"),
            },
        ) else {
            panic!("expected appended");
        };
        assert_eq!(request_id, 1);

        let reply = handle_request(
            &log,
            ClientMessage::Query {
                request_id: 2,
                field: "shapeId".into(),
                value: json!("s1"),
            },
        );
        let Some(ServerMessage::QueryResult { entries, .. }) = reply else {
            panic!("expected query result");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, record_id);

        let reply = handle_request(&log, ClientMessage::Remove { request_id: 3, record_id });
        assert_eq!(reply, Some(ServerMessage::Done { request_id: 3 }));
        assert!(log.is_empty());
    }

    #[test]
    fn test_remove_all() {
        let log = MemoryLog::new();
        log.append_record(record("a")).unwrap();
        log.append_record(record("b")).unwrap();

        let reply = handle_request(&log, ClientMessage::RemoveAll { request_id: 9 });
        assert_eq!(reply, Some(ServerMessage::Done { request_id: 9 }));
        assert!(log.is_empty());
    }

    #[test]
    fn test_subscribe_has_no_reply() {
        let log = MemoryLog::new();
        let msg = ClientMessage::Subscribe {
            collection: "drawings".into(),
        };
        assert_eq!(handle_request(&log, msg), None);
    }

    #[test]
    fn test_failure_carries_request_id() {
        let log = MemoryLog::new();
        log.set_reachable(false);
        let reply = handle_request(
            &log,
            ClientMessage::Append {
                request_id: 5,
                record: record("x"),
            },
        );
        assert!(matches!(
            reply,
            Some(ServerMessage::Error {
                request_id: Some(5),
                ..
            })
        ));
    }
}
