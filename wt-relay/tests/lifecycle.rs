mod common;

use common::*;
use wt_proto::frame::{CAPSULE_DATAGRAM, H3_GENERAL_PROTOCOL_ERROR};
use wt_proto::{Capsule, CloseInfo};
use wt_relay::{Error, H3Event, HandlerRegistry, QuicEvent, SessionState};

fn error_response(stream_id: u64, status: &str) -> Sent {
    Sent::Headers {
        stream_id,
        headers: vec![h("server", "webtransport-h3-server"), h(":status", status)],
        end: true,
    }
}

fn established(path: &str, script: Script) -> (Harness, Log) {
    let mut reg = HandlerRegistry::new();
    let log = record_at(&mut reg, path, script);
    let mut hs = Harness::new(reg);
    hs.connect(1);
    hs.connect_request(1, 0, path).unwrap();
    (hs, log)
}

#[test]
fn connect_without_webtransport_protocol_is_rejected() {
    let mut reg = HandlerRegistry::new();
    let log = record_at(&mut reg, "/x", Script::default());
    let mut hs = Harness::new(reg);
    hs.connect(1);

    hs.headers(1, 0, vec![h(":method", "CONNECT"), h(":path", "/x")])
        .unwrap();
    hs.headers(
        1,
        4,
        vec![
            h(":method", "GET"),
            h(":protocol", "webtransport"),
            h(":path", "/x"),
        ],
    )
    .unwrap();

    assert_eq!(hs.sent(1), vec![error_response(0, "400"), error_response(4, "400")]);
    assert_eq!(hs.engine.session_count(), 0);
    assert!(hs.engine.connection(wt_relay::ConnectionId(1)).unwrap().session().is_none());
    assert!(calls(&log).is_empty());
}

#[test]
fn missing_path_is_rejected() {
    let mut hs = Harness::new(HandlerRegistry::new());
    hs.connect(1);
    hs.headers(
        1,
        0,
        vec![h(":method", "CONNECT"), h(":protocol", "webtransport")],
    )
    .unwrap();
    assert_eq!(hs.sent(1), vec![error_response(0, "400")]);
}

#[test]
fn unknown_handler_is_404_and_the_peer_may_retry() {
    let mut reg = HandlerRegistry::new();
    let log = record_at(&mut reg, "/x", Script::default());
    let mut hs = Harness::new(reg);
    hs.connect(1);

    hs.connect_request(1, 0, "/nope").unwrap();
    assert_eq!(hs.sent(1), vec![error_response(0, "404")]);
    assert_eq!(hs.engine.session_count(), 0);

    hs.clear(1);
    hs.connect_request(1, 4, "/x?query=ignored").unwrap();
    let conn = hs.engine.connection(wt_relay::ConnectionId(1)).unwrap();
    assert_eq!(conn.session_stream_id(), Some(4));
    assert_eq!(conn.session().unwrap().state(), SessionState::Established);
    assert_eq!(calls(&log).len(), 2);
}

#[test]
fn default_status_is_200_and_established_fires() {
    let (hs, log) = established("/x", Script::default());

    assert_eq!(
        hs.sent(1),
        vec![Sent::Headers {
            stream_id: 0,
            headers: vec![
                h("server", "webtransport-h3-server"),
                h("sec-webtransport-http3-draft", "draft02"),
                h(":status", "200"),
            ],
            end: false,
        }]
    );

    let mut expected_request = connect_headers("/x");
    expected_request.push(h("swag", "brap"));
    assert_eq!(
        calls(&log),
        vec![
            Call::ConnectReceived {
                request_headers: expected_request
            },
            Call::Established { session_id: 0 },
        ]
    );
    assert_eq!(hs.engine.session_count(), 1);
}

#[test]
fn explicit_non_200_status_rejects_the_session() {
    let (mut hs, log) = established(
        "/x",
        Script {
            status: Some("403"),
            ..Script::default()
        },
    );

    let Sent::Headers { headers, end, .. } = &hs.sent(1)[0] else {
        panic!("expected headers");
    };
    assert!(!end);
    assert_eq!(
        headers.iter().filter(|(n, _)| n == ":status").count(),
        1,
        "{headers:?}"
    );
    assert!(headers.contains(&h(":status", "403")));

    let conn = hs.engine.connection(wt_relay::ConnectionId(1)).unwrap();
    assert_eq!(conn.session().unwrap().state(), SessionState::Closed);
    assert_eq!(hs.engine.session_count(), 0);

    hs.stream_data(1, 0, 4, payload(1, b"x"), false).unwrap();
    hs.terminate(1).unwrap();
    assert_eq!(calls(&log).len(), 1, "only connect_received ran");
}

#[test]
fn second_connect_on_one_connection_is_rejected() {
    let (mut hs, _log) = established("/x", Script::default());
    hs.clear(1);
    hs.connect_request(1, 4, "/x").unwrap();
    assert_eq!(hs.sent(1), vec![error_response(4, "400")]);
    assert_eq!(
        hs.engine
            .connection(wt_relay::ConnectionId(1))
            .unwrap()
            .session_stream_id(),
        Some(0)
    );
}

#[test]
fn trailers_on_the_session_stream_are_ignored() {
    let (mut hs, _log) = established("/x", Script::default());
    hs.clear(1);
    hs.headers(1, 0, vec![h("x-trailer", "1")]).unwrap();
    assert!(hs.sent(1).is_empty());
}

#[test]
fn events_before_negotiation_are_ignored() {
    let mut reg = HandlerRegistry::new();
    let log = record_at(&mut reg, "/x", Script::default());
    let mut hs = Harness::new(reg);
    hs.engine
        .add_connection(wt_relay::ConnectionId(1), RecordingTransport::default());
    hs.connect_request(1, 0, "/x").unwrap();
    assert!(hs.sent(1).is_empty());
    assert!(calls(&log).is_empty());
}

#[test]
fn close_capsule_then_stream_end_closes_once() {
    let (mut hs, log) = established("/x", Script::default());
    hs.registration_settings(1);

    hs.session_data(1, 0, close_capsule(42, "done"), false).unwrap();
    assert_eq!(
        hs.engine
            .connection(wt_relay::ConnectionId(1))
            .unwrap()
            .session()
            .unwrap()
            .state(),
        SessionState::Closing
    );
    assert!(!calls(&log).iter().any(|c| matches!(c, Call::Closed { .. })));

    hs.session_data(1, 0, vec![], true).unwrap();
    hs.terminate(1).unwrap();

    let closed: Vec<_> = calls(&log)
        .into_iter()
        .filter(|c| matches!(c, Call::Closed { .. }))
        .collect();
    assert_eq!(
        closed,
        vec![Call::Closed {
            close_info: Some(CloseInfo::new(42, "done")),
            abruptly: false
        }]
    );
}

#[test]
fn close_capsule_with_fin_in_one_event() {
    let (mut hs, log) = established("/x", Script::default());
    hs.registration_settings(1);
    hs.session_data(1, 0, close_capsule(7, "bye"), true).unwrap();
    assert_eq!(
        calls(&log).last(),
        Some(&Call::Closed {
            close_info: Some(CloseInfo::new(7, "bye")),
            abruptly: false
        })
    );
}

#[test]
fn session_stream_end_without_capsule_closes_gracefully() {
    let (mut hs, log) = established("/x", Script::default());
    hs.session_data(1, 0, vec![], true).unwrap();
    assert_eq!(
        calls(&log).last(),
        Some(&Call::Closed {
            close_info: None,
            abruptly: false
        })
    );
}

#[test]
fn termination_closes_abruptly_and_drops_the_connection() {
    let (mut hs, log) = established("/x", Script::default());
    hs.terminate(1).unwrap();
    assert_eq!(
        calls(&log).last(),
        Some(&Call::Closed {
            close_info: None,
            abruptly: true
        })
    );
    assert!(hs.engine.connection(wt_relay::ConnectionId(1)).is_none());
    // Closed sessions stay registered by default.
    assert_eq!(hs.engine.session_count(), 1);
}

#[test]
fn second_close_capsule_is_a_protocol_error() {
    let (mut hs, log) = established("/x", Script::default());
    hs.registration_settings(1);
    hs.clear(1);

    let mut data = close_capsule(1, "first");
    data.extend(close_capsule(2, "second"));
    let err = hs.session_data(1, 0, data, false).unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)), "{err}");

    let sent = hs.sent(1);
    assert!(
        matches!(sent.last(), Some(Sent::Close { code, .. }) if *code == H3_GENERAL_PROTOCOL_ERROR),
        "{sent:?}"
    );
    assert!(!calls(&log).iter().any(|c| matches!(c, Call::Closed { .. })));
}

#[test]
fn session_stream_data_without_registration_support_is_a_protocol_error() {
    let (mut hs, _log) = established("/x", Script::default());
    let err = hs.session_data(1, 0, close_capsule(0, ""), false).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, Error::ProtocolViolation(_)));
}

#[test]
fn datagram_context_capsules_are_protocol_errors() {
    let (mut hs, _log) = established("/x", Script::default());
    hs.registration_settings(1);
    let capsule = Capsule::new(CAPSULE_DATAGRAM, vec![0, 1]).to_bytes().unwrap();
    let err = hs.session_data(1, 0, capsule, false).unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)), "{err}");
}

#[test]
fn unknown_capsules_are_skipped() {
    let (mut hs, log) = established("/x", Script::default());
    hs.registration_settings(1);
    let mut data = Capsule::new(0x1234, b"grease".to_vec()).to_bytes().unwrap();
    data.extend(close_capsule(5, "after grease"));
    hs.session_data(1, 0, data, true).unwrap();
    assert_eq!(
        calls(&log).last(),
        Some(&Call::Closed {
            close_info: Some(CloseInfo::new(5, "after grease")),
            abruptly: false
        })
    );
}

#[test]
fn partial_capsule_at_stream_end_is_a_protocol_error() {
    let (mut hs, _log) = established("/x", Script::default());
    hs.registration_settings(1);
    let mut data = close_capsule(5, "cut");
    data.pop();
    let err = hs.session_data(1, 0, data, true).unwrap_err();
    assert!(
        matches!(err, Error::Wire(wt_proto::Error::TruncatedCapsule(_))),
        "{err}"
    );
}

#[test]
fn oversized_capsule_closes_the_connection() {
    let (mut hs, _log) = established("/x", Script::default());
    hs.registration_settings(1);
    hs.clear(1);
    let mut data = wt_proto::varint::to_vec(0x1234).unwrap();
    data.extend(wt_proto::varint::to_vec(1 << 40).unwrap());
    data.extend_from_slice(b"start of a huge payload");

    let err = hs.session_data(1, 0, data, false).unwrap_err();
    assert!(
        matches!(err, Error::Wire(wt_proto::Error::Capsule(_))),
        "{err}"
    );
    assert!(
        matches!(hs.sent(1).last(), Some(Sent::Close { code, .. }) if *code == H3_GENERAL_PROTOCOL_ERROR)
    );
}

#[test]
fn capsules_split_across_events_are_reassembled() {
    let (mut hs, log) = established("/x", Script::default());
    hs.registration_settings(1);
    let data = close_capsule(9, "split");
    let (a, b) = data.split_at(3);
    hs.session_data(1, 0, a.to_vec(), false).unwrap();
    hs.session_data(1, 0, b.to_vec(), true).unwrap();
    assert_eq!(
        calls(&log).last(),
        Some(&Call::Closed {
            close_info: Some(CloseInfo::new(9, "split")),
            abruptly: false
        })
    );
}

#[test]
fn local_close_sends_capsule_and_fin_then_closes_once() {
    let info = CloseInfo::new(99, "handler closed");
    let (mut hs, log) = established(
        "/x",
        Script {
            close_on_established: Some(Some(info.clone())),
            ..Script::default()
        },
    );

    let sent = hs.sent(1);
    assert_eq!(
        &sent[1..],
        &[
            Sent::Data {
                stream_id: 0,
                data: close_capsule(99, "handler closed"),
                end: false
            },
            Sent::Data {
                stream_id: 0,
                data: vec![],
                end: true
            },
        ]
    );

    hs.terminate(1).unwrap();
    let closed: Vec<_> = calls(&log)
        .into_iter()
        .filter(|c| matches!(c, Call::Closed { .. }))
        .collect();
    assert_eq!(
        closed,
        vec![Call::Closed {
            close_info: Some(info),
            abruptly: false
        }]
    );
}

#[test]
fn local_close_without_info_only_ends_the_stream() {
    let (hs, _log) = established(
        "/x",
        Script {
            close_on_established: Some(None),
            ..Script::default()
        },
    );
    assert_eq!(
        &hs.sent(1)[1..],
        &[Sent::Data {
            stream_id: 0,
            data: vec![],
            end: true
        }]
    );
}

#[test]
fn stream_reset_reaches_the_handler() {
    let (mut hs, log) = established("/x", Script::default());
    hs.event(
        1,
        QuicEvent::StreamReset {
            stream_id: 8,
            error_code: 3,
        },
    )
    .unwrap();
    assert_eq!(
        calls(&log).last(),
        Some(&Call::StreamReset {
            stream_id: 8,
            error_code: 3
        })
    );
}

#[test]
fn panicking_handler_does_not_disturb_the_session() {
    let (mut hs, log) = established(
        "/x",
        Script {
            panic_on_stream_data: true,
            ..Script::default()
        },
    );
    hs.stream_data(1, 0, 4, b"first".to_vec(), false).unwrap();
    hs.stream_data(1, 0, 4, b"second".to_vec(), true).unwrap();

    let data: Vec<_> = calls(&log)
        .into_iter()
        .filter_map(|c| match c {
            Call::StreamData { data, .. } => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(data, vec![b"first".to_vec(), b"second".to_vec()]);
    assert_eq!(
        hs.engine
            .connection(wt_relay::ConnectionId(1))
            .unwrap()
            .session()
            .unwrap()
            .state(),
        SessionState::Established
    );
}

#[test]
fn stream_data_for_another_session_is_dropped() {
    let (mut hs, log) = established("/x", Script::default());
    hs.stream_data(1, 16, 4, b"stray".to_vec(), false).unwrap();
    assert!(!calls(&log)
        .iter()
        .any(|c| matches!(c, Call::StreamData { .. })));
}

#[test]
fn data_on_an_unrelated_request_stream_is_ignored() {
    let (mut hs, _log) = established("/x", Script::default());
    hs.event(
        1,
        H3Event::DataReceived {
            stream_id: 12,
            data: b"body".to_vec(),
            stream_ended: true,
        },
    )
    .unwrap();
}
