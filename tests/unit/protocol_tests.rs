//! Unit tests for request/response parsing and formatting.

use flagpipe::protocol::{validate_flag_name, Command, Request, Response};
use flagpipe::AppError;

// ── Requests ─────────────────────────────────────────────────────────────────

#[test]
fn parses_requests_with_and_without_value() {
    assert_eq!(
        Request::parse("SET:flag1:3").unwrap(),
        Request {
            command: Command::Set,
            flag: "flag1".into(),
            value: Some(3),
        }
    );
    assert_eq!(
        Request::parse("GET:flag1").unwrap(),
        Request {
            command: Command::Get,
            flag: "flag1".into(),
            value: None,
        }
    );
}

#[test]
fn request_encoding_matches_wire_format() {
    let set = Request::new(Command::Change, "flag1", Some(200)).unwrap();
    assert_eq!(set.encode(), "CHANGE:flag1:200");
    let sub = Request::new(Command::Sub, "flag1", None).unwrap();
    assert_eq!(sub.encode(), "SUB:flag1");
}

#[test]
fn correlation_token_includes_value_only_for_set_and_change() {
    let get = Request::new(Command::Get, "flag1", None).unwrap();
    let set = Request::new(Command::Set, "flag1", Some(1)).unwrap();
    let change = Request::new(Command::Change, "flag1", Some(2)).unwrap();
    let remove = Request::new(Command::Remove, "flag1", None).unwrap();
    assert_eq!(get.correlation_token(), "flag1");
    assert_eq!(set.correlation_token(), "flag1:1");
    assert_eq!(change.correlation_token(), "flag1:2");
    assert_eq!(remove.correlation_token(), "flag1");
}

#[test]
fn wrong_field_count_is_rejected_without_attribution() {
    for line in ["GET", "SET:a:1:2", ""] {
        match Request::parse(line) {
            Err(Response::Rejected { reason }) => {
                assert!(reason.contains("malformed request"), "{reason}");
            }
            other => panic!("expected rejection for {line:?}, got {other:?}"),
        }
    }
}

#[test]
fn unknown_command_is_rejected() {
    let response = Request::parse("PING:flag1").unwrap_err();
    assert_eq!(response.encode(), "ERROR:unknown command 'PING'");
}

#[test]
fn invalid_value_is_attributed_to_command_and_flag() {
    for raw in ["abc", "256", "-1"] {
        match Request::parse(&format!("SET:flag1:{raw}")) {
            Err(Response::Error {
                command, flag, ..
            }) => {
                assert_eq!(command, Command::Set);
                assert_eq!(flag, "flag1");
            }
            other => panic!("expected attributed error for {raw}, got {other:?}"),
        }
    }
}

#[test]
fn missing_value_is_attributed() {
    let response = Request::parse("CHANGE:flag1").unwrap_err();
    assert!(response.encode().starts_with("ERROR:CHANGE:flag1:"));
}

#[test]
fn unexpected_value_is_attributed() {
    let response = Request::parse("GET:flag1:3").unwrap_err();
    assert!(response.encode().starts_with("ERROR:GET:flag1:"));
}

#[test]
fn empty_flag_name_is_rejected() {
    assert!(matches!(
        Request::parse("GET:"),
        Err(Response::Rejected { .. })
    ));
}

#[test]
fn flag_names_are_validated() {
    assert!(validate_flag_name("flag1").is_ok());
    assert!(matches!(validate_flag_name(""), Err(AppError::Protocol(_))));
    assert!(matches!(validate_flag_name("a:b"), Err(AppError::Protocol(_))));
    assert!(Request::new(Command::Get, "a:b", None).is_err());
}

#[test]
fn unknown_command_name_maps_to_unknown_command_error() {
    let err = "PING".parse::<Command>().unwrap_err();
    assert!(matches!(err, AppError::UnknownCommand(ref name) if name == "PING"));
}

// ── Responses ────────────────────────────────────────────────────────────────

#[test]
fn parses_success_with_value() {
    assert_eq!(
        Response::parse("SUCCESS:GET:flag1:3").unwrap(),
        Response::Success {
            command: Command::Get,
            flag: "flag1".into(),
            value: Some(3),
        }
    );
}

#[test]
fn parses_success_without_value() {
    for command in [Command::Remove, Command::Sub, Command::Unsub] {
        let line = format!("SUCCESS:{command}:flag1");
        assert_eq!(
            Response::parse(&line).unwrap(),
            Response::Success {
                command,
                flag: "flag1".into(),
                value: None,
            }
        );
    }
}

#[test]
fn success_with_wrong_field_count_is_a_protocol_error() {
    assert!(matches!(
        Response::parse("SUCCESS:GET:flag1"),
        Err(AppError::Protocol(_))
    ));
    assert!(matches!(
        Response::parse("SUCCESS:SUB:flag1:1"),
        Err(AppError::Protocol(_))
    ));
}

#[test]
fn error_reason_keeps_embedded_colons() {
    assert_eq!(
        Response::parse("ERROR:SET:flag1:bad: really bad").unwrap(),
        Response::Error {
            command: Command::Set,
            flag: "flag1".into(),
            reason: "bad: really bad".into(),
        }
    );
}

#[test]
fn unattributed_error_becomes_rejected() {
    assert_eq!(
        Response::parse("ERROR:unknown command 'PING'").unwrap(),
        Response::Rejected {
            reason: "unknown command 'PING'".into(),
        }
    );
}

#[test]
fn parses_notify() {
    assert_eq!(
        Response::parse("NOTIFY:flag1:2").unwrap(),
        Response::Notify {
            flag: "flag1".into(),
            value: 2,
        }
    );
    assert!(Response::parse("NOTIFY:flag1:x").is_err());
    assert!(Response::parse("NOTIFY:CHANGE:flag1:2").is_err());
}

#[test]
fn unknown_status_is_a_protocol_error() {
    assert!(matches!(
        Response::parse("MAYBE:GET:flag1"),
        Err(AppError::Protocol(_))
    ));
    assert!(matches!(Response::parse("garbage"), Err(AppError::Protocol(_))));
}

#[test]
fn responses_encode_to_wire_format() {
    let cases = [
        (
            Response::Success {
                command: Command::Set,
                flag: "f".into(),
                value: Some(1),
            },
            "SUCCESS:SET:f:1",
        ),
        (
            Response::Success {
                command: Command::Remove,
                flag: "f".into(),
                value: None,
            },
            "SUCCESS:REMOVE:f",
        ),
        (
            Response::error(Command::Get, "f", "flag f not found"),
            "ERROR:GET:f:flag f not found",
        ),
        (
            Response::Notify {
                flag: "f".into(),
                value: 9,
            },
            "NOTIFY:f:9",
        ),
    ];
    for (response, wire) in cases {
        assert_eq!(response.encode(), wire);
    }
}
