#![allow(clippy::float_cmp)]

use serde_json::json;

use super::*;
use crate::history::Point;
use crate::surface::{DrawOp, RecordingSurface};

// =============================================================
// Helpers
// =============================================================

const ROOM: &str = "9f0c6a40-8a53-4f59-a9a4-0d1a0d5f5f00";

fn data(value: Value) -> Data {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn notify(syscall: &str, value: Value) -> Frame {
    Frame::request(syscall, data(value)).with_room_id(ROOM)
}

fn stroke_json(color: &str) -> Value {
    json!({"type": "draw", "color": color, "width": 3, "points": [{"x": 0, "y": 0}, {"x": 4, "y": 4}]})
}

fn joined_client(history: Value, surface: &mut RecordingSurface) -> SyncClient {
    let mut client = SyncClient::new(ROOM);
    let reply = client.join_request().done_with(data(json!({"history": history})));
    assert_eq!(client.handle_frame(&reply, surface), Ok(Applied::Joined));
    client
}

fn draw(client: &mut SyncClient, surface: &mut RecordingSurface, from: (f64, f64), to: (f64, f64)) -> Vec<Frame> {
    let mut out = client.pointer_down(from.0, from.1);
    out.extend(client.pointer_move(to.0, to.1, surface));
    out.extend(client.pointer_up(surface));
    out
}

fn syscalls(frames: &[Frame]) -> Vec<&str> {
    frames.iter().map(|f| f.syscall.as_str()).collect()
}

fn force_of(frame: &Frame) -> Option<bool> {
    frame.get("force").and_then(Value::as_bool)
}

/// A server-side failure as it would arrive in an error reply.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct ServerFailure {
    code: &'static str,
    message: &'static str,
}

impl ErrorCode for ServerFailure {
    fn error_code(&self) -> &'static str {
        self.code
    }
}

// =============================================================
// Join / snapshots
// =============================================================

#[test]
fn join_request_targets_room() {
    let client = SyncClient::new(ROOM);
    let frame = client.join_request();
    assert_eq!(frame.syscall, frames::ROOM_JOIN);
    assert_eq!(frame.status, Status::Request);
    assert_eq!(frame.room_id.as_deref(), Some(ROOM));
    assert_eq!(frame.get("roomId").and_then(Value::as_str), Some(ROOM));
}

#[test]
fn join_reply_adopts_snapshot_and_replays() {
    let mut surface = RecordingSurface::new();
    let client = joined_client(json!({"position": 1, "events": [stroke_json("#a"), stroke_json("#b")]}), &mut surface);

    assert!(client.is_joined());
    assert_eq!(client.history().len(), 2);
    assert_eq!(client.history().position(), 1);
    assert_eq!(surface.visible().len(), 1);
    assert!(matches!(&surface.visible()[0], DrawOp::Segment { color, .. } if color == "#a"));
}

#[test]
fn join_reply_without_history_is_malformed() {
    let mut client = SyncClient::new(ROOM);
    let mut surface = RecordingSurface::new();
    let reply = client.join_request().done_with(Data::new());

    let err = client.handle_frame(&reply, &mut surface).expect_err("should fail");
    assert!(matches!(err, SyncError::Malformed(_)));
    assert!(!client.is_joined());
}

#[test]
fn room_not_found_error_is_typed() {
    let mut client = SyncClient::new(ROOM);
    let mut surface = RecordingSurface::new();
    let reply = client
        .join_request()
        .error_from(&ServerFailure { code: "E_ROOM_NOT_FOUND", message: "room not found" });

    assert_eq!(client.handle_frame(&reply, &mut surface), Err(SyncError::RoomNotFound));
    assert_eq!(SyncError::RoomNotFound.error_code(), "E_ROOM_NOT_FOUND");
}

#[test]
fn other_server_errors_carry_code_and_message() {
    let mut client = SyncClient::new(ROOM);
    let mut surface = RecordingSurface::new();
    let reply = client
        .update_frame(false)
        .error_from(&ServerFailure { code: "E_DATABASE", message: "database unavailable" });

    assert_eq!(
        client.handle_frame(&reply, &mut surface),
        Err(SyncError::Server { code: "E_DATABASE".into(), message: "database unavailable".into() })
    );
}

#[test]
fn unrelated_done_reply_is_ignored() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);
    let done = client.update_frame(false).done_with(Data::new());
    assert_eq!(client.handle_frame(&done, &mut surface), Ok(Applied::Ignored));
}

#[test]
fn session_connected_records_client_id() {
    let mut client = SyncClient::new(ROOM);
    let mut surface = RecordingSurface::new();
    let frame = notify(frames::SESSION_CONNECTED, json!({"client_id": "c-1"}));

    assert_eq!(client.handle_frame(&frame, &mut surface), Ok(Applied::Connected { client_id: "c-1".into() }));
    assert_eq!(client.client_id(), Some("c-1"));
}

// =============================================================
// Server notifications
// =============================================================

#[test]
fn server_update_replaces_local_log_wholesale() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);
    draw(&mut client, &mut surface, (0.0, 0.0), (1.0, 1.0));
    assert_eq!(client.history().len(), 1);

    // A peer's stale log arrives later and wins.
    let update = notify(frames::SERVER_UPDATE, json!({"history": {"position": 1, "events": [stroke_json("#peer")]}}));
    assert_eq!(client.handle_frame(&update, &mut surface), Ok(Applied::Updated));

    assert_eq!(client.history().len(), 1);
    assert!(matches!(&client.history().events()[0], Event::Draw { color, .. } if color == "#peer"));
    assert!(matches!(&surface.visible()[0], DrawOp::Segment { color, .. } if color == "#peer"));
}

#[test]
fn server_update_drops_unknown_event_kinds() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);
    let update = notify(
        frames::SERVER_UPDATE,
        json!({"history": {"position": 2, "events": [{"type": "laser"}, {"type": "reset"}]}}),
    );

    client.handle_frame(&update, &mut surface).expect("apply");
    assert_eq!(client.history().events(), &[Event::Reset]);
    assert_eq!(client.history().position(), 1);
}

#[test]
fn server_draw_assembles_remote_stroke_into_local_log() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);
    let sample = |x: f64, is_down: bool| {
        notify(
            frames::SERVER_DRAW,
            json!({"x": x, "y": x, "color": "#0a0", "width": 2, "isDown": is_down, "participantId": "peer"}),
        )
    };

    for (x, down) in [(1.0, true), (2.0, true), (3.0, true)] {
        let applied = client.handle_frame(&sample(x, down), &mut surface).expect("apply");
        assert_eq!(applied, Applied::Stroke { participant: "peer".into(), committed: false });
    }
    assert_eq!(surface.visible().len(), 2);
    assert!(client.history().is_empty());

    let applied = client.handle_frame(&sample(3.0, false), &mut surface).expect("apply");
    assert_eq!(applied, Applied::Stroke { participant: "peer".into(), committed: true });
    assert_eq!(client.history().len(), 1);
    assert_eq!(client.remote_pens().len(), 1);
    assert!(matches!(&client.history().events()[0], Event::Draw { points, .. } if points.len() == 3));
}

#[test]
fn concurrent_remote_pens_are_independent() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);
    let sample = |who: &str, x: f64, is_down: bool| {
        notify(
            frames::SERVER_DRAW,
            json!({"x": x, "y": 0, "color": "#000", "width": 1, "isDown": is_down, "participantId": who}),
        )
    };

    for frame in [
        sample("a", 0.0, true),
        sample("b", 100.0, true),
        sample("a", 1.0, true),
        sample("b", 101.0, true),
        sample("a", 1.0, false),
        sample("b", 101.0, false),
    ] {
        client.handle_frame(&frame, &mut surface).expect("apply");
    }

    assert_eq!(client.remote_pens().len(), 2);
    assert_eq!(client.history().len(), 2);
    let starts: Vec<Point> = client
        .history()
        .events()
        .iter()
        .filter_map(|e| match e {
            Event::Draw { points, .. } => points.first().copied(),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec![Point::new(0.0, 0.0), Point::new(100.0, 0.0)]);
}

#[test]
fn server_draw_without_participant_is_malformed() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);
    let frame = notify(frames::SERVER_DRAW, json!({"x": 1, "y": 1, "color": "#000", "width": 1, "isDown": true}));

    assert!(matches!(client.handle_frame(&frame, &mut surface), Err(SyncError::Malformed(_))));
    assert!(client.remote_pens().is_empty());
}

#[test]
fn server_undo_steps_back_and_replays() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 2, "events": [stroke_json("#a"), stroke_json("#b")]}), &mut surface);

    let applied = client.handle_frame(&notify(frames::SERVER_UNDO, json!({})), &mut surface);
    assert_eq!(applied, Ok(Applied::Undone));
    assert_eq!(client.history().position(), 1);
    assert_eq!(surface.visible().len(), 1);
}

#[test]
fn server_reset_clears_history_and_surface() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 1, "events": [stroke_json("#a")]}), &mut surface);

    let applied = client.handle_frame(&notify(frames::SERVER_RESET, json!({})), &mut surface);
    assert_eq!(applied, Ok(Applied::Reset));
    assert!(client.history().is_empty());
    assert!(surface.visible().is_empty());
}

#[test]
fn unknown_notification_is_ignored() {
    let mut client = SyncClient::new(ROOM);
    let mut surface = RecordingSurface::new();
    let frame = notify("server:confetti", json!({}));
    assert_eq!(client.handle_frame(&frame, &mut surface), Ok(Applied::Ignored));
}

// =============================================================
// Local pen
// =============================================================

#[test]
fn freehand_stroke_relays_deltas_and_checkpoints() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);

    let out = draw(&mut client, &mut surface, (1.0, 2.0), (5.0, 6.0));
    assert_eq!(
        syscalls(&out),
        vec![frames::CLIENT_DRAW, frames::CLIENT_DRAW, frames::CLIENT_DRAW, frames::CLIENT_UPDATE]
    );

    assert_eq!(out[0].get("isDown"), Some(&json!(true)));
    assert_eq!(out[1].get("x").and_then(Value::as_f64), Some(5.0));
    assert_eq!(out[2].get("isDown"), Some(&json!(false)));
    assert_eq!(force_of(&out[3]), Some(false));
    assert!(out.iter().all(|f| f.room_id.as_deref() == Some(ROOM)));

    let history = history_from(&out[3]).expect("history");
    assert_eq!(&history, client.history());
    assert_eq!(history.len(), 1);
}

#[test]
fn hover_moves_are_relayed_pen_up() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);

    let out = client.pointer_move(3.0, 3.0, &mut surface);
    assert_eq!(syscalls(&out), vec![frames::CLIENT_DRAW]);
    assert_eq!(out[0].get("isDown"), Some(&json!(false)));
    assert!(surface.visible().is_empty());
}

#[test]
fn click_without_drag_sends_no_checkpoint() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);

    let mut out = client.pointer_down(5.0, 5.0);
    out.extend(client.pointer_up(&mut surface));
    assert_eq!(syscalls(&out), vec![frames::CLIENT_DRAW, frames::CLIENT_DRAW]);
    assert!(client.history().is_empty());
}

#[test]
fn pointer_up_while_up_sends_nothing() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);
    assert!(client.pointer_up(&mut surface).is_empty());
}

#[test]
fn rectangle_tool_forces_update_without_deltas() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);
    client.set_tool(PenTool::Rectangle);
    client.set_color("#f0f");

    let out = draw(&mut client, &mut surface, (10.0, 10.0), (40.0, 25.0));
    assert_eq!(syscalls(&out), vec![frames::CLIENT_UPDATE]);
    assert_eq!(force_of(&out[0]), Some(true));
    assert_eq!(
        client.history().events(),
        &[Event::Rectangle { color: "#f0f".into(), start_x: 10.0, start_y: 10.0, end_x: 30.0, end_y: 15.0 }]
    );
}

/// What the server does with a `client:draw`: rename it and stamp the sender.
fn relayed(frame: &Frame, sender: &str) -> Frame {
    let mut data = frame.data.as_object().cloned().unwrap_or_default();
    data.remove("roomId");
    data.insert("participantId".into(), json!(sender));
    Frame::request(frames::SERVER_DRAW, data).with_room_id(ROOM)
}

#[test]
fn repress_while_down_forces_checkpoint_that_realigns_peers() {
    let mut alice_surface = RecordingSurface::new();
    let mut bob_surface = RecordingSurface::new();
    let mut alice = joined_client(json!({"position": 0, "events": []}), &mut alice_surface);
    let mut bob = joined_client(json!({"position": 0, "events": []}), &mut bob_surface);

    // The release of the first stroke never arrives, so the next press restarts it.
    let mut out = alice.pointer_down(0.0, 0.0);
    out.extend(alice.pointer_move(10.0, 10.0, &mut alice_surface));
    out.extend(alice.pointer_down(100.0, 100.0));
    out.extend(alice.pointer_move(110.0, 110.0, &mut alice_surface));
    out.extend(alice.pointer_up(&mut alice_surface));

    let (draws, updates): (Vec<&Frame>, Vec<&Frame>) = out.iter().partition(|f| f.syscall == frames::CLIENT_DRAW);
    for frame in draws {
        bob.handle_frame(&relayed(frame, "alice"), &mut bob_surface).expect("relay");
    }
    assert_ne!(bob.history(), alice.history());

    assert_eq!(updates.len(), 1);
    assert_eq!(force_of(updates[0]), Some(true));
    let broadcast = notify(frames::SERVER_UPDATE, json!({"history": updates[0].get("history")}));
    assert_eq!(bob.handle_frame(&broadcast, &mut bob_surface), Ok(Applied::Updated));

    assert_eq!(bob.history(), alice.history());
    assert_eq!(
        alice.history().events(),
        &[Event::Draw {
            color: alice.pen().color().to_owned(),
            width: alice.pen().width(),
            points: vec![Point::new(100.0, 100.0), Point::new(110.0, 110.0)],
        }]
    );
}

#[test]
fn repress_without_movement_still_sends_forced_log() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);

    let mut out = client.pointer_down(0.0, 0.0);
    out.extend(client.pointer_move(10.0, 10.0, &mut surface));
    out.extend(client.pointer_down(50.0, 50.0));
    out.extend(client.pointer_up(&mut surface));

    let update = out.last().expect("frames");
    assert_eq!(update.syscall, frames::CLIENT_UPDATE);
    assert_eq!(force_of(update), Some(true));
    assert!(client.history().is_empty());
}

#[test]
fn restart_flag_clears_after_release() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);

    client.pointer_down(0.0, 0.0);
    client.pointer_down(1.0, 1.0);
    client.pointer_move(2.0, 2.0, &mut surface);
    client.pointer_up(&mut surface);

    let out = draw(&mut client, &mut surface, (5.0, 5.0), (6.0, 6.0));
    assert_eq!(force_of(out.last().expect("frames")), Some(false));
}

#[test]
fn width_and_color_flow_into_deltas() {
    let mut client = SyncClient::new(ROOM);
    client.set_color("#abcdef");
    client.set_width(12.0);
    let out = client.pointer_down(0.0, 0.0);

    assert_eq!(out[0].get("color").and_then(Value::as_str), Some("#abcdef"));
    assert_eq!(out[0].get("width").and_then(Value::as_f64), Some(12.0));
}

// =============================================================
// History operations
// =============================================================

#[test]
fn undo_relays_and_checkpoints() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 1, "events": [stroke_json("#a")]}), &mut surface);

    let out = client.undo(&mut surface);
    assert_eq!(syscalls(&out), vec![frames::CLIENT_UNDO, frames::CLIENT_UPDATE]);
    assert_eq!(force_of(&out[1]), Some(false));
    assert_eq!(client.history().position(), 0);
    assert!(surface.visible().is_empty());
}

#[test]
fn undo_at_start_sends_nothing() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);
    assert!(client.undo(&mut surface).is_empty());
}

#[test]
fn redo_forces_update() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": [stroke_json("#a")]}), &mut surface);

    let out = client.redo(&mut surface);
    assert_eq!(syscalls(&out), vec![frames::CLIENT_UPDATE]);
    assert_eq!(force_of(&out[0]), Some(true));
    assert_eq!(surface.visible().len(), 1);
    assert!(client.redo(&mut surface).is_empty());
}

#[test]
fn reset_wipes_history_and_relays() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 1, "events": [stroke_json("#a")]}), &mut surface);

    let out = client.reset(&mut surface);
    assert_eq!(syscalls(&out), vec![frames::CLIENT_RESET, frames::CLIENT_UPDATE]);
    assert_eq!(force_of(&out[1]), Some(false));
    assert!(client.history().is_empty());
    assert!(surface.visible().is_empty());
}

#[test]
fn clear_canvas_is_undoable() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 1, "events": [stroke_json("#a")]}), &mut surface);

    let out = client.clear_canvas(&mut surface);
    assert_eq!(syscalls(&out), vec![frames::CLIENT_UPDATE]);
    assert_eq!(force_of(&out[0]), Some(true));
    assert_eq!(client.history().events().last(), Some(&Event::Reset));
    assert!(surface.visible().is_empty());

    client.undo(&mut surface);
    assert_eq!(surface.visible().len(), 1);
}

#[test]
fn paste_image_commits_and_forces_update() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);

    // Undecodable references are still committed; replay skips them.
    let out = client.paste_image("data:image/png;base64,AAAA", &mut surface);
    assert_eq!(syscalls(&out), vec![frames::CLIENT_UPDATE]);
    assert_eq!(force_of(&out[0]), Some(true));
    assert_eq!(client.history().events(), &[Event::Image { image: "data:image/png;base64,AAAA".into() }]);
}

#[test]
fn redraw_reproduces_visible_state() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 2, "events": [stroke_json("#a"), stroke_json("#b")]}), &mut surface);
    let before = surface.visible().to_vec();

    client.redraw(&mut surface);
    assert_eq!(surface.visible(), before.as_slice());
}

#[test]
fn update_frame_survives_protobuf_round_trip() {
    let mut surface = RecordingSurface::new();
    let mut client = joined_client(json!({"position": 0, "events": []}), &mut surface);
    draw(&mut client, &mut surface, (0.0, 0.0), (2.0, 2.0));

    let frame = client.update_frame(true);
    let decoded = frames::decode_frame(&frames::encode_frame(&frame)).expect("decode");
    let history = history_from(&decoded).expect("history");
    assert_eq!(&history, client.history());
}
