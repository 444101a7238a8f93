use tokio_test::{assert_pending, assert_ready, task};

use volley::mesh::mock::MockMesh;
use volley::mesh::{EventFilter, EventKind, MeshClient, MeshEvent};

mod common;
use common::{channel_msg, direct_msg};

#[test]
fn channel_filter_wakes_only_for_its_channel() {
    let mut mock = MockMesh::new();
    let mut sub = mock.subscribe(EventFilter::kinds(&[EventKind::ChannelMessage]).on_channel(1));

    let mut recv = task::spawn(sub.recv());
    assert_pending!(recv.poll());

    assert_eq!(mock.emit(channel_msg(2, "bob: ping")), 0);
    assert_eq!(mock.emit(direct_msg("a1b2", "ping")), 0);
    assert_pending!(recv.poll());

    assert_eq!(mock.emit(channel_msg(1, "alice: ping")), 1);
    assert!(recv.is_woken());
    match assert_ready!(recv.poll()) {
        Some(MeshEvent::ChannelMessage(msg)) => assert_eq!(msg.text, "alice: ping"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unsubscribe_stops_delivery() {
    let mut mock = MockMesh::new();
    let all = mock.subscribe(EventFilter::all());
    let lifecycle = mock.subscribe(EventFilter::kinds(&[EventKind::Connected]));
    assert_eq!(mock.subscriber_count(), 2);

    mock.unsubscribe(all.id);
    assert_eq!(mock.emit(MeshEvent::Connected { reconnected: false }), 1);
    assert_eq!(mock.subscriber_count(), 1);
    drop(lifecycle);
}
