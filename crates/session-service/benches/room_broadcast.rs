//! Routing and fan-out cost for rooms of increasing size.
//!
//! Measures one routed `add_chat` (lock, permission check, validation,
//! history append, serialize once, enqueue per participant) and one
//! unfiltered broadcast.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use session_service::session::{
    ClientHandle, ClientIdentity, Event, InboundEnvelope, Room, RoomSettings,
};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

struct Fixture {
    room: Room,
    host: ClientHandle,
    receivers: Vec<mpsc::Receiver<Bytes>>,
}

impl Fixture {
    /// Room with one host and `members - 1` admitted participants.
    async fn new(members: usize) -> Self {
        let room = Room::new("bench", RoomSettings::default(), None);
        let mut receivers = Vec::with_capacity(members);

        let (host, rx) = ClientHandle::new(ClientIdentity::new("host", "Host"), 1024);
        room.connect(host.clone()).await.unwrap();
        receivers.push(rx);

        for n in 1..members {
            let id = format!("user-{n}");
            let (client, rx) = ClientHandle::new(ClientIdentity::new(id.clone(), id.clone()), 1024);
            room.connect(client).await.unwrap();
            room.route(&host, envelope("accept_waiting", json!({ "clientId": id })))
                .await;
            receivers.push(rx);
        }

        let mut fixture = Self {
            room,
            host,
            receivers,
        };
        fixture.drain();
        fixture
    }

    fn drain(&mut self) {
        for rx in &mut self.receivers {
            while rx.try_recv().is_ok() {}
        }
    }
}

fn envelope(event: &str, payload: serde_json::Value) -> InboundEnvelope {
    InboundEnvelope {
        event: event.to_string(),
        payload,
    }
}

fn room_broadcast_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("Room fan-out");
    for members in [2, 10, 50, 200] {
        let mut fixture = rt.block_on(Fixture::new(members));
        let chat = envelope(
            "add_chat",
            json!({"clientId": "host", "displayName": "Host", "chatContent": "benchmark message"}),
        );

        group.bench_with_input(BenchmarkId::new("route_add_chat", members), &members, |b, _| {
            b.iter(|| {
                rt.block_on(fixture.room.route(&fixture.host, chat.clone()));
                fixture.drain();
            });
        });

        group.bench_with_input(BenchmarkId::new("broadcast", members), &members, |b, _| {
            let payload = json!({"clientId": "host", "displayName": "Host"});
            b.iter(|| {
                rt.block_on(fixture.room.broadcast(Event::Connect, &payload, None));
                fixture.drain();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, room_broadcast_benchmark);
criterion_main!(benches);
