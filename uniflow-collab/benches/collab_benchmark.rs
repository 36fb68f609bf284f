use criterion::{criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::hint::black_box;
use std::sync::Arc;
use tokio::sync::mpsc;
use uniflow_collab::hub::{Hub, HubCommand, HubConfig};
use uniflow_collab::protocol::{InboundEvent, OutboundEvent};
use uniflow_collab::room_id::{RoomId, RoomIdGenerator};
use uniflow_collab::storage::{
    MemoryMirror, MirrorConfig, MirrorHandle, PersistenceMirror, RocksMirror,
};
use uniflow_collab::store::RoomStore;
use uniflow_collab::user::{ConnectionId, User};

fn sample_text(len: usize) -> String {
    let pattern = "The quick brown fox jumps over the lazy dog. ";
    pattern.chars().cycle().take(len).collect()
}

fn hub_with_members(
    room: &str,
    members: usize,
) -> (Hub, Vec<ConnectionId>, Vec<mpsc::Receiver<Arc<OutboundEvent>>>) {
    let (tx, _rx) = mpsc::channel(1);
    let config = HubConfig {
        seed: Some(7),
        ..HubConfig::default()
    };
    let mut hub = Hub::new(&config, MirrorHandle::disabled(), tx.downgrade());

    let mut conns = Vec::new();
    let mut outboxes = Vec::new();
    for i in 0..members {
        let (outbox, rx) = mpsc::channel(4096);
        let conn = ConnectionId::new();
        let _ = hub.handle(HubCommand::Connect { conn, outbox });
        let _ = hub.handle(HubCommand::Inbound {
            conn,
            event: InboundEvent::join_room(room, format!("Peer{i}")),
        });
        conns.push(conn);
        outboxes.push(rx);
    }
    for rx in &mut outboxes {
        while rx.try_recv().is_ok() {}
    }
    (hub, conns, outboxes)
}

// ─── Room code benchmarks ───────────────────────────────────────

fn bench_room_id_generate(c: &mut Criterion) {
    let mut ids = RoomIdGenerator::seeded(42);

    c.bench_function("room_id_generate", |b| {
        b.iter(|| {
            black_box(ids.generate());
        })
    });
}

fn bench_room_id_parse(c: &mut Criterion) {
    c.bench_function("room_id_parse_lowercase", |b| {
        b.iter(|| {
            black_box(RoomId::parse(black_box(" ab12cd ")).unwrap());
        })
    });
}

// ─── Protocol benchmarks ────────────────────────────────────────

fn bench_text_change_decode(c: &mut Criterion) {
    let encoded = InboundEvent::text_change("ABC123", &sample_text(1024), "Alice")
        .encode()
        .unwrap();

    c.bench_function("text_change_decode_1KB", |b| {
        b.iter(|| {
            black_box(InboundEvent::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_text_changed_encode(c: &mut Criterion) {
    let event = OutboundEvent::TextChanged {
        content: sample_text(1024),
        username: "Alice".into(),
    };

    c.bench_function("text_changed_encode_1KB", |b| {
        b.iter(|| {
            black_box(black_box(&event).encode().unwrap());
        })
    });
}

fn bench_cursor_roundtrip(c: &mut Criterion) {
    c.bench_function("cursor_position_roundtrip", |b| {
        b.iter(|| {
            let encoded = InboundEvent::cursor_position("ABC123", 512, "Alice")
                .encode()
                .unwrap();
            black_box(InboundEvent::decode(&encoded).unwrap());
        })
    });
}

// ─── Room store benchmarks ──────────────────────────────────────

fn bench_store_join_leave(c: &mut Criterion) {
    let mut store = RoomStore::with_generator(RoomIdGenerator::seeded(1));
    let room = store.create_room();
    let mut rng = StdRng::seed_from_u64(1);

    c.bench_function("store_join_leave", |b| {
        b.iter(|| {
            let id = ConnectionId::new();
            let user = User::new(id, "Bench".into(), room.clone(), &mut rng);
            black_box(store.join_room(&room, user, None));
            black_box(store.leave_room(&room, id));
        })
    });
}

fn bench_store_set_content(c: &mut Criterion) {
    let mut store = RoomStore::new();
    let room = store.create_room();
    let text = sample_text(4096);

    c.bench_function("store_set_content_4KB", |b| {
        b.iter(|| {
            black_box(store.set_content(black_box(&room), text.clone()));
        })
    });
}

// ─── Hub fan-out benchmarks ─────────────────────────────────────

fn bench_text_change_fan_out_100(c: &mut Criterion) {
    let (mut hub, conns, mut outboxes) = hub_with_members("FAN100", 100);
    let event = InboundEvent::text_change("FAN100", &sample_text(256), "Peer0");

    c.bench_function("text_change_fan_out_100_members", |b| {
        b.iter(|| {
            let _ = hub.handle(HubCommand::Inbound {
                conn: conns[0],
                event: black_box(event.clone()),
            });
            for rx in &mut outboxes {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

fn bench_cursor_fan_out_100(c: &mut Criterion) {
    let (mut hub, conns, mut outboxes) = hub_with_members("CUR100", 100);

    c.bench_function("cursor_fan_out_100_members", |b| {
        let mut position = 0usize;
        b.iter(|| {
            position += 1;
            let _ = hub.handle(HubCommand::Inbound {
                conn: conns[1],
                event: InboundEvent::cursor_position("CUR100", position, "Peer1"),
            });
            for rx in &mut outboxes {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

// ─── Mirror benchmarks ──────────────────────────────────────────

fn bench_memory_mirror_upsert(c: &mut Criterion) {
    let mirror = MemoryMirror::new();
    let room = RoomId::parse("MEM001").unwrap();
    let text = sample_text(1024);

    c.bench_function("memory_mirror_upsert_1KB", |b| {
        b.iter(|| {
            mirror.upsert_room(black_box(&room), black_box(&text)).unwrap();
        })
    });
}

fn bench_rocks_mirror_upsert(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mirror = RocksMirror::open(MirrorConfig::new(dir.path())).unwrap();
    let room = RoomId::parse("ROCK01").unwrap();
    let text = sample_text(4096);

    c.bench_function("rocks_mirror_upsert_4KB", |b| {
        b.iter(|| {
            mirror.upsert_room(black_box(&room), black_box(&text)).unwrap();
        })
    });
}

fn bench_rocks_mirror_find(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mirror = RocksMirror::open(MirrorConfig::new(dir.path())).unwrap();
    let room = RoomId::parse("ROCK02").unwrap();
    mirror.upsert_room(&room, &sample_text(4096)).unwrap();

    c.bench_function("rocks_mirror_find_4KB", |b| {
        b.iter(|| {
            black_box(mirror.find_room(black_box(&room)).unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_room_id_generate,
    bench_room_id_parse,
    bench_text_change_decode,
    bench_text_changed_encode,
    bench_cursor_roundtrip,
    bench_store_join_leave,
    bench_store_set_content,
    bench_text_change_fan_out_100,
    bench_cursor_fan_out_100,
    bench_memory_mirror_upsert,
    bench_rocks_mirror_upsert,
    bench_rocks_mirror_find,
);
criterion_main!(benches);
