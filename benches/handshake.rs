//! Handshake and accept-path benchmark suite.
//!
//! Benchmarks the upgrade path at different scales:
//! - Request parsing and accept-key computation
//! - Chunked delivery sizes: whole request, 64-byte and 1-byte chunks
//! - Concurrent handshakes per tick: 10, 100, 500
//!
//! Run with: cargo bench --bench handshake
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ws_poll_server::handshake::{HandshakeRequest, accept_key};
use ws_poll_server::{
    HandshakeLimits, HandshakeSession, HandshakeStatus, MemoryListener, MemoryStream, Server,
    ServerConfig,
};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
                         Host: example.com\r\n\
                         Upgrade: websocket\r\n\
                         Connection: Upgrade\r\n\
                         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                         Sec-WebSocket-Protocol: chat, superchat\r\n\
                         Sec-WebSocket-Version: 13\r\n\r\n";

const CHUNK_SIZES: &[usize] = &[REQUEST.len(), 64, 1];
const CONNECTION_COUNTS: &[usize] = &[10, 100, 500];

// ============================================================================
// Benchmark: Parsing
// ============================================================================

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    group.bench_function("request", |b| {
        b.iter(|| HandshakeRequest::parse(black_box(REQUEST)));
    });
    group.bench_function("accept_key", |b| {
        b.iter(|| accept_key(black_box("dGhlIHNhbXBsZSBub25jZQ==")));
    });

    group.finish();
}

// ============================================================================
// Benchmark: Chunked Session
// ============================================================================

fn bench_session_chunks(c: &mut Criterion) {
    let client_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50000);
    let server_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9080);

    let mut group = c.benchmark_group("session");
    for &chunk in CHUNK_SIZES {
        group.bench_with_input(BenchmarkId::new("chunk", chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let (mut client, server) = MemoryStream::pair(client_addr, server_addr);
                let now = Instant::now();
                let mut session =
                    HandshakeSession::new(Box::new(server), now, HandshakeLimits::default());

                for part in REQUEST.chunks(chunk) {
                    client.write_all(part).unwrap();
                    if let HandshakeStatus::Done = session.advance_at(now) {
                        break;
                    }
                }
                black_box(client.read_available())
            });
        });
    }
    group.finish();
}

// ============================================================================
// Benchmark: Accept Path
// ============================================================================

fn bench_accept_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("accept");
    group.sample_size(20);

    for &count in CONNECTION_COUNTS {
        group.bench_with_input(BenchmarkId::new("connections", count), &count, |b, &count| {
            b.iter(|| {
                let listener = MemoryListener::new();
                let connector = listener.connector();
                let mut server = Server::new(ServerConfig::default(), Box::new(listener)).unwrap();
                server.listen(9080, Vec::new(), false).unwrap();

                let clients: Vec<MemoryStream> = (0..count)
                    .map(|_| {
                        let mut client = connector.connect().unwrap();
                        client.write_all(REQUEST).unwrap();
                        client
                    })
                    .collect();

                server.poll();
                server.poll();
                assert_eq!(server.peer_count(), count);
                black_box(clients)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse, bench_session_chunks, bench_accept_tick);
criterion_main!(benches);
