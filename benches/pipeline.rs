//! Pipeline Performance Benchmarks
//!
//! End-to-end request handling against a `SQLite` file:
//! - Small bounded SELECT
//! - Parameterized filter
//! - Large result set cut down by the row cap

use criterion::{black_box, criterion_group, criterion_main, Criterion};

#[cfg(feature = "sqlite")]
use portcullis::engine::sqlite::SqliteAdapter;
#[cfg(feature = "sqlite")]
use portcullis::{AccessTier, Gateway, GatewayConfig};
#[cfg(feature = "sqlite")]
use serde_json::json;

#[cfg(feature = "sqlite")]
fn bench_db(name: &str, rows: usize) -> std::path::PathBuf {
    let temp_file = std::env::temp_dir().join(format!("bench_pipeline_{name}.db"));
    let _ = std::fs::remove_file(&temp_file);

    let mut conn = rusqlite::Connection::open(&temp_file).expect("Failed to create database");
    conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)", [])
        .expect("Failed to create table");
    let tx = conn.transaction().expect("Failed to start transaction");
    for i in 1..=rows {
        tx.execute(
            "INSERT INTO users (name, age) VALUES (?, ?)",
            [format!("User {i}"), (i % 100).to_string()],
        )
        .expect("Failed to insert");
    }
    tx.commit().expect("Failed to commit");

    temp_file
}

#[cfg(feature = "sqlite")]
fn unlimited_gateway() -> Gateway {
    let mut config = GatewayConfig::default();
    config.rate_limit.max_requests = u32::MAX;
    Gateway::new(config).expect("valid config")
}

#[cfg(feature = "sqlite")]
fn bench_sqlite_pipeline(c: &mut Criterion) {
    let small = bench_db("small", 100);
    let large = bench_db("large", 10_000);
    let gateway = unlimited_gateway();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let adapter = SqliteAdapter::new(&small);
    let payload = json!({"sql": "SELECT * FROM users", "limit": 50});
    c.bench_function("pipeline_select_50", |b| {
        b.iter(|| {
            let result = runtime.block_on(gateway.handle(
                &adapter,
                black_box(&payload),
                "bench",
                AccessTier::Public,
            ));
            assert!(result.is_ok());
            result
        });
    });

    let payload = json!({"sql": "SELECT id, name FROM users WHERE age BETWEEN ? AND ?", "params": [50, 99]});
    c.bench_function("pipeline_filtered", |b| {
        b.iter(|| {
            runtime.block_on(gateway.handle(&adapter, black_box(&payload), "bench", AccessTier::Public))
        });
    });

    let adapter = SqliteAdapter::new(&large);
    let payload = json!({"sql": "SELECT * FROM users", "limit": 1000});
    c.bench_function("pipeline_capped_10000_rows", |b| {
        b.iter(|| {
            let result = runtime.block_on(gateway.handle(
                &adapter,
                black_box(&payload),
                "bench",
                AccessTier::Trusted,
            ));
            assert!(result.as_ref().is_ok_and(|o| o.result.truncated));
            result
        });
    });

    let _ = std::fs::remove_file(&small);
    let _ = std::fs::remove_file(&large);
}

#[cfg(feature = "sqlite")]
criterion_group!(benches, bench_sqlite_pipeline);

#[cfg(not(feature = "sqlite"))]
criterion_group!(benches,);

criterion_main!(benches);
