//! Benchmark harness entry point. The actual measured workloads are the
//! criterion benches under `benches/`; run them with `cargo bench -p
//! themis-bench`.

fn main() {
    println!("themis-bench: run `cargo bench -p themis-bench` for entity CRUD, index scan, vector search, and AQL execution benchmarks.");
}
