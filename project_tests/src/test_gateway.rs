//! # `HttpGateway` Live Smoke Test
//!
//! Exercises `lib_dispatch::retrieve::HttpGateway` against a running
//! dispatch coordinator: reset, login, catalog and availability reads, one
//! queue peek, and the final stop. No dispatch is committed, so the run it
//! leaves behind is empty.
//!
//! Run with `cargo run -p project_tests --bin test_gateway -- --base-url http://localhost:5000/`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use clap::Parser;

use lib_dispatch::core::DistanceIndex;
use lib_dispatch::gateway::{NextCall, ResourceGateway};
use lib_dispatch::models::ServiceKind;
use lib_dispatch::retrieve::{HttpGateway, HttpGatewayConfig};

/// Connection arguments.
#[derive(Parser, Debug)]
#[clap(about = "Live smoke test of the dispatch coordinator gateway")]
struct Args {
    /// Coordinator root URL.
    #[clap(long, env = "DISPATCH_BASE_URL", default_value = "http://localhost:5000/")]
    base_url: String,
    /// Login user name.
    #[clap(long, env = "DISPATCH_USERNAME", default_value = "distancify")]
    username: String,
    /// Login password.
    #[clap(long, env = "DISPATCH_PASSWORD", default_value = "hackathon")]
    password: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let gateway = HttpGateway::new(HttpGatewayConfig {
        base_url: args.base_url,
        username: args.username,
        password: args.password,
        ..HttpGatewayConfig::default()
    })?;

    println!("--- Starting Gateway Smoke Tests ---");

    // --- TEST 1: Reset & Login ---
    println!("\n[Test 1] Resetting the run and logging in...");
    let status = gateway.reset_run("default", 10, 5).await?;
    println!("✅ Reset: status '{}', target {}", status.status, status.target_dispatches);
    gateway.authenticate().await?;
    assert!(gateway.tokens().bearer().await.is_some());
    println!("✅ Logged in, bearer token stored");

    // --- TEST 2: Catalog & Availability ---
    println!("\n[Test 2] Reading locations and availability per kind...");
    let locations = gateway.locations().await?;
    println!("✅ {} locations", locations.len());
    for kind in ServiceKind::ALL {
        let sources = gateway.service_availability(kind).await?;
        let units: i64 = sources.iter().map(|s| s.quantity).sum();
        println!("✅ {}: {} sources, {} units", kind, sources.len(), units);
    }

    // --- TEST 3: Distance Index ---
    println!("\n[Test 3] Building the distance index...");
    let index = DistanceIndex::from_gateway(&gateway, ServiceKind::Medical).await?;
    println!("✅ Index covers {} targets", index.len());

    // --- TEST 4: Spot Availability ---
    if let Some(source) = gateway.service_availability(ServiceKind::Medical).await?.first() {
        println!("\n[Test 4] Checking availability at {}, {}...", source.city, source.county);
        let count = gateway
            .check_availability(ServiceKind::Medical, &source.county, &source.city)
            .await?;
        assert!(count >= 0);
        println!("✅ {} Medical units available", count);
    }

    // --- TEST 5: Queue Peek ---
    println!("\n[Test 5] Peeking at the call queue...");
    match gateway.next_call().await? {
        NextCall::Call(call) => println!("✅ Next call for {}, {} ({} requests)", call.city, call.county, call.requests().len()),
        NextCall::Empty => println!("✅ Queue is empty"),
    }
    println!("✅ {} calls queued", gateway.call_queue().await?.len());

    // --- TEST 6: Stop ---
    println!("\n[Test 6] Stopping the run...");
    let final_status = gateway.stop_run().await?;
    println!(
        "✅ Stopped: {} dispatches, missed {}, over-dispatched {}",
        final_status.total_dispatches, final_status.errors.missed, final_status.errors.over_dispatched
    );
    gateway.clear_credentials().await;

    println!("\n--- All Smoke Tests Passed Successfully ---");
    Ok(())
}
