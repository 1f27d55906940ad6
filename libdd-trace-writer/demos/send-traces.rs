// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use libdd_trace_writer::config::WriterConfig;
use libdd_trace_writer::span::{Span, TraceChunk};
use libdd_trace_writer::writer::TraceWriterBuilder;
use std::collections::HashMap;
use std::time::{Duration, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

fn get_span(now: i64, trace_id: u64, span_id: u64) -> Span {
    Span {
        trace_id,
        span_id,
        parent_id: span_id - 1,
        duration: trace_id as i64 % 3 * 10_000_000 + span_id as i64 * 1_000_000,
        start: now + trace_id as i64 * 1_000_000_000 + span_id as i64 * 1_000_000,
        service: "trace-writer-test".to_string(),
        name: format!("test-name-{}", span_id % 2),
        resource: format!("test-resource-{}", (span_id + trace_id) % 3),
        error: if trace_id % 10 == 0 { 1 } else { 0 },
        metrics: HashMap::from([("_sampling_priority_v1".to_string(), 1.0)]),
        ..Default::default()
    }
}

#[derive(Parser)]
#[command(name = "send-traces")]
#[command(about = "Send generated traces to a trace agent through the async trace writer")]
struct Args {
    #[arg(
        short = 'u',
        long = "url",
        help = "Set the trace agent URL, read from DD_TRACE_AGENT_URL or DD_AGENT_HOST when missing"
    )]
    url: Option<String>,
    #[arg(short = 't', long = "traces", default_value_t = 10)]
    traces: u64,
    #[arg(short = 's', long = "spans", default_value_t = 3)]
    spans: u64,
    #[arg(long = "interval-ms", default_value_t = 200)]
    interval_ms: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let args = Args::parse();
    let mut builder = TraceWriterBuilder::from_config(&WriterConfig::from_env());
    if let Some(url) = &args.url {
        builder.set_url(url);
    }
    builder
        .set_language("rust")
        .set_language_version(env!("CARGO_PKG_RUST_VERSION"))
        .set_tracer_version(env!("CARGO_PKG_VERSION"))
        .set_interval(Duration::from_millis(args.interval_ms));
    let writer = builder
        .build_async()
        .expect("Failed to build the trace writer");

    writer.flush_completed().subscribe(|responses| {
        for response in responses {
            println!(
                "flushed {} traces: status {:?} error {:?}",
                response.trace_count(),
                response.status(),
                response.error()
            );
        }
    });

    let now = UNIX_EPOCH
        .elapsed()
        .expect("Failed to get time since UNIX_EPOCH")
        .as_nanos() as i64;
    for trace_id in 1..=args.traces {
        let trace: TraceChunk = (1..=args.spans)
            .map(|span_id| get_span(now, trace_id, span_id))
            .collect();
        writer.write(trace);
    }

    if !writer.shutdown() {
        eprintln!("The trace writer did not stop in time");
    }
    println!(
        "api version: {}, counts: {:?}",
        writer.current_api_id(),
        writer.counts()
    );
}
