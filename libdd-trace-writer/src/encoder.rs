// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire encoders for trace payloads.
//!
//! A payload is a list of traces. Encoders serialize each trace on its own so the chunker can
//! measure it, then join a group of serialized traces into a single payload. The bytes added by
//! the join are known ahead of time through [`Encoder::join_overhead`].

use crate::span::TraceChunk;
use rmp::encode::{write_array_len, ByteBuf, ValueWriteError};
use std::convert::Infallible;
use std::fmt::Debug;

pub const MSGPACK_CONTENT_TYPE: &str = "application/msgpack";
pub const JSON_CONTENT_TYPE: &str = "application/json";

pub trait Encoder: Send + Sync + Debug {
    /// Value of the `Content-Type` header of payloads built by this encoder.
    fn content_type(&self) -> &'static str;

    /// Serialize a single trace.
    ///
    /// # Errors
    /// Fails if the trace cannot be represented in the wire format.
    fn encode_trace(&self, trace: &TraceChunk) -> anyhow::Result<Vec<u8>>;

    /// Build a payload from serialized traces.
    fn join(&self, encoded_traces: &[Vec<u8>]) -> Vec<u8>;

    /// Number of bytes [`Encoder::join`] adds around `count` serialized traces.
    fn join_overhead(&self, count: usize) -> usize;
}

/// MessagePack encoder used by the v0.3 and v0.4 APIs.
#[derive(Clone, Copy, Debug, Default)]
pub struct MsgpackEncoder;

impl Encoder for MsgpackEncoder {
    fn content_type(&self) -> &'static str {
        MSGPACK_CONTENT_TYPE
    }

    fn encode_trace(&self, trace: &TraceChunk) -> anyhow::Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(trace)?)
    }

    fn join(&self, encoded_traces: &[Vec<u8>]) -> Vec<u8> {
        let size = self.join_overhead(encoded_traces.len())
            + encoded_traces.iter().map(Vec::len).sum::<usize>();
        let mut buf = ByteBuf::from_vec(Vec::with_capacity(size));
        unwrap_infallible_write(write_array_len(&mut buf, encoded_traces.len() as u32));

        let mut payload = buf.into_vec();
        for trace in encoded_traces {
            payload.extend_from_slice(trace);
        }
        payload
    }

    fn join_overhead(&self, count: usize) -> usize {
        // fixarray, array 16 and array 32 markers
        match count {
            0..=15 => 1,
            16..=0xffff => 3,
            _ => 5,
        }
    }
}

/// Unwrap an infallible result without panics
fn unwrap_infallible_write<T>(res: Result<T, ValueWriteError<Infallible>>) -> T {
    match res {
        Ok(ok) => ok,
        Err(ValueWriteError::InvalidMarkerWrite(never))
        | Err(ValueWriteError::InvalidDataWrite(never)) => match never {},
    }
}

/// JSON encoder used by the v0.2 API.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode_trace(&self, trace: &TraceChunk) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(trace)?)
    }

    fn join(&self, encoded_traces: &[Vec<u8>]) -> Vec<u8> {
        let size = self.join_overhead(encoded_traces.len())
            + encoded_traces.iter().map(Vec::len).sum::<usize>();
        let mut payload = Vec::with_capacity(size);
        payload.push(b'[');
        for (i, trace) in encoded_traces.iter().enumerate() {
            if i > 0 {
                payload.push(b',');
            }
            payload.extend_from_slice(trace);
        }
        payload.push(b']');
        payload
    }

    fn join_overhead(&self, count: usize) -> usize {
        2 + count.saturating_sub(1)
    }
}
