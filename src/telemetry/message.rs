use serde::Serialize;

use super::coords::CoordinateBuffers;
use crate::config::StreamConfig;
use crate::counter::RunId;

/// Who is streaming: fixed for the lifetime of one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamIdentity {
    pub user: String,
    pub color: String,
    pub extra: String,
    pub run_id: RunId,
    pub env_id: u64,
}

impl StreamIdentity {
    pub fn new(config: &StreamConfig, run_id: RunId, env_id: u64) -> Self {
        Self {
            user: config.user.clone(),
            color: config.color.clone(),
            extra: config.extra.clone(),
            run_id,
            env_id,
        }
    }

    pub fn stream_id(&self, instance: usize) -> String {
        self.run_id.stream_id(self.env_id, instance)
    }
}

// The collector renders user/extra/env_id line by line, hence the newlines.
#[derive(Serialize)]
struct Metadata<'a> {
    user: String,
    color: &'a str,
    extra: String,
    env_id: String,
}

#[derive(Serialize)]
struct Message<'a> {
    metadata: Metadata<'a>,
    coords: &'a [[i32; 3]],
}

/// One JSON payload per instance that has samples, in instance order.
pub fn encode_batch(
    identity: &StreamIdentity,
    coords: &CoordinateBuffers,
) -> serde_json::Result<Vec<String>> {
    let mut payloads = Vec::new();
    for (i, trace) in coords.iter() {
        if trace.is_empty() {
            continue;
        }
        let msg = Message {
            metadata: Metadata {
                user: format!("{}\n", identity.user),
                color: &identity.color,
                extra: format!("{}\n", identity.extra),
                env_id: format!("{}\n", identity.stream_id(i)),
            },
            coords: trace,
        };
        payloads.push(serde_json::to_string(&msg)?);
    }
    Ok(payloads)
}
