//! Trace loader for `Replay` behavior phases: a JSON file mapping replay
//! client ids to a list of inter-arrival intervals, in seconds.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to read trace file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse trace file {path}: {source}")]
    Json {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("replay_client_id {0} not present in trace file")]
    UnknownReplayId(i32),
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    intervals: Vec<f64>,
}

/// One replay client's inter-arrival intervals, in seconds.
#[derive(Debug, Clone)]
pub struct Trace {
    pub intervals_s: Vec<f64>,
}

/// A parsed trace file, keyed by the replay client id used in
/// `replay_client_id`.
pub struct TraceFile {
    traces: HashMap<i32, Trace>,
}

impl TraceFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TraceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: HashMap<String, RawEntry> = serde_json::from_str(&text).map_err(|source| TraceError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let traces = raw
            .into_iter()
            .filter_map(|(k, v)| k.parse::<i32>().ok().map(|id| (id, Trace { intervals_s: v.intervals })))
            .collect();
        Ok(Self { traces })
    }

    pub fn get(&self, replay_id: i32) -> Result<&Trace, TraceError> {
        self.traces.get(&replay_id).ok_or(TraceError::UnknownReplayId(replay_id))
    }
}

impl Trace {
    /// Divides every interval by `scale`: values `> 1.0` compress playback
    /// (faster replay), `< 1.0` stretch it out, floored at zero. The
    /// request *count* for a replay phase is the trace's interval count
    /// regardless of scale — scale only reshapes timing, it does not
    /// manufacture or drop requests.
    pub fn scaled_intervals_s(&self, scale: f64) -> impl Iterator<Item = f64> + '_ {
        self.intervals_s.iter().map(move |v| (v / scale).max(0.0))
    }

    pub fn request_count(&self) -> usize {
        self.intervals_s.len()
    }
}
