//! Per-message timings and per-client aggregation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One measured round trip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    /// `id` of the envelope that arrived, empty when it had none.
    pub message_id: String,
    /// Milliseconds between building the message and the next arrival.
    pub time: f64,
    /// Client that measured it.
    pub client_id: String,
}

/// Statistics for one client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientReport {
    /// Client id.
    pub client_id: String,
    /// Every recorded timing, in send order.
    pub messages_timings: Vec<Timing>,
    /// Mean round trip in milliseconds.
    pub avg: f64,
    /// Fastest round trip in milliseconds.
    pub min: f64,
    /// Slowest round trip in milliseconds.
    pub max: f64,
}

/// Run results keyed by client id.
pub type Results = BTreeMap<String, ClientReport>;

impl ClientReport {
    /// Aggregate `timings`. All statistics are `0` when there are none.
    pub fn from_timings(client_id: impl Into<String>, timings: Vec<Timing>) -> Self {
        let (avg, min, max) = if timings.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let min = timings.iter().map(|t| t.time).fold(f64::INFINITY, f64::min);
            let max = timings
                .iter()
                .map(|t| t.time)
                .fold(f64::NEG_INFINITY, f64::max);
            let sum: f64 = timings.iter().map(|t| t.time).sum();
            #[allow(clippy::cast_precision_loss)]
            let avg = sum / timings.len() as f64;
            // rounding in the sum can push the mean a hair outside the range
            (avg.clamp(min, max), min, max)
        };
        Self {
            client_id: client_id.into(),
            messages_timings: timings,
            avg,
            min,
            max,
        }
    }
}

/// Figures across every client of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Overall {
    /// Clients present in the results.
    pub clients: usize,
    /// Timings recorded across all clients.
    pub messages: usize,
    /// Mean of the per-client averages (clients with timings only).
    pub mean_avg: f64,
    /// Lowest per-client minimum.
    pub min: f64,
    /// Highest per-client maximum.
    pub max: f64,
}

/// Summarize a run the way the analytics step does.
pub fn overall(results: &Results) -> Overall {
    let measured: Vec<&ClientReport> = results
        .values()
        .filter(|r| !r.messages_timings.is_empty())
        .collect();
    let mut summary = Overall {
        clients: results.len(),
        messages: results.values().map(|r| r.messages_timings.len()).sum(),
        ..Overall::default()
    };
    if measured.is_empty() {
        return summary;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = measured.iter().map(|r| r.avg).sum::<f64>() / measured.len() as f64;
    summary.min = measured.iter().map(|r| r.min).fold(f64::INFINITY, f64::min);
    summary.max = measured
        .iter()
        .map(|r| r.max)
        .fold(f64::NEG_INFINITY, f64::max);
    summary.mean_avg = mean.clamp(summary.min, summary.max);
    summary
}
