//! Simulated mesh workload.
//!
//! Agents first write memories concurrently, then exchange versions along a
//! random schedule in which some deliveries are tampered with: forged clocks,
//! corrupted state, or a receiver that has lost its checkpoints. A final
//! fault-free anti-entropy pass checks that every agent converged.

use crate::config::MeshConfig;
use crate::node::{MeshNode, NodeError, CORRUPT_KEY};
use async_stream::stream;
use futures::stream::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use soulmesh_core::{clamp_unit, EmergencePattern};
use soulmesh_emergence::PredictorStats;
use soulmesh_merge::MergeOutcome;
use soulmesh_metrics::{MetricsSink, MetricsSnapshot};
use soulmesh_snapshot::{SnapshotDiff, SnapshotStats, StateSnapshotEncoder};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Workload shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub agents: usize,
    pub writes_per_agent: usize,
    pub exchanges: usize,
    /// Chance a delivery carries a forged clock.
    pub forge_rate: f64,
    /// Chance a delivery carries corrupted state.
    pub corrupt_rate: f64,
    /// Chance the receiver lost its checkpoints before a delivery.
    pub checkpoint_loss_rate: f64,
    /// Fixed seed for a reproducible schedule.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            agents: 5,
            writes_per_agent: 40,
            exchanges: 300,
            forge_rate: 0.03,
            corrupt_rate: 0.02,
            checkpoint_loss_rate: 0.01,
            seed: None,
        }
    }
}

/// Tampering applied to one delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fault {
    None,
    ForgedClock,
    Corrupted,
    LostCheckpoints,
}

#[derive(Clone, Copy, Debug)]
struct Exchange {
    from: usize,
    to: usize,
    fault: Fault,
}

/// Tally of merge outcomes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub unchanged: usize,
    pub stale: usize,
    pub fast_forward: usize,
    pub resolved: usize,
    pub rolled_back: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    fn record(&mut self, result: &Result<MergeOutcome, NodeError>) {
        match result {
            Ok(MergeOutcome::Unchanged) => self.unchanged += 1,
            Ok(MergeOutcome::Stale) => self.stale += 1,
            Ok(MergeOutcome::FastForward) => self.fast_forward += 1,
            Ok(MergeOutcome::Resolved(_)) => self.resolved += 1,
            Ok(MergeOutcome::RolledBack { .. }) => self.rolled_back += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.unchanged
            + self.stale
            + self.fast_forward
            + self.resolved
            + self.rolled_back
            + self.failed
    }
}

/// Everything observed during one run.
#[derive(Clone, Debug)]
pub struct SimulationReport {
    pub agents: usize,
    pub writes: usize,
    pub outcomes: OutcomeCounts,
    pub total_time: Duration,
    pub avg_exchange_time: Duration,
    pub metrics: MetricsSnapshot,
    pub alerts: Vec<EmergencePattern>,
    pub predictor: PredictorStats,
    pub observed_alerts: usize,
    pub snapshots: SnapshotStats,
    pub drift: Option<SnapshotDiff>,
    pub converged: bool,
}

impl SimulationReport {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              SoulMesh Simulation Report                    ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Agents:                    {:>30} ║", self.agents);
        println!("║  Local Writes:              {:>30} ║", self.writes);
        println!("║  Deliveries:                {:>30} ║", self.outcomes.total());
        println!("║    fast-forward:            {:>30} ║", self.outcomes.fast_forward);
        println!("║    resolved:                {:>30} ║", self.outcomes.resolved);
        println!("║    rolled back:             {:>30} ║", self.outcomes.rolled_back);
        println!("║    failed:                  {:>30} ║", self.outcomes.failed);
        println!("║  Conflicts Detected:        {:>30} ║", self.metrics.counters.detected);
        println!("║  Active Conflicts:          {:>30} ║", self.metrics.active_conflicts);
        println!("║  Avg Resolution Time:       {:>28}ms ║", format!("{:.4}", self.metrics.avg_resolution_time));
        println!("║  Avg Delivery Time:         {:>28}µs ║", self.avg_exchange_time.as_micros());
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Snapshots Retained:        {:>30} ║", self.snapshots.count);
        println!("║  Alerts Raised:             {:>30} ║", self.predictor.alerts_raised);
        println!("║  Alerts Observed:           {:>30} ║", self.observed_alerts);
        println!("║  Converged:                 {:>30} ║", self.converged);
        println!("╚════════════════════════════════════════════════════════════╝");

        if let Some(drift) = &self.drift {
            println!(
                "\nDrift since first snapshot: {} agent changes over {}ms",
                drift.agent_changes, drift.time_delta
            );
        }
        if !self.alerts.is_empty() {
            println!("\nRecent alerts (newest first):");
            for alert in &self.alerts {
                println!("  [{:<8}] {}", alert.severity.to_string(), alert.pattern_type);
            }
        }
    }
}

/// Random delivery schedule.
fn exchange_schedule(
    agents: usize,
    exchanges: usize,
    config: &SimulationConfig,
    seed: u64,
) -> impl Stream<Item = Exchange> {
    let forge = clamp_unit(config.forge_rate);
    let corrupt = clamp_unit(config.corrupt_rate);
    let loss = clamp_unit(config.checkpoint_loss_rate);
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..exchanges {
            let from = rng.gen_range(0..agents);
            let to = rng.gen_range(0..agents);
            let fault = if rng.gen_bool(forge) {
                Fault::ForgedClock
            } else if rng.gen_bool(corrupt) {
                Fault::Corrupted
            } else if rng.gen_bool(loss) {
                Fault::LostCheckpoints
            } else {
                Fault::None
            };
            yield Exchange { from, to, fault };
        }
    }
}

fn deliver(node: &MeshNode, from: &str, to: &str, fault: Fault) -> Result<MergeOutcome, NodeError> {
    match fault {
        Fault::None => node.sync(from, to),
        Fault::ForgedClock => {
            let target = to.to_string();
            node.deliver(from, to, move |p| {
                let forged = p.clock.get(&target) + 1_000;
                p.clock.observe(target, forged);
            })
        }
        Fault::Corrupted => node.deliver(from, to, |p| {
            p.value.insert(CORRUPT_KEY.to_string(), 1);
        }),
        Fault::LostCheckpoints => {
            node.lose_checkpoints(to)?;
            node.sync(from, to)
        }
    }
}

/// Run the workload against a fresh mesh.
pub async fn run(config: MeshConfig, sink: Arc<dyn MetricsSink>) -> SimulationReport {
    let sim = config.simulation.clone();
    let agents = sim.agents.max(1);
    let seed = sim.seed.unwrap_or_else(rand::random);
    info!(agents, exchanges = sim.exchanges, seed, "starting simulation");

    let start = Instant::now();
    let node = Arc::new(MeshNode::new(config, sink));
    for i in 0..agents {
        if let Err(e) = node.join(&format!("agent-{i}")) {
            warn!(error = %e, "join failed");
        }
    }
    let names = node.agents();

    let mut alerts = node.subscribe_alerts();
    let observer = tokio::spawn(async move {
        let mut seen = 0usize;
        loop {
            match alerts.recv().await {
                Ok(alert) => {
                    seen += 1;
                    debug!(
                        pattern = %alert.pattern_type,
                        severity = %alert.severity,
                        "observer received alert"
                    );
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "observer lagging");
                    seen += missed as usize;
                }
                Err(RecvError::Closed) => break,
            }
        }
        seen
    });

    let first = node.snapshot().ok();

    // Phase 1: concurrent local writes.
    let mut handles = Vec::with_capacity(names.len());
    for (idx, name) in names.iter().cloned().enumerate() {
        let node = Arc::clone(&node);
        let writes = sim.writes_per_agent;
        handles.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(idx as u64 + 1));
            for i in 0..writes {
                let key = format!("trace_{}", rng.gen_range(0..20));
                if let Err(e) = node.remember(&name, &key, rng.gen_range(1..100)) {
                    warn!(agent = %name, error = %e, "write failed");
                }
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "writer task failed");
        }
    }
    info!("local writes completed");

    // Phase 2: scheduled exchanges with faults.
    let mut outcomes = OutcomeCounts::default();
    let mut times = Vec::new();
    let exchanges = if names.len() > 1 { sim.exchanges } else { 0 };
    let mut schedule = Box::pin(exchange_schedule(names.len(), exchanges, &sim, seed));
    while let Some(Exchange { from, to, fault }) = schedule.next().await {
        if from == to {
            continue;
        }
        let started = Instant::now();
        let result = deliver(&node, &names[from], &names[to], fault);
        times.push(started.elapsed());
        outcomes.record(&result);

        if let Err(e) = node.snapshot_if_due(soulmesh_core::now_millis()) {
            warn!(error = %e, "snapshot failed");
        }
    }
    info!(deliveries = outcomes.total(), "exchanges completed");

    // Phase 3: fault-free anti-entropy until every agent holds the same memory.
    for _ in 0..names.len() {
        for from in &names {
            for to in &names {
                if from != to {
                    outcomes.record(&node.sync(from, to));
                }
            }
        }
    }
    let converged = names.windows(2).all(|w| node.memory(&w[0]) == node.memory(&w[1]));

    let last = node.snapshot().ok();
    let drift = match (&first, &last) {
        (Some(a), Some(b)) => Some(StateSnapshotEncoder::get_snapshot_diff(a, b)),
        _ => None,
    };

    let avg_exchange_time = if times.is_empty() {
        Duration::ZERO
    } else {
        times.iter().sum::<Duration>() / times.len() as u32
    };

    let report = SimulationReport {
        agents: names.len(),
        writes: names.len() * sim.writes_per_agent,
        outcomes,
        total_time: start.elapsed(),
        avg_exchange_time,
        metrics: node.metrics(),
        alerts: node.recent_alerts(),
        predictor: node.predictor().stats(),
        observed_alerts: 0,
        snapshots: node.snapshots().stats(),
        drift,
        converged,
    };

    drop(node);
    let observed_alerts = observer.await.unwrap_or_default();
    SimulationReport {
        observed_alerts,
        ..report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soulmesh_metrics::MemorySink;

    fn config(sim: SimulationConfig) -> MeshConfig {
        MeshConfig {
            simulation: sim,
            ..MeshConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fault_free_run_converges() {
        let sim = SimulationConfig {
            agents: 3,
            writes_per_agent: 10,
            exchanges: 50,
            forge_rate: 0.0,
            corrupt_rate: 0.0,
            checkpoint_loss_rate: 0.0,
            seed: Some(7),
        };
        let report = run(config(sim), Arc::new(MemorySink::new())).await;
        assert!(report.converged);
        assert_eq!(report.outcomes.rolled_back, 0);
        assert_eq!(report.outcomes.failed, 0);
        assert!(report.metrics.counters.detected > 0);
        assert_eq!(report.metrics.active_conflicts, 0);
        assert_eq!(report.drift.unwrap().agent_changes, 3);
    }

    #[tokio::test]
    async fn test_faults_are_contained() {
        let sim = SimulationConfig {
            agents: 4,
            writes_per_agent: 10,
            exchanges: 200,
            forge_rate: 0.3,
            corrupt_rate: 0.2,
            checkpoint_loss_rate: 0.1,
            seed: Some(42),
        };
        let report = run(config(sim), Arc::new(MemorySink::new())).await;
        assert!(report.converged);
        assert!(report.outcomes.rolled_back + report.outcomes.failed > 0);
        assert_eq!(
            report.metrics.counters.rollbacks as usize,
            report.outcomes.rolled_back + report.outcomes.failed
        );
        assert!(!report.alerts.is_empty());
        assert!(report.observed_alerts >= report.alerts.len().min(1));
    }

    #[test]
    fn test_schedule_is_reproducible() {
        let sim = SimulationConfig::default();
        let collect = |seed| {
            tokio_test::block_on(
                exchange_schedule(4, 20, &sim, seed)
                    .map(|e| (e.from, e.to, e.fault))
                    .collect::<Vec<_>>(),
            )
        };
        assert_eq!(collect(3), collect(3));
    }
}
