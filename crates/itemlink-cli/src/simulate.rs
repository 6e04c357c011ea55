//! Lossy-device simulation.
//!
//! Spins up one relay per item on a shared device bus and a shared internal
//! bus, then plays the device side: commands are dropped with a configurable
//! probability, every received copy is acknowledged (acks can be lost too),
//! each command is executed once and answered with a report that is
//! sometimes sent twice.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Result};
use itemlink_core::{BusReceiver, Message, MessageBus, RelayConfig, DEFAULT_BUS_CAPACITY};
use itemlink_relay::{Relay, RelayStats};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Publisher name used for outbound commands.
const CONSOLE: &str = "console";

/// How long the device waits to hand traffic to a relay.
const DEVICE_DELIVER_TIMEOUT: Duration = Duration::from_millis(200);

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub items: usize,
    pub commands: usize,
    /// Probability that a device-bus message (or its ack) is lost
    pub loss: f64,
    /// Probability that a report is sent twice
    pub duplicates: f64,
    pub seed: u64,
    pub max_duration: Duration,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            items: 3,
            commands: 5,
            loss: 0.3,
            duplicates: 0.3,
            seed: 7,
            max_duration: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub item_id: String,
    pub stats: RelayStats,
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Every command acknowledged before `max_duration` ran out
    pub completed: bool,
    pub commands_sent: usize,
    pub commands_executed: u64,
    pub reports_forwarded: u64,
    pub items: Vec<ItemReport>,
}

/// Run a full simulation.
pub async fn run(config: RelayConfig, options: SimulationOptions) -> Result<SimulationReport> {
    ensure!(options.items > 0, "at least one item is required");
    ensure!((0.0..1.0).contains(&options.loss), "loss must be in [0, 1)");
    ensure!(
        (0.0..=1.0).contains(&options.duplicates),
        "duplicates must be in [0, 1]"
    );

    let (device_bus, device_rx) = MessageBus::channel("device", DEFAULT_BUS_CAPACITY);
    let (internal_bus, internal_rx) = MessageBus::channel("internal", DEFAULT_BUS_CAPACITY);
    let device_bus = Arc::new(device_bus);
    let internal_bus = Arc::new(internal_bus);

    let mut relays = HashMap::new();
    for n in 1..=options.items {
        let item_id = format!("item-{}", n);
        let relay = Relay::spawn(
            item_id.clone(),
            config.clone(),
            device_bus.clone(),
            internal_bus.clone(),
        )?;
        relays.insert(item_id, Arc::new(relay));
    }
    let relays = Arc::new(relays);

    let executed = Arc::new(AtomicU64::new(0));
    let device = tokio::spawn(play_device(
        device_rx,
        relays.clone(),
        options.clone(),
        executed.clone(),
    ));

    let forwarded = Arc::new(AtomicU64::new(0));
    let consumer = tokio::spawn(count_forwarded(internal_rx, forwarded.clone()));

    let mut commands_sent = 0;
    for n in 0..options.commands {
        for (item_id, relay) in relays.iter() {
            let command = Message::command(
                CONSOLE,
                vec![item_id.clone(), format!("step-{}", n)],
            );
            relay.enqueue_timeout(command, config.resend_interval()).await?;
            commands_sent += 1;
        }
    }

    let completed =
        wait_until_acknowledged(&relays, options.commands as u64, options.max_duration).await?;
    // Let the last reports clear the forward path.
    tokio::time::sleep(config.forward_timeout()).await;

    let mut items = Vec::with_capacity(relays.len());
    for (item_id, relay) in relays.iter() {
        items.push(ItemReport {
            item_id: item_id.clone(),
            stats: relay.stats().await?,
        });
        relay.shutdown().await;
    }
    items.sort_by(|a, b| a.item_id.cmp(&b.item_id));

    device.abort();
    consumer.abort();

    Ok(SimulationReport {
        completed,
        commands_sent,
        commands_executed: executed.load(Ordering::Relaxed),
        reports_forwarded: forwarded.load(Ordering::Relaxed),
        items,
    })
}

/// Wait until every relay has had `per_item` commands acknowledged.
async fn wait_until_acknowledged(
    relays: &HashMap<String, Arc<Relay>>,
    per_item: u64,
    max_duration: Duration,
) -> Result<bool> {
    let deadline = tokio::time::Instant::now() + max_duration;
    let mut timer = tokio::time::interval(Duration::from_millis(100));
    loop {
        timer.tick().await;
        let mut pending = 0;
        for relay in relays.values() {
            if relay.stats().await?.acknowledged < per_item {
                pending += 1;
            }
        }
        if pending == 0 {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(
                "{} relays still had unacknowledged commands after {:?}",
                pending,
                max_duration
            );
            return Ok(false);
        }
    }
}

async fn play_device(
    mut device_rx: BusReceiver,
    relays: Arc<HashMap<String, Arc<Relay>>>,
    options: SimulationOptions,
    executed: Arc<AtomicU64>,
) {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut seen_commands = HashSet::new();

    while let Some(command) = device_rx.recv().await {
        if rng.gen_bool(options.loss) {
            tracing::debug!("Device lost {}", command.unique_id);
            continue;
        }
        let Some(relay) = command.fields.first().and_then(|item| relays.get(item)) else {
            tracing::warn!("Device got {} for an unknown item", command.unique_id);
            continue;
        };
        let item_id = relay.item_id().to_string();

        if !rng.gen_bool(options.loss) {
            let ack = Message::acknowledgment(item_id.clone(), command.unique_id.clone());
            deliver(relay, ack).await;
        }

        // Devices execute a command once, however many copies arrive.
        if !seen_commands.insert(command.unique_id.clone()) {
            continue;
        }
        executed.fetch_add(1, Ordering::Relaxed);

        let action = command.fields.get(1).cloned().unwrap_or_default();
        let report = Message::report(item_id.clone(), vec!["done".to_string(), action])
            .with_unique_id(format!("{}-{}", item_id, uuid::Uuid::new_v4().simple()));
        if rng.gen_bool(options.duplicates) {
            deliver(relay, report.clone()).await;
        }
        deliver(relay, report).await;
    }
}

async fn deliver(relay: &Relay, message: Message) {
    if let Err(e) = relay.deliver_timeout(message, DEVICE_DELIVER_TIMEOUT).await {
        tracing::warn!("Device could not reach relay {}: {}", relay.item_id(), e);
    }
}

async fn count_forwarded(mut internal_rx: BusReceiver, forwarded: Arc<AtomicU64>) {
    while let Some(report) = internal_rx.recv().await {
        tracing::debug!("Internal bus got {} from {}", report.unique_id, report.publisher);
        forwarded.fetch_add(1, Ordering::Relaxed);
    }
}
