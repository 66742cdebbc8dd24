#![allow(dead_code)]

use std::cell::RefCell;
use std::io::Write;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gbvec::{
    BindingError, BindingView, Diagnostics, EnvConfig, EpisodeLog, Extra, InitRequest,
    ObservationLayout, Position, ResetMode, SimulationBinding, SlotAction, key_mask_for,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tungstenite::Message;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// =============================================================================
// CallRecord: per-test-thread knobs and call record for the fake binding
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct CallRecord {
    pub fail_init: bool,
    pub report_agents: Option<usize>,
    pub fail_log: bool,
    pub inits: usize,
    pub resets: Vec<(u64, ResetMode)>,
    pub steps: u64,
    pub renders: Vec<usize>,
    pub closes: usize,
    pub last_keys: Vec<u8>,
    pub last_continuous: Vec<f32>,
}

thread_local! {
    static CALLS: RefCell<CallRecord> = RefCell::new(CallRecord::default());
}

pub fn calls() -> CallRecord {
    CALLS.with(|p| p.borrow().clone())
}

pub fn configure(f: impl FnOnce(&mut CallRecord)) {
    CALLS.with(|p| f(&mut p.borrow_mut()));
}

fn record(f: impl FnOnce(&mut CallRecord)) {
    CALLS.with(|p| f(&mut p.borrow_mut()));
}

// =============================================================================
// Fake binding
// =============================================================================

/// Stands in for the native emulator: random pixels in [0, 255], a scripted
/// walk for positions, and episodes that end at `max_episode_length`.
pub struct FakeBinding {
    num_agents: usize,
    layout: ObservationLayout,
    max_episode_length: u32,
    rng: SmallRng,
    ticks: u64,
    episode_steps: Vec<u32>,
    episode_returns: Vec<f32>,
    log: EpisodeLog,
}

impl FakeBinding {
    fn paint(&mut self, view: &mut BindingView<'_>) {
        let pixels = self.layout.pixels();
        let ticks = self.ticks;
        for slot in view.slots_mut() {
            for px in &mut slot.observation[..pixels] {
                *px = self.rng.random_range(0..=255u8) as f32;
            }
            let pos = position_at(ticks, slot.index);
            slot.observation[self.layout.extra_offset(Extra::X)] = pos.x as f32;
            slot.observation[self.layout.extra_offset(Extra::Y)] = pos.y as f32;
            slot.observation[self.layout.extra_offset(Extra::MapId)] = pos.map_id as f32;
            slot.observation[self.layout.extra_offset(Extra::Badges)] = 0.0;
            slot.observation[self.layout.extra_offset(Extra::PartyCount)] = 1.0;
        }
    }
}

/// Instance `i` reports no position when `(tick + i) % 4 == 0`.
pub fn position_at(tick: u64, instance: usize) -> Position {
    if (tick + instance as u64) % 4 == 0 {
        Position::NONE
    } else {
        Position::new((tick % 20) as i32 + 1, instance as i32 + 1, 3)
    }
}

impl SimulationBinding for FakeBinding {
    fn init(request: InitRequest<'_>) -> Result<Self, BindingError> {
        let knobs = calls();
        record(|p| p.inits += 1);
        if knobs.fail_init {
            return Err(BindingError::Config(format!(
                "ROM rejected by core: {}",
                request.config.rom_path.display()
            )));
        }
        let num_agents = knobs.report_agents.unwrap_or(request.num_agents);
        let mut binding = FakeBinding {
            num_agents,
            layout: request.config.layout,
            max_episode_length: request.config.max_episode_length,
            rng: SmallRng::seed_from_u64(request.seed),
            ticks: 0,
            episode_steps: vec![0; num_agents],
            episode_returns: vec![0.0; num_agents],
            log: EpisodeLog::default(),
        };
        let mut view = request.buffers;
        binding.paint(&mut view);
        Ok(binding)
    }

    fn num_agents(&self) -> usize {
        self.num_agents
    }

    fn reset(
        &mut self,
        mut buffers: BindingView<'_>,
        seed: u64,
        mode: ResetMode,
    ) -> Result<(), BindingError> {
        record(|p| p.resets.push((seed, mode)));
        self.rng = SmallRng::seed_from_u64(seed);
        self.episode_steps.fill(0);
        self.episode_returns.fill(0.0);
        buffers.rewards.fill(0.0);
        buffers.terminals.fill(0);
        buffers.truncations.fill(0);
        self.paint(&mut buffers);
        Ok(())
    }

    fn step(&mut self, mut buffers: BindingView<'_>) -> Result<(), BindingError> {
        self.ticks += 1;
        let mut keys = Vec::with_capacity(self.num_agents);
        let mut continuous = Vec::new();
        for slot in buffers.slots_mut() {
            let reward = match slot.action {
                SlotAction::Discrete(a) => {
                    let key = key_mask_for(a);
                    keys.push(key);
                    if key == 0 { 0.0 } else { 0.01 }
                }
                SlotAction::Continuous(c) => {
                    continuous.extend_from_slice(c);
                    c.iter().map(|v| v.abs()).sum::<f32>() * 0.01
                }
            };
            let i = slot.index;
            *slot.reward = reward;
            self.episode_returns[i] += reward;
            self.episode_steps[i] += 1;
            if self.episode_steps[i] >= self.max_episode_length {
                *slot.terminal = 1;
                self.log.merge(&EpisodeLog {
                    episode_length: self.episode_steps[i] as f32,
                    episode_return: self.episode_returns[i],
                    party_count: 1.0,
                    n: 1.0,
                    ..Default::default()
                });
                self.episode_steps[i] = 0;
                self.episode_returns[i] = 0.0;
            } else {
                *slot.terminal = 0;
            }
            *slot.truncation = 0;
        }
        self.paint(&mut buffers);
        record(|p| {
            p.steps += 1;
            p.last_keys = keys;
            p.last_continuous = continuous;
        });
        Ok(())
    }

    fn positions(&self) -> Vec<Position> {
        (0..self.num_agents)
            .map(|i| position_at(self.ticks, i))
            .collect()
    }

    fn log(&mut self) -> Result<Diagnostics, BindingError> {
        if calls().fail_log {
            return Err(BindingError::Runtime("log buffer unavailable".to_string()));
        }
        let out = self.log.to_diagnostics();
        self.log.clear();
        Ok(out)
    }

    fn render(&mut self, instance: usize) -> Result<(), BindingError> {
        record(|p| p.renders.push(instance));
        Ok(())
    }

    fn close(&mut self) {
        record(|p| p.closes += 1);
    }
}

// =============================================================================
// Config helpers
// =============================================================================

pub struct Fixture {
    pub rom: tempfile::NamedTempFile,
    pub config: EnvConfig,
}

pub fn fixture(num_envs: usize) -> Fixture {
    let mut rom = tempfile::NamedTempFile::new().expect("temp rom");
    rom.write_all(&[0u8; 64]).expect("write rom");
    let config = EnvConfig {
        num_envs,
        rom_path: rom.path().to_path_buf(),
        headless: true,
        ..EnvConfig::default()
    };
    Fixture { rom, config }
}

// =============================================================================
// Loopback collector
// =============================================================================

/// Accepts any number of WebSocket connections and records text frames.
pub struct Collector {
    pub endpoint: String,
    received: Arc<Mutex<Vec<String>>>,
}

impl Collector {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind collector");
        let port = listener.local_addr().expect("local addr").port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let sink = sink.clone();
                std::thread::spawn(move || {
                    let Ok(mut ws) = tungstenite::accept(stream) else {
                        return;
                    };
                    while let Ok(msg) = ws.read() {
                        if let Message::Text(text) = msg {
                            sink.lock().unwrap().push(text.to_string());
                        }
                    }
                });
            }
        });
        Self {
            endpoint: format!("ws://127.0.0.1:{port}/broadcast"),
            received,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Polls until at least `n` messages arrived or `timeout` passes.
    pub fn wait_for(&self, n: usize, timeout: Duration) -> Vec<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let msgs = self.messages();
            if msgs.len() >= n || Instant::now() >= deadline {
                return msgs;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

/// An endpoint that refuses connections.
pub fn dead_endpoint() -> String {
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").expect("bind");
        l.local_addr().expect("addr").port()
    };
    format!("ws://127.0.0.1:{port}/broadcast")
}
