use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::buffers::BindingView;
use crate::config::EnvConfig;
use crate::error::BindingError;

/// Aggregated numeric diagnostics, keyed by metric name.
pub type Diagnostics = BTreeMap<String, f64>;

/// Player position for one instance on one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub map_id: i32,
}

impl Position {
    /// `(0, 0, 0)`: no valid position this tick.
    pub const NONE: Position = Position { x: 0, y: 0, map_id: 0 };

    pub fn new(x: i32, y: i32, map_id: i32) -> Self {
        Self { x, y, map_id }
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::NONE
    }

    pub fn triple(&self) -> [i32; 3] {
        [self.x, self.y, self.map_id]
    }
}

impl From<(i32, i32, i32)> for Position {
    fn from((x, y, map_id): (i32, i32, i32)) -> Self {
        Self { x, y, map_id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Reinitialize emulator state from the configured state file.
    Full,
    /// Keep the running emulator and reload the in-memory checkpoint.
    Soft,
}

impl ResetMode {
    pub fn from_full_reset(full_reset: bool) -> Self {
        if full_reset {
            ResetMode::Full
        } else {
            ResetMode::Soft
        }
    }
}

pub struct InitRequest<'a> {
    pub config: &'a EnvConfig,
    pub num_agents: usize,
    pub seed: u64,
    pub buffers: BindingView<'a>,
}

/// N emulator instances driven as one unit.
///
/// Every call is synchronous: `step` returns only after all instances have
/// finished their frame-skip window. Implementations may parallelize
/// internally (see `BindingView::par_slots_mut`), but the controller never
/// calls into a binding from more than one thread.
pub trait SimulationBinding: Sized {
    /// Fails with [`BindingError::Config`] when the ROM or state file cannot
    /// be loaded.
    fn init(request: InitRequest<'_>) -> Result<Self, BindingError>;

    fn num_agents(&self) -> usize;

    fn reset(
        &mut self,
        buffers: BindingView<'_>,
        seed: u64,
        mode: ResetMode,
    ) -> Result<(), BindingError>;

    fn step(&mut self, buffers: BindingView<'_>) -> Result<(), BindingError>;

    /// One sample per instance, in instance order.
    fn positions(&self) -> Vec<Position>;

    fn log(&mut self) -> Result<Diagnostics, BindingError>;

    fn render(&mut self, instance: usize) -> Result<(), BindingError>;

    /// Releases native resources. Called at most once by the controller.
    fn close(&mut self);
}

// =============================================================================
// Episode Log
// =============================================================================

/// Per-episode statistics a binding accumulates for `log`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeLog {
    pub episode_length: f32,
    pub level_sum: f32,
    pub episode_return: f32,
    pub pkmn1_lvl: f32,
    pub money: f32,
    pub pkmn2_lvl: f32,
    pub event_sum: f32,
    pub pkmn3_lvl: f32,
    pub unique_coords: f32,
    pub pkmn4_lvl: f32,
    pub party_count: f32,
    pub pkmn5_lvl: f32,
    pub badges: f32,
    pub pkmn6_lvl: f32,
    pub n: f32,
}

impl EpisodeLog {
    fn fields(&self) -> [(&'static str, f32); 14] {
        [
            ("episode_length", self.episode_length),
            ("level_sum", self.level_sum),
            ("episode_return", self.episode_return),
            ("pkmn1_lvl", self.pkmn1_lvl),
            ("money", self.money),
            ("pkmn2_lvl", self.pkmn2_lvl),
            ("event_sum", self.event_sum),
            ("pkmn3_lvl", self.pkmn3_lvl),
            ("unique_coords", self.unique_coords),
            ("pkmn4_lvl", self.pkmn4_lvl),
            ("party_count", self.party_count),
            ("pkmn5_lvl", self.pkmn5_lvl),
            ("badges", self.badges),
            ("pkmn6_lvl", self.pkmn6_lvl),
        ]
    }

    pub fn merge(&mut self, other: &Self) {
        self.episode_length += other.episode_length;
        self.level_sum += other.level_sum;
        self.episode_return += other.episode_return;
        self.pkmn1_lvl += other.pkmn1_lvl;
        self.money += other.money;
        self.pkmn2_lvl += other.pkmn2_lvl;
        self.event_sum += other.event_sum;
        self.pkmn3_lvl += other.pkmn3_lvl;
        self.unique_coords += other.unique_coords;
        self.pkmn4_lvl += other.pkmn4_lvl;
        self.party_count += other.party_count;
        self.pkmn5_lvl += other.pkmn5_lvl;
        self.badges += other.badges;
        self.pkmn6_lvl += other.pkmn6_lvl;
        self.n += other.n;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Per-episode means plus the episode count `n`. Empty when no episode
    /// has finished since the last clear.
    pub fn to_diagnostics(&self) -> Diagnostics {
        let mut out = Diagnostics::new();
        if self.n <= 0.0 {
            return out;
        }
        let n = f64::from(self.n);
        for (name, value) in self.fields() {
            out.insert(name.to_string(), f64::from(value) / n);
        }
        out.insert("n".to_string(), n);
        out
    }
}
