//! Shared buffer contract between the controller and the simulation binding.
//!
//! All arrays share the leading dimension `num_agents` and are allocated once.
//! The controller is the only writer of the action buffer; the binding receives
//! a [`BindingView`] per call that lends it the action buffer read-only and
//! every other region mutably, so the borrow checker enforces the single-writer
//! rule at the call boundary.

use serde::{Deserialize, Serialize};

use crate::error::{EnvError, Result};

// =============================================================================
// Observation Layout
// =============================================================================

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

/// Downscaled grayscale frame followed by a few RAM-derived scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationLayout {
    pub width: usize,
    pub height: usize,
    pub extras: usize,
}

impl ObservationLayout {
    /// 80x72 pixels + (x, y, map_id, badges, party_count).
    pub const GAME_BOY: ObservationLayout = ObservationLayout {
        width: SCREEN_WIDTH / 2,
        height: SCREEN_HEIGHT / 2,
        extras: 5,
    };

    pub fn pixels(&self) -> usize {
        self.width * self.height
    }

    pub fn obs_dim(&self) -> usize {
        self.pixels() + self.extras
    }

    pub fn extra_offset(&self, extra: Extra) -> usize {
        self.pixels() + extra as usize
    }
}

impl Default for ObservationLayout {
    fn default() -> Self {
        Self::GAME_BOY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extra {
    X = 0,
    Y = 1,
    MapId = 2,
    Badges = 3,
    PartyCount = 4,
}

// =============================================================================
// Action Space
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSpace {
    /// One index per instance.
    Discrete(usize),
    /// `dim` components per instance, each in `[-1, 1]`.
    Continuous(usize),
}

impl ActionSpace {
    pub fn width(&self) -> usize {
        match *self {
            ActionSpace::Discrete(_) => 1,
            ActionSpace::Continuous(dim) => dim,
        }
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, ActionSpace::Continuous(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSpec {
    pub num_agents: usize,
    pub obs_dim: usize,
    pub action_space: ActionSpace,
}

/// Caller-provided actions for one tick, flattened row-major.
#[derive(Debug, Clone, Copy)]
pub enum Actions<'a> {
    Discrete(&'a [i32]),
    Continuous(&'a [f32]),
}

impl<'a> From<&'a [i32]> for Actions<'a> {
    fn from(actions: &'a [i32]) -> Self {
        Actions::Discrete(actions)
    }
}

impl<'a> From<&'a [f32]> for Actions<'a> {
    fn from(actions: &'a [f32]) -> Self {
        Actions::Continuous(actions)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionBuffer {
    Discrete(Vec<i32>),
    Continuous(Vec<f32>),
}

impl ActionBuffer {
    fn borrowed(&self) -> ActionsRef<'_> {
        match self {
            ActionBuffer::Discrete(v) => ActionsRef::Discrete(v),
            ActionBuffer::Continuous(v) => ActionsRef::Continuous(v),
        }
    }
}

/// Read-only action buffer as lent to the binding.
#[derive(Debug, Clone, Copy)]
pub enum ActionsRef<'a> {
    Discrete(&'a [i32]),
    Continuous(&'a [f32]),
}

impl<'a> ActionsRef<'a> {
    fn slot(self, index: usize, width: usize) -> SlotAction<'a> {
        match self {
            ActionsRef::Discrete(v) => SlotAction::Discrete(v[index]),
            ActionsRef::Continuous(v) => {
                SlotAction::Continuous(&v[index * width..(index + 1) * width])
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotAction<'a> {
    Discrete(i32),
    Continuous(&'a [f32]),
}

// =============================================================================
// Buffer Set
// =============================================================================

#[derive(Debug)]
pub struct BufferSet {
    spec: BufferSpec,
    observations: Vec<f32>,
    actions: ActionBuffer,
    rewards: Vec<f32>,
    terminals: Vec<u8>,
    truncations: Vec<u8>,
}

impl BufferSet {
    pub fn new(spec: BufferSpec) -> Self {
        let n = spec.num_agents;
        let actions = match spec.action_space {
            ActionSpace::Discrete(_) => ActionBuffer::Discrete(vec![0; n]),
            ActionSpace::Continuous(dim) => ActionBuffer::Continuous(vec![0.0; n * dim]),
        };
        Self {
            spec,
            observations: vec![0.0; n * spec.obs_dim],
            actions,
            rewards: vec![0.0; n],
            terminals: vec![0; n],
            truncations: vec![0; n],
        }
    }

    pub fn spec(&self) -> BufferSpec {
        self.spec
    }

    pub fn num_agents(&self) -> usize {
        self.spec.num_agents
    }

    pub fn observations(&self) -> &[f32] {
        &self.observations
    }

    pub fn observation(&self, index: usize) -> Option<&[f32]> {
        let dim = self.spec.obs_dim;
        self.observations.get(index * dim..(index + 1) * dim)
    }

    pub fn actions(&self) -> &ActionBuffer {
        &self.actions
    }

    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }

    pub fn terminals(&self) -> &[u8] {
        &self.terminals
    }

    pub fn truncations(&self) -> &[u8] {
        &self.truncations
    }

    /// Copies caller actions into the action buffer. Continuous components are
    /// clamped to `[-1, 1]`; discrete indices are written as given.
    pub fn write_actions(&mut self, actions: Actions<'_>) -> Result<()> {
        let expected = self.spec.num_agents * self.spec.action_space.width();
        match (&mut self.actions, actions) {
            (ActionBuffer::Discrete(dst), Actions::Discrete(src)) => {
                if src.len() != expected {
                    return Err(EnvError::ActionShape {
                        kind: "discrete",
                        expected,
                        got: src.len(),
                    });
                }
                dst.copy_from_slice(src);
            }
            (ActionBuffer::Continuous(dst), Actions::Continuous(src)) => {
                if src.len() != expected {
                    return Err(EnvError::ActionShape {
                        kind: "continuous",
                        expected,
                        got: src.len(),
                    });
                }
                for (d, &s) in dst.iter_mut().zip(src) {
                    // NaN clamps to itself; the binding sees it as-is.
                    *d = s.clamp(-1.0, 1.0);
                }
            }
            (ActionBuffer::Discrete(_), Actions::Continuous(src)) => {
                return Err(EnvError::ActionShape {
                    kind: "discrete",
                    expected,
                    got: src.len(),
                });
            }
            (ActionBuffer::Continuous(_), Actions::Discrete(src)) => {
                return Err(EnvError::ActionShape {
                    kind: "continuous",
                    expected,
                    got: src.len(),
                });
            }
        }
        Ok(())
    }

    /// Lends the buffers to the binding for one call.
    pub fn binding_view(&mut self) -> BindingView<'_> {
        BindingView {
            spec: self.spec,
            actions: self.actions.borrowed(),
            observations: &mut self.observations,
            rewards: &mut self.rewards,
            terminals: &mut self.terminals,
            truncations: &mut self.truncations,
        }
    }
}

/// Everything the binding may touch during one `init`/`reset`/`step` call.
pub struct BindingView<'a> {
    pub spec: BufferSpec,
    pub actions: ActionsRef<'a>,
    pub observations: &'a mut [f32],
    pub rewards: &'a mut [f32],
    pub terminals: &'a mut [u8],
    pub truncations: &'a mut [u8],
}

/// One instance's row of every buffer.
pub struct Slot<'a> {
    pub index: usize,
    pub action: SlotAction<'a>,
    pub observation: &'a mut [f32],
    pub reward: &'a mut f32,
    pub terminal: &'a mut u8,
    pub truncation: &'a mut u8,
}

impl<'a> BindingView<'a> {
    pub fn slots_mut(&mut self) -> impl Iterator<Item = Slot<'_>> + '_ {
        let actions = self.actions;
        let width = self.spec.action_space.width();
        self.observations
            .chunks_mut(self.spec.obs_dim)
            .zip(self.rewards.iter_mut())
            .zip(self.terminals.iter_mut())
            .zip(self.truncations.iter_mut())
            .enumerate()
            .map(move |(index, (((observation, reward), terminal), truncation))| Slot {
                index,
                action: actions.slot(index, width),
                observation,
                reward,
                terminal,
                truncation,
            })
    }

    #[cfg(feature = "parallel")]
    pub fn par_slots_mut(
        &mut self,
    ) -> impl rayon::iter::IndexedParallelIterator<Item = Slot<'_>> + '_ {
        use rayon::prelude::*;

        let actions = self.actions;
        let width = self.spec.action_space.width();
        self.observations
            .par_chunks_mut(self.spec.obs_dim)
            .zip(self.rewards.par_iter_mut())
            .zip(self.terminals.par_iter_mut())
            .zip(self.truncations.par_iter_mut())
            .enumerate()
            .map(move |(index, (((observation, reward), terminal), truncation))| Slot {
                index,
                action: actions.slot(index, width),
                observation,
                reward,
                terminal,
                truncation,
            })
    }
}
