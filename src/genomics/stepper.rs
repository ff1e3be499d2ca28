//! Position/target state machine driving the scan.

use super::allele::AlleleContext;
use super::reference::ReferenceWindow;
use super::target::Target;

/// Phase of the outer scan loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperPhase {
    /// No target loaded yet.
    NoTarget,
    /// Scanning positions of a target.
    InTarget,
    /// Every target consumed.
    Done,
}

/// Outcome of [`PositionStepper::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Moved to the next position of the current target.
    Position,
    /// The current target is exhausted (or none was loaded); load the next one.
    NeedTarget,
    /// Nothing left to scan.
    Finished,
}

/// Mutable scan state shared by the engine components.
#[derive(Debug, Default)]
pub struct EngineState {
    /// Target being scanned.
    pub target: Option<Target>,
    /// Current 0-based position.
    pub position: u32,
    /// Reference cache for the target.
    pub reference: Option<ReferenceWindow>,
    /// Set on a target switch, consumed by the next grouping pass.
    pub just_switched: bool,
}

impl EngineState {
    /// Reference base at the current position.
    pub fn reference_base(&self) -> Option<u8> {
        self.reference.as_ref()?.base_at(self.position)
    }

    /// Context alleles are updated against.
    pub fn context(&self) -> Option<AlleleContext> {
        Some(AlleleContext {
            position: self.position,
            reference_base: self.reference_base()?,
        })
    }
}

/// Walks positions through an ordered list of targets.
#[derive(Debug, Clone)]
pub struct PositionStepper {
    targets: Vec<Target>,
    next_target: usize,
    phase: StepperPhase,
}

impl PositionStepper {
    /// Stepper over `targets`, in order.
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            targets,
            next_target: 0,
            phase: StepperPhase::NoTarget,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> StepperPhase {
        self.phase
    }

    /// Targets still to be offered by [`PositionStepper::next_candidate`].
    pub fn remaining(&self) -> &[Target] {
        &self.targets[self.next_target.min(self.targets.len())..]
    }

    /// Move one position forward within the current target.
    pub fn advance(&mut self, state: &mut EngineState) -> Advance {
        match self.phase {
            StepperPhase::NoTarget => Advance::NeedTarget,
            StepperPhase::Done => Advance::Finished,
            StepperPhase::InTarget => match &state.target {
                Some(target) if state.position < target.last0() => {
                    state.position += 1;
                    Advance::Position
                }
                _ => Advance::NeedTarget,
            },
        }
    }

    /// Next target in list order.
    pub fn next_candidate(&mut self) -> Option<Target> {
        let target = self.targets.get(self.next_target).cloned()?;
        self.next_target += 1;
        Some(target)
    }

    /// Start scanning `target` at its first position.
    pub fn enter(&mut self, state: &mut EngineState, target: Target, reference: ReferenceWindow) {
        state.position = target.start0();
        state.target = Some(target);
        state.reference = Some(reference);
        state.just_switched = true;
        self.phase = StepperPhase::InTarget;
    }

    /// Stop scanning for good.
    pub fn finish(&mut self, state: &mut EngineState) {
        state.target = None;
        state.reference = None;
        self.phase = StepperPhase::Done;
    }
}
