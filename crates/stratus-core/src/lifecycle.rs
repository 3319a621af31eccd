use crate::CoreError;

/// Lifecycle phase of one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Bootstrapped,
    Synthesized,
    Diffed,
    Deployed,
    Destroyed,
    FunctionUpdated,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Bootstrapped => write!(f, "bootstrapped"),
            Phase::Synthesized => write!(f, "synthesized"),
            Phase::Diffed => write!(f, "diffed"),
            Phase::Deployed => write!(f, "deployed"),
            Phase::Destroyed => write!(f, "destroyed"),
            Phase::FunctionUpdated => write!(f, "function-updated"),
        }
    }
}

pub fn validate_transition(from: Phase, to: Phase) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            Phase::Idle,
            Phase::Bootstrapped | Phase::Synthesized | Phase::FunctionUpdated
        ) | (
            Phase::Bootstrapped,
            Phase::Bootstrapped | Phase::Synthesized
        ) | (
            Phase::Synthesized,
            Phase::Bootstrapped
                | Phase::Synthesized
                | Phase::Diffed
                | Phase::Deployed
                | Phase::Destroyed
        ) | (
            Phase::Diffed | Phase::Deployed | Phase::Destroyed | Phase::FunctionUpdated,
            Phase::Bootstrapped | Phase::Synthesized | Phase::FunctionUpdated
        )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Current phase plus whether bootstrap has run in this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifecycle {
    pub phase: Phase,
    pub bootstrapped: bool,
}

impl Lifecycle {
    /// The state after moving to `to`, or the reason the move is invalid.
    /// Deploying additionally requires a prior bootstrap.
    pub fn advance(self, to: Phase) -> Result<Self, CoreError> {
        validate_transition(self.phase, to)?;
        if to == Phase::Deployed && !self.bootstrapped {
            return Err(CoreError::InvalidTransition {
                from: format!("{} (not bootstrapped)", self.phase),
                to: to.to_string(),
            });
        }
        Ok(Self {
            phase: to,
            bootstrapped: self.bootstrapped || to == Phase::Bootstrapped,
        })
    }
}
