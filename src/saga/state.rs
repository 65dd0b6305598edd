//! Transfer saga state machine
//!
//! State ids are stored as SMALLINT. Positive ids move money forward;
//! negative ids mean the transfer failed or was unwound.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum SagaState {
    /// Recorded, debit not yet applied
    Pending = 0,

    /// Source debited - funds are in flight.
    /// Must eventually reach COMPLETED or COMPENSATED.
    Debited = 10,

    /// Terminal: both legs applied
    Completed = 40,

    /// Terminal: no funds moved, or compensation could not refund
    Failed = -10,

    /// Source refunded after a failed credit leg
    Compensated = -20,
}

impl SagaState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    /// The only legal transitions. Anything else is a programming error and
    /// must fail loudly.
    pub fn can_transition_to(&self, next: SagaState) -> bool {
        matches!(
            (self, next),
            (SagaState::Pending, SagaState::Debited)
                | (SagaState::Pending, SagaState::Failed)
                | (SagaState::Debited, SagaState::Completed)
                | (SagaState::Debited, SagaState::Compensated)
                | (SagaState::Compensated, SagaState::Failed)
        )
    }

    /// Get the numeric state ID for storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from a stored state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SagaState::Pending),
            10 => Some(SagaState::Debited),
            40 => Some(SagaState::Completed),
            -10 => Some(SagaState::Failed),
            -20 => Some(SagaState::Compensated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Pending => "PENDING",
            SagaState::Debited => "DEBITED",
            SagaState::Completed => "COMPLETED",
            SagaState::Failed => "FAILED",
            SagaState::Compensated => "COMPENSATED",
        }
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for SagaState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        SagaState::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SagaState; 5] = [
        SagaState::Pending,
        SagaState::Debited,
        SagaState::Completed,
        SagaState::Failed,
        SagaState::Compensated,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(SagaState::Completed.is_terminal());
        assert!(SagaState::Failed.is_terminal());

        assert!(!SagaState::Pending.is_terminal());
        assert!(!SagaState::Debited.is_terminal());
        assert!(!SagaState::Compensated.is_terminal());
    }

    #[test]
    fn test_only_declared_edges_are_legal() {
        let legal = [
            (SagaState::Pending, SagaState::Debited),
            (SagaState::Pending, SagaState::Failed),
            (SagaState::Debited, SagaState::Completed),
            (SagaState::Debited, SagaState::Compensated),
            (SagaState::Compensated, SagaState::Failed),
        ];

        for from in ALL {
            for to in ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_state_id_roundtrip() {
        for state in ALL {
            assert_eq!(SagaState::from_id(state.id()), Some(state));
        }
        assert_eq!(SagaState::from_id(99), None);
        assert_eq!(SagaState::from_id(-99), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(SagaState::Pending.to_string(), "PENDING");
        assert_eq!(SagaState::Compensated.to_string(), "COMPENSATED");
    }
}
