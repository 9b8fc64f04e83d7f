//! Table-driven transition graph for pharmacy calls.
//!
//! The table is the single authority on which state changes are legal; the
//! state machine consults it on every transition attempt and rejects
//! anything it does not contain.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::types::CallState;

/// The allowed transition table for all call states.
pub struct CallStateTable {
    transitions: HashMap<CallState, Vec<CallState>>,
}

impl CallStateTable {
    pub fn new() -> Self {
        use CallState::*;

        let mut transitions: HashMap<CallState, Vec<CallState>> = HashMap::new();
        transitions.insert(Created, vec![Dialing, Failed]);
        transitions.insert(Dialing, vec![Ivr, Failed, Ended]);
        transitions.insert(Ivr, vec![Hold, IvrFailed, HumanDetected, Voicemail, Failed]);
        transitions.insert(IvrFailed, vec![Ending, Ended]);
        transitions.insert(Hold, vec![HumanDetected, Ending, Ended, Failed]);
        transitions.insert(HumanDetected, vec![Bridging, Ending, Ended]);
        transitions.insert(Voicemail, vec![Ending, Ended]);
        transitions.insert(Failed, vec![Ended]);
        transitions.insert(Bridging, vec![Connected, Ending, Ended, Failed]);
        transitions.insert(Connected, vec![Ending, Ended]);
        transitions.insert(Ending, vec![Ended]);
        // Ended is terminal - no outgoing transitions
        transitions.insert(Ended, vec![]);

        Self { transitions }
    }

    /// All states reachable in one transition from `from`.
    pub fn allowed_targets(&self, from: CallState) -> &[CallState] {
        self.transitions
            .get(&from)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `from -> to` is a legal transition.
    pub fn is_allowed(&self, from: CallState, to: CallState) -> bool {
        self.allowed_targets(from).contains(&to)
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.values().map(|v| v.len()).sum()
    }

    /// Sanity pass: every non-terminal state must have at least one exit,
    /// and every target must itself be a known state.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (state, targets) in &self.transitions {
            if targets.is_empty() && !state.is_terminal() {
                errors.push(format!("non-terminal state {:?} has no exit transitions", state));
            }
            for target in targets {
                if !self.transitions.contains_key(target) {
                    errors.push(format!("transition {:?} -> {:?} targets an unknown state", state, target));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Shared table instance used by the state machine.
pub static CALL_STATE_TABLE: Lazy<CallStateTable> = Lazy::new(CallStateTable::new);
