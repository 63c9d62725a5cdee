// consent.rs - Stop / pause consent signals.
//
// Priority is fixed: an anchor actor's stop beats everything, then any
// actor's pause, then the acting actor's own stop. With no signal the
// check passes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// A consent signal raised by an actor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsentSignal {
    Stop,
    Pause,
    /// Clears whatever signal the actor had raised.
    Resume,
}

impl fmt::Display for ConsentSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentSignal::Stop => write!(f, "stop"),
            ConsentSignal::Pause => write!(f, "pause"),
            ConsentSignal::Resume => write!(f, "resume"),
        }
    }
}

/// Live consent state shared by every decision.
#[derive(Debug, Default)]
pub struct ConsentRegistry {
    anchors: BTreeSet<String>,
    signals: RwLock<BTreeMap<String, ConsentSignal>>,
}

impl ConsentRegistry {
    pub fn new(anchors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            anchors: anchors.into_iter().map(Into::into).collect(),
            signals: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn is_anchor(&self, actor: &str) -> bool {
        self.anchors.contains(actor)
    }

    /// Record a signal from `actor`.
    pub fn record(&self, actor: &str, signal: ConsentSignal) {
        let mut signals = match self.signals.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match signal {
            ConsentSignal::Resume => {
                signals.remove(actor);
            }
            other => {
                signals.insert(actor.to_string(), other);
            }
        }
        tracing::info!(actor, signal = %signal, anchor = self.is_anchor(actor), "consent signal recorded");
    }

    /// The denial reason for `actor`, if any signal blocks it.
    pub fn check(&self, actor: &str) -> Option<String> {
        let signals = match self.signals.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(anchor) = signals
            .iter()
            .find(|(who, s)| **s == ConsentSignal::Stop && self.anchors.contains(who.as_str()))
            .map(|(who, _)| who)
        {
            return Some(format!("Anchor actor '{}' requested stop", anchor));
        }

        if let Some(pauser) = signals
            .iter()
            .find(|(_, s)| **s == ConsentSignal::Pause)
            .map(|(who, _)| who)
        {
            return Some(format!("Actor '{}' requested pause", pauser));
        }

        if signals.get(actor) == Some(&ConsentSignal::Stop) {
            return Some(format!("Actor '{}' requested stop", actor));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows() {
        let reg = ConsentRegistry::new(["root"]);
        assert!(reg.check("agent-1").is_none());
    }

    #[test]
    fn anchor_stop_beats_everything() {
        let reg = ConsentRegistry::new(["root"]);
        reg.record("agent-2", ConsentSignal::Pause);
        reg.record("agent-1", ConsentSignal::Stop);
        reg.record("root", ConsentSignal::Stop);
        let reason = reg.check("agent-1").unwrap();
        assert!(reason.contains("Anchor actor 'root'"), "{}", reason);
    }

    #[test]
    fn any_pause_beats_own_stop() {
        let reg = ConsentRegistry::new(["root"]);
        reg.record("agent-1", ConsentSignal::Stop);
        reg.record("agent-2", ConsentSignal::Pause);
        assert_eq!(
            reg.check("agent-1").unwrap(),
            "Actor 'agent-2' requested pause"
        );
    }

    #[test]
    fn own_stop_only_blocks_self() {
        let reg = ConsentRegistry::new(Vec::<String>::new());
        reg.record("agent-1", ConsentSignal::Stop);
        assert_eq!(reg.check("agent-1").unwrap(), "Actor 'agent-1' requested stop");
        assert!(reg.check("agent-3").is_none());
    }

    #[test]
    fn resume_clears_signal() {
        let reg = ConsentRegistry::new(["root"]);
        reg.record("root", ConsentSignal::Stop);
        reg.record("root", ConsentSignal::Resume);
        assert!(reg.check("agent-1").is_none());
    }
}
