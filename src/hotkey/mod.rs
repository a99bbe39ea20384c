//! Global key detection and combo matching
//!
//! Raw press/release edges come from a kernel-level evdev listener
//! (works on all Wayland compositors because it bypasses the display
//! server) and flow over a single-consumer channel into the audio
//! engine, which owns the matcher. There is no shared pressed-key
//! state and no lock.
//!
//! Combos are sets of keys: a combo is satisfied when every key in it
//! is currently held, regardless of extra held keys. Firing is
//! edge-triggered: a combo fires once on the key-down that completes
//! it and re-arms only after it stops being satisfied.
//!
//! Linux: requires the user to be in the 'input' group.

#[cfg(target_os = "linux")]
pub mod evdev_listener;

use crate::error::HotkeyError;
use std::collections::HashSet;
use tokio::sync::mpsc;

/// Opaque, comparable, hashable key identifier (evdev key code)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(pub u16);

/// A raw key transition from the OS listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEdge {
    pub key: KeyId,
    pub pressed: bool,
}

/// A set of keys that must be simultaneously held
pub type KeyCombo = HashSet<KeyId>;

/// Trait for raw key event sources
#[async_trait::async_trait]
pub trait KeyEventSource: Send + Sync {
    /// Start listening; returns a channel receiver for raw key edges
    async fn start(&mut self) -> Result<mpsc::Receiver<KeyEdge>, HotkeyError>;

    /// Stop listening and clean up
    async fn stop(&mut self) -> Result<(), HotkeyError>;
}

/// Factory function to create the platform key listener
#[cfg(target_os = "linux")]
pub fn create_listener() -> Result<Box<dyn KeyEventSource>, HotkeyError> {
    Ok(Box::new(evdev_listener::EvdevListener::new()?))
}

/// Factory function to create the platform key listener
///
/// Only the Linux evdev backend is implemented.
#[cfg(not(target_os = "linux"))]
pub fn create_listener() -> Result<Box<dyn KeyEventSource>, HotkeyError> {
    Err(HotkeyError::Evdev(
        "global key detection is only supported on Linux".to_string(),
    ))
}

/// One registered combo with its re-fire guard
struct ComboWatch {
    id: usize,
    combo: KeyCombo,
    satisfied: bool,
}

/// Tracks currently held keys and evaluates registered combos
#[derive(Default)]
pub struct HotkeyMatcher {
    pressed: HashSet<KeyId>,
    watches: Vec<ComboWatch>,
}

impl HotkeyMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a combo under an opaque id (typically the sound index).
    /// Evaluation order on each edge is registration order.
    pub fn register(&mut self, id: usize, combo: KeyCombo) {
        self.watches.push(ComboWatch {
            id,
            combo,
            satisfied: false,
        });
    }

    /// Drop all registered combos, keeping the pressed set
    pub fn clear_registrations(&mut self) {
        self.watches.clear();
    }

    /// Number of currently held keys
    pub fn pressed_count(&self) -> usize {
        self.pressed.len()
    }

    /// Whether every key of `combo` is currently held.
    /// The empty combo is never satisfied (guards unset bindings).
    pub fn is_satisfied(&self, combo: &KeyCombo) -> bool {
        !combo.is_empty() && combo.is_subset(&self.pressed)
    }

    /// Apply one raw edge and return the ids of combos that became
    /// satisfied by it, in registration order.
    ///
    /// Key-down is idempotent (set semantics); key-up of an absent key
    /// is a no-op. Releases never fire, they only re-arm.
    pub fn on_edge(&mut self, edge: KeyEdge) -> Vec<usize> {
        if edge.pressed {
            self.pressed.insert(edge.key);
        } else {
            self.pressed.remove(&edge.key);
        }

        let mut fired = Vec::new();
        for watch in &mut self.watches {
            let now = !watch.combo.is_empty() && watch.combo.is_subset(&self.pressed);
            if edge.pressed && now && !watch.satisfied {
                fired.push(watch.id);
            }
            watch.satisfied = now;
        }
        fired
    }
}

/// Collect a key combination interactively: every key pressed before
/// the first release becomes part of the combo. Used by `sounds bind`.
pub async fn capture_combo(rx: &mut mpsc::Receiver<KeyEdge>) -> Result<KeyCombo, HotkeyError> {
    let mut keys = KeyCombo::new();
    while let Some(edge) = rx.recv().await {
        if edge.pressed {
            keys.insert(edge.key);
        } else if !keys.is_empty() {
            // First release after at least one press completes the combo
            return Ok(keys);
        }
    }
    Err(HotkeyError::ChannelClosed)
}

/// Parse a list of persisted key names into a combo. Unknown names make
/// the whole combo unusable rather than silently shrinking it.
#[cfg(target_os = "linux")]
pub fn parse_combo(names: &[String]) -> Result<KeyCombo, HotkeyError> {
    names
        .iter()
        .map(|n| evdev_listener::parse_key_name(n))
        .collect()
}

/// Render a combo as persisted key names, sorted for stable output
#[cfg(target_os = "linux")]
pub fn format_combo(combo: &KeyCombo) -> Vec<String> {
    let mut keys: Vec<KeyId> = combo.iter().copied().collect();
    keys.sort();
    keys.iter().map(|k| evdev_listener::key_name(*k)).collect()
}

#[cfg(not(target_os = "linux"))]
pub fn parse_combo(_names: &[String]) -> Result<KeyCombo, HotkeyError> {
    Err(HotkeyError::Evdev(
        "key name parsing is only supported on Linux".to_string(),
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn format_combo(combo: &KeyCombo) -> Vec<String> {
    combo.iter().map(|k| format!("{}", k.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down(code: u16) -> KeyEdge {
        KeyEdge {
            key: KeyId(code),
            pressed: true,
        }
    }

    fn up(code: u16) -> KeyEdge {
        KeyEdge {
            key: KeyId(code),
            pressed: false,
        }
    }

    fn combo(codes: &[u16]) -> KeyCombo {
        codes.iter().map(|&c| KeyId(c)).collect()
    }

    #[test]
    fn test_pressed_set_semantics() {
        let mut matcher = HotkeyMatcher::new();
        matcher.on_edge(down(30));
        matcher.on_edge(down(30));
        assert_eq!(matcher.pressed_count(), 1);

        // Releasing an unpressed key is a no-op
        matcher.on_edge(up(31));
        assert_eq!(matcher.pressed_count(), 1);

        matcher.on_edge(up(30));
        assert_eq!(matcher.pressed_count(), 0);
    }

    #[test]
    fn test_empty_combo_never_satisfied() {
        let mut matcher = HotkeyMatcher::new();
        assert!(!matcher.is_satisfied(&KeyCombo::new()));
        matcher.on_edge(down(30));
        assert!(!matcher.is_satisfied(&KeyCombo::new()));

        matcher.register(0, KeyCombo::new());
        assert!(matcher.on_edge(down(31)).is_empty());
    }

    #[test]
    fn test_subset_satisfaction() {
        let mut matcher = HotkeyMatcher::new();
        let ab = combo(&[30, 48]);

        matcher.on_edge(down(30));
        assert!(!matcher.is_satisfied(&ab));

        matcher.on_edge(down(48));
        assert!(matcher.is_satisfied(&ab));

        // An extra held key does not block satisfaction
        matcher.on_edge(down(46));
        assert!(matcher.is_satisfied(&ab));

        matcher.on_edge(up(48));
        assert!(!matcher.is_satisfied(&ab));
    }

    #[test]
    fn test_fires_once_per_satisfied_edge() {
        let mut matcher = HotkeyMatcher::new();
        matcher.register(7, combo(&[29, 63]));

        assert!(matcher.on_edge(down(29)).is_empty());
        assert_eq!(matcher.on_edge(down(63)), vec![7]);

        // Further unrelated key-downs while held must not re-fire
        assert!(matcher.on_edge(down(46)).is_empty());
        assert!(matcher.on_edge(down(47)).is_empty());

        // Release and complete again: fires again
        matcher.on_edge(up(63));
        assert_eq!(matcher.on_edge(down(63)), vec![7]);
    }

    #[test]
    fn test_multiple_combos_fire_in_registration_order() {
        let mut matcher = HotkeyMatcher::new();
        matcher.register(1, combo(&[30]));
        matcher.register(0, combo(&[30, 48]));

        matcher.on_edge(down(48));
        assert_eq!(matcher.on_edge(down(30)), vec![1, 0]);
    }

    #[test]
    fn test_release_never_fires() {
        let mut matcher = HotkeyMatcher::new();
        matcher.register(0, combo(&[30]));
        assert_eq!(matcher.on_edge(down(30)), vec![0]);

        // A release that leaves the combo satisfied (extra key released)
        // must not fire it again
        matcher.on_edge(down(31));
        assert!(matcher.on_edge(up(31)).is_empty());
    }

    #[tokio::test]
    async fn test_capture_combo() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(down(29)).await.unwrap();
        tx.send(down(63)).await.unwrap();
        tx.send(up(63)).await.unwrap();

        let captured = capture_combo(&mut rx).await.unwrap();
        assert_eq!(captured, combo(&[29, 63]));
    }

    #[tokio::test]
    async fn test_capture_combo_ignores_stale_release() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(up(30)).await.unwrap();
        tx.send(down(59)).await.unwrap();
        tx.send(up(59)).await.unwrap();

        let captured = capture_combo(&mut rx).await.unwrap();
        assert_eq!(captured, combo(&[59]));
    }

    #[tokio::test]
    async fn test_capture_combo_channel_closed() {
        let (tx, mut rx) = mpsc::channel::<KeyEdge>(1);
        drop(tx);
        assert!(capture_combo(&mut rx).await.is_err());
    }
}
