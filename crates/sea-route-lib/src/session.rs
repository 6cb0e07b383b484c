use crate::catalog::{BaseMap, OverlayId};
use crate::registry::RealizedOverlay;
use tokio::sync::watch;

/// Per-map session state shared by the orchestrator and the style switch.
#[derive(Debug, Default)]
pub struct MapSessionState {
    /// Active overlays in the order they became active, without duplicates.
    pub active: Vec<OverlayId>,
    /// `None` until the first base map has been applied.
    pub base_map: Option<BaseMap>,
    /// Tiles of the current raster base map, if any.
    pub base_raster: Option<(OverlayId, RealizedOverlay)>,
    sequence: u64,
}

impl MapSessionState {
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Append `id` unless it is already present.
    pub fn activate(&mut self, id: &OverlayId) -> bool {
        if self.active.contains(id) {
            return false;
        }
        self.active.push(id.clone());
        true
    }

    pub fn deactivate(&mut self, id: &OverlayId) -> bool {
        let before = self.active.len();
        self.active.retain(|a| a != id);
        before != self.active.len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            active: self.active.clone(),
            base_map: self.base_map,
            ..SessionSnapshot::default()
        }
    }
}

/// Read-only copy of what the UI shows as selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub active: Vec<OverlayId>,
    pub base_map: Option<BaseMap>,
    /// Overlays with an add or remove in flight.
    pub pending: Vec<OverlayId>,
    /// A base-map switch is in flight.
    pub switching: bool,
}

/// Marks a base-map switch as in flight.
///
/// Overlay requests check the gate on entry and adds that are already past
/// their data load wait for it to reopen before touching the engine.
#[derive(Debug, Clone)]
pub struct StyleSwitchGate {
    switching: watch::Sender<bool>,
}

impl Default for StyleSwitchGate {
    fn default() -> Self {
        Self {
            switching: watch::Sender::new(false),
        }
    }
}

impl StyleSwitchGate {
    pub fn is_open(&self) -> bool {
        !*self.switching.borrow()
    }

    /// Close the gate, or `None` if a switch is already in flight.
    pub fn try_begin(&self) -> Option<SwitchGuard> {
        let began = self.switching.send_if_modified(|switching| {
            if *switching {
                false
            } else {
                *switching = true;
                true
            }
        });
        began.then(|| SwitchGuard {
            switching: self.switching.clone(),
        })
    }

    pub async fn wait_open(&self) {
        let mut rx = self.switching.subscribe();
        // The sender is owned by `self`, so the channel cannot close here.
        let _ = rx.wait_for(|switching| !switching).await;
    }
}

/// Reopens the gate when dropped.
#[derive(Debug)]
pub struct SwitchGuard {
    switching: watch::Sender<bool>,
}

impl Drop for SwitchGuard {
    fn drop(&mut self) {
        self.switching.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_set_has_no_duplicates() {
        let mut session = MapSessionState::default();
        let a = OverlayId::from("geojson_sea_route");
        let b = OverlayId::from("tile_gsi_photo");
        assert!(session.activate(&a));
        assert!(session.activate(&b));
        assert!(!session.activate(&a));
        assert_eq!(session.active, vec![a.clone(), b.clone()]);
        assert!(session.deactivate(&a));
        assert!(!session.deactivate(&a));
        assert_eq!(session.snapshot().active, vec![b]);
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let mut session = MapSessionState::default();
        let first = session.next_sequence();
        assert!(session.next_sequence() > first);
    }

    #[tokio::test]
    async fn test_gate_guard_reopens_on_drop() {
        let gate = StyleSwitchGate::default();
        let guard = gate.try_begin().unwrap();
        assert!(!gate.is_open());
        assert!(gate.try_begin().is_none());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_open().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
        assert!(gate.is_open());
    }
}
