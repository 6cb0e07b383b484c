//! Layers-control model.
//!
//! One generator builds the whole control from the catalog and the current
//! session snapshot: a radio group of base maps followed by one checkbox group
//! per overlay group. The UI only renders it and routes toggles back as
//! [`ControlAction`]s.

use crate::catalog::{BaseMap, Catalog, LayerGroup, OverlayId};
use crate::session::SessionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Radio,
    Checkbox,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlTarget {
    BaseMap(BaseMap),
    Overlay(OverlayId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEntry {
    pub target: ControlTarget,
    pub label: String,
    pub checked: bool,
    /// A change for this entry is in flight; the UI should not accept input.
    pub pending: bool,
}

impl ControlEntry {
    pub fn key(&self) -> &str {
        match &self.target {
            ControlTarget::BaseMap(base) => base.label(),
            ControlTarget::Overlay(id) => id.as_str(),
        }
    }

    /// What selecting (or unselecting) this entry asks for.
    pub fn action(&self, checked: bool) -> Option<ControlAction> {
        match &self.target {
            ControlTarget::BaseMap(base) if checked && !self.checked => {
                Some(ControlAction::SelectBaseMap(*base))
            }
            ControlTarget::BaseMap(_) => None,
            ControlTarget::Overlay(id) if checked != self.checked => Some(ControlAction::SetOverlay {
                id: id.clone(),
                active: checked,
            }),
            ControlTarget::Overlay(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlGroup {
    pub title: &'static str,
    pub kind: ControlKind,
    pub entries: Vec<ControlEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    SelectBaseMap(BaseMap),
    SetOverlay { id: OverlayId, active: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayersControl {
    pub groups: Vec<ControlGroup>,
}

impl LayersControl {
    pub fn build(catalog: &Catalog, snapshot: &SessionSnapshot) -> Self {
        let base_entries = BaseMap::ALL
            .iter()
            .map(|&base| ControlEntry {
                target: ControlTarget::BaseMap(base),
                label: base.label().to_string(),
                checked: snapshot.base_map == Some(base),
                pending: snapshot.switching,
            })
            .collect();

        let mut groups = vec![ControlGroup {
            title: "Base map",
            kind: ControlKind::Radio,
            entries: base_entries,
        }];

        for group in [LayerGroup::Tile, LayerGroup::GeoJson] {
            let entries: Vec<_> = catalog
                .overlays()
                .iter()
                .filter(|r| r.group == group)
                .map(|r| ControlEntry {
                    target: ControlTarget::Overlay(r.id.clone()),
                    label: r.label.clone(),
                    checked: snapshot.active.contains(&r.id),
                    pending: snapshot.switching || snapshot.pending.contains(&r.id),
                })
                .collect();
            if !entries.is_empty() {
                groups.push(ControlGroup {
                    title: group.title(),
                    kind: ControlKind::Checkbox,
                    entries,
                });
            }
        }

        Self { groups }
    }

    pub fn entry(&self, key: &str) -> Option<&ControlEntry> {
        self.groups
            .iter()
            .flat_map(|g| g.entries.iter())
            .find(|e| e.key() == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogOptions;

    #[test]
    fn test_groups_follow_taxonomy() {
        let catalog = Catalog::standard(&CatalogOptions::default());
        let control = LayersControl::build(&catalog, &SessionSnapshot::default());
        let kinds: Vec<_> = control.groups.iter().map(|g| g.kind).collect();
        assert_eq!(
            kinds,
            vec![ControlKind::Radio, ControlKind::Checkbox, ControlKind::Checkbox]
        );
        assert_eq!(control.groups[0].entries.len(), BaseMap::ALL.len());
        assert!(
            control.groups[2]
                .entries
                .iter()
                .all(|e| e.key().starts_with("geojson"))
        );
    }

    #[test]
    fn test_checked_and_pending_state() {
        let catalog = Catalog::standard(&CatalogOptions::default());
        let snapshot = SessionSnapshot {
            active: vec![OverlayId::from("geojson_sea_route")],
            base_map: Some(BaseMap::GsiPale),
            pending: vec![OverlayId::from("geojson_port")],
            switching: false,
        };
        let control = LayersControl::build(&catalog, &snapshot);

        let route = control.entry("geojson_sea_route").unwrap();
        assert!(route.checked && !route.pending);
        assert_eq!(
            route.action(false),
            Some(ControlAction::SetOverlay {
                id: OverlayId::from("geojson_sea_route"),
                active: false
            })
        );
        assert_eq!(route.action(true), None);

        assert!(control.entry("geojson_port").unwrap().pending);

        let pale = control.entry(BaseMap::GsiPale.label()).unwrap();
        assert!(pale.checked);
        assert_eq!(pale.action(true), None);
        let std_map = control.entry(BaseMap::GsiStd.label()).unwrap();
        assert_eq!(std_map.action(true), Some(ControlAction::SelectBaseMap(BaseMap::GsiStd)));
    }
}
