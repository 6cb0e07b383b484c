//! Feature popups shown when a route line or a port is clicked.

use serde_json::{Map, Value};

/// Which popup a clickable overlay produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupKind {
    SeaRoute,
    Port,
}

/// Details of one sea route, read from merged feature properties.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeaRouteDetails {
    pub business_name: String,
    /// Text that followed a full-width `（` in the business name.
    pub business_name_sub: Option<String>,
    pub route_name: Option<String>,
    pub port_from: Option<String>,
    pub port_to: Option<String>,
    pub frequency: Option<String>,
    pub info: Option<String>,
    pub ships: Vec<String>,
    pub schedule_url: Option<String>,
    pub color: Option<String>,
}

impl SeaRouteDetails {
    /// `portName1～portName2`, with `N/A` for a missing end.
    pub fn section(&self) -> String {
        format!(
            "{}～{}",
            self.port_from.as_deref().unwrap_or("N/A"),
            self.port_to.as_deref().unwrap_or("N/A")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeaturePopup {
    SeaRoute(SeaRouteDetails),
    Port { name: String },
}

impl FeaturePopup {
    pub fn from_feature(kind: PopupKind, properties: &Map<String, Value>) -> Self {
        match kind {
            PopupKind::SeaRoute => FeaturePopup::SeaRoute(sea_route_details(properties)),
            PopupKind::Port => FeaturePopup::Port {
                name: text(properties, "Name").unwrap_or_default(),
            },
        }
    }

    pub fn title(&self) -> &str {
        match self {
            FeaturePopup::SeaRoute(details) => &details.business_name,
            FeaturePopup::Port { name } => name,
        }
    }
}

fn text(properties: &Map<String, Value>, key: &str) -> Option<String> {
    match properties.get(key)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn split_business_name(raw: &str) -> (String, Option<String>) {
    match raw.split_once('（') {
        Some((main, rest)) => {
            let sub = rest.replace('）', "");
            (main.to_string(), Some(sub).filter(|s| !s.is_empty()))
        }
        None => (raw.to_string(), None),
    }
}

fn sea_route_details(properties: &Map<String, Value>) -> SeaRouteDetails {
    let (business_name, business_name_sub) =
        split_business_name(&text(properties, "businessName").unwrap_or_default());
    let ships = text(properties, "shipName")
        .map(|names| {
            names
                .split(", ")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    SeaRouteDetails {
        business_name,
        business_name_sub,
        route_name: text(properties, "routeName"),
        port_from: text(properties, "portName1"),
        port_to: text(properties, "portName2"),
        frequency: text(properties, "freqInfo"),
        info: text(properties, "info"),
        ships,
        schedule_url: text(properties, "url"),
        color: text(properties, "color"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sea_route_popup_splits_business_name() {
        let props = json!({
            "businessName": "瀬戸内汽船（広島～松山）",
            "routeName": "広島-呉-松山",
            "portName1": "広島",
            "shipName": "シーパセオ, スーパージェット ",
            "freqInfo": "1日10便",
            "url": "https://example.org/schedule",
            "color": "#0055aa"
        });
        let popup = FeaturePopup::from_feature(PopupKind::SeaRoute, props.as_object().unwrap());
        let FeaturePopup::SeaRoute(details) = popup else {
            panic!("expected a sea route popup");
        };
        assert_eq!(details.business_name, "瀬戸内汽船");
        assert_eq!(details.business_name_sub.as_deref(), Some("広島～松山"));
        assert_eq!(details.ships, vec!["シーパセオ", "スーパージェット"]);
        assert_eq!(details.section(), "広島～N/A");
        assert!(details.info.is_none());
    }

    #[test]
    fn test_port_popup_uses_name() {
        let props = json!({"Name": "高松港"});
        let popup = FeaturePopup::from_feature(PopupKind::Port, props.as_object().unwrap());
        assert_eq!(popup.title(), "高松港");
    }

    #[test]
    fn test_plain_business_name_has_no_sub() {
        assert_eq!(split_business_name("Ocean Line"), ("Ocean Line".to_string(), None));
    }
}
