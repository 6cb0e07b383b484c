use sea_route_lib::engine::HeadlessEngine;
use sea_route_lib::loader::StaticDataLoader;
use sea_route_lib::prefs::MemoryStore;
use sea_route_lib::style::Style;
use sea_route_lib::{
    BaseMap, Catalog, CatalogOptions, EngineAdapter, LayerError, LoadError, MapController,
    MapEngine, OrderingOutcome, OrderingPolicy, OverlayId, OverlayStatus, PreferenceStore,
    RetryPolicy, SessionConfig,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const FRAME: Duration = Duration::from_millis(16);

fn sea_routes() -> Value {
    json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {"type": "LineString", "coordinates": [[135.19, 34.68], [134.05, 34.35]]},
                "properties": {"routeId": "R001", "color": "#1E90FF", "freq": 4}
            },
            {
                "type": "Feature",
                "geometry": {"type": "LineString", "coordinates": [[133.93, 34.60], [133.55, 34.47]]},
                "properties": {"routeId": "R002", "note": "season"}
            }
        ]
    })
}

fn sea_route_details() -> Value {
    json!({
        "R001": {"businessName": "Kobe Ferry", "routeName": "Kobe - Takamatsu"},
        "R002": {"businessName": "Seto Line", "routeName": "Uno - Naoshima"}
    })
}

fn ports() -> Value {
    json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [135.19, 34.68]},
                "properties": {"Name": "Kobe"}
            }
        ]
    })
}

fn loader() -> StaticDataLoader {
    StaticDataLoader::new()
        .with_json("data/seaRoute.geojson", &sea_routes())
        .with_json("data/seaRouteDetails.json", &sea_route_details())
        .with_json("data/portData.geojson", &ports())
        .with_retry_policy(RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(200),
        })
}

/// A driven headless engine that knows the vector base map documents used here.
fn engine() -> (Arc<HeadlessEngine>, JoinHandle<()>) {
    let engine = Arc::new(HeadlessEngine::default());
    for base in [BaseMap::GsiPale, BaseMap::GsiStd] {
        let mut style = Style::named(base.label());
        style.sources.insert(
            "gsi".into(),
            serde_json::from_value(json!({
                "type": "vector",
                "tiles": ["https://cyberjapandata.gsi.go.jp/xyz/experimental_bvmap/{z}/{x}/{y}.pbf"]
            }))
            .unwrap(),
        );
        style.layers = vec![
            serde_json::from_value(json!({"id": "background", "type": "background"})).unwrap(),
            serde_json::from_value(json!({
                "id": "coastline", "type": "line", "source": "gsi", "source-layer": "waterarea"
            }))
            .unwrap(),
        ];
        engine.register_document(base.document_url(), style);
    }
    let driver = engine.drive(FRAME);
    (engine, driver)
}

fn controller_with(
    engine: &Arc<HeadlessEngine>,
    loader: StaticDataLoader,
    store: Arc<dyn PreferenceStore>,
    config: SessionConfig,
) -> MapController<StaticDataLoader> {
    MapController::new(
        EngineAdapter::new(engine.clone()),
        Arc::new(Catalog::standard(&CatalogOptions::default())),
        Arc::new(loader),
        store,
        config,
    )
    .unwrap()
}

fn controller(engine: &Arc<HeadlessEngine>) -> MapController<StaticDataLoader> {
    controller_with(
        engine,
        loader(),
        Arc::new(MemoryStore::new()),
        SessionConfig::default(),
    )
}

fn id(s: &str) -> OverlayId {
    OverlayId::from(s)
}

fn layers_of(engine: &HeadlessEngine, prefix: &str) -> Vec<String> {
    engine
        .layer_ids()
        .into_iter()
        .filter(|l| l.starts_with(prefix))
        .collect()
}

async fn until(mut cond: impl FnMut() -> bool) {
    while !cond() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_add_is_a_duplicate() {
    let (engine, driver) = engine();
    let map = controller(&engine);
    let route = id("geojson_sea_route");

    map.add_overlay(&route).await.unwrap();
    let err = map.add_overlay(&route).await.unwrap_err();
    assert!(matches!(err, LayerError::DuplicateRequest(_)));

    assert_eq!(layers_of(&engine, "geojson_sea_route").len(), 5);
    assert_eq!(map.active_overlays(), vec![route]);
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_remove_then_add_matches_a_single_add() {
    let (fresh, fresh_driver) = engine();
    let single = controller(&fresh);
    single.add_overlay(&id("geojson_sea_route")).await.unwrap();

    let (engine, driver) = engine();
    let map = controller(&engine);
    map.add_overlay(&id("geojson_sea_route")).await.unwrap();
    map.remove_overlay(&id("geojson_sea_route")).await.unwrap();
    assert!(engine.style().layers.is_empty());
    assert!(!engine.has_source("geojson_sea_route"));

    map.add_overlay(&id("geojson_sea_route")).await.unwrap();
    assert_eq!(engine.style().layers, fresh.style().layers);
    assert_eq!(engine.style().sources, fresh.style().sources);
    assert_eq!(map.active_overlays(), single.active_overlays());
    driver.abort();
    fresh_driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_route_details_are_merged_into_features() {
    let (engine, driver) = engine();
    let map = controller(&engine);
    map.add_overlay(&id("geojson_sea_route")).await.unwrap();

    let drawn = engine.rendered_features("geojson_sea_route_solidline", 8.0);
    assert_eq!(drawn.len(), 1);
    assert_eq!(drawn[0].property_str("businessName"), Some("Kobe Ferry"));
    let seasonal = engine.rendered_features("geojson_sea_route_dashline", 8.0);
    assert_eq!(seasonal[0].property_str("routeName"), Some("Uno - Naoshima"));
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_style_switch_preserves_overlays() {
    let (engine, driver) = engine();
    let map = controller(&engine);
    map.update_base_map(BaseMap::GsiPale).await.unwrap();
    map.add_overlay(&id("geojson_sea_route")).await.unwrap();
    map.add_overlay(&id("tile_openseamap")).await.unwrap();
    map.add_overlay(&id("geojson_port")).await.unwrap();
    assert_eq!(map.ordering_settled().await, Some(OrderingOutcome::Applied));

    let season = json!(["==", ["get", "note"], "season"]);
    engine
        .set_layout_property("geojson_sea_route_dashline", "visibility", json!("none"))
        .unwrap();
    engine
        .set_filter("geojson_sea_route_dashline", Some(season.clone()))
        .unwrap();
    let dashline = |engine: &HeadlessEngine| {
        let style = engine.style();
        let layer = style.layer("geojson_sea_route_dashline").cloned().unwrap();
        (layer.layout.get("visibility").cloned(), layer.filter)
    };
    let hidden = (Some(json!("none")), Some(season));
    assert_eq!(dashline(&engine), hidden);

    let before = engine.style();
    let managed = |style: &Style| {
        style
            .layers
            .iter()
            .filter(|l| l.id.starts_with("geojson") || l.id.starts_with("tile_openseamap"))
            .cloned()
            .collect::<Vec<_>>()
    };

    map.update_base_map(BaseMap::GsiStd).await.unwrap();
    let after = engine.style();
    assert_eq!(after.name.as_deref(), Some(BaseMap::GsiStd.label()));
    assert_eq!(managed(&after), managed(&before));
    assert_eq!(after.sources.get("geojson_sea_route"), before.sources.get("geojson_sea_route"));
    assert!(engine.images().contains_key("anchor_marker"));
    assert_eq!(map.base_map(), Some(BaseMap::GsiStd));
    assert_eq!(dashline(&engine), hidden);
    assert_eq!(
        map.active_overlays(),
        vec![id("geojson_sea_route"), id("tile_openseamap"), id("geojson_port")]
    );

    map.update_base_map(BaseMap::OpenTopoMap).await.unwrap();
    let stack = engine.layer_ids();
    let otm = stack.iter().position(|l| l == "tile_otm").unwrap();
    let lowest_overlay = stack
        .iter()
        .position(|l| l.starts_with("geojson") || l == "tile_openseamap")
        .unwrap();
    assert!(otm < lowest_overlay);
    assert_eq!(managed(&engine.style()), managed(&before));
    assert_eq!(dashline(&engine), hidden);
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_selection_survives_a_new_session() {
    let store: Arc<dyn PreferenceStore> = Arc::new(MemoryStore::new());

    let (first_engine, first_driver) = engine();
    let first = controller_with(&first_engine, loader(), store.clone(), SessionConfig::default());
    let report = first.restore().await;
    assert_eq!(report.base_map, Some(BaseMap::Empty));
    assert_eq!(report.activated, vec![id("geojson_sea_route")]);
    first.update_base_map(BaseMap::OpenTopoMap).await.unwrap();
    first.add_overlay(&id("tile_openseamap")).await.unwrap();
    first_driver.abort();

    let (engine, driver) = engine();
    let second = controller_with(&engine, loader(), store, SessionConfig::default());
    let report = second.restore().await;
    assert_eq!(report.base_map, Some(BaseMap::OpenTopoMap));
    assert_eq!(
        second.active_overlays(),
        vec![id("geojson_sea_route"), id("tile_openseamap")]
    );
    assert!(engine.has_layer("tile_otm"));
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_ignore_persisted_starts_from_defaults() {
    let store: Arc<dyn PreferenceStore> = Arc::new(MemoryStore::new());
    store.set("currentMap", "12", 30).unwrap();
    store.set("currentLayer", "tile_openseamap", 30).unwrap();

    let (engine, driver) = engine();
    let config = SessionConfig {
        ignore_persisted: true,
        ..SessionConfig::default()
    };
    let map = controller_with(&engine, loader(), store, config);
    let report = map.restore().await;
    assert_eq!(report.base_map, Some(BaseMap::Empty));
    assert_eq!(map.active_overlays(), vec![id("geojson_sea_route")]);
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_draw_order_follows_priority() {
    let (engine, driver) = engine();
    let config = SessionConfig {
        priority: vec![id("tile_gsi_photo"), id("geojson_sea_route")],
        ..SessionConfig::default()
    };
    let map = controller_with(&engine, loader(), Arc::new(MemoryStore::new()), config);

    map.add_overlay(&id("geojson_sea_route")).await.unwrap();
    map.add_overlay(&id("tile_gsi_photo")).await.unwrap();
    assert_eq!(map.ordering_settled().await, Some(OrderingOutcome::Applied));

    let mut expected = vec!["tile_gsi_photo".to_string()];
    expected.extend(layers_of(&engine, "geojson_sea_route"));
    assert_eq!(engine.layer_ids(), expected);
    assert_eq!(expected[1], "geojson_sea_route_outline");
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_draw_order_gives_up_while_a_source_keeps_loading() {
    let (engine, driver) = engine();
    let config = SessionConfig {
        priority: vec![id("tile_gsi_photo"), id("geojson_sea_route")],
        ordering: OrderingPolicy {
            max_retries: 3,
            delay: Duration::from_millis(100),
        },
        ..SessionConfig::default()
    };
    let map = controller_with(&engine, loader(), Arc::new(MemoryStore::new()), config);
    map.add_overlay(&id("geojson_sea_route")).await.unwrap();
    map.add_overlay(&id("tile_gsi_photo")).await.unwrap();
    assert_eq!(map.ordering_settled().await, Some(OrderingOutcome::Applied));

    engine.stall_source("tile_gsi_photo");
    engine.reload_source("tile_gsi_photo");
    map.orchestrator().ordering().schedule();
    assert_eq!(map.ordering_settled().await, Some(OrderingOutcome::GaveUp));

    engine.release_source("tile_gsi_photo");
    map.orchestrator().ordering().schedule();
    assert_eq!(map.ordering_settled().await, Some(OrderingOutcome::Applied));
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_removing_an_inactive_overlay_changes_nothing() {
    let (engine, driver) = engine();
    let map = controller(&engine);
    map.add_overlay(&id("geojson_sea_route")).await.unwrap();
    let mutations = engine.mutation_count();

    let err = map.remove_overlay(&id("geojson_port")).await.unwrap_err();
    assert!(matches!(err, LayerError::NotFound(_)));
    assert!(!err.is_user_visible());
    assert_eq!(engine.mutation_count(), mutations);
    assert_eq!(map.active_overlays(), vec![id("geojson_sea_route")]);
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_failed_load_leaves_no_trace() {
    let (engine, driver) = engine();
    let loader = loader();
    loader.fail("data/portData.geojson", 10);
    let map = controller_with(&engine, loader, Arc::new(MemoryStore::new()), SessionConfig::default());

    let err = map.add_overlay(&id("geojson_port")).await.unwrap_err();
    match &err {
        LayerError::LoadFailure { id, source } => {
            assert_eq!(id.as_str(), "geojson_port");
            assert!(matches!(source, LoadError::Exhausted { attempts: 3, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_user_visible());
    assert_eq!(map.overlay_status(&id("geojson_port")), OverlayStatus::Absent);
    assert!(map.active_overlays().is_empty());
    assert!(!engine.has_source("geojson_port"));
    assert_eq!(engine.mutation_count(), 0);

    // Fetches recover, so a second attempt works.
    map.add_overlay(&id("geojson_port")).await.unwrap();
    assert!(engine.has_layer("geojson_port"));
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_requests_rejected_during_a_switch() {
    let (engine, driver) = engine();
    let map = controller(&engine);
    let switching = {
        let map = map.clone();
        tokio::spawn(async move { map.update_base_map(BaseMap::GsiPale).await })
    };
    until(|| map.snapshot().switching).await;

    assert!(matches!(
        map.add_overlay(&id("geojson_sea_route")).await,
        Err(LayerError::StyleSwitchInProgress)
    ));
    assert!(matches!(
        map.update_base_map(BaseMap::GsiStd).await,
        Err(LayerError::StyleSwitchInProgress)
    ));
    let control = map.layers_control();
    assert!(control.groups.iter().flat_map(|g| &g.entries).all(|e| e.pending));

    switching.await.unwrap().unwrap();
    assert_eq!(map.base_map(), Some(BaseMap::GsiPale));
    map.add_overlay(&id("geojson_sea_route")).await.unwrap();
    assert!(engine.has_layer("geojson_sea_route_outline"));
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_remove_waits_for_pending_add() {
    let (engine, driver) = engine();
    let map = controller(&engine);
    let seamap = id("tile_openseamap");
    engine.stall_source("tile_openseamap");

    let adding = {
        let map = map.clone();
        let seamap = seamap.clone();
        tokio::spawn(async move { map.add_overlay(&seamap).await })
    };
    until(|| engine.has_source("tile_openseamap")).await;
    assert_eq!(map.overlay_status(&seamap), OverlayStatus::Adding);

    let removing = {
        let map = map.clone();
        let seamap = seamap.clone();
        tokio::spawn(async move { map.remove_overlay(&seamap).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!removing.is_finished());

    engine.release_source("tile_openseamap");
    adding.await.unwrap().unwrap();
    removing.await.unwrap().unwrap();

    assert_eq!(map.overlay_status(&seamap), OverlayStatus::Absent);
    assert!(!engine.has_source("tile_openseamap"));
    assert!(map.active_overlays().is_empty());
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_failed_switch_keeps_previous_base() {
    let (engine, driver) = engine();
    let map = controller(&engine);
    map.update_base_map(BaseMap::OpenTopoMap).await.unwrap();
    map.add_overlay(&id("geojson_sea_route")).await.unwrap();

    // No document is registered for OSM Bright.
    let err = map.update_base_map(BaseMap::OsmBright).await.unwrap_err();
    assert!(matches!(err, LayerError::Engine(_)));
    assert_eq!(map.base_map(), Some(BaseMap::OpenTopoMap));
    assert!(engine.has_layer("tile_otm"));
    assert!(engine.has_layer("geojson_sea_route_outline"));
    assert!(!map.snapshot().switching);

    map.update_base_map(BaseMap::GsiPale).await.unwrap();
    assert!(!engine.has_layer("tile_otm"));
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_restore_skips_unknown_entries() {
    let store: Arc<dyn PreferenceStore> = Arc::new(MemoryStore::new());
    store.set("currentMap", "77", 30).unwrap();
    store
        .set("currentLayer", "geojson_ferry,tile_openseamap,tile_openseamap", 30)
        .unwrap();

    let (engine, driver) = engine();
    let map = controller_with(&engine, loader(), store.clone(), SessionConfig::default());
    let report = map.restore().await;
    assert_eq!(report.base_map, Some(BaseMap::Empty));
    assert_eq!(report.activated, vec![id("tile_openseamap")]);
    assert_eq!(report.skipped, vec![id("geojson_ferry")]);
    assert_eq!(store.get("currentLayer").unwrap().as_deref(), Some("tile_openseamap"));
    assert_eq!(store.get("currentMap").unwrap().as_deref(), Some("0"));
    driver.abort();
}

#[tokio::test(start_paused = true)]
async fn test_empty_stored_overlay_list_restores_defaults() {
    let store: Arc<dyn PreferenceStore> = Arc::new(MemoryStore::new());
    store.set("currentMap", "12", 30).unwrap();
    store.set("currentLayer", "", 30).unwrap();

    let (engine, driver) = engine();
    let map = controller_with(&engine, loader(), store.clone(), SessionConfig::default());
    let report = map.restore().await;
    assert_eq!(report.base_map, Some(BaseMap::OpenTopoMap));
    assert_eq!(report.activated, vec![id("geojson_sea_route")]);
    assert_eq!(map.active_overlays(), vec![id("geojson_sea_route")]);
    driver.abort();
}
