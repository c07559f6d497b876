//! Ingestion and query façade.
//!
//! Wires the parser, tag store, navigation graph and planner together. All
//! parts are built once by [`LocatorService::bootstrap`] and are immutable
//! afterwards except for the tag store.

use std::sync::Arc;

use thiserror::Error;

use crate::algorithms::Trilateration;
use crate::api::notify::PositionNotifier;
use crate::api::types::{ApiError, ApiResult, PathRequest, PathResponse, PositionResponse};
use crate::core::{Destination, Position};
use crate::navigation::{GraphError, NavigationGraph, PathPlanner, PlanOutcome};
use crate::processing::{InboundMessage, MessageParser, ParseError, RackScan, RangingMeasurement};
use crate::storage::{StorageError, WarehouseRepository};
use crate::tracking::{AnchorRegistry, IngestOutcome, ShardedTagStore, TagStateStore};
use crate::utils::config::{ConfigError, SystemConfig};

/// Fatal startup failures
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("unusable navigation graph: {0}")]
    Graph(#[from] GraphError),
    #[error("failed to load reference data: {0}")]
    Storage(#[from] StorageError),
}

/// What happened to one bus message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Ranging report applied to its tag
    Position(IngestOutcome),
    /// Rack scan acknowledged; no state change
    RackScan(RackScan),
    /// Dropped at the boundary
    Rejected(ParseError),
}

pub struct LocatorService {
    parser: MessageParser,
    store: Arc<dyn TagStateStore>,
    graph: Arc<NavigationGraph>,
    planner: PathPlanner,
    repository: Arc<dyn WarehouseRepository>,
}

impl LocatorService {
    pub fn new(
        parser: MessageParser,
        store: Arc<dyn TagStateStore>,
        graph: Arc<NavigationGraph>,
        planner: PathPlanner,
        repository: Arc<dyn WarehouseRepository>,
    ) -> Self {
        Self {
            parser,
            store,
            graph,
            planner,
            repository,
        }
    }

    /// Validate the configuration, build the graph, load anchors and seed
    /// every stored tag at its last known position
    pub fn bootstrap(
        config: &SystemConfig,
        repository: Arc<dyn WarehouseRepository>,
        notifier: Arc<dyn PositionNotifier>,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let warehouse = &config.warehouse;
        let graph = NavigationGraph::from_regions(
            warehouse.width,
            warehouse.height,
            &warehouse.blocked_regions,
            warehouse.connectivity,
        )?;
        tracing::info!(
            nodes = graph.node_count(),
            width = graph.width(),
            height = graph.height(),
            "navigation graph built"
        );

        let anchors = AnchorRegistry::from_anchors(repository.anchors()?);
        tracing::info!(count = anchors.len(), "loaded anchors");

        let store = ShardedTagStore::new(Arc::new(anchors), Arc::clone(&repository), notifier)
            .with_solver(Trilateration::new(config.solver))
            .with_filter_parameters(config.filter)
            .with_default_position(warehouse.default_position);

        let tags = repository.tags()?;
        for record in &tags {
            store.seed(record);
        }
        tracing::info!(count = tags.len(), "seeded existing tags");

        Ok(Self::new(
            MessageParser::new(&config.topics.anchor_data, &config.topics.rack_scan),
            Arc::new(store),
            Arc::new(graph),
            PathPlanner::new(config.planner),
            repository,
        ))
    }

    /// Decode and apply one bus message
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> MessageOutcome {
        match self.parser.decode(topic, payload) {
            Ok(InboundMessage::Ranging(measurement)) => MessageOutcome::Position(self.ingest(&measurement)),
            Ok(InboundMessage::RackScan(scan)) => {
                tracing::info!(uid = %scan.uid, tag = %scan.tag_id, "received rack scan");
                MessageOutcome::RackScan(scan)
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "dropping malformed message");
                MessageOutcome::Rejected(e)
            }
        }
    }

    pub fn ingest(&self, measurement: &RangingMeasurement) -> IngestOutcome {
        if let Some(reported) = measurement.reported_position {
            tracing::trace!(
                anchor = %measurement.anchor_id,
                reported_x = reported.x,
                reported_y = reported.y,
                "anchor self-reported position"
            );
        }
        self.store.ingest(
            &measurement.tag_id,
            &measurement.anchor_id,
            measurement.distance,
            measurement.rssi,
        )
    }

    pub fn get_position(&self, tag_id: &str) -> ApiResult<PositionResponse> {
        if tag_id.is_empty() {
            return Err(ApiError::MissingField("tag_id"));
        }
        Ok(PositionResponse::new(tag_id, self.store.current_position(tag_id)))
    }

    /// Route from a tag's current position to a named destination. An
    /// unreachable destination yields an empty path, not an error.
    pub fn get_path(&self, request: &PathRequest) -> ApiResult<PathResponse> {
        let tag_id = required(&request.tag_id, "tag_id")?;
        let dest_name = required(&request.dest_name, "dest_name")?;

        let start = self.store.current_position(tag_id);
        let outcome = self.plan_from(start, dest_name)?;

        Ok(PathResponse {
            tag_id: tag_id.to_string(),
            destination: dest_name.to_string(),
            path: outcome.waypoints(),
        })
    }

    /// Plan from an explicit position to a named destination
    pub fn plan_from(&self, start: Position, dest_name: &str) -> ApiResult<PlanOutcome> {
        let destination = self.find_destination(dest_name)?;
        let outcome = self.planner.plan(&self.graph, start, destination.position);
        if !outcome.is_found() {
            tracing::info!(destination = dest_name, ?outcome, "destination unreachable");
        }
        Ok(outcome)
    }

    /// Destinations ordered by name
    pub fn list_destinations(&self) -> ApiResult<Vec<Destination>> {
        Ok(self.repository.destinations()?)
    }

    pub fn graph(&self) -> &NavigationGraph {
        &self.graph
    }

    pub fn store(&self) -> &dyn TagStateStore {
        self.store.as_ref()
    }

    fn find_destination(&self, name: &str) -> ApiResult<Destination> {
        self.repository
            .find_destination(name)?
            .ok_or_else(|| ApiError::DestinationNotFound(name.to_string()))
    }
}

fn required<'a>(field: &'a Option<String>, name: &'static str) -> ApiResult<&'a str> {
    field
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::MissingField(name))
}
