use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::health::database::DatabaseCheck;
use crate::health::redis::RedisCheck;
use crate::health::temporal::TemporalCheck;
use crate::health::{DependencyCheck, HealthReport};
use crate::kafka::BrokerVerifier;
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
}

/// Dependency groups addressable from the health-check endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Database,
    Kafka,
    Redis,
    Temporal,
}

impl Group {
    fn all() -> Vec<Group> {
        vec![Group::Database, Group::Kafka, Group::Redis, Group::Temporal]
    }
}

/// Presence-style selection flags: `?database=1&kafka=1&redis=1&temporal=1`.
#[derive(Debug, Default, Deserialize)]
pub struct HealthCheckParams {
    database: Option<String>,
    kafka: Option<String>,
    redis: Option<String>,
    temporal: Option<String>,
}

impl HealthCheckParams {
    /// A flag's presence selects its group; no flags at all selects every
    /// group.
    pub fn selected_groups(&self) -> Vec<Group> {
        let mut selected = Vec::new();
        if self.database.is_some() {
            selected.push(Group::Database);
        }
        if self.kafka.is_some() {
            selected.push(Group::Kafka);
        }
        if self.redis.is_some() {
            selected.push(Group::Redis);
        }
        if self.temporal.is_some() {
            selected.push(Group::Temporal);
        }
        if selected.is_empty() {
            Group::all()
        } else {
            selected
        }
    }
}

/// `GET /api/health-check`. Probes each selected dependency group and merges
/// the boolean outcomes into one report. Always responds 200; the value is in
/// the per-probe detail.
pub async fn health_check(
    State(state): State<AppState>,
    Query(params): Query<HealthCheckParams>,
) -> (StatusCode, Json<HealthReport>) {
    let up_time = Utc::now().to_string();

    let mut dependencies = BTreeMap::new();
    for group in params.selected_groups() {
        let check = build_check(&state, group);
        dependencies.insert(check.name(), check.check().await);
    }

    (StatusCode::OK, Json(HealthReport::new(up_time, dependencies)))
}

fn build_check(state: &AppState, group: Group) -> Box<dyn DependencyCheck> {
    match group {
        Group::Database => Box::new(DatabaseCheck::new(
            state.registry.clone(),
            state.config.database_name.clone(),
        )),
        Group::Kafka => Box::new(BrokerVerifier::new(
            state.registry.clone(),
            state.config.kafka_topic.clone(),
        )),
        Group::Redis => Box::new(RedisCheck::new(state.registry.clone())),
        Group::Temporal => Box::new(TemporalCheck::new(state.registry.clone())),
    }
}
