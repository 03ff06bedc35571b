use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::doc;
use mongodb::bson::oid::ObjectId;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{DependencyCheck, ProbeResults};
use crate::registry::ConnectionRegistry;

const COLLECTION: &str = "healthcheck";

#[derive(Debug, Serialize, Deserialize)]
struct HealthCheckRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    service: String,
    timestamp: String,
}

/// Document store probe: ping, a read on the healthcheck collection, and a
/// write that refreshes the newest healthcheck record.
pub struct DatabaseCheck {
    registry: Arc<ConnectionRegistry>,
    database_name: String,
}

impl DatabaseCheck {
    pub fn new(registry: Arc<ConnectionRegistry>, database_name: String) -> Self {
        Self {
            registry,
            database_name,
        }
    }

    fn collection(&self, client: &Client) -> Collection<HealthCheckRecord> {
        client.database(&self.database_name).collection(COLLECTION)
    }

    async fn check_connection(&self, client: &Client) -> bool {
        match client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!("Error pinging MongoDB: {}", e);
                false
            }
        }
    }

    async fn check_read(&self, client: &Client) -> bool {
        match self.collection(client).find_one(doc! {}).await {
            Ok(Some(record)) => {
                debug!("DBRead : {:?}", record);
                true
            }
            Ok(None) => {
                info!("Healthcheck collection is empty, but the database is accessible.");
                true
            }
            Err(e) => {
                error!("Error reading from healthcheck collection: {}", e);
                false
            }
        }
    }

    async fn check_write(&self, client: &Client) -> bool {
        let collection = self.collection(client);

        let newest = match collection
            .find_one(doc! {})
            .sort(doc! { "timestamp": -1 })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!("Error finding last record: {}", e);
                return false;
            }
        };

        let Some(record) = newest else {
            return self.insert_first_record(&collection).await;
        };

        let Some(id) = record.id else {
            error!("Last healthcheck record has no id, cannot update it");
            return false;
        };

        let update = doc! { "$set": { "timestamp": Utc::now().to_rfc3339() } };
        match collection.update_one(doc! { "_id": id }, update).await {
            Ok(_) => {
                debug!("DBWrite : Updated the timestamp of the last healthcheck record.");
                true
            }
            Err(e) => {
                error!("Error updating the last inserted record: {}", e);
                false
            }
        }
    }

    async fn insert_first_record(&self, collection: &Collection<HealthCheckRecord>) -> bool {
        let record = HealthCheckRecord {
            id: None,
            service: COLLECTION.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        };
        match collection.insert_one(record).await {
            Ok(_) => {
                debug!("DBWrite : Inserted first healthcheck record.");
                true
            }
            Err(e) => {
                error!("Error inserting first healthcheck record: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl DependencyCheck for DatabaseCheck {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn check(&self) -> ProbeResults {
        match self.registry.document_store().await {
            Ok(client) => ProbeResults::from([
                ("connection", self.check_connection(&client).await),
                ("read", self.check_read(&client).await),
                ("write", self.check_write(&client).await),
            ]),
            Err(e) => {
                error!("{}", e);
                ProbeResults::from([("connection", false), ("read", false), ("write", false)])
            }
        }
    }
}
