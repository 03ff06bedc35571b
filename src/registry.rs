// Connection registry
// Owns one long-lived handle per dependency kind, initialized exactly once.

use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::Client as MongoClient;
use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::StreamConsumer;
use rdkafka::error::KafkaError;
use rdkafka::producer::FutureProducer;
use rdkafka::ClientConfig;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OnceCell};
use tracing::{error, info};

use crate::config::Config;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const PRODUCER_RETRIES: &str = "5";

/// Dependency kinds tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    DocumentStore,
    Cache,
    BrokerProducer,
    BrokerConsumer,
    BrokerAdmin,
    Workflow,
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::DocumentStore => write!(f, "document store"),
            DependencyKind::Cache => write!(f, "cache"),
            DependencyKind::BrokerProducer => write!(f, "broker producer"),
            DependencyKind::BrokerConsumer => write!(f, "broker consumer"),
            DependencyKind::BrokerAdmin => write!(f, "broker admin"),
            DependencyKind::Workflow => write!(f, "workflow engine"),
        }
    }
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InitFailed(DependencyKind),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::InitFailed(kind) => {
                write!(f, "{} client is not initialized", kind)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Marker handle for the workflow engine. The engine is dialed once during
/// registry initialization; afterwards only the verified endpoint is kept.
#[derive(Debug, Clone)]
pub struct WorkflowHandle {
    pub endpoint: String,
}

/// Lazily creates and memoizes one connection per dependency kind. The first
/// caller for a kind runs the dial; concurrent callers block on the same
/// `OnceCell` and observe the same outcome. A failed initialization stays
/// failed until process restart.
pub struct ConnectionRegistry {
    config: Arc<Config>,
    mongo: OnceCell<Option<MongoClient>>,
    redis: OnceCell<Option<ConnectionManager>>,
    producer: OnceCell<Option<FutureProducer>>,
    consumer: OnceCell<Option<Arc<StreamConsumer>>>,
    admin: OnceCell<Option<Arc<AdminClient<DefaultClientContext>>>>,
    workflow: OnceCell<Option<WorkflowHandle>>,
    consume_guard: Mutex<()>,
}

impl ConnectionRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            mongo: OnceCell::new(),
            redis: OnceCell::new(),
            producer: OnceCell::new(),
            consumer: OnceCell::new(),
            admin: OnceCell::new(),
            workflow: OnceCell::new(),
            consume_guard: Mutex::new(()),
        }
    }

    pub async fn document_store(&self) -> Result<MongoClient, RegistryError> {
        let cell = self
            .mongo
            .get_or_init(|| async {
                match Self::dial_mongo(&self.config.mongo_uri).await {
                    Ok(client) => {
                        info!("MongoDB connection successful.");
                        Some(client)
                    }
                    Err(e) => {
                        error!("Error connecting to MongoDB: {}", e);
                        None
                    }
                }
            })
            .await;
        cell.clone()
            .ok_or(RegistryError::InitFailed(DependencyKind::DocumentStore))
    }

    pub async fn cache(&self) -> Result<ConnectionManager, RegistryError> {
        let cell = self
            .redis
            .get_or_init(|| async {
                match Self::dial_redis(&self.config.redis_url()).await {
                    Ok(conn) => {
                        info!("Redis connection successful.");
                        Some(conn)
                    }
                    Err(e) => {
                        error!("Error connecting to Redis: {}", e);
                        None
                    }
                }
            })
            .await;
        cell.clone()
            .ok_or(RegistryError::InitFailed(DependencyKind::Cache))
    }

    pub async fn broker_producer(&self) -> Result<FutureProducer, RegistryError> {
        let cell = self
            .producer
            .get_or_init(|| async {
                match Self::build_producer(&self.config.kafka_broker) {
                    Ok(producer) => {
                        info!("Kafka producer initialized.");
                        Some(producer)
                    }
                    Err(e) => {
                        error!("Failed to initialize Kafka producer: {}", e);
                        None
                    }
                }
            })
            .await;
        cell.clone()
            .ok_or(RegistryError::InitFailed(DependencyKind::BrokerProducer))
    }

    pub async fn broker_consumer(&self) -> Result<Arc<StreamConsumer>, RegistryError> {
        let cell = self
            .consumer
            .get_or_init(|| async {
                match Self::build_consumer(&self.config.kafka_broker, &self.config.kafka_group_id) {
                    Ok(consumer) => {
                        info!("Kafka consumer group initialized.");
                        Some(Arc::new(consumer))
                    }
                    Err(e) => {
                        error!("Failed to initialize Kafka consumer: {}", e);
                        None
                    }
                }
            })
            .await;
        cell.clone()
            .ok_or(RegistryError::InitFailed(DependencyKind::BrokerConsumer))
    }

    pub async fn broker_admin(
        &self,
    ) -> Result<Arc<AdminClient<DefaultClientContext>>, RegistryError> {
        let cell = self
            .admin
            .get_or_init(|| async {
                match Self::build_admin(&self.config.kafka_broker) {
                    Ok(admin) => {
                        info!("Kafka admin client initialized.");
                        Some(Arc::new(admin))
                    }
                    Err(e) => {
                        error!("Failed to initialize Kafka admin client: {}", e);
                        None
                    }
                }
            })
            .await;
        cell.clone()
            .ok_or(RegistryError::InitFailed(DependencyKind::BrokerAdmin))
    }

    pub async fn workflow(&self) -> Result<WorkflowHandle, RegistryError> {
        let cell = self
            .workflow
            .get_or_init(|| async {
                match Self::dial_workflow(&self.config.temporal_url).await {
                    Ok(handle) => {
                        info!("Temporal endpoint reachable, connection verified.");
                        Some(handle)
                    }
                    Err(e) => {
                        error!("Error connecting to Temporal: {}", e);
                        None
                    }
                }
            })
            .await;
        cell.clone()
            .ok_or(RegistryError::InitFailed(DependencyKind::Workflow))
    }

    /// Guard serializing consume checks over the shared consumer group handle.
    pub fn consume_guard(&self) -> &Mutex<()> {
        &self.consume_guard
    }

    async fn dial_mongo(uri: &str) -> Result<MongoClient, mongodb::error::Error> {
        let mut options = ClientOptions::parse(uri).await?;
        options.server_selection_timeout = Some(DIAL_TIMEOUT);
        options.connect_timeout = Some(DIAL_TIMEOUT);
        let client = MongoClient::with_options(options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(client)
    }

    async fn dial_redis(url: &str) -> Result<ConnectionManager, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: String = conn.ping().await?;
        Ok(conn)
    }

    fn build_producer(brokers: &str) -> Result<FutureProducer, KafkaError> {
        // Reachability is judged by the probes; librdkafka connects lazily.
        ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("message.send.max.retries", PRODUCER_RETRIES)
            .set("message.timeout.ms", "10000")
            .create()
    }

    fn build_consumer(brokers: &str, group_id: &str) -> Result<StreamConsumer, KafkaError> {
        ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "false")
            .create()
    }

    fn build_admin(brokers: &str) -> Result<AdminClient<DefaultClientContext>, KafkaError> {
        ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", "health-check-client")
            .create()
    }

    async fn dial_workflow(endpoint: &str) -> Result<WorkflowHandle, std::io::Error> {
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(endpoint))
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("timed out dialing {}", endpoint),
                )
            })??;
        drop(stream);
        Ok(WorkflowHandle {
            endpoint: endpoint.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config(temporal_url: &str) -> Arc<Config> {
        Arc::new(Config {
            service_name: "healthcheck".to_string(),
            mongo_uri: "mongodb://localhost:27017".to_string(),
            database_name: "healthcheck".to_string(),
            kafka_broker: "broker1:9092".to_string(),
            kafka_topic: "healthcheck".to_string(),
            kafka_group_id: "healthcheck-group".to_string(),
            redis_host: "localhost".to_string(),
            redis_port: "6379".to_string(),
            redis_password: String::new(),
            redis_db: 0,
            temporal_url: temporal_url.to_string(),
            server_addr: "0.0.0.0:8080".to_string(),
        })
    }

    #[tokio::test]
    async fn test_workflow_dialed_once_across_concurrent_acquires() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });

        let registry = Arc::new(ConnectionRegistry::new(test_config(&addr.to_string())));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { registry.workflow().await }));
        }
        for task in tasks {
            let handle = task.await.unwrap().unwrap();
            assert_eq!(handle.endpoint, addr.to_string());
        }

        // Let the accept loop drain any pending connection before counting.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_workflow_init_failure_is_permanent() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let registry = ConnectionRegistry::new(test_config(&addr.to_string()));

        let first = registry.workflow().await;
        assert_eq!(
            first.unwrap_err(),
            RegistryError::InitFailed(DependencyKind::Workflow)
        );

        // The failure is memoized; later acquires do not re-dial.
        let second = registry.workflow().await;
        assert_eq!(
            second.unwrap_err(),
            RegistryError::InitFailed(DependencyKind::Workflow)
        );
    }

    #[test]
    fn test_registry_error_names_the_kind() {
        let err = RegistryError::InitFailed(DependencyKind::BrokerConsumer);
        assert_eq!(err.to_string(), "broker consumer client is not initialized");
    }
}
