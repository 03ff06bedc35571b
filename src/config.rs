use std::env;
use tracing::{info, warn};

const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";

/// Runtime configuration, loaded from the environment (optionally seeded from
/// a `.env` file).
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub mongo_uri: String,
    pub database_name: String,
    pub kafka_broker: String,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub redis_host: String,
    pub redis_port: String,
    pub redis_password: String,
    pub redis_db: i64,
    pub temporal_url: String,
    pub server_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Config, String> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("No .env file loaded: {}", e);
        }
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        info!(
            "Configuration loaded for service '{}' (brokers: {}, topic: {})",
            config.service_name, config.kafka_broker, config.kafka_topic
        );
        Ok(config)
    }

    fn from_lookup<F>(lookup: F) -> Result<Config, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).unwrap_or_default();

        let redis_db = match get("REDIS_DB").parse::<i64>() {
            Ok(db) => db,
            Err(e) => {
                warn!("Invalid value for REDIS_DB: {}. Using default value 0.", e);
                0
            }
        };

        let config = Config {
            service_name: get("SERVICE_NAME"),
            mongo_uri: get("MONGO_URI"),
            database_name: get("DATABASE_NAME"),
            kafka_broker: get("KAFKA_BROKER"),
            kafka_topic: get("KAFKA_TOPIC"),
            kafka_group_id: get("KAFKA_GROUP_ID"),
            redis_host: get("REDIS_HOST"),
            redis_port: get("REDIS_PORT"),
            redis_password: get("REDIS_PASSWORD"),
            redis_db,
            temporal_url: get("TEMPORAL_URL"),
            server_addr: lookup("SERVER_ADDR").unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.mongo_uri.is_empty() {
            return Err("MONGO_URI must be set".to_string());
        }
        if self.kafka_broker.is_empty() {
            return Err("KAFKA_BROKER must be set".to_string());
        }
        if self.kafka_topic.is_empty() {
            return Err("KAFKA_TOPIC must be set".to_string());
        }
        Ok(())
    }

    /// Assemble the Redis connection URL from its parts.
    pub fn redis_url(&self) -> String {
        if self.redis_password.is_empty() {
            format!(
                "redis://{}:{}/{}",
                self.redis_host, self.redis_port, self.redis_db
            )
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.redis_password, self.redis_host, self.redis_port, self.redis_db
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("SERVICE_NAME", "healthcheck"),
            ("MONGO_URI", "mongodb://localhost:27017"),
            ("DATABASE_NAME", "healthcheck"),
            ("KAFKA_BROKER", "broker1:9092"),
            ("KAFKA_TOPIC", "healthcheck"),
            ("KAFKA_GROUP_ID", "healthcheck-group"),
            ("REDIS_HOST", "localhost"),
            ("REDIS_PORT", "6379"),
            ("REDIS_DB", "2"),
            ("TEMPORAL_URL", "localhost:7233"),
        ])
    }

    fn load(vars: HashMap<&'static str, &'static str>) -> Result<Config, String> {
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_load_valid_config() {
        let config = load(base_vars()).unwrap();
        assert_eq!(config.kafka_broker, "broker1:9092");
        assert_eq!(config.kafka_topic, "healthcheck");
        assert_eq!(config.redis_db, 2);
        assert_eq!(config.server_addr, DEFAULT_SERVER_ADDR);
    }

    #[test]
    fn test_missing_mongo_uri_is_rejected() {
        let mut vars = base_vars();
        vars.remove("MONGO_URI");
        let result = load(vars);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("MONGO_URI"));
    }

    #[test]
    fn test_missing_broker_is_rejected() {
        let mut vars = base_vars();
        vars.remove("KAFKA_BROKER");
        assert!(load(vars).is_err());
    }

    #[test]
    fn test_invalid_redis_db_falls_back_to_zero() {
        let mut vars = base_vars();
        vars.insert("REDIS_DB", "not-a-number");
        let config = load(vars).unwrap();
        assert_eq!(config.redis_db, 0);
    }

    #[test]
    fn test_redis_url_without_password() {
        let config = load(base_vars()).unwrap();
        assert_eq!(config.redis_url(), "redis://localhost:6379/2");
    }

    #[test]
    fn test_redis_url_with_password() {
        let mut vars = base_vars();
        vars.insert("REDIS_PASSWORD", "hunter2");
        let config = load(vars).unwrap();
        assert_eq!(config.redis_url(), "redis://:hunter2@localhost:6379/2");
    }
}
