use std::time::Duration;

use envconfig::Envconfig;
use rdkafka::ClientConfig;

use crate::retry::{BackoffPolicy, RetryPolicy};
use crate::sink::ExhaustedBatchPolicy;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Kafka configuration
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "kafka-forwarder")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "events")]
    pub kafka_consumer_topic: String,

    // "latest" consumes new records only; "earliest" replays the retained log
    #[envconfig(default = "latest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,

    #[envconfig(default = "true")]
    pub kafka_log_consumer_errors: bool,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // Document store configuration
    #[envconfig(default = "http://localhost:9200")]
    pub store_endpoints: String, // comma-separated

    #[envconfig(default = "10000")]
    pub bulk_limit: usize,

    #[envconfig(default = "10")]
    pub bulk_max_retry_attempts: u32,

    #[envconfig(default = "10")]
    pub bulk_retry_min_backoff_ms: u64,

    #[envconfig(default = "8000")]
    pub bulk_retry_max_backoff_ms: u64,

    #[envconfig(default = "kafka-forwarder")]
    pub index_prefix: String,

    #[envconfig(default = "drop")]
    pub exhausted_batch_policy: ExhaustedBatchPolicy,

    // Pipeline channel sizing
    #[envconfig(default = "16")]
    pub claim_channel_capacity: usize,

    #[envconfig(default = "1000")]
    pub record_channel_capacity: usize,

    // HTTP server configuration
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn store_endpoint_list(&self) -> Vec<String> {
        self.store_endpoints
            .split(',')
            .map(|endpoint| endpoint.trim().trim_end_matches('/').to_string())
            .filter(|endpoint| !endpoint.is_empty())
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.bulk_max_retry_attempts,
            BackoffPolicy::new(
                Duration::from_millis(self.bulk_retry_min_backoff_ms),
                2.0,
                Duration::from_millis(self.bulk_retry_max_backoff_ms),
            ),
        )
    }

    pub fn kafka_client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("group.id", &self.kafka_consumer_group)
            .set("auto.offset.reset", &self.kafka_consumer_offset_reset)
            // Offsets are stored explicitly per consumed record and ride out
            // on the interval auto-commit.
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                self.kafka_consumer_auto_commit_interval_ms.to_string(),
            );

        if self.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        client_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            kafka_hosts: "localhost:9092".to_string(),
            kafka_consumer_group: "kafka-forwarder".to_string(),
            kafka_consumer_topic: "events".to_string(),
            kafka_consumer_offset_reset: "latest".to_string(),
            kafka_consumer_auto_commit_interval_ms: 5000,
            kafka_log_consumer_errors: true,
            kafka_tls: false,
            store_endpoints: "http://es-1:9200/, http://es-2:9200,".to_string(),
            bulk_limit: 10000,
            bulk_max_retry_attempts: 10,
            bulk_retry_min_backoff_ms: 10,
            bulk_retry_max_backoff_ms: 8000,
            index_prefix: "kafka-forwarder".to_string(),
            exhausted_batch_policy: ExhaustedBatchPolicy::Drop,
            claim_channel_capacity: 16,
            record_channel_capacity: 1000,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }

    #[test]
    fn endpoint_list_trims_and_drops_empty_entries() {
        let config = test_config();
        assert_eq!(
            config.store_endpoint_list(),
            vec![
                "http://es-1:9200".to_string(),
                "http://es-2:9200".to_string()
            ]
        );
    }

    #[test]
    fn bind_address_joins_host_and_port() {
        assert_eq!(test_config().bind_address(), "0.0.0.0:8080");
    }
}
