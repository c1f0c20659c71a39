use std::sync::Arc;

use broker_memory::MemoryBroker;
use playback_api::{BrokerContext, ConsumerFactory, ProducerFactory};

use crate::config::{Backend, BrokerConfig};
use crate::error::ServerError;

/// Собрать `BrokerContext` из секций `[source]` и `[target]`.
pub fn build_context(source: &BrokerConfig, target: &BrokerConfig) -> Result<BrokerContext, ServerError> {
    let memory = MemoryBroker::new();

    let consumers: Arc<dyn ConsumerFactory> = match source.backend {
        Backend::Memory => Arc::new(memory.clone()),
        Backend::Kafka => kafka_consumers(source)?,
    };
    let producers: Arc<dyn ProducerFactory> = match target.backend {
        Backend::Memory => Arc::new(memory),
        Backend::Kafka => kafka_producers(target)?,
    };

    tracing::info!(
        source = ?source.backend,
        target = ?target.backend,
        "broker context ready"
    );
    Ok(BrokerContext::new(consumers, producers))
}

#[cfg(feature = "kafka")]
fn kafka_consumers(cfg: &BrokerConfig) -> Result<Arc<dyn ConsumerFactory>, ServerError> {
    let factory =
        crate::kafka::KafkaConsumerFactory::new(&cfg.bootstrap_servers, &cfg.group_id).validated()?;
    Ok(Arc::new(factory))
}

#[cfg(feature = "kafka")]
fn kafka_producers(cfg: &BrokerConfig) -> Result<Arc<dyn ProducerFactory>, ServerError> {
    let factory = crate::kafka::KafkaProducerFactory::new(&cfg.bootstrap_servers).validated()?;
    Ok(Arc::new(factory))
}

#[cfg(not(feature = "kafka"))]
fn kafka_consumers(_: &BrokerConfig) -> Result<Arc<dyn ConsumerFactory>, ServerError> {
    Err(ServerError::UnsupportedBackend("kafka"))
}

#[cfg(not(feature = "kafka"))]
fn kafka_producers(_: &BrokerConfig) -> Result<Arc<dyn ProducerFactory>, ServerError> {
    Err(ServerError::UnsupportedBackend("kafka"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use playback_api::{LogConsumer, LogProducer};

    #[test]
    fn memory_backends_share_one_log() {
        let cfg = BrokerConfig::default();
        let ctx = build_context(&cfg, &cfg).unwrap();

        let producer = ctx.producers.create_producer().unwrap();
        producer.send("replay", None, &serde_json::json!(1)).unwrap();

        let mut consumer = ctx.consumers.create_consumer().unwrap();
        let partitions = consumer
            .partitions_for("replay", std::time::Duration::from_millis(10))
            .unwrap();
        assert_eq!(partitions, vec![0]);
    }

    #[cfg(not(feature = "kafka"))]
    #[test]
    fn kafka_without_feature_is_rejected() {
        let kafka = BrokerConfig {
            backend: Backend::Kafka,
            ..BrokerConfig::default()
        };
        assert!(matches!(
            build_context(&kafka, &BrokerConfig::default()),
            Err(ServerError::UnsupportedBackend("kafka"))
        ));
    }
}
