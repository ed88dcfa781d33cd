//! Operator CLI runtime: wires the same components the ingestion service
//! wires (crypto, storage, broker, compliance engines) from one loaded
//! [`Config`].

use anyhow::{Context, Result};
use audit_compliance::{GdprEngine, IntegrityVerifier, RetentionSweeper};
use audit_core::{
    Config, CryptoCore, DatabasePool, DeadLetterQueue, HmacKeyring, JobQueue, KmsClient, LocalKms,
    PipelineMetrics, RedisDeadLetterQueue, RedisJobQueue, StorageAdapter,
};
use audit_pipeline::AuditProducer;
use audit_storage::PostgresStorageAdapter;
use redis::aio::ConnectionManager;
use std::sync::Arc;

pub struct Runtime {
    pub storage: Arc<dyn StorageAdapter>,
    pub crypto: Arc<CryptoCore>,
    pub producer: Arc<AuditProducer>,
    pub queue: Arc<dyn JobQueue>,
    pub dlq: Arc<dyn DeadLetterQueue>,
    pub verifier: Arc<IntegrityVerifier>,
    pub gdpr: Arc<GdprEngine>,
    pub sweeper: Arc<RetentionSweeper>,
    pub metrics: Arc<PipelineMetrics>,
}

impl Runtime {
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let db = DatabasePool::new(config.database.clone())
            .await
            .context("failed to initialize database pool")?;
        let storage: Arc<dyn StorageAdapter> =
            Arc::new(PostgresStorageAdapter::new(db.pool().clone()));

        let redis = connect_redis(&config.broker.url)
            .await
            .context("failed to connect to broker")?;
        let queue: Arc<dyn JobQueue> =
            Arc::new(RedisJobQueue::new(redis.clone(), config.broker.queue_name.clone()));
        let dlq: Arc<dyn DeadLetterQueue> =
            Arc::new(RedisDeadLetterQueue::new(redis, config.broker.queue_name.clone()));

        let crypto = Arc::new(CryptoCore::new(
            Box::new(build_local_kms(&config)?),
            config.crypto.signature_required,
        ));
        let kms_for_gdpr: Arc<dyn KmsClient> = Arc::new(build_local_kms(&config)?);

        let producer = Arc::new(AuditProducer::new(queue.clone(), crypto.clone()));
        let metrics = Arc::new(
            PipelineMetrics::new("audit_pipeline").context("failed to register pipeline metrics")?,
        );

        let verifier = Arc::new(IntegrityVerifier::new(
            storage.clone(),
            crypto.clone(),
            producer.clone(),
            metrics.clone(),
        ));

        let gdpr = Arc::new(GdprEngine::new(
            storage.clone(),
            producer.clone(),
            kms_for_gdpr,
            config.gdpr.pseudonym_salt.as_bytes().to_vec(),
        ));

        let sweeper = Arc::new(RetentionSweeper::new(storage.clone(), gdpr.clone(), producer.clone()));

        Ok(Self { storage, crypto, producer, queue, dlq, verifier, gdpr, sweeper, metrics })
    }
}

fn build_local_kms(config: &Config) -> Result<LocalKms> {
    let keyring = HmacKeyring::single(
        config.crypto.hmac_key_id.clone(),
        config.crypto.hmac_secret.as_bytes().to_vec(),
    );
    LocalKms::new(config.crypto.aes_encryption_key.as_bytes(), keyring)
        .context("failed to initialize local KMS")
}

async fn connect_redis(url: &str) -> Result<ConnectionManager, redis::RedisError> {
    let client = redis::Client::open(url)?;
    ConnectionManager::new(client).await
}
