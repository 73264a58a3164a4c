//! 基于 etcd v3 的协调存储

use crate::config::EtcdConfig;
use crate::store::{
    CoordinationStore, EventType, GetResponse, KeyValue, LeaseId, WatchEvent, WatchOptions, WatchResponse,
    WatchStream,
};
use async_trait::async_trait;
use etcd_client::{
    Certificate, Client, ConnectOptions, DeleteOptions, GetOptions, Identity, PutOptions, TlsOptions,
};
use futures::StreamExt;
use infrastructure_common::{Context, StoreError, StoreResult};
use std::time::Duration;
use tracing::{debug, info};

/// etcd v3 协调存储
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    endpoints: Vec<String>,
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdStore").field("endpoints", &self.endpoints).finish()
    }
}

fn backend(e: etcd_client::Error) -> StoreError {
    StoreError::backend(e.to_string())
}

fn lease_error(lease: LeaseId, e: etcd_client::Error) -> StoreError {
    match &e {
        etcd_client::Error::GRpcStatus(status) if status.message().contains("lease not found") => {
            StoreError::LeaseNotFound { lease_id: lease }
        }
        _ => backend(e),
    }
}

fn convert_kv(kv: &etcd_client::KeyValue) -> KeyValue {
    KeyValue {
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value: kv.value().to_vec(),
        create_revision: kv.create_revision(),
        mod_revision: kv.mod_revision(),
        version: kv.version(),
        lease: kv.lease(),
    }
}

fn convert_watch_response(resp: &etcd_client::WatchResponse) -> WatchResponse {
    let events = resp
        .events()
        .iter()
        .filter_map(|event| {
            let kv = event.kv()?;
            let event_type = match event.event_type() {
                etcd_client::EventType::Put => EventType::Put,
                etcd_client::EventType::Delete => EventType::Delete,
            };
            Some(WatchEvent {
                event_type,
                kv: convert_kv(kv),
            })
        })
        .collect();
    WatchResponse {
        header_revision: resp.header().map_or(0, |h| h.revision()),
        compact_revision: resp.compact_revision(),
        canceled: resp.canceled(),
        events,
    }
}

impl EtcdStore {
    /// 连接 etcd 集群
    pub async fn connect(config: &EtcdConfig) -> StoreResult<Self> {
        let mut options = ConnectOptions::new().with_connect_timeout(config.connect_timeout);
        if config.basic_auth {
            options = options.with_user(config.user_name.clone(), config.password.clone());
        }
        if config.use_tls() {
            options = options.with_tls(Self::tls_options(config).await?);
        }

        let endpoints = config.endpoint_urls();
        info!("连接 etcd: {:?}", endpoints);
        let client = Client::connect(endpoints.clone(), Some(options)).await.map_err(backend)?;
        Ok(Self { client, endpoints })
    }

    async fn tls_options(config: &EtcdConfig) -> StoreResult<TlsOptions> {
        let mut tls = TlsOptions::new();
        if !config.ca_cert.is_empty() {
            let ca = tokio::fs::read(&config.ca_cert)
                .await
                .map_err(|e| StoreError::backend(format!("读取 CA 证书失败: {}, 原因: {}", config.ca_cert, e)))?;
            tls = tls.ca_certificate(Certificate::from_pem(ca));
        }
        if !config.cert_file.is_empty() && !config.key_file.is_empty() {
            let cert = tokio::fs::read(&config.cert_file)
                .await
                .map_err(|e| StoreError::backend(format!("读取证书失败: {}, 原因: {}", config.cert_file, e)))?;
            let key = tokio::fs::read(&config.key_file)
                .await
                .map_err(|e| StoreError::backend(format!("读取私钥失败: {}, 原因: {}", config.key_file, e)))?;
            tls = tls.identity(Identity::from_pem(cert, key));
        }
        Ok(tls)
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn get(&self, ctx: &Context, key: &str, prefix: bool) -> StoreResult<GetResponse> {
        let mut client = self.client.clone();
        let options = prefix.then(|| GetOptions::new().with_prefix());
        ctx.run(async move {
            let resp = client.get(key, options).await.map_err(backend)?;
            Ok(GetResponse {
                kvs: resp.kvs().iter().map(convert_kv).collect(),
                revision: resp.header().map_or(0, |h| h.revision()),
            })
        })
        .await
    }

    async fn put(&self, ctx: &Context, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> StoreResult<i64> {
        let mut client = self.client.clone();
        let options = lease.filter(|id| *id != 0).map(|id| PutOptions::new().with_lease(id));
        ctx.run(async move {
            let resp = client
                .put(key, value, options)
                .await
                .map_err(|e| match lease {
                    Some(id) => lease_error(id, e),
                    None => backend(e),
                })?;
            Ok(resp.header().map_or(0, |h| h.revision()))
        })
        .await
    }

    async fn delete(&self, ctx: &Context, key: &str, prefix: bool) -> StoreResult<i64> {
        let mut client = self.client.clone();
        let options = prefix.then(|| DeleteOptions::new().with_prefix());
        ctx.run(async move {
            let resp = client.delete(key, options).await.map_err(backend)?;
            Ok(resp.deleted())
        })
        .await
    }

    async fn watch(&self, key: &str, options: WatchOptions) -> StoreResult<WatchStream> {
        let mut client = self.client.clone();
        let mut watch_options = etcd_client::WatchOptions::new();
        if options.prefix {
            watch_options = watch_options.with_prefix();
        }
        if options.start_revision > 0 {
            watch_options = watch_options.with_start_revision(options.start_revision);
        }
        let (watcher, stream) = client.watch(key, Some(watch_options)).await.map_err(backend)?;
        debug!("打开 etcd 监听: {}, 起始修订版本 {}", key, options.start_revision);

        let stream = futures::stream::unfold((watcher, stream, false), |(watcher, mut stream, done)| async move {
            if done {
                return None;
            }
            match stream.message().await {
                Ok(Some(resp)) => Some((Ok(convert_watch_response(&resp)), (watcher, stream, false))),
                Ok(None) => None,
                Err(e) => Some((Err(backend(e)), (watcher, stream, true))),
            }
        });
        Ok(stream.boxed())
    }

    async fn grant_lease(&self, ctx: &Context, ttl: Duration) -> StoreResult<LeaseId> {
        let mut client = self.client.clone();
        let seconds = ttl.as_secs().max(1) as i64;
        ctx.run(async move {
            let resp = client.lease_grant(seconds, None).await.map_err(backend)?;
            Ok(resp.id())
        })
        .await
    }

    async fn keep_alive_once(&self, ctx: &Context, lease: LeaseId) -> StoreResult<Duration> {
        let mut client = self.client.clone();
        ctx.run(async move {
            let (mut keeper, mut stream) = client.lease_keep_alive(lease).await.map_err(|e| lease_error(lease, e))?;
            keeper.keep_alive().await.map_err(|e| lease_error(lease, e))?;
            let resp = stream
                .message()
                .await
                .map_err(|e| lease_error(lease, e))?
                .ok_or_else(|| StoreError::backend("续期响应流已关闭"))?;
            if resp.ttl() <= 0 {
                return Err(StoreError::LeaseNotFound { lease_id: lease });
            }
            Ok(Duration::from_secs(resp.ttl() as u64))
        })
        .await
    }

    async fn revoke_lease(&self, ctx: &Context, lease: LeaseId) -> StoreResult<()> {
        let mut client = self.client.clone();
        ctx.run(async move {
            client.lease_revoke(lease).await.map_err(|e| lease_error(lease, e))?;
            Ok(())
        })
        .await
    }
}
