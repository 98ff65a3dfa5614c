use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::info;

use crate::proto::{self, sentinel_client};

/// Locations of the PEM material for the mutually-authenticated
/// channel.
#[derive(Debug, Clone)]
pub struct TlsFiles {
    /// Client certificate presented to the server.
    pub cert_file: PathBuf,
    /// Private key for the client certificate.
    pub cert_key_file: PathBuf,
    /// Trust anchor the server certificate is validated against.
    pub ca_file: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to read {}: {}", .0.display(), .1)]
    ReadPem(PathBuf, #[source] std::io::Error),
    #[error("invalid server address: {0}")]
    Endpoint(#[source] tonic::transport::Error),
    #[error("invalid tls configuration: {0}")]
    Tls(#[source] tonic::transport::Error),
    #[error("failed to connect: {0}")]
    Dial(#[source] tonic::transport::Error),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc failed: {0}")]
    Status(#[from] tonic::Status),
}

/// Typed handle over the generated gRPC client.
#[derive(Debug, Clone)]
pub struct SentinelClient {
    client: sentinel_client::SentinelClient<Channel>,
}

impl SentinelClient {
    /// Dial `host:port` over mutual TLS.
    pub async fn connect(host: &str, port: u16, tls: &TlsFiles) -> Result<Self, ConnectError> {
        let cert = read_pem(&tls.cert_file).await?;
        let key = read_pem(&tls.cert_key_file).await?;
        let ca = read_pem(&tls.ca_file).await?;

        let tls_config = ClientTlsConfig::new()
            .identity(Identity::from_pem(cert, key))
            .ca_certificate(Certificate::from_pem(ca));

        let channel = Endpoint::from_shared(format!("https://{host}:{port}"))
            .map_err(ConnectError::Endpoint)?
            .tls_config(tls_config)
            .map_err(ConnectError::Tls)?
            .connect()
            .await
            .map_err(ConnectError::Dial)?;
        info!("connected to {host}:{port}");

        Ok(Self {
            client: sentinel_client::SentinelClient::new(channel),
        })
    }

    pub async fn get_startup_info(&mut self) -> Result<proto::StartupInfo, RpcError> {
        Ok(self
            .client
            .get_startup_info(proto::Empty {})
            .await?
            .into_inner())
    }

    /// Stream a full baseline to the server; resolves once the server
    /// acknowledges the half-closed stream.
    pub async fn create_baseline(
        &mut self,
        objects: impl tonic::IntoStreamingRequest<Message = proto::FsObject>,
    ) -> Result<(), RpcError> {
        self.client.create_baseline(objects).await?;
        Ok(())
    }

    pub async fn update_baseline(
        &mut self,
        objects: impl tonic::IntoStreamingRequest<Message = proto::FsObject>,
    ) -> Result<(), RpcError> {
        self.client.update_baseline(objects).await?;
        Ok(())
    }

    /// Stream current state for comparison against the server-held
    /// baseline.
    pub async fn report_fs_status(
        &mut self,
        objects: impl tonic::IntoStreamingRequest<Message = proto::FsObject>,
    ) -> Result<(), RpcError> {
        self.client.report_fs_status(objects).await?;
        Ok(())
    }

    pub async fn report_fs_event(&mut self, event: proto::Event) -> Result<(), RpcError> {
        self.client.report_fs_event(event).await?;
        Ok(())
    }
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, ConnectError> {
    fs::read(path)
        .await
        .map_err(|err| ConnectError::ReadPem(path.to_owned(), err))
}
