//! Public and private HTTP listeners with bounded graceful shutdown.

use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fanout_core::ServerConfig;

use crate::api::AppState;
use crate::router::{private_router, public_router};

pub struct Listeners {
    public: TcpListener,
    private: TcpListener,
}

impl Listeners {
    pub async fn bind(config: &ServerConfig) -> io::Result<Self> {
        let public = TcpListener::bind((config.host.as_str(), config.public_port)).await?;
        let private = TcpListener::bind((config.host.as_str(), config.private_port)).await?;
        Ok(Self { public, private })
    }

    pub fn public_addr(&self) -> io::Result<SocketAddr> {
        self.public.local_addr()
    }

    pub fn private_addr(&self) -> io::Result<SocketAddr> {
        self.private.local_addr()
    }
}

/// Serve both listeners until `shutdown` fires, then give in-flight requests
/// at most `grace` to finish.
pub async fn serve(
    listeners: Listeners,
    state: Arc<AppState>,
    shutdown: CancellationToken,
    grace: Duration,
) -> io::Result<()> {
    info!(addr = %listeners.public_addr()?, "Public API listening");
    info!(addr = %listeners.private_addr()?, "Health endpoint listening");

    let public = axum::serve(listeners.public, public_router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    let private = axum::serve(listeners.private, private_router())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();

    let deadline = async {
        shutdown.cancelled().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = async { tokio::try_join!(public, private) } => {
            result?;
            info!("HTTP listeners stopped");
        }
        _ = deadline => {
            warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed with requests in flight");
        }
    }
    Ok(())
}
