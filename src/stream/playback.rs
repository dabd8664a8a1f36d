//! Playback orchestration
//!
//! Starts the gateway and the monitor against one session and tears all three
//! down in order: monitor and gateway first (concurrently, both joined), the
//! session last, so no gateway reader outlives the engine session it reads.

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tracing::{debug, info};

use super::gateway::{stream_url, Gateway, GatewayError, GatewayHandle};
use super::monitor::{Monitor, MonitorHandle};
use super::session::Session;

/// Default gateway port
pub const DEFAULT_PORT: u16 = 3001;

#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    /// Address the gateway binds; loopback unless overridden
    pub bind: IpAddr,
    /// Port to listen on, 0 for any free port
    pub port: u16,
    /// File to play; `-1` plays the default route
    pub index: i64,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            index: -1,
        }
    }
}

/// A running gateway (and optional monitor) over one session
pub struct Playback {
    session: Arc<Session>,
    gateway: GatewayHandle,
    monitor: Option<MonitorHandle>,
    url: String,
}

impl Playback {
    /// Bind the gateway and start serving. When `monitor_out` is given the
    /// monitor renders into it until [`Playback::stop`].
    pub async fn start(
        session: Arc<Session>,
        options: PlaybackOptions,
        monitor_out: Option<Box<dyn Write + Send>>,
    ) -> Result<Self, GatewayError> {
        let addr = SocketAddr::new(options.bind, options.port);
        let gateway = Gateway::bind(addr, Arc::clone(&session), options.index).await?;
        let url = stream_url(gateway.local_addr().port(), options.index);
        let gateway = gateway.spawn();

        let monitor = monitor_out
            .map(|out| Monitor::new(Arc::clone(&session), options.index).spawn(out));

        info!(id = %session.id(), url = %url, "Playback started");
        Ok(Self {
            session,
            gateway,
            monitor,
            url,
        })
    }

    /// URL to hand to the player
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.gateway.local_addr()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Stop the monitor and the gateway, wait for both, then drop the session.
    pub async fn stop(self) -> Result<(), GatewayError> {
        let Self {
            session,
            gateway,
            monitor,
            ..
        } = self;

        if let Some(monitor) = &monitor {
            monitor.stop();
        }
        gateway.shutdown();

        let monitor_done = async move {
            if let Some(monitor) = monitor {
                monitor.join().await;
            }
        };
        let ((), served) = tokio::join!(monitor_done, gateway.join());
        debug!(id = %session.id(), "Gateway and monitor stopped");

        session.drop_session().await;
        served
    }
}
