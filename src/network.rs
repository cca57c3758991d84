use crate::config::{ProtocolConfig, Startup, parse_link};
use crate::error::{Result, RipError};
use crate::router::Router;
use crate::routing_table::RouteRow;
use log::{error, info, warn};
use tokio::task::JoinHandle;

/// Ordered collection of routers plus the links between them.
pub struct Network {
    config: ProtocolConfig,
    routers: Vec<Router>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Network {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            routers: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Creates every router and link listed in `startup`. Nothing is started.
    pub async fn from_startup(config: ProtocolConfig, startup: &Startup) -> Result<Self> {
        let mut network = Self::new(config);
        for name in &startup.routers {
            network.add_router(name)?;
        }
        for link in &startup.links {
            network.add_link(link).await?;
        }
        Ok(network)
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn routers(&self) -> &[Router] {
        &self.routers
    }

    pub fn router(&self, name: &str) -> Result<&Router> {
        let name = name.trim();
        self.routers
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| RipError::UnknownRouter(name.to_string()))
    }

    pub fn add_router(&mut self, name: &str) -> Result<Router> {
        let identity = self.config.identity_for(name)?;
        if self.routers.iter().any(|r| r.addr() == identity.addr) {
            return Err(RipError::DuplicateRouter(identity.name));
        }

        let router = Router::new(identity, self.config.clone());
        info!("Router {} added as {}", router.name(), router.addr());
        self.routers.push(router.clone());
        Ok(router)
    }

    /// Spawns the router's task. A socket failure is reported for that
    /// router alone; the rest of the network keeps running.
    pub fn start(&mut self, name: &str) -> Result<()> {
        let router = self.router(name)?.clone();
        if self.tasks.iter().any(|(started, _)| started == router.name()) {
            return Err(RipError::AlreadyStarted(router.name().to_string()));
        }

        let name = router.name().to_string();
        let task = tokio::spawn(async move {
            let name = router.name().to_string();
            if let Err(e) = router.run().await {
                error!("Router {} failed: {}", name, e);
            }
        });
        self.tasks.push((name, task));
        Ok(())
    }

    pub fn start_all(&mut self) {
        let names: Vec<String> = self.routers.iter().map(|r| r.name().to_string()).collect();
        for name in names {
            if let Err(e) = self.start(&name) {
                warn!("{}", e);
            }
        }
    }

    /// Makes the two routers of `R<i>-R<j>` neighbors of each other.
    pub async fn add_link(&self, spec: &str) -> Result<()> {
        let (left, right) = self.link_ends(spec)?;
        left.add_neighbor(right.identity()).await;
        right.add_neighbor(left.identity()).await;
        info!("Link {}-{} added", left.name(), right.name());
        Ok(())
    }

    pub async fn delete_link(&self, spec: &str) -> Result<()> {
        let (left, right) = self.link_ends(spec)?;
        let removed_left = left.delete_neighbor(right.name()).await;
        let removed_right = right.delete_neighbor(left.name()).await;
        if !removed_left && !removed_right {
            warn!("Link {}-{} did not exist", left.name(), right.name());
        } else {
            info!("Link {}-{} removed", left.name(), right.name());
        }
        Ok(())
    }

    fn link_ends(&self, spec: &str) -> Result<(&Router, &Router)> {
        let (left, right) = parse_link(spec)?;
        Ok((self.router(&left)?, self.router(&right)?))
    }

    pub async fn table(&self, name: &str) -> Result<Vec<RouteRow>> {
        Ok(self.router(name)?.routes().await)
    }

    /// Stops every router and waits for their tasks to finish.
    pub async fn shutdown_all(&mut self) {
        for router in &self.routers {
            router.stop();
        }
        for (name, task) in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Router {} task ended abnormally: {}", name, e);
            }
        }
    }
}
