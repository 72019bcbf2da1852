//! Service assembly: spawns the aggregator and link activities and stops
//! them together

use crate::aggregator::{Aggregator, SensorBank};
use crate::config::EdgeConfig;
use crate::link::{Link, LinkHandle, PeerListener};
use crate::shutdown::{Shutdown, ShutdownTrigger};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// The running service
pub struct TelemetryService {
    trigger: ShutdownTrigger,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    link: LinkHandle,
    join_timeout: Duration,
}

impl TelemetryService {
    /// Spawn every activity. `shutdown` must be the flag paired with
    /// `trigger`; the sensors may already hold clones of it.
    pub fn start(
        sensors: SensorBank,
        listener: Option<Box<dyn PeerListener>>,
        config: &EdgeConfig,
        trigger: ShutdownTrigger,
        shutdown: Shutdown,
    ) -> Self {
        let link = Link::new(listener, &config.link.settings());
        let link_handle = link.handle();
        let aggregator = Aggregator::new(sensors, link_handle.clone(), config.into());

        let mut tasks = link.spawn(&shutdown);
        tasks.push(("aggregator", tokio::spawn(aggregator.run(shutdown))));

        info!(
            "[MAIN] Service started ({} tasks, link {})",
            tasks.len(),
            link_handle.status()
        );

        Self {
            trigger,
            tasks,
            link: link_handle,
            join_timeout: config.shutdown_timeout(),
        }
    }

    pub fn link(&self) -> LinkHandle {
        self.link.clone()
    }

    /// Clear the running flag and join every task, aborting any that overrun.
    /// Returns how many tasks had to be aborted.
    pub async fn stop(self) -> usize {
        self.trigger.stop();

        let mut aborted = 0;
        for (name, mut task) in self.tasks {
            match timeout(self.join_timeout, &mut task).await {
                Ok(Ok(())) => info!("[MAIN] {} stopped", name),
                Ok(Err(e)) => warn!("[MAIN] {} ended abnormally: {}", name, e),
                Err(_) => {
                    warn!(
                        "[MAIN] {} did not stop within {:?}, aborting",
                        name, self.join_timeout
                    );
                    task.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}
