//! Evochora service manager.
//!
//! Owns the lifecycle of the pipeline services behind a uniform control
//! surface. Every managed service is a state machine
//! `NOT_STARTED → RUNNING ⇄ PAUSED → STOPPED`; transitions happen only at
//! the service's own atomic-work boundaries because each controller
//! acknowledges commands from between units of work.
//!
//! Shutdown ordering: `stop_all` first closes the tick queue, which
//! unblocks a back-pressured producer and tells consumers to drain, then
//! stops the services in registration order (producers must be registered
//! before their consumers).

mod controls;

pub use controls::ServiceControl;

use evochora_queue::TickQueue;
use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Lifecycle state of one managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotStarted,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ServiceState::NotStarted => "NOT_STARTED",
            ServiceState::Running => "started",
            ServiceState::Paused => "paused",
            ServiceState::Stopped => "stopped",
        };
        write!(f, "{}", text)
    }
}

/// Manager failures.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No service registered under this name.
    #[error("unknown service: {0}")]
    UnknownService(String),
    /// The requested transition is not legal from the current state.
    #[error("service {service} cannot {command} while {state}")]
    InvalidTransition {
        service: String,
        command: &'static str,
        state: ServiceState,
    },
    /// The service did not reach the requested state within the timeout.
    #[error("service {0} did not stop within the configured timeout")]
    StopTimeout(String),
}

/// The manager result type.
pub type Result<T> = std::result::Result<T, ManagerError>;

type Starter = Box<dyn FnOnce() -> (JoinHandle<()>, Box<dyn ServiceControl>) + Send>;

struct ManagedService {
    name: String,
    auto_start: bool,
    state: ServiceState,
    starter: Option<Starter>,
    control: Option<Box<dyn ServiceControl>>,
    handle: Option<JoinHandle<()>>,
}

/// Coordinates start/pause/resume/stop across the registered services.
pub struct ServiceManager {
    services: Vec<ManagedService>,
    queue: Option<Arc<TickQueue>>,
    stop_timeout: Duration,
}

impl ServiceManager {
    /// Create a manager whose stop waits are bounded by `stop_timeout`.
    pub fn new(stop_timeout: Duration) -> ServiceManager {
        ServiceManager {
            services: Vec::new(),
            queue: None,
            stop_timeout,
        }
    }

    /// Hand the manager the tick queue so shutdown can close it between
    /// the producer and its consumers.
    pub fn manage_queue(&mut self, queue: Arc<TickQueue>) {
        self.queue = Some(queue);
    }

    /// Register a service. Registration order is command order; register
    /// producers before their consumers.
    pub fn register<S: ToString>(&mut self, name: S, auto_start: bool, starter: Starter) {
        self.services.push(ManagedService {
            name: name.to_string(),
            auto_start,
            state: ServiceState::NotStarted,
            starter: Some(starter),
            control: None,
            handle: None,
        });
    }

    /// Names of all registered services, in registration order.
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    /// Current state of one service.
    pub fn state(&self, name: &str) -> Result<ServiceState> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.state)
            .ok_or_else(|| ManagerError::UnknownService(name.to_string()))
    }

    /// One line per service, suitable for a CLI status command.
    pub fn status(&self) -> String {
        self.services
            .iter()
            .map(|s| format!("{}: {}", s.name, s.state))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `NOT_STARTED → RUNNING`; idempotent when already running, resumes
    /// when paused.
    pub fn start(&mut self, name: &str) -> Result<()> {
        let service = self.find_mut(name)?;
        match service.state {
            ServiceState::NotStarted => {
                let starter = service.starter.take().expect("starter present before start");
                let (handle, control) = starter();
                service.handle = Some(handle);
                service.control = Some(control);
                service.state = ServiceState::Running;
                info!("service {} started", name);
                Ok(())
            }
            ServiceState::Running => Ok(()),
            ServiceState::Paused => self.resume(name),
            ServiceState::Stopped => Err(ManagerError::InvalidTransition {
                service: name.to_string(),
                command: "start",
                state: ServiceState::Stopped,
            }),
        }
    }

    /// `RUNNING → PAUSED`, acknowledged at the service's work boundary.
    pub fn pause(&mut self, name: &str) -> Result<()> {
        let service = self.find_mut(name)?;
        match service.state {
            ServiceState::Running => {
                let acked = service
                    .control
                    .as_ref()
                    .map(|control| control.pause())
                    .unwrap_or(false);
                if acked {
                    service.state = ServiceState::Paused;
                } else {
                    warn!("service {} vanished during pause", name);
                    service.state = ServiceState::Stopped;
                }
                Ok(())
            }
            ServiceState::Paused => Ok(()),
            state => Err(ManagerError::InvalidTransition {
                service: name.to_string(),
                command: "pause",
                state,
            }),
        }
    }

    /// `PAUSED → RUNNING`; idempotent when already running.
    pub fn resume(&mut self, name: &str) -> Result<()> {
        let service = self.find_mut(name)?;
        match service.state {
            ServiceState::Paused => {
                let acked = service
                    .control
                    .as_ref()
                    .map(|control| control.resume())
                    .unwrap_or(false);
                if acked {
                    service.state = ServiceState::Running;
                } else {
                    warn!("service {} vanished during resume", name);
                    service.state = ServiceState::Stopped;
                }
                Ok(())
            }
            ServiceState::Running => Ok(()),
            state => Err(ManagerError::InvalidTransition {
                service: name.to_string(),
                command: "resume",
                state,
            }),
        }
    }

    /// Final transition to `STOPPED`: drains in-flight work and joins the
    /// worker within the stop timeout. Idempotent.
    pub fn stop(&mut self, name: &str) -> Result<()> {
        // Stopping the producer while it is blocked on a full queue would
        // wait forever; close the queue first to unblock it.
        if self
            .services
            .first()
            .map(|s| s.name == name)
            .unwrap_or(false)
        {
            if let Some(queue) = &self.queue {
                queue.close();
            }
        }
        let stop_timeout = self.stop_timeout;
        let service = self.find_mut(name)?;
        match service.state {
            ServiceState::NotStarted => {
                service.state = ServiceState::Stopped;
                Ok(())
            }
            ServiceState::Stopped => Ok(()),
            ServiceState::Running | ServiceState::Paused => {
                if let Some(control) = service.control.as_ref() {
                    // a false acknowledgement means the worker already exited
                    let _ = control.stop();
                }
                if let Some(handle) = service.handle.take() {
                    let deadline = Instant::now() + stop_timeout;
                    while !handle.is_finished() {
                        if Instant::now() >= deadline {
                            // caller observes the unchanged state and may escalate
                            warn!("service {} did not stop in time", service.name);
                            service.handle = Some(handle);
                            return Err(ManagerError::StopTimeout(service.name.clone()));
                        }
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    let _ = handle.join();
                }
                service.state = ServiceState::Stopped;
                info!("service {} stopped", name);
                Ok(())
            }
        }
    }

    /// Start every service whose configuration asked for it.
    pub fn start_auto(&mut self) -> Result<()> {
        let names: Vec<(String, bool)> = self
            .services
            .iter()
            .map(|s| (s.name.clone(), s.auto_start))
            .collect();
        for (name, auto_start) in names {
            if auto_start {
                self.start(&name)?;
            }
        }
        Ok(())
    }

    /// Start all services in registration order.
    pub fn start_all(&mut self) -> Result<()> {
        for name in self.service_names() {
            self.start(&name)?;
        }
        Ok(())
    }

    /// Pause all running services in registration order.
    pub fn pause_all(&mut self) -> Result<()> {
        for name in self.service_names() {
            if self.state(&name)? == ServiceState::Running {
                self.pause(&name)?;
            }
        }
        Ok(())
    }

    /// Resume all paused services in registration order.
    pub fn resume_all(&mut self) -> Result<()> {
        for name in self.service_names() {
            if self.state(&name)? == ServiceState::Paused {
                self.resume(&name)?;
            }
        }
        Ok(())
    }

    /// Stop everything: close the queue, then stop services in
    /// registration order so no consumer dies while data is still arriving.
    /// Returns only after every service is `STOPPED`.
    pub fn stop_all(&mut self) -> Result<()> {
        if let Some(queue) = &self.queue {
            queue.close();
        }
        let mut first_error = None;
        for name in self.service_names() {
            if let Err(err) = self.stop(&name) {
                warn!("stop_all: {}", err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn find_mut(&mut self, name: &str) -> Result<&mut ManagedService> {
        self.services
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| ManagerError::UnknownService(name.to_string()))
    }
}
