//! Evochora simulation service.
//!
//! The [`SimulationService`] provides a single-threaded background executor
//! for one [`Simulation`]: it advances ticks and publishes each snapshot to
//! the tick queue, blocking on queue back-pressure. Lifecycle commands are
//! acknowledged only at tick boundaries; the worker never stops mid-tick.

use crate::Simulation;
use evochora_channel::{
    bounded, select, Receiver, Request, Sender, TryRecvError, CONTROL_CHANNEL_SIZE,
};
use evochora_queue::TickQueue;
use evochora_stop_handler::new_crossbeam_exit_rx;
use log::{debug, error, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Lifecycle commands accepted by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationCommand {
    Pause,
    Resume,
    Stop,
}

/// Cloneable handle to a running simulation worker.
#[derive(Clone)]
pub struct SimulationController {
    control: Sender<Request<SimulationCommand, ()>>,
    current_tick: Arc<AtomicU64>,
}

impl SimulationController {
    /// Request a pause; returns once the worker acknowledged at a tick
    /// boundary, `false` if the worker is gone.
    pub fn pause(&self) -> bool {
        Request::call(&self.control, SimulationCommand::Pause).is_some()
    }

    /// Resume a paused worker.
    pub fn resume(&self) -> bool {
        Request::call(&self.control, SimulationCommand::Resume).is_some()
    }

    /// Stop the worker for good.
    pub fn stop(&self) -> bool {
        Request::call(&self.control, SimulationCommand::Stop).is_some()
    }

    /// The next tick the engine will produce; equivalently, the number of
    /// ticks published so far.
    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::SeqCst)
    }
}

/// The simulation background service.
pub struct SimulationService {
    simulation: Simulation,
    queue: Arc<TickQueue>,
    max_ticks: Option<u64>,
}

impl SimulationService {
    /// Wrap a prepared simulation for background execution.
    pub fn new(
        simulation: Simulation,
        queue: Arc<TickQueue>,
        max_ticks: Option<u64>,
    ) -> SimulationService {
        SimulationService {
            simulation,
            queue,
            max_ticks,
        }
    }

    /// Spawn the worker thread.
    pub fn start<S: ToString>(self, thread_name: Option<S>) -> (JoinHandle<()>, SimulationController) {
        let (control_tx, control_rx) = bounded(CONTROL_CHANNEL_SIZE);
        let current_tick = Arc::new(AtomicU64::new(self.simulation.current_tick()));

        let mut thread_builder = thread::Builder::new();
        if let Some(name) = thread_name {
            thread_builder = thread_builder.name(name.to_string());
        }
        let worker_tick = Arc::clone(&current_tick);
        let join_handle = thread_builder
            .spawn(move || self.run(control_rx, worker_tick))
            .expect("start SimulationService failed");

        (
            join_handle,
            SimulationController {
                control: control_tx,
                current_tick,
            },
        )
    }

    fn run(mut self, control_rx: Receiver<Request<SimulationCommand, ()>>, tick: Arc<AtomicU64>) {
        let signal_receiver = new_crossbeam_exit_rx();
        let mut paused = false;

        loop {
            if paused {
                select! {
                    recv(control_rx) -> msg => match msg {
                        Ok(request) => {
                            if Self::handle(request, &mut paused) {
                                break;
                            }
                        }
                        Err(_) => {
                            debug!("simulation control channel closed, exit now");
                            break;
                        }
                    },
                    recv(signal_receiver) -> _ => {
                        info!("SimulationService received exit signal, exit now");
                        break;
                    }
                }
                continue;
            }

            // Tick boundary: drain control and exit signals before planning.
            match control_rx.try_recv() {
                Ok(request) => {
                    if Self::handle(request, &mut paused) {
                        break;
                    }
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    debug!("simulation control channel closed, exit now");
                    break;
                }
            }
            if !matches!(signal_receiver.try_recv(), Err(TryRecvError::Empty)) {
                info!("SimulationService received exit signal, exit now");
                break;
            }
            if let Some(max) = self.max_ticks {
                if self.simulation.current_tick() >= max {
                    info!("simulation reached max_ticks {}, exit now", max);
                    break;
                }
            }

            match self.simulation.step() {
                Ok(state) => {
                    tick.store(self.simulation.current_tick(), Ordering::SeqCst);
                    if self.queue.put(state).is_err() {
                        info!("tick queue closed, simulation exits");
                        break;
                    }
                }
                Err(err) => {
                    error!("simulation tick failed fatally: {}", err);
                    break;
                }
            }
        }
    }

    /// Apply a command; returns true when the worker must exit. The
    /// acknowledgement doubles as the boundary guarantee: it is sent only
    /// from between ticks.
    fn handle(request: Request<SimulationCommand, ()>, paused: &mut bool) -> bool {
        let Request {
            responder,
            arguments,
        } = request;
        let stop = match arguments {
            SimulationCommand::Pause => {
                *paused = true;
                false
            }
            SimulationCommand::Resume => {
                *paused = false;
                false
            }
            SimulationCommand::Stop => true,
        };
        let _ = responder.send(());
        stop
    }
}
