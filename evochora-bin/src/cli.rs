//! The interactive control console.
//!
//! Commands: `start [service]`, `pause [service]`, `resume [service]`,
//! `status`, `exit|quit`. An absent service name means "all".

use evochora_launcher::ServiceManager;
use std::io::{self, BufRead, Write};

const USAGE: &str = "commands: start [service] | pause [service] | resume [service] | status | exit";

/// Read commands from stdin until `exit`/`quit` or end of input.
pub fn run(manager: &mut ServiceManager) {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break, // EOF behaves like exit
            Ok(_) => {}
        }
        if !dispatch(manager, &line) {
            break;
        }
    }
}

/// Handle one console line; returns false when the console should exit.
fn dispatch(manager: &mut ServiceManager, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let command = match words.next() {
        Some(command) => command,
        None => return true,
    };
    let service = words.next();

    match command {
        "start" => apply(manager, service, |m, s| m.start(s), ServiceManager::start_all),
        "pause" => apply(manager, service, |m, s| m.pause(s), ServiceManager::pause_all),
        "resume" => apply(manager, service, |m, s| m.resume(s), ServiceManager::resume_all),
        "status" => println!("{}", manager.status()),
        "exit" | "quit" => return false,
        _ => println!("{}", USAGE),
    }
    true
}

fn apply<F, A>(manager: &mut ServiceManager, service: Option<&str>, one: F, all: A)
where
    F: Fn(&mut ServiceManager, &str) -> evochora_launcher::Result<()>,
    A: Fn(&mut ServiceManager) -> evochora_launcher::Result<()>,
{
    let result = match service {
        Some(name) => one(manager, name),
        None => all(manager),
    };
    if let Err(err) = result {
        println!("{}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evochora_launcher::{ServiceControl, ServiceManager, ServiceState};
    use std::time::Duration;

    struct NoopControl;

    impl ServiceControl for NoopControl {
        fn pause(&self) -> bool {
            true
        }
        fn resume(&self) -> bool {
            true
        }
        fn stop(&self) -> bool {
            true
        }
    }

    fn manager() -> ServiceManager {
        let mut manager = ServiceManager::new(Duration::from_secs(1));
        manager.register(
            "simulation",
            true,
            Box::new(|| {
                (
                    std::thread::spawn(|| {}),
                    Box::new(NoopControl) as Box<dyn ServiceControl>,
                )
            }),
        );
        manager
    }

    #[test]
    fn commands_drive_the_manager() {
        let mut m = manager();
        assert!(dispatch(&mut m, "start simulation\n"));
        assert_eq!(m.state("simulation").unwrap(), ServiceState::Running);
        assert!(dispatch(&mut m, "pause\n"));
        assert_eq!(m.state("simulation").unwrap(), ServiceState::Paused);
        assert!(dispatch(&mut m, "resume simulation\n"));
        assert_eq!(m.state("simulation").unwrap(), ServiceState::Running);
        assert!(dispatch(&mut m, "status\n"));
        assert!(dispatch(&mut m, "bogus command\n"));
        assert!(dispatch(&mut m, "   \n"));
        assert!(!dispatch(&mut m, "exit\n"));
        assert!(!dispatch(&mut m, "quit\n"));
    }

    #[test]
    fn unknown_service_is_reported_not_fatal() {
        let mut m = manager();
        // prints the error and keeps the console alive
        assert!(dispatch(&mut m, "start server\n"));
        assert_eq!(m.state("simulation").unwrap(), ServiceState::NotStarted);
    }
}
