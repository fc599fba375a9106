mod classify;
mod collect;
mod docker;
mod input;
mod render;
mod store;
mod tabs;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};
use simplelog::WriteLogger;

use crate::collect::{join_with_timeout, LogCollector};
use crate::docker::{manifest_services, Container, ContainerDirectory, DockerCli, StreamSource};
use crate::input::TerminalGuard;
use crate::render::{resume_with_render, PauseGate, Screen};
use crate::store::LogStore;
use crate::tabs::{Tab, TabRegistry};

const SCHEDULER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(
    name = "ct",
    version,
    about = "Browse docker container logs as terminal tabs"
)]
struct Cli {
    /// Container names to show (default: every service in the manifest,
    /// or every running container with --running)
    containers: Vec<String>,

    /// Only show containers that are currently running
    #[arg(short, long)]
    running: bool,

    /// Compose manifest whose services make up the tab set
    #[arg(
        short = 'f',
        long,
        value_name = "PATH",
        default_value = "docker-compose.yml"
    )]
    manifest: PathBuf,

    /// Seconds between background screen refreshes
    #[arg(long, value_name = "SECONDS", default_value_t = 0.3)]
    update_interval: f64,

    /// Append diagnostics to this file (stdout belongs to the UI)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("ct: {err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(cli: Cli) -> Result<()> {
    if let Some(path) = &cli.log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        WriteLogger::init(LevelFilter::Debug, simplelog::Config::default(), file)
            .context("installing the file logger")?;
    }

    let docker = Arc::new(DockerCli);
    let directory: Arc<dyn ContainerDirectory> = docker.clone();
    let containers = discover(directory.as_ref(), &cli)?;
    if containers.is_empty() {
        if cli.running {
            println!("No running containers found.");
        } else {
            println!("No containers found in {}.", cli.manifest.display());
        }
        return Ok(());
    }
    info!("browsing {} containers", containers.len());

    let source: Arc<dyn StreamSource> = docker;
    let mut tabs = Vec::with_capacity(containers.len());
    let mut collectors = Vec::with_capacity(containers.len());
    for container in containers {
        let store = Arc::new(LogStore::new());
        collectors.push(LogCollector::new(
            container.clone(),
            Arc::clone(&store),
            Arc::clone(&directory),
            Arc::clone(&source),
        ));
        tabs.push(Tab { container, store });
    }
    let registry = Arc::new(TabRegistry::new(tabs));
    let screen = Arc::new(Screen::new(Arc::clone(&registry)));
    let gate = Arc::new(PauseGate::new());
    resume_with_render(&gate, &screen);

    let update_interval = Duration::from_secs_f64(cli.update_interval.max(0.05));
    let outcome = start_collectors(&collectors)
        .and_then(|()| ui_session(&registry, &screen, &gate, &collectors, update_interval));
    // Idempotent; covers the paths where the session never reached its own
    // shutdown sequence.
    for collector in &collectors {
        collector.stop();
    }
    outcome
}

fn discover(directory: &dyn ContainerDirectory, cli: &Cli) -> Result<Vec<Container>> {
    let selection = (!cli.containers.is_empty()).then_some(cli.containers.as_slice());
    if cli.running {
        let mut containers = directory.list_running()?;
        if let Some(names) = selection {
            containers.retain(|container| names.contains(&container.name));
        }
        Ok(containers)
    } else {
        let mut names = manifest_services(&cli.manifest)?;
        if let Some(selected) = selection {
            names.retain(|name| selected.contains(name));
        }
        names.iter().map(|name| directory.resolve(name)).collect()
    }
}

fn start_collectors(collectors: &[LogCollector]) -> Result<()> {
    for collector in collectors {
        collector
            .start()
            .with_context(|| format!("collecting logs of {}", collector.container().name))?;
    }
    Ok(())
}

fn ui_session(
    registry: &Arc<TabRegistry>,
    screen: &Arc<Screen>,
    gate: &Arc<PauseGate>,
    collectors: &[LogCollector],
    update_interval: Duration,
) -> Result<()> {
    let mut stdout = io::stdout();
    let _terminal = TerminalGuard::enter(&mut stdout)?;
    screen.draw()?;

    let stop_scheduler = Arc::new(AtomicBool::new(false));
    let scheduler = input::spawn_render_scheduler(
        Arc::clone(screen),
        Arc::clone(registry),
        Arc::clone(gate),
        update_interval,
        Arc::clone(&stop_scheduler),
    )
    .context("spawning the render scheduler")?;

    let outcome = input::run_event_loop(registry, screen, gate);

    info!("shutting down");
    for collector in collectors {
        collector.stop();
    }
    stop_scheduler.store(true, Ordering::Relaxed);
    if !join_with_timeout(scheduler, SCHEDULER_JOIN_TIMEOUT) {
        warn!("render scheduler ignored shutdown for {SCHEDULER_JOIN_TIMEOUT:?}");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use anyhow::Result;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use crossterm::style::Color;

    use super::{discover, Cli};
    use crate::classify::Severity;
    use crate::docker::{Container, ContainerDirectory};
    use crate::input::{action_for_key, Action};
    use crate::store::{LogLine, LogStore};
    use crate::tabs::{Direction, Tab, TabRegistry};

    struct FakeDirectory {
        running: Vec<Container>,
    }

    impl ContainerDirectory for FakeDirectory {
        fn list_running(&self) -> Result<Vec<Container>> {
            Ok(self.running.clone())
        }

        fn resolve(&self, name: &str) -> Result<Container> {
            Ok(Container {
                id: name.to_owned(),
                name: name.to_owned(),
            })
        }

        fn is_running(&self, _id: &str) -> bool {
            true
        }
    }

    fn cli(containers: &[&str], running: bool) -> Cli {
        Cli {
            containers: containers.iter().map(|name| (*name).to_owned()).collect(),
            running,
            manifest: PathBuf::from("docker-compose.yml"),
            update_interval: 0.3,
            log_file: None,
        }
    }

    fn named(name: &str) -> Container {
        Container {
            id: format!("id-{name}"),
            name: name.to_owned(),
        }
    }

    #[test]
    fn discovery_filters_running_containers_by_name() {
        let directory = FakeDirectory {
            running: vec![named("api"), named("worker"), named("db")],
        };
        let all = discover(&directory, &cli(&[], true)).unwrap();
        assert_eq!(all.len(), 3);

        let picked = discover(&directory, &cli(&["db", "api"], true)).unwrap();
        let names: Vec<_> = picked.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["api", "db"]);

        let none = discover(&directory, &cli(&["ghost"], true)).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn three_container_scenario_badges_and_cycling() {
        let registry = TabRegistry::new(
            ["api", "worker", "db"]
                .into_iter()
                .map(|name| Tab {
                    container: named(name),
                    store: Arc::new(LogStore::new()),
                })
                .collect(),
        );
        registry.tabs()[0]
            .store
            .append(LogLine::arrived_now("ERROR: crashed".to_owned()));
        registry.tabs()[1]
            .store
            .append(LogLine::arrived_now("INFO: started".to_owned()));

        // Red badge, blue badge, no badge.
        assert_eq!(
            registry.tabs()[0].store.most_urgent_unseen(),
            Severity::Error
        );
        assert_eq!(Severity::Error.color(), Some(Color::Red));
        assert_eq!(
            registry.tabs()[1].store.most_urgent_unseen(),
            Severity::Info
        );
        assert_eq!(Severity::Info.color(), Some(Color::AnsiValue(81)));
        assert_eq!(registry.tabs()[2].store.unseen_count(), 0);

        // Pressing `d` three times cycles back to the original tab.
        let d_key = KeyEvent::new(KeyCode::Char('d'), KeyModifiers::NONE);
        for _ in 0..3 {
            assert_eq!(action_for_key(&d_key), Some(Action::SwitchForward));
            registry.switch(Direction::Forward);
        }
        assert_eq!(registry.active_index(), 0);
    }
}
