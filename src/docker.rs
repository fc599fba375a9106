use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context, Result};
use log::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub name: String,
}

/// Answers "what exists and is it alive" questions about containers.
pub trait ContainerDirectory: Send + Sync {
    fn list_running(&self) -> Result<Vec<Container>>;
    fn resolve(&self, name: &str) -> Result<Container>;
    fn is_running(&self, id: &str) -> bool;
}

/// Produces a follow-mode line stream for one container, owned exclusively
/// by the opener and terminable early.
pub trait StreamSource: Send + Sync {
    fn open(&self, container: &Container) -> Result<Box<dyn LogStream>>;
}

pub trait LogStream: Send {
    fn take_reader(&mut self) -> Result<Box<dyn BufRead + Send>>;
    fn terminate(&mut self);
}

/// The real thing: shells out to the docker CLI.
pub struct DockerCli;

impl ContainerDirectory for DockerCli {
    fn list_running(&self) -> Result<Vec<Container>> {
        let output = Command::new("docker")
            .args(["ps", "--format", "{{.ID}}\t{{.Names}}"])
            .output()
            .context("running `docker ps`")?;
        if !output.status.success() {
            bail!("`docker ps` exited with {}", output.status);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|line| line.split_once('\t'))
            .map(|(id, name)| Container {
                id: id.trim().to_owned(),
                name: name.trim().to_owned(),
            })
            .collect())
    }

    fn resolve(&self, name: &str) -> Result<Container> {
        let output = Command::new("docker")
            .args(["inspect", "--format", "{{.Id}}", name])
            .output()
            .context("running `docker inspect`")?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if !output.status.success() || id.is_empty() {
            // Not created yet. Docker accepts names wherever ids go, so the
            // name still works for logs, liveness checks, and exec.
            return Ok(Container {
                id: name.to_owned(),
                name: name.to_owned(),
            });
        }
        Ok(Container {
            id,
            name: name.to_owned(),
        })
    }

    fn is_running(&self, id: &str) -> bool {
        Command::new("docker")
            .args(["inspect", "--format", "{{.State.Running}}", id])
            .output()
            .map(|output| {
                output.status.success()
                    && String::from_utf8_lossy(&output.stdout).trim() == "true"
            })
            .unwrap_or(false)
    }
}

impl StreamSource for DockerCli {
    fn open(&self, container: &Container) -> Result<Box<dyn LogStream>> {
        let child = Command::new("docker")
            .args(["logs", "--follow", &container.id])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("spawning `docker logs --follow {}`", container.name))?;
        debug!("following logs of {}", container.name);
        Ok(Box::new(DockerLogStream { child }))
    }
}

struct DockerLogStream {
    child: Child,
}

impl LogStream for DockerLogStream {
    fn take_reader(&mut self) -> Result<Box<dyn BufRead + Send>> {
        let stdout = self
            .child
            .stdout
            .take()
            .context("log stream output already taken")?;
        Ok(Box::new(BufReader::new(stdout)))
    }

    fn terminate(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Service names declared in a compose manifest, in declaration order.
pub fn manifest_services(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    services_from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
}

fn services_from_yaml(text: &str) -> Result<Vec<String>> {
    let doc: serde_yaml::Value = serde_yaml::from_str(text)?;
    let services = doc
        .get("services")
        .and_then(serde_yaml::Value::as_mapping)
        .context("manifest has no `services:` mapping")?;
    Ok(services
        .iter()
        .filter_map(|(key, _)| key.as_str().map(str::to_owned))
        .collect())
}

/// Runs `command` inside the container, inheriting the controlling terminal
/// and blocking until it finishes. Failures of the command itself surface
/// through its own output only.
pub fn run_command(container: &Container, command: &str) -> Result<()> {
    let status = Command::new("docker")
        .args(["exec", "-it", &container.id, "sh", "-c", command])
        .status()
        .context("running `docker exec`")?;
    debug!("command in {} exited with {status}", container.name);
    Ok(())
}

/// Opens an interactive shell inside the container, blocking until it exits.
pub fn run_shell(container: &Container) -> Result<()> {
    let status = Command::new("docker")
        .args(["exec", "-it", &container.id, "sh"])
        .status()
        .context("running `docker exec`")?;
    debug!("shell in {} exited with {status}", container.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::services_from_yaml;

    #[test]
    fn services_are_read_in_declaration_order() {
        let yaml = "\
version: '3'
services:
  api:
    image: api:latest
  worker:
    image: worker:latest
  db:
    image: postgres:16
";
        assert_eq!(
            services_from_yaml(yaml).unwrap(),
            vec!["api", "worker", "db"]
        );
    }

    #[test]
    fn manifest_without_services_is_an_error() {
        assert!(services_from_yaml("volumes: {}").is_err());
        assert!(services_from_yaml("just a string").is_err());
    }
}
